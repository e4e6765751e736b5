//! OpenCL host driver: device setup, buffer lifecycle and kernel
//! orchestration.
//!
//! [`Engine`] owns the device-global state: the selected platform/device,
//! a profiling command queue and the two compiled programs. [`Runner`] owns
//! the per-graph buffer set, sized for a maximum chunk length so it can be
//! reused across [`Runner::run`] calls. One run dispatches the automaton
//! kernel over all start offsets, then the transform/scan/move compaction
//! pipeline, and downloads the dense match list.
//!
//! The host side is single-threaded: all commands go to one in-order queue
//! with `finish()` points between phases.

use std::sync::Arc;

use ocl::enums::{DeviceInfo, DeviceInfoResult, ProfilingInfo};
use ocl::flags::{CommandQueueProperties, MemFlags};
use ocl::{Buffer, Context, Device, Event, Kernel, Platform, Program, Queue};

use crate::config::{
    FLAGS_N, FLAG_ITER_MAX, FLAG_STACK_FULL, GROUP_SIZE, MULTI_INPUT_N, OVERSIZE_CACHE,
};
use crate::regexp::SerializedGraph;
use crate::{config, sanity_assert, Error, Result};

const AUTOMATON_SRC: &str = include_str!("kernels/automaton.cl");
const COLLECTOR_SRC: &str = include_str!("kernels/collector.cl");

/// Compile-time constants forwarded to the OpenCL compiler.
fn kernel_defines() -> Vec<(&'static str, String)> {
    vec![
        ("CACHE_MASK", format!("0x{:08x}u", config::CACHE_MASK)),
        ("FLAG_ITER_MAX", FLAG_ITER_MAX.to_string()),
        ("FLAG_STACK_FULL", FLAG_STACK_FULL.to_string()),
        ("GROUP_SIZE", GROUP_SIZE.to_string()),
        ("ID_BEGIN", crate::regexp::ID_BEGIN.to_string()),
        ("ID_FAIL", crate::regexp::ID_FAIL.to_string()),
        ("ID_OK", crate::regexp::ID_OK.to_string()),
        ("MAX_ITER_COUNT", config::MAX_ITER_COUNT.to_string()),
        ("MAX_STACK_SIZE", config::MAX_STACK_SIZE.to_string()),
        ("OVERSIZE_CACHE", OVERSIZE_CACHE.to_string()),
        ("RESULT_FAIL", format!("0x{:08x}u", config::RESULT_FAIL)),
        ("SYNC_COUNT", config::SYNC_COUNT.to_string()),
        ("USE_CACHE", config::USE_CACHE.to_string()),
    ]
}

/// Device-global state, shared by any number of runners.
pub struct Engine {
    device: Device,
    queue: Queue,
    program_automaton: Program,
    program_collector: Program,
}

impl Engine {
    /// Select the first platform and device, verify its byte order and
    /// compile both kernel programs.
    pub fn new() -> Result<Self> {
        // TODO: let the user pick platform/device via CLI flags
        let platforms = Platform::list();
        let platform = *platforms
            .first()
            .ok_or_else(|| Error::user("no OpenCL platforms found!"))?;
        let devices = Device::list_all(platform)?;
        let device = *devices
            .first()
            .ok_or_else(|| Error::user("no OpenCL devices found!"))?;
        ensure_little_endian(&device)?;
        log::debug!(
            "using OpenCL platform \"{}\", device \"{}\"",
            platform.name()?,
            device.name()?
        );

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()?;
        let queue = Queue::new(
            &context,
            device,
            Some(CommandQueueProperties::PROFILING_ENABLE),
        )?;

        let program_automaton = build_program(AUTOMATON_SRC, &context, device)?;
        let program_collector = build_program(COLLECTOR_SRC, &context, device)?;

        Ok(Self {
            device,
            queue,
            program_automaton,
            program_collector,
        })
    }
}

/// Per-graph buffer set, reusable for any chunk up to `max_chunk_size`
/// code points.
pub struct Runner {
    engine: Arc<Engine>,
    max_chunk_size: u32,
    graph: SerializedGraph,
    print_profile: bool,
    d_automaton: Buffer<u32>,
    d_text: Buffer<u32>,
    d_output: Buffer<u32>,
    d_flags: Buffer<u8>,
    d_scan0: Buffer<u32>,
    d_scan1: Buffer<u32>,
}

impl Runner {
    /// Allocate the buffer set and upload the serialized graph.
    pub fn new(
        engine: Arc<Engine>,
        max_chunk_size: u32,
        graph: &SerializedGraph,
        print_profile: bool,
    ) -> Result<Self> {
        sanity_assert!(max_chunk_size > 0, "runner needs a non-zero chunk capacity");

        // the automaton buffer lives in constant memory on the device
        let max_constant = max_constant_buffer_size(&engine.device)?;
        if graph.size_bytes() as u64 > max_constant {
            return Err(Error::user(
                "compiled automaton is too large for the OpenCL device!",
            ));
        }

        let queue = engine.queue.clone();
        let len = max_chunk_size as usize;
        let d_automaton = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_only())
            .len(graph.data.len())
            .build()?;
        let d_text = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_only())
            .len(len)
            .build()?;
        let d_output = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_write())
            .len(len)
            .build()?;
        let d_flags = Buffer::<u8>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_write())
            .len(FLAGS_N)
            .build()?;
        let d_scan0 = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_write())
            .len(len)
            .build()?;
        let d_scan1 = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_write())
            .len(len)
            .build()?;

        let mut evt_upload = Event::empty();
        d_automaton.cmd().write(&graph.data).enew(&mut evt_upload).enq()?;
        queue.finish()?;

        if print_profile {
            println!("Profiling data:");
            println!("  uploadAutomaton    = {}ms", event_ms(&evt_upload)?);
        }

        Ok(Self {
            engine,
            max_chunk_size,
            graph: graph.clone(),
            print_profile,
            d_automaton,
            d_text,
            d_output,
            d_flags,
            d_scan0,
            d_scan1,
        })
    }

    /// Search one chunk, returning the ascending match start offsets.
    ///
    /// A raised engine flag (stack full, iteration budget) invalidates the
    /// whole run; no partial result is ever returned.
    pub fn run(&self, chunk: &[u32]) -> Result<Vec<u32>> {
        sanity_assert!(!chunk.is_empty(), "chunk must contain content");
        sanity_assert!(
            chunk.len() <= self.max_chunk_size as usize,
            "chunk is too big for this config"
        );
        let size = chunk.len();
        let queue = &self.engine.queue;

        // uploads
        let mut evt_upload_text = Event::empty();
        let mut evt_upload_flags = Event::empty();
        self.d_text.cmd().write(chunk).enew(&mut evt_upload_text).enq()?;
        let flags = vec![0u8; FLAGS_N];
        self.d_flags.cmd().write(&flags).enew(&mut evt_upload_flags).enq()?;

        // automaton: one work-item per MULTI_INPUT_N start offsets
        let auto_items = (size + MULTI_INPUT_N as usize - 1) / MULTI_INPUT_N as usize;
        let kernel_automaton = Kernel::builder()
            .program(&self.engine.program_automaton)
            .name("automaton")
            .queue(queue.clone())
            .global_work_size(adjust_global_size(auto_items, GROUP_SIZE))
            .local_work_size(GROUP_SIZE as usize)
            .arg(self.graph.n)
            .arg(self.graph.o)
            .arg(size as u32)
            .arg(MULTI_INPUT_N)
            .arg(&self.d_automaton)
            .arg(&self.d_text)
            .arg(&self.d_output)
            .arg(&self.d_flags)
            .arg_local::<u32>((GROUP_SIZE * OVERSIZE_CACHE) as usize)
            .build()?;
        let mut evt_automaton = Event::empty();
        unsafe {
            kernel_automaton.cmd().enew(&mut evt_automaton).enq()?;
        }

        // compaction
        let global = adjust_global_size(size, GROUP_SIZE);
        let kernel_transform = Kernel::builder()
            .program(&self.engine.program_collector)
            .name("transform")
            .queue(queue.clone())
            .global_work_size(global)
            .local_work_size(GROUP_SIZE as usize)
            .arg(&self.d_output)
            .arg(&self.d_scan0)
            .arg(size as u32)
            .build()?;
        let mut evt_transform = Event::empty();
        unsafe {
            kernel_transform.cmd().enew(&mut evt_transform).enq()?;
        }

        let mut evts_scan = Vec::new();
        let mut flip = false;
        let mut offset: u32 = 1;
        while (offset as usize) < size {
            let (src, dst) = if flip {
                (&self.d_scan1, &self.d_scan0)
            } else {
                (&self.d_scan0, &self.d_scan1)
            };
            let kernel_scan = Kernel::builder()
                .program(&self.engine.program_collector)
                .name("scan")
                .queue(queue.clone())
                .global_work_size(global)
                .local_work_size(GROUP_SIZE as usize)
                .arg(src)
                .arg(dst)
                .arg(size as u32)
                .arg(offset)
                .build()?;
            let mut evt = Event::empty();
            unsafe {
                kernel_scan.cmd().enew(&mut evt).enq()?;
            }
            evts_scan.push(evt);
            flip = !flip;
            offset <<= 1;
        }
        let (d_scan_result, d_compact) = if flip {
            (&self.d_scan1, &self.d_scan0)
        } else {
            (&self.d_scan0, &self.d_scan1)
        };

        let kernel_move = Kernel::builder()
            .program(&self.engine.program_collector)
            .name("move")
            .queue(queue.clone())
            .global_work_size(global)
            .local_work_size(GROUP_SIZE as usize)
            .arg(d_scan_result)
            .arg(&self.d_output)
            .arg(d_compact)
            .arg(size as u32)
            .build()?;
        let mut evt_move = Event::empty();
        unsafe {
            kernel_move.cmd().enew(&mut evt_move).enq()?;
        }

        // downloads: match count, then the dense match list, then the flags
        let mut count = vec![0u32; 1];
        let mut evt_count = Event::empty();
        d_scan_result
            .cmd()
            .offset(size - 1)
            .read(&mut count)
            .enew(&mut evt_count)
            .enq()?;
        let count = count[0] as usize;
        sanity_assert!(count <= size, "outputSize must be at most the chunk size");

        let mut output = vec![0u32; count];
        let mut evt_output = Event::empty();
        if count > 0 {
            d_compact
                .cmd()
                .read(&mut output)
                .enew(&mut evt_output)
                .enq()?;
        }

        let mut flags_back = vec![0u8; FLAGS_N];
        let mut evt_flags = Event::empty();
        self.d_flags
            .cmd()
            .read(&mut flags_back)
            .enew(&mut evt_flags)
            .enq()?;

        queue.finish()?;

        if self.print_profile {
            println!("Profiling data:");
            println!("  uploadText         = {}ms", event_ms(&evt_upload_text)?);
            println!("  uploadFlags        = {}ms", event_ms(&evt_upload_flags)?);
            println!("  kernelAutomaton    = {}ms", event_ms(&evt_automaton)?);
            println!("  kernelTransform    = {}ms", event_ms(&evt_transform)?);
            println!("  kernelScan         =");
            let mut scan_sum = 0.0f32;
            for evt in &evts_scan {
                let t = event_ms(evt)?;
                scan_sum += t;
                println!("    {}ms", t);
            }
            println!("    ====");
            println!("    {}ms", scan_sum);
            println!("  kernelMove         = {}ms", event_ms(&evt_move)?);
            println!("  downloadOutputSize = {}ms", event_ms(&evt_count)?);
            if count > 0 {
                println!("  downloadOutput     = {}ms", event_ms(&evt_output)?);
            }
            println!("  downloadFlags      = {}ms", event_ms(&evt_flags)?);
        }

        if flags_back[FLAG_STACK_FULL] != 0 {
            return Err(Error::user("Automaton engine error: task stack was full!"));
        }
        if flags_back[FLAG_ITER_MAX] != 0 {
            return Err(Error::user(
                "Automaton engine error: reached maximum iteration count!",
            ));
        }

        Ok(output)
    }
}

/// One-shot convenience: set up a device, run a single chunk, tear down.
pub fn run_engine(
    graph: &SerializedGraph,
    text: &[u32],
    print_profile: bool,
) -> Result<Vec<u32>> {
    let engine = Arc::new(Engine::new()?);
    let runner = Runner::new(engine, text.len() as u32, graph, print_profile)?;
    runner.run(text)
}

fn build_program(src: &str, context: &Context, device: Device) -> Result<Program> {
    let mut builder = Program::builder();
    builder.src(src).devices(device).cmplr_opt("-Werror");
    for (name, value) in kernel_defines() {
        builder.cmplr_opt(format!("-D{}={}", name, value));
    }
    builder
        .build(context)
        .map_err(|e| Error::internal(format!("OpenCL build errors:\n{}", e)))
}

fn ensure_little_endian(device: &Device) -> Result<()> {
    match device.info(DeviceInfo::EndianLittle)? {
        DeviceInfoResult::EndianLittle(true) => Ok(()),
        DeviceInfoResult::EndianLittle(false) => Err(Error::user(
            "the selected OpenCL device is not little endian!",
        )),
        other => Err(Error::internal(format!(
            "unexpected device response for EndianLittle: {}",
            other
        ))),
    }
}

fn max_constant_buffer_size(device: &Device) -> Result<u64> {
    match device.info(DeviceInfo::MaxConstantBufferSize)? {
        DeviceInfoResult::MaxConstantBufferSize(size) => Ok(size),
        other => Err(Error::internal(format!(
            "unexpected device response for MaxConstantBufferSize: {}",
            other
        ))),
    }
}

/// Round a global work size up to a multiple of the workgroup size.
fn adjust_global_size(global: usize, local: u32) -> usize {
    let local = local as usize;
    if global % local != 0 {
        global + local - global % local
    } else {
        global
    }
}

/// Milliseconds between the profiling start and end timestamps of an event.
fn event_ms(event: &Event) -> Result<f32> {
    event.wait_for()?;
    let start = event.profiling_info(ProfilingInfo::Start)?.time()?;
    let end = event.profiling_info(ProfilingInfo::End)?.time()?;
    Ok((end - start) as f32 / (1000.0 * 1000.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regexp::compile;
    use crate::text::to_utf32;

    fn search(regex: &str, text: &str) -> Result<Vec<u32>> {
        let graph = compile(&to_utf32(regex))?;
        run_engine(&graph, &to_utf32(text), false)
    }

    #[test]
    fn test_adjust_global_size() {
        assert_eq!(adjust_global_size(1, 64), 64);
        assert_eq!(adjust_global_size(64, 64), 64);
        assert_eq!(adjust_global_size(65, 64), 128);
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn test_device_scenarios() {
        assert_eq!(search("ab", "xababy").unwrap(), vec![1, 3]);
        assert_eq!(search("a{2,3}", "aaaa").unwrap(), vec![0, 1, 2]);
        assert_eq!(search("[a-c]+", "xabcabcx").unwrap(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(search("a*b", "aaabxb").unwrap(), vec![0, 1, 2, 3, 5]);
        assert_eq!(search("[0-9]{3}", "a123b45c678").unwrap(), vec![1, 8]);
        assert_eq!(search("ab?c", "acxabcxabbc").unwrap(), vec![0, 3]);
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn test_device_large_input() {
        // spans multiple workgroups and MULTI_INPUT_N blocks
        let text: String = "xab".repeat(50_000);
        let result = search("ab", &text).unwrap();
        assert_eq!(result.len(), 50_000);
        assert!(result.iter().enumerate().all(|(i, &s)| s as usize == 3 * i + 1));
    }

    #[test]
    #[ignore = "requires an OpenCL device"]
    fn test_device_runner_is_reusable() {
        let graph = compile(&to_utf32("a+")).unwrap();
        let engine = Arc::new(Engine::new().unwrap());
        let runner = Runner::new(engine, 16, &graph, false).unwrap();
        assert_eq!(runner.run(&to_utf32("xaxa")).unwrap(), vec![1, 3]);
        assert_eq!(runner.run(&to_utf32("aaaa")).unwrap(), vec![0, 1, 2, 3]);
    }
}

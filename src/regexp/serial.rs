//! Graph serialization: the flat 32-bit word layout the kernels consume.
//!
//! Layout, in words:
//!
//! ```text
//! [0 .. n)          dispatch table: word i = offset of node i's body
//! per node body:    m  (entry count)
//!                   m entries of 1 + o words each:
//!                       character key, then o target ids (ascending,
//!                       deduplicated, zero-padded; 0 == FAIL)
//! ```
//!
//! Entry keys are strictly increasing within a body, so the kernel can stop
//! scanning at the first key greater than the probed character. Padding with
//! zero works because zero is the FAIL id: short slots naturally dead-end.

use std::io::{self, Write};

use crate::{sanity_assert, Result};

use super::graph::{Graph, NodeId, ID_FAIL};

/// A serialized graph plus its two layout parameters: `n` (node count) and
/// `o` (maximum slot cardinality). Immutable once built; may be shared
/// across engine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedGraph {
    pub n: u32,
    pub o: u32,
    pub data: Vec<u32>,
}

impl SerializedGraph {
    /// Buffer size in bytes, as uploaded to the device.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<u32>()
    }

    /// Render the graph in the `--print-graph` format by reading the
    /// serialized buffer back through the dispatch table.
    pub fn dump(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(
            out,
            "Graph (n={}, o={}, size={} bytes):",
            self.n,
            self.o,
            self.size_bytes()
        )?;
        for node in 0..self.n as usize {
            let body = self.data[node] as usize;
            let m = self.data[body] as usize;
            writeln!(out, "  node{} (m={}):", node, m)?;
            for entry in 0..m {
                let base = body + 1 + entry * (1 + self.o as usize);
                let character = self.data[base];
                let targets = &self.data[base + 1..base + 1 + self.o as usize];
                let rendered: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
                writeln!(out, "    {} => [{}]", character, rendered.join(","))?;
            }
        }
        Ok(())
    }
}

/// Serialize a graph. Deterministic: byte-identical across runs for the
/// same input graph.
pub fn serialize(graph: &Graph) -> Result<SerializedGraph> {
    let n = graph.node_count();

    // pass 1: widest live target set across all entries
    let mut o = 1usize;
    for node in graph.nodes() {
        for &(_, slot) in &node.next {
            o = o.max(live_targets(graph.slot(slot)).len());
        }
    }

    // pass 2: dispatch table, then the bodies
    let mut data = vec![0u32; n];
    for node in graph.nodes() {
        sanity_assert!(
            node.next.windows(2).all(|w| w[0].0 < w[1].0),
            "node entry keys are not strictly increasing"
        );
        data[node.id as usize] = data.len() as u32;
        data.push(node.next.len() as u32);
        for &(character, slot) in &node.next {
            data.push(character);
            let targets = live_targets(graph.slot(slot));
            for &t in &targets {
                data.push(t);
            }
            for _ in targets.len()..o {
                data.push(ID_FAIL);
            }
        }
    }

    let expected: usize = n
        + graph
            .nodes()
            .iter()
            .map(|node| 1 + node.next.len() * (1 + o))
            .sum::<usize>();
    sanity_assert!(data.len() == expected, "serialized graph has unexpected size");

    Ok(SerializedGraph {
        n: n as u32,
        o: o as u32,
        data,
    })
}

/// The ids a slot actually dispatches to: sorted, deduplicated, FAIL
/// dropped (padding re-adds it implicitly).
fn live_targets(slot: &[NodeId]) -> Vec<NodeId> {
    let mut targets: Vec<NodeId> = slot.iter().copied().filter(|&t| t != ID_FAIL).collect();
    targets.sort_unstable();
    targets.dedup();
    targets
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::regexp::compile;
    use crate::text::to_utf32;

    fn compile_str(re: &str) -> SerializedGraph {
        compile(&to_utf32(re)).unwrap()
    }

    #[test]
    fn test_single_character_layout() {
        let g = compile_str("a");
        assert_eq!(g.n, 3);
        assert_eq!(g.o, 1);
        // dispatch table: FAIL and OK bodies are a lone zero entry count
        assert_eq!(g.data[0], 3);
        assert_eq!(g.data[1], 4);
        assert_eq!(g.data[2], 5);
        assert_eq!(g.data[3], 0);
        assert_eq!(g.data[4], 0);
        // node 2: m=3, entries (0,[0]) (97,[1]) (98,[0])
        assert_eq!(
            &g.data[5..],
            &[3, 0, 0, 97, 1, 98, 0]
        );
    }

    #[test]
    fn test_word_count_formula() {
        for re in ["a", "ab", "[a-z]+", "a{2,3}x", "a*b"] {
            let g = compile_str(re);
            let n = g.n as usize;
            let o = g.o as usize;
            let mut expected = n;
            for node in 0..n {
                let body = g.data[node] as usize;
                let m = g.data[body] as usize;
                expected += 1 + m * (1 + o);
            }
            assert_eq!(g.data.len(), expected, "{re}");
        }
    }

    #[test]
    fn test_keys_strictly_increasing_targets_sorted_unique() {
        for re in ["ab", "[a-c]+", "a{2,3}", "a*b", "[0-9x-z]{1,2}"] {
            let g = compile_str(re);
            let o = g.o as usize;
            for node in 0..g.n as usize {
                let body = g.data[node] as usize;
                let m = g.data[body] as usize;
                let mut last_key = None;
                for entry in 0..m {
                    let base = body + 1 + entry * (1 + o);
                    let key = g.data[base];
                    if let Some(last) = last_key {
                        assert!(key > last, "{re}: keys not increasing in node {node}");
                    }
                    last_key = Some(key);
                    let targets = &g.data[base + 1..base + 1 + o];
                    let live: Vec<u32> =
                        targets.iter().copied().take_while(|&t| t != 0).collect();
                    let mut sorted = live.clone();
                    sorted.sort_unstable();
                    sorted.dedup();
                    assert_eq!(live, sorted, "{re}: targets not sorted/unique");
                    // padding only after the live prefix
                    assert!(
                        targets[live.len()..].iter().all(|&t| t == 0),
                        "{re}: non-trailing padding"
                    );
                }
            }
        }
    }

    #[test]
    fn test_dispatch_offsets_in_range() {
        let g = compile_str("[a-f]{2,4}y");
        for node in 0..g.n as usize {
            let body = g.data[node] as usize;
            assert!(body >= g.n as usize && body < g.data.len());
        }
    }

    #[test]
    fn test_serialization_is_deterministic() {
        for re in ["ab", "[a-c]+", "a{2,3}", "a*b[x-z]?"] {
            assert_eq!(compile_str(re), compile_str(re), "{re}");
        }
    }

    #[test]
    fn test_class_normalization_is_canonical() {
        // reordering or duplicating class elements must not change the bytes
        let reference = compile_str("[a-c]");
        assert_eq!(compile_str("[c-ab-c]").data, reference.data);
        assert_eq!(compile_str("[abc]").data, reference.data);
        assert_eq!(compile_str("[cba]").data, reference.data);
        assert_eq!(compile_str("[aabc-c]").data, reference.data);
    }

    #[test]
    fn test_sugar_multipliers_compile_identically() {
        assert_eq!(compile_str("a?b"), compile_str("a{0,1}b"));
        assert_eq!(compile_str("a+b"), compile_str("a{1,}b"));
        assert_eq!(compile_str("a*b"), compile_str("a{0,}b"));
    }

    #[test]
    fn test_dump_format() {
        let g = compile_str("a");
        let mut out = Vec::new();
        g.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Graph (n=3, o=1, size=48 bytes):"), "{text}");
        assert!(text.contains("  node2 (m=3):"), "{text}");
        assert!(text.contains("    97 => [1]"), "{text}");
    }
}

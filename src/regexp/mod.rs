//! Regex compilation: parse, graph construction and serialization.
//!
//! [`compile`] runs the whole front half of the pipeline, turning a UTF-32
//! pattern into the flat buffer the engine uploads to the device.

pub mod graph;
pub mod parser;
pub mod serial;


pub use graph::{build, Graph, ID_BEGIN, ID_FAIL, ID_OK};
pub use parser::{parse, CharacterRange, Chunk, ChunkContent, Multiplier, Regex};
pub use serial::{serialize, SerializedGraph};

use crate::Result;

/// Compile a UTF-32 pattern into its serialized transition graph.
pub fn compile(pattern: &[u32]) -> Result<SerializedGraph> {
    let regex = parser::parse(pattern)?;
    let graph = graph::build(&regex)?;
    serial::serialize(&graph)
}

//! oclgrep: search text for all regex match positions on an OpenCL device.
//!
//! The pipeline has four stages: a regex parser producing a chunk AST
//! ([`regexp::parser`]), a graph builder turning the AST into a
//! nondeterministic character-indexed transition graph with explicit FAIL and
//! OK terminals ([`regexp::graph`]), a serializer laying the graph out as a
//! flat 32-bit word buffer behind a dispatch table ([`regexp::serial`]), and
//! the data-parallel engine that walks the graph from every start offset and
//! compacts the per-position results into a dense sorted match list
//! ([`engine`]).

pub mod config;
pub mod engine;
pub mod regexp;
pub mod text;

use thiserror::Error;

/// Errors reported by the compiler, the engine, or the surrounding tooling.
///
/// The three kinds are disjoint: `User` is misuse or an environmental
/// problem and is printed plainly; `Internal` means a bug (kernel build
/// failures, impossible device responses); `Sanity` is a violated invariant
/// and carries the source location of the check.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    User(String),
    #[error("{0}")]
    Internal(String),
    #[error("sanity check failed: \"{msg}\" @ {file}:{line}")]
    Sanity {
        msg: &'static str,
        file: &'static str,
        line: u32,
    },
}

impl Error {
    pub fn user(msg: impl Into<String>) -> Self {
        Error::User(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// True for errors caused by the user or the environment, as opposed to
    /// bugs that should be reported.
    pub fn is_user(&self) -> bool {
        matches!(self, Error::User(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// Runtime errors out of the OpenCL layer are not the user's fault.
impl From<ocl::Error> for Error {
    fn from(e: ocl::Error) -> Self {
        Error::Internal(format!("OpenCL error: {}", e))
    }
}

impl From<ocl::OclCoreError> for Error {
    fn from(e: ocl::OclCoreError) -> Self {
        Error::Internal(format!("OpenCL error: {}", e))
    }
}

/// Checks an invariant, returning [`Error::Sanity`] with the source location
/// when it does not hold.
#[macro_export]
macro_rules! sanity_assert {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::Error::Sanity {
                msg: $msg,
                file: file!(),
                line: line!(),
            });
        }
    };
}

pub use engine::{run_engine, Engine, Runner};
pub use regexp::{compile, SerializedGraph};

//! Crate wide error type.

use crate::datastr::graph::NodeId;
use thiserror::Error;

/// Everything that can go wrong while building, loading or querying a hierarchy.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not a compressed hierarchy of a version we can read.
    #[error("incompatible graph file: {0}")]
    IncompatibleFormat(String),
    /// A single node does not fit into an empty block. Rebuild with a larger block size.
    #[error("node {node} does not fit into an empty block of {block_size} bytes")]
    BlockOverflow { node: NodeId, block_size: u32 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A bit level access ran past the end of its buffer, the block data is corrupt.
    #[error("bit access of {bits} bits at bit {position} exceeds buffer of {len} bytes")]
    OutOfBounds { position: usize, bits: u8, len: usize },
    #[error("could not build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error types for navgraph.

use thiserror::Error;

/// Result type alias for navgraph operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring, saving or loading an index.
///
/// Broken concurrency invariants (double insert of a node id, removal of an
/// absent node) are not represented here: they are fatal assertions.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error while reading or writing a graph stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The saved graph is truncated or internally inconsistent.
    #[error("Corrupted graph: {0}")]
    CorruptedGraph(String),

    /// Invalid configuration value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A graph can only be loaded into an empty index.
    #[error("Index is not empty ({0} nodes)")]
    IndexNotEmpty(usize),
}

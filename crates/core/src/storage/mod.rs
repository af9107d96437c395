//! Graph persistence: binary snapshot writer, streaming loader, and file helpers.
//!
//! A snapshot is captured on the writer thread with
//! [`HnswIndex::make_saver`](crate::hnsw::HnswIndex::make_saver) and can then
//! be written from any thread. Loading goes through [`HnswIndexLoader`], which
//! validates the stream while it reads it.

/// Streaming graph loader with corruption checks.
pub mod loader;
/// File helpers: atomic save, load from path.
pub mod persistence;
/// Snapshot capture and binary graph writer.
pub mod saver;

pub use loader::HnswIndexLoader;
pub use persistence::{load_graph_file, save_graph_file};
pub use saver::HnswIndexSaver;

//! Saving and loading graphs through files.
//!
//! Writes go to a temp file that is renamed over the target, so a crash
//! mid-save never leaves a half-written graph behind.

use crate::error::Result;
use crate::hnsw::index::HnswIndex;
use crate::storage::saver::HnswIndexSaver;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Write a snapshot to `path` atomically.
pub fn save_graph_file(saver: &HnswIndexSaver, path: &Path) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let file = fs::File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        saver.save(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp_path, path)?;
    tracing::info!(path = %path.display(), nodes = saver.node_id_limit(), "wrote graph file");
    Ok(())
}

/// Load the graph stored at `path` into an empty index.
pub fn load_graph_file(index: &HnswIndex, path: &Path) -> Result<()> {
    let file = fs::File::open(path)?;
    index.load(BufReader::new(file))?;
    tracing::info!(path = %path.display(), nodes = index.node_count(), "read graph file");
    Ok(())
}

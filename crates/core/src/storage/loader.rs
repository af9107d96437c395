//! Streaming reader for graphs written by [`HnswIndexSaver`](super::HnswIndexSaver).

use crate::config;
use crate::error::{Error, Result};
use crate::hnsw::index::HnswIndex;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

fn truncated(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::CorruptedGraph("graph stream is truncated".into())
    } else {
        Error::Io(err)
    }
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    reader.read_u32::<LittleEndian>().map_err(truncated)
}

/// Loads a saved graph into an empty index one node id at a time.
///
/// ```no_run
/// # use navgraph_core::hnsw::HnswIndex;
/// # use navgraph_core::storage::HnswIndexLoader;
/// # fn load(index: &HnswIndex, file: std::fs::File) -> navgraph_core::error::Result<()> {
/// let mut loader = HnswIndexLoader::new(index, std::io::BufReader::new(file))?;
/// while loader.load_next()? {}
/// loader.finish()
/// # }
/// ```
pub struct HnswIndexLoader<'a, R: Read> {
    index: &'a HnswIndex,
    reader: R,
    entry_nodeid: u32,
    entry_level: i32,
    num_nodes: u32,
    next_nodeid: u32,
    multi_vector: bool,
}

impl<'a, R: Read> HnswIndexLoader<'a, R> {
    /// Read the header. Fails with [`Error::IndexNotEmpty`] unless `index` is empty.
    pub fn new(index: &'a HnswIndex, mut reader: R) -> Result<Self> {
        if !index.is_empty() {
            return Err(Error::IndexNotEmpty(index.node_count()));
        }
        let entry_nodeid = read_u32(&mut reader)?;
        let entry_level = reader.read_i32::<LittleEndian>().map_err(truncated)?;
        let num_nodes = read_u32(&mut reader)?;
        if entry_level < -1 || entry_level >= config::HNSW_MAX_LEVELS as i32 {
            return Err(Error::CorruptedGraph(format!(
                "entry level {entry_level} out of range"
            )));
        }
        let multi_vector = !index.id_mapping.lock().is_identity();
        Ok(Self {
            index,
            reader,
            entry_nodeid,
            entry_level,
            num_nodes,
            next_nodeid: 0,
            multi_vector,
        })
    }

    /// Number of node ids declared by the header.
    pub fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    /// Load the next node id. Returns false once every node id has been read.
    pub fn load_next(&mut self) -> Result<bool> {
        if self.next_nodeid >= self.num_nodes {
            return Ok(false);
        }
        let nodeid = self.next_nodeid;
        let num_levels = read_u32(&mut self.reader)?;
        if num_levels > config::HNSW_MAX_LEVELS {
            return Err(Error::CorruptedGraph(format!(
                "node {nodeid} has {num_levels} levels"
            )));
        }
        if num_levels > 0 {
            let (docid, subspace) = if self.multi_vector {
                (read_u32(&mut self.reader)?, read_u32(&mut self.reader)?)
            } else {
                (nodeid, 0)
            };
            // A document cannot have more subspaces than the graph has node ids
            if subspace >= self.num_nodes {
                return Err(Error::CorruptedGraph(format!(
                    "node {nodeid} claims subspace {subspace} of document {docid}"
                )));
            }
            let mut levels = Vec::with_capacity(num_levels as usize);
            for level in 0..num_levels as usize {
                let count = read_u32(&mut self.reader)?;
                let budget = self.index.config.max_links_for_level(level);
                if count > budget {
                    return Err(Error::CorruptedGraph(format!(
                        "node {nodeid} has {count} links at level {level}, budget is {budget}"
                    )));
                }
                let mut links = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let neighbor = read_u32(&mut self.reader)?;
                    if neighbor >= self.num_nodes || neighbor == nodeid {
                        return Err(Error::CorruptedGraph(format!(
                            "node {nodeid} links to invalid node {neighbor}"
                        )));
                    }
                    links.push(neighbor);
                }
                levels.push(links);
            }
            self.index
                .id_mapping
                .lock()
                .on_load(nodeid, docid, subspace)?;
            let graph = &self.index.graph;
            graph.make_node(nodeid, docid, subspace, levels.len());
            for (level, links) in levels.iter().enumerate() {
                graph.set_link_array(nodeid, level, links);
            }
        }
        self.next_nodeid += 1;
        Ok(true)
    }

    /// Load any remaining node ids, validate the graph and install its entry point.
    pub fn finish(mut self) -> Result<()> {
        while self.load_next()? {}
        let graph = &self.index.graph;
        for nodeid in 0..graph.node_id_limit() {
            let levels = graph.get_level_array(nodeid).len();
            for level in 0..levels {
                for neighbor in graph.get_link_array(nodeid, level).iter() {
                    if graph.get_level_array(neighbor).len() <= level {
                        return Err(Error::CorruptedGraph(format!(
                            "node {nodeid} links to node {neighbor} which has no level {level}"
                        )));
                    }
                }
            }
        }
        if self.entry_level >= 0 {
            let levels = graph.get_level_array(self.entry_nodeid).len();
            if levels <= self.entry_level as usize {
                return Err(Error::CorruptedGraph(format!(
                    "entry node {} with level {} is not present",
                    self.entry_nodeid, self.entry_level
                )));
            }
            graph.set_entry_node(Some((self.entry_nodeid, self.entry_level as u32)));
        } else if graph.node_count() > 0 {
            return Err(Error::CorruptedGraph(
                "graph has nodes but no entry point".into(),
            ));
        }
        self.index.id_mapping.lock().finish_load()?;
        tracing::info!(
            nodes = graph.node_count(),
            node_id_limit = graph.node_id_limit(),
            "loaded hnsw graph"
        );
        Ok(())
    }
}

impl HnswIndex {
    /// Load a saved graph into this (empty) index.
    ///
    /// On corruption the partially loaded graph is discarded, the index is left
    /// empty and the error is returned.
    pub fn load<R: Read>(&self, reader: R) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::IndexNotEmpty(self.node_count()));
        }
        let result = HnswIndexLoader::new(self, reader).and_then(HnswIndexLoader::finish);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "failed to load hnsw graph, index left empty");
            self.reset();
            self.commit();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::index::HnswIndexConfig;
    use crate::vectors::InMemoryVectors;
    use byteorder::WriteBytesExt;
    use std::sync::Arc;

    fn empty_index() -> HnswIndex {
        HnswIndex::new(
            HnswIndexConfig::default(),
            Arc::new(InMemoryVectors::new(1)),
        )
        .unwrap()
    }

    fn empty_multi_index() -> HnswIndex {
        HnswIndex::new(
            HnswIndexConfig::default().with_multi_vector(true),
            Arc::new(InMemoryVectors::new(1)),
        )
        .unwrap()
    }

    fn stream(words: &[i64]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (i, &w) in words.iter().enumerate() {
            if i == 1 {
                bytes.write_i32::<LittleEndian>(w as i32).unwrap();
            } else {
                bytes.write_u32::<LittleEndian>(w as u32).unwrap();
            }
        }
        bytes
    }

    #[test]
    fn test_load_small_graph() {
        // entry 1 @ level 0, 3 node ids, id 2 empty
        let bytes = stream(&[1, 0, 3, 1, 1, 1, 1, 1, 0, 0]);
        let index = empty_index();
        index.load(bytes.as_slice()).unwrap();
        assert_eq!(index.node_count(), 2);
        assert_eq!(index.graph().get_entry_node().unwrap().nodeid, 1);
        assert_eq!(index.graph().get_link_array(0, 0).to_vec(), vec![1]);
        assert_eq!(index.graph().get_link_array(1, 0).to_vec(), vec![0]);
        assert_eq!(index.graph().docid(1), 1);
    }

    #[test]
    fn test_truncated_stream() {
        let bytes = stream(&[1, 0, 3, 1, 1, 1, 1, 1]);
        let index = empty_index();
        let err = index.load(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, Error::CorruptedGraph(_)), "{err}");
        assert!(index.is_empty());
        assert!(index.graph().get_entry_node().is_none());
    }

    #[test]
    fn test_neighbor_out_of_range() {
        let bytes = stream(&[0, 0, 1, 1, 1, 5]);
        let err = empty_index().load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::CorruptedGraph(_)));
    }

    #[test]
    fn test_too_many_levels() {
        let bytes = stream(&[0, 0, 1, 99]);
        let err = empty_index().load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::CorruptedGraph(_)));
    }

    #[test]
    fn test_missing_entry_node() {
        let bytes = stream(&[2, 0, 1, 1, 0]);
        let err = empty_index().load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::CorruptedGraph(_)));
    }

    #[test]
    fn test_load_into_populated_index() {
        let vectors = Arc::new(InMemoryVectors::new(1));
        vectors.set(0, &[0.0]);
        let index = HnswIndex::new(HnswIndexConfig::default(), vectors).unwrap();
        index.add_document(0);
        let bytes = stream(&[0, -1, 0]);
        let err = index.load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::IndexNotEmpty(1)));
        assert_eq!(index.node_count(), 1);
    }

    #[test]
    fn test_multi_vector_huge_docid() {
        // One node for document u32::MAX, subspace 0, no links
        let bytes = stream(&[0, 0, 1, 1, u32::MAX as i64, 0, 0]);
        let index = empty_multi_index();
        index.load(bytes.as_slice()).unwrap();
        assert_eq!(index.graph().docid(0), u32::MAX);
        index.remove_document(u32::MAX);
        assert!(index.is_empty());
    }

    #[test]
    fn test_multi_vector_subspace_out_of_range() {
        let bytes = stream(&[0, 0, 1, 1, 3, u32::MAX as i64, 0]);
        let index = empty_multi_index();
        let err = index.load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::CorruptedGraph(_)), "{err}");
        assert!(index.is_empty());
    }

    #[test]
    fn test_multi_vector_duplicate_identity() {
        // Nodes 0 and 1 both claim document 5 subspace 0
        let bytes = stream(&[0, 0, 2, 1, 5, 0, 1, 1, 1, 5, 0, 1, 0]);
        let index = empty_multi_index();
        let err = index.load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::CorruptedGraph(_)), "{err}");
        assert!(index.is_empty());
        assert!(index.graph().get_entry_node().is_none());
    }

    #[test]
    fn test_multi_vector_missing_subspace() {
        // Document 5 has subspace 1 but no subspace 0
        let bytes = stream(&[0, 0, 2, 1, 5, 1, 0, 1, 6, 0, 0]);
        let err = empty_multi_index().load(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::CorruptedGraph(_)), "{err}");
    }

    #[test]
    fn test_streaming_loader_reports_declared_ids() {
        let bytes = stream(&[1, 0, 3, 1, 1, 1, 1, 1, 0, 0]);
        let index = empty_index();
        let mut loader = HnswIndexLoader::new(&index, bytes.as_slice()).unwrap();
        assert_eq!(loader.num_nodes(), 3);
        assert!(loader.load_next().unwrap());
        assert_eq!(index.node_count(), 1);
        loader.finish().unwrap();
        assert_eq!(index.node_count(), 2);
    }
}

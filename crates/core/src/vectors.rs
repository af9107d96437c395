//! Vector access: how the index reads the cells of a (document, subspace).
//!
//! The index never owns vector data. It reads cells through [`VectorAccess`],
//! which the embedding system implements on top of its own tensor storage.
//! [`InMemoryVectors`] is a simple implementation used by tests, benchmarks
//! and the command-line tool.

use parking_lot::RwLock;
use std::sync::Arc;

/// The cells of a single vector.
pub type VectorCells = Arc<[f32]>;

/// All vectors (one per subspace) of a document.
#[derive(Debug, Clone, Default)]
pub struct VectorBundle {
    subspaces: Vec<VectorCells>,
}

impl VectorBundle {
    pub fn new(subspaces: Vec<VectorCells>) -> Self {
        Self { subspaces }
    }

    /// Number of subspaces (vectors) in the bundle.
    pub fn subspaces(&self) -> usize {
        self.subspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subspaces.is_empty()
    }

    pub fn cells(&self, subspace: usize) -> &[f32] {
        &self.subspaces[subspace]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[f32]> + '_ {
        self.subspaces.iter().map(|cells| &cells[..])
    }
}

/// Maps a (document, subspace) pair to its vector.
///
/// Implementations are read concurrently from search threads.
pub trait VectorAccess: Send + Sync {
    /// The vector of one subspace of a document, or `None` if absent.
    fn vector(&self, docid: u32, subspace: u32) -> Option<VectorCells>;

    /// All vectors of a document. Empty if the document has none.
    fn vectors(&self, docid: u32) -> VectorBundle;
}

/// Vector storage kept in memory, indexed by document id.
#[derive(Debug, Default)]
pub struct InMemoryVectors {
    dimension: usize,
    docs: RwLock<Vec<Option<Arc<[VectorCells]>>>>,
}

impl InMemoryVectors {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            docs: RwLock::new(Vec::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Store a single-vector document.
    pub fn set(&self, docid: u32, cells: &[f32]) {
        self.set_multi(docid, &[cells]);
    }

    /// Store a document with one vector per subspace, replacing any previous value.
    pub fn set_multi(&self, docid: u32, subspaces: &[&[f32]]) {
        for cells in subspaces {
            assert_eq!(
                cells.len(),
                self.dimension,
                "vector for doc {docid} has wrong dimension"
            );
        }
        let bundle: Arc<[VectorCells]> = subspaces
            .iter()
            .map(|cells| VectorCells::from(*cells))
            .collect();
        let mut docs = self.docs.write();
        let idx = docid as usize;
        if docs.len() <= idx {
            docs.resize(idx + 1, None);
        }
        docs[idx] = Some(bundle);
    }

    /// Drop the vectors of a document.
    pub fn clear(&self, docid: u32) {
        if let Some(slot) = self.docs.write().get_mut(docid as usize) {
            *slot = None;
        }
    }

    /// One past the highest document id ever stored.
    pub fn docid_limit(&self) -> u32 {
        self.docs.read().len() as u32
    }

    fn bundle(&self, docid: u32) -> Option<Arc<[VectorCells]>> {
        self.docs.read().get(docid as usize).cloned().flatten()
    }
}

impl VectorAccess for InMemoryVectors {
    fn vector(&self, docid: u32, subspace: u32) -> Option<VectorCells> {
        self.bundle(docid)?.get(subspace as usize).cloned()
    }

    fn vectors(&self, docid: u32) -> VectorBundle {
        match self.bundle(docid) {
            Some(bundle) => VectorBundle::new(bundle.to_vec()),
            None => VectorBundle::default(),
        }
    }
}

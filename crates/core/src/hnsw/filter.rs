//! Document-level inclusion filters for filtered search.

/// Membership filter over document ids.
///
/// A filter only decides which documents may appear in results. Search still
/// walks through excluded nodes.
pub trait GlobalFilter: Send + Sync {
    /// True if `docid` may be returned.
    fn check(&self, docid: u32) -> bool;
    /// Number of documents that pass.
    fn count(&self) -> usize;
    /// Size of the docid space the filter covers.
    fn size(&self) -> usize;
}

/// Bit-vector filter over docids `0..size`.
#[derive(Debug, Clone)]
pub struct BitVectorFilter {
    bits: Vec<u64>,
    size: usize,
    count: usize,
}

impl BitVectorFilter {
    pub fn new(size: usize) -> Self {
        Self {
            bits: vec![0; size.div_ceil(64)],
            size,
            count: 0,
        }
    }

    /// Build a filter passing exactly `docids`. Ids at or above `size` are ignored.
    pub fn from_docids(size: usize, docids: impl IntoIterator<Item = u32>) -> Self {
        let mut filter = Self::new(size);
        for docid in docids {
            filter.set(docid);
        }
        filter
    }

    pub fn set(&mut self, docid: u32) {
        let index = docid as usize;
        if index >= self.size {
            return;
        }
        let word = &mut self.bits[index / 64];
        let mask = 1u64 << (index % 64);
        if *word & mask == 0 {
            *word |= mask;
            self.count += 1;
        }
    }
}

impl GlobalFilter for BitVectorFilter {
    #[inline]
    fn check(&self, docid: u32) -> bool {
        let index = docid as usize;
        index < self.size && self.bits[index / 64] & (1u64 << (index % 64)) != 0
    }

    fn count(&self) -> usize {
        self.count
    }

    fn size(&self) -> usize {
        self.size
    }
}

//! Node-id space partitioning for the concurrent import phase.

use crate::error::{BuildError, Result};

/// Splits the dense node-id space into power-of-two sized import pages.
///
/// Page capacity is a power of two so that routing a node id to its page is
/// a shift and its local id a mask. The page count targets roughly four
/// pages per importing thread, which keeps lock contention low while still
/// letting work steal across pages at flush time.
#[derive(Clone, Copy, Debug)]
pub struct ImportSizing {
    page_shift: u32,
    page_count: usize,
    node_count: u64,
}

const PAGES_PER_THREAD: usize = 4;

impl ImportSizing {
    /// Derives a sizing from the import concurrency and total node count.
    pub fn of(concurrency: usize, node_count: u64) -> Result<Self> {
        if concurrency == 0 {
            return Err(BuildError::InvalidArgument(
                "concurrency must be at least 1".into(),
            ));
        }
        let target_pages = (concurrency * PAGES_PER_THREAD).next_power_of_two() as u64;
        let capacity = node_count
            .div_ceil(target_pages)
            .next_power_of_two()
            .max(1);
        Self::with_page_capacity(capacity, node_count)
    }

    /// Builds a sizing with an explicit page capacity (a power of two).
    pub fn with_page_capacity(capacity: u64, node_count: u64) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(BuildError::InvalidArgument(format!(
                "page capacity must be a power of two, got {capacity}"
            )));
        }
        let page_count = usize::try_from(node_count.div_ceil(capacity)).map_err(|_| {
            BuildError::CapacityOverflow(format!(
                "{node_count} nodes need more import pages than addressable"
            ))
        })?;
        Ok(Self {
            page_shift: capacity.trailing_zeros(),
            page_count,
            node_count,
        })
    }

    /// Number of import pages.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Node ids per page.
    pub fn page_capacity(&self) -> u64 {
        1 << self.page_shift
    }

    /// Total node count this sizing covers.
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// The import page a node id belongs to.
    #[inline]
    pub fn page_of(&self, node_id: u64) -> usize {
        (node_id >> self.page_shift) as usize
    }

    /// The node's index within its page.
    #[inline]
    pub fn local_id(&self, node_id: u64) -> usize {
        (node_id & (self.page_capacity() - 1)) as usize
    }

    /// Reassembles a global node id from page and local index.
    #[inline]
    pub fn node_id(&self, page: usize, local_id: usize) -> u64 {
        ((page as u64) << self.page_shift) | local_id as u64
    }

    /// Number of node ids actually present in `page` (the last page may be
    /// partial).
    pub fn nodes_in_page(&self, page: usize) -> usize {
        let base = self.node_id(page, 0);
        let remaining = self.node_count.saturating_sub(base);
        remaining.min(self.page_capacity()) as usize
    }
}

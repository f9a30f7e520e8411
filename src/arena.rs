//! Paged arena allocator backing the final adjacency pages.
//!
//! The arena owns a growable table of fixed-size byte pages. Addresses are
//! handed out at page reservation time and stay valid forever: page indices
//! are append-only and a slot, once reserved, is never reassigned. Writing
//! happens through [`LocalAllocator`] values that own their working page
//! exclusively, so the common allocation path touches no shared state at
//! all; only reserving a new page index and freezing a finished page into
//! its slot synchronize, and table growth uses a double-checked capacity
//! mirror to skip the lock when the table is already large enough.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{BuildError, Result};
use crate::tracker::AllocationTracker;

/// A position inside the arena: `(page_index << page_shift) | in_page_offset`.
///
/// Records never straddle page boundaries, so one address always resolves
/// within a single page buffer.
pub type Address = u64;

/// Default page size: 256 KiB.
pub const DEFAULT_PAGE_SIZE: usize = 1 << 18;

const MIN_TABLE_CAPACITY: usize = 16;

/// Shared, growable table of fixed-size byte pages.
pub struct PageArena {
    page_size: usize,
    page_shift: u32,
    slots: RwLock<Vec<Option<Box<[u8]>>>>,
    /// Number of reserved page indices.
    reserved: AtomicUsize,
    /// Mirror of `slots.len()` for the lock-free growth fast path.
    capacity: AtomicUsize,
    tracker: Arc<dyn AllocationTracker>,
}

impl PageArena {
    /// Creates an arena with the given page size (must be a power of two).
    pub fn new(page_size: usize, tracker: Arc<dyn AllocationTracker>) -> Result<Self> {
        if page_size == 0 || !page_size.is_power_of_two() {
            return Err(BuildError::InvalidArgument(format!(
                "page size must be a power of two, got {page_size}"
            )));
        }
        Ok(Self {
            page_size,
            page_shift: page_size.trailing_zeros(),
            slots: RwLock::new(Vec::new()),
            reserved: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
            tracker,
        })
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of bits an in-page offset occupies inside an [`Address`].
    pub fn page_shift(&self) -> u32 {
        self.page_shift
    }

    /// The tracker allocations are reported to.
    pub fn tracker(&self) -> &Arc<dyn AllocationTracker> {
        &self.tracker
    }

    /// Reserves the next page index and returns it with its base address.
    ///
    /// The slot stays empty until [`install`](Self::install) freezes a page
    /// into it.
    pub fn reserve_page(&self) -> Result<(usize, Address)> {
        let index = self.reserved.fetch_add(1, Ordering::AcqRel);
        if (index as u64) > (u64::MAX >> self.page_shift) {
            return Err(BuildError::CapacityOverflow(format!(
                "page index {index} not addressable with page shift {}",
                self.page_shift
            )));
        }
        self.ensure_capacity(index + 1);
        Ok((index, (index as u64) << self.page_shift))
    }

    /// Reserves one slot and installs the caller-provided oversized buffer
    /// directly, for a single record larger than one page.
    pub fn reserve_oversized(&self, bytes: Box<[u8]>) -> Result<Address> {
        let (index, address) = self.reserve_page()?;
        self.tracker.on_alloc(bytes.len() as u64);
        self.install(index, bytes)?;
        Ok(address)
    }

    /// Freezes a finished page into its reserved slot. Write-once.
    pub fn install(&self, index: usize, bytes: Box<[u8]>) -> Result<()> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(index).ok_or_else(|| {
            BuildError::InvariantViolation(format!("install into unreserved page slot {index}"))
        })?;
        if slot.is_some() {
            return Err(BuildError::InvariantViolation(format!(
                "page slot {index} installed twice"
            )));
        }
        *slot = Some(bytes);
        Ok(())
    }

    /// Consumes the arena into its frozen page table.
    ///
    /// Every reserved slot must have been installed; a missing page means a
    /// local allocator was never closed.
    pub fn into_pages(self) -> Result<Vec<Box<[u8]>>> {
        let reserved = self.reserved.load(Ordering::Acquire);
        let mut slots = self.slots.into_inner();
        slots.truncate(reserved);
        let mut pages = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(page) => pages.push(page),
                None => {
                    return Err(BuildError::InvariantViolation(format!(
                        "page slot {index} reserved but never installed"
                    )))
                }
            }
        }
        Ok(pages)
    }

    /// Grows the slot table if `needed` exceeds the current capacity.
    ///
    /// The fast path is a single atomic read; the lock is taken only when
    /// growth is actually required, and the bound is re-checked under it.
    fn ensure_capacity(&self, needed: usize) {
        if self.capacity.load(Ordering::Acquire) >= needed {
            return;
        }
        let mut slots = self.slots.write();
        if slots.len() >= needed {
            return;
        }
        let new_len = needed.max(slots.len() * 2).max(MIN_TABLE_CAPACITY);
        slots.resize_with(new_len, || None);
        self.capacity.store(new_len, Ordering::Release);
        debug!(pages = new_len, "grew arena page table");
    }
}

/// Per-task bump allocator writing variable-length records into arena pages.
///
/// Each flush task owns one local allocator per page set for its lifetime;
/// the working page is owned exclusively, so `write` never locks.
pub struct LocalAllocator {
    arena: Arc<PageArena>,
    page: Option<(usize, Box<[u8]>)>,
    offset: usize,
    closed: bool,
}

impl LocalAllocator {
    /// Creates an allocator writing into `arena`.
    pub fn new(arena: Arc<PageArena>) -> Self {
        Self {
            arena,
            page: None,
            offset: 0,
            closed: false,
        }
    }

    /// Copies `record` into the arena and returns its address.
    ///
    /// A record larger than one page goes through the oversized path and
    /// occupies a dedicated slot.
    pub fn write(&mut self, record: &[u8]) -> Result<Address> {
        let page_size = self.arena.page_size();
        if record.len() > page_size {
            return self.arena.reserve_oversized(record.into());
        }
        if self
            .page
            .as_ref()
            .map_or(true, |(_, page)| page.len() - self.offset < record.len())
        {
            self.retire_page()?;
            let (index, _) = self.arena.reserve_page()?;
            self.arena.tracker().on_alloc(page_size as u64);
            self.page = Some((index, vec![0u8; page_size].into_boxed_slice()));
            self.offset = 0;
        }
        let (index, page) = self.page.as_mut().expect("page reserved above");
        page[self.offset..self.offset + record.len()].copy_from_slice(record);
        let address = ((*index as u64) << self.arena.page_shift()) | self.offset as u64;
        self.offset += record.len();
        Ok(address)
    }

    /// Installs the final partial page. Must be called before the arena is
    /// frozen.
    pub fn close(&mut self) -> Result<()> {
        self.retire_page()?;
        self.closed = true;
        Ok(())
    }

    fn retire_page(&mut self) -> Result<()> {
        if let Some((index, page)) = self.page.take() {
            self.arena.install(index, page)?;
        }
        Ok(())
    }
}

impl Drop for LocalAllocator {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.retire_page() {
                warn!(%err, "failed to install page while dropping local allocator");
            }
        }
    }
}

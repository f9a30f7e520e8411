//! Per-node staging buffers absorbing out-of-order edge batches.
//!
//! Edges for one node may arrive across many batches and many producer
//! threads. Until the node is finally compressed, its raw targets are held
//! in a [`NodeStaging`] buffer, already zig-zag/delta encoded against the
//! last seen value, so the staged footprint approximates the final
//! compressed size instead of the raw input size. Property bit-patterns are
//! staged raw and index-aligned with the (not yet sorted) target sequence;
//! alignment is fixed up during final compression.
//!
//! Release is by-value: the flush task takes the buffer out of its slot and
//! consumes it, so use-after-release is unrepresentable.

use crate::codec::{decode_vlong, encode_vlong, unzigzag, zigzag};
use crate::error::{BuildError, Result};
use crate::tracker::AllocationTracker;

/// Staged targets (and optional parallel property arrays) for one node.
pub struct NodeStaging {
    /// Zig-zag/delta varint-encoded target stream.
    bytes: Vec<u8>,
    /// Last target appended, the delta base for the next append.
    last_value: u64,
    /// Uncompressed edge count, independent of byte size.
    len: u32,
    /// One raw bit-pattern array per declared relationship property.
    properties: Vec<Vec<u64>>,
}

impl NodeStaging {
    fn new(property_count: usize) -> Self {
        Self {
            bytes: Vec::new(),
            last_value: 0,
            len: 0,
            properties: (0..property_count).map(|_| Vec::new()).collect(),
        }
    }

    /// Number of staged edges.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// True if no edges are staged.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends raw target ids, compressing them incrementally.
    pub fn add(&mut self, targets: &[u64], tracker: &dyn AllocationTracker) -> Result<()> {
        let count = u32::try_from(targets.len()).map_err(|_| {
            BuildError::CapacityOverflow(format!("batch of {} targets", targets.len()))
        })?;
        self.len = self.len.checked_add(count).ok_or_else(|| {
            BuildError::CapacityOverflow(format!(
                "node degree exceeds {} while staging",
                u32::MAX
            ))
        })?;

        let capacity_before = self.bytes.capacity();
        for &target in targets {
            let delta = target.wrapping_sub(self.last_value) as i64;
            encode_vlong(zigzag(delta), &mut self.bytes);
            self.last_value = target;
        }
        let grown = self.bytes.capacity() - capacity_before;
        if grown > 0 {
            tracker.on_alloc(grown as u64);
        }
        Ok(())
    }

    /// Appends targets together with one value per declared property,
    /// index-aligned with the unsorted target sequence.
    pub fn add_with_properties(
        &mut self,
        targets: &[u64],
        properties: &[&[u64]],
        tracker: &dyn AllocationTracker,
    ) -> Result<()> {
        if properties.len() != self.properties.len() {
            return Err(BuildError::InvalidArgument(format!(
                "expected {} property arrays, got {}",
                self.properties.len(),
                properties.len()
            )));
        }
        for (key, values) in properties.iter().enumerate() {
            if values.len() != targets.len() {
                return Err(BuildError::InvalidArgument(format!(
                    "property {key} has {} values for {} targets",
                    values.len(),
                    targets.len()
                )));
            }
        }
        for (staged, values) in self.properties.iter_mut().zip(properties) {
            let capacity_before = staged.capacity();
            staged.extend_from_slice(values);
            let grown = staged.capacity() - capacity_before;
            if grown > 0 {
                tracker.on_alloc(8 * grown as u64);
            }
        }
        self.add(targets, tracker)
    }

    /// Decodes the staged stream back into flat absolute target ids.
    pub fn uncompress(&self, into: &mut Vec<u64>) {
        into.clear();
        into.reserve(self.len as usize);
        let mut off = 0;
        let mut value = 0u64;
        while off < self.bytes.len() {
            let delta = unzigzag(decode_vlong(&self.bytes, &mut off));
            value = value.wrapping_add(delta as u64);
            into.push(value);
        }
        debug_assert_eq!(into.len(), self.len as usize);
    }

    /// Moves the staged property arrays out, leaving the targets intact.
    ///
    /// The arrays leave the tracker's accounting here: the taker owns them
    /// as untracked scratch from this point on.
    pub fn take_properties(&mut self, tracker: &dyn AllocationTracker) -> Vec<Vec<u64>> {
        let taken = std::mem::take(&mut self.properties);
        let bytes: u64 = taken.iter().map(|staged| 8 * staged.capacity() as u64).sum();
        if bytes > 0 {
            tracker.on_free(bytes);
        }
        taken
    }

    /// Drops all backing storage, reporting the released bytes.
    pub fn release(self, tracker: &dyn AllocationTracker) {
        let mut bytes = self.bytes.capacity() as u64;
        for staged in &self.properties {
            bytes += 8 * staged.capacity() as u64;
        }
        if bytes > 0 {
            tracker.on_free(bytes);
        }
    }
}

/// Staging slots for every node of one import page.
///
/// Buffers are created lazily on a node's first edge. The slots are only
/// ever touched by the thread holding the page lock.
#[derive(Default)]
pub struct StagingPage {
    nodes: Vec<Option<NodeStaging>>,
    property_count: usize,
}

impl StagingPage {
    /// Creates slots for `capacity` local node ids.
    pub fn new(capacity: usize, property_count: usize) -> Self {
        let mut nodes = Vec::new();
        nodes.resize_with(capacity, || None);
        Self {
            nodes,
            property_count,
        }
    }

    /// Returns the staging buffer for a local node id, creating it on first
    /// use.
    pub fn node_mut(&mut self, local_id: usize) -> &mut NodeStaging {
        self.nodes[local_id].get_or_insert_with(|| NodeStaging::new(self.property_count))
    }

    /// Number of nodes with at least one staged edge.
    pub fn staged_nodes(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Consumes the page into `(local_id, staging)` pairs.
    pub fn drain(self) -> impl Iterator<Item = (usize, NodeStaging)> {
        self.nodes
            .into_iter()
            .enumerate()
            .filter_map(|(local_id, slot)| slot.map(|staging| (local_id, staging)))
    }
}

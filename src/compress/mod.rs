//! Final compression pipeline: sort, aggregate, encode, persist.
//!
//! Runs once per node, at flush time, with exclusive access to that node's
//! staging buffer. Two interchangeable strategies share the pipeline shape:
//! [`DeltaVarLongCompressor`] stores zig-zag deltas as varints for the
//! smallest footprint, [`RawCompressor`] stores sorted 64-bit words
//! verbatim. The strategy is picked at factory construction and is
//! transparent to the importer.

mod aggregation;
mod delta;
mod raw;

pub use aggregation::Aggregation;
pub use delta::DeltaVarLongCompressor;
pub use raw::RawCompressor;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::adjacency::{AdjacencyList, PropertyList};
use crate::arena::{LocalAllocator, PageArena};
use crate::error::{BuildError, Result};
use crate::staging::NodeStaging;
use crate::tracker::AllocationTracker;

/// Storage strategy for encoded neighbor lists.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompressionKind {
    /// Zig-zag delta + varint payload; compact, O(degree) decode.
    DeltaVarLong,
    /// Sorted, aggregated 64-bit little-endian words, no delta/varint step.
    Raw,
}

/// One compressor per flush task, created by [`CompressorFactory`].
///
/// A compressor owns its local allocators; dropping it without `close`
/// loses the working pages' installation guarantee, so flush tasks close
/// explicitly after the last node.
pub trait AdjacencyCompressor: Send {
    /// Compresses one node's staged edges and records its `(address,
    /// degree)` pair. Returns the post-aggregation degree.
    fn compress(&mut self, node_id: u64, staging: NodeStaging) -> Result<u32>;

    /// Installs the final partial pages of all local allocators.
    fn close(&mut self) -> Result<()>;
}

/// Shared per-compressor state: allocators, global tables, and scratch
/// buffers reused across nodes.
pub(crate) struct PipelineState {
    aggregations: Arc<[Aggregation]>,
    allocator: LocalAllocator,
    property_allocators: Vec<LocalAllocator>,
    offsets: Arc<Vec<AtomicU64>>,
    degrees: Arc<Vec<AtomicU32>>,
    property_offsets: Vec<Arc<Vec<AtomicU64>>>,
    tracker: Arc<dyn AllocationTracker>,
    pub(crate) targets: Vec<u64>,
    properties: Vec<Vec<u64>>,
    perm: Vec<usize>,
    scratch: Vec<u64>,
    pub(crate) record: Vec<u8>,
}

impl PipelineState {
    /// Decodes the staging buffer, sorts targets ascending (keeping every
    /// property array aligned through one shared permutation), and
    /// aggregates parallel edges. Leaves the retained targets and property
    /// values in the scratch buffers and returns the final degree.
    pub(crate) fn decode_sort_aggregate(&mut self, staging: &mut NodeStaging) -> Result<u32> {
        staging.uncompress(&mut self.targets);
        self.properties = staging.take_properties(self.tracker.as_ref());

        if self.properties.is_empty() {
            self.targets.sort_unstable();
        } else {
            // a plain value sort would desynchronize targets from their
            // properties; sort a permutation once and apply it to all
            self.perm.clear();
            self.perm.extend(0..self.targets.len());
            let targets = &self.targets;
            self.perm.sort_by_key(|&i| targets[i]);
            apply_permutation(&self.perm, &mut self.targets, &mut self.scratch);
            for values in &mut self.properties {
                apply_permutation(&self.perm, values, &mut self.scratch);
            }
        }

        let retained = aggregate(&mut self.targets, &mut self.properties, &self.aggregations)?;
        Ok(retained as u32)
    }

    /// Writes the assembled record and stores the node's address and
    /// degree. Each index is written exactly once: flush tasks partition
    /// nodes by page, so no two tasks ever share an index.
    pub(crate) fn write_topology(&mut self, node_id: u64, degree: u32) -> Result<()> {
        let address = self.allocator.write(&self.record)?;
        self.offsets[node_id as usize].store(address, Ordering::Relaxed);
        self.degrees[node_id as usize].store(degree, Ordering::Relaxed);
        Ok(())
    }

    /// Copies the aggregated property values through each property's own
    /// allocator and page set, as raw 64-bit patterns with no delta step.
    pub(crate) fn write_properties(&mut self, node_id: u64, degree: u32) -> Result<()> {
        for (key, values) in self.properties.iter().enumerate() {
            self.record.clear();
            for &value in &values[..degree as usize] {
                self.record.extend_from_slice(&value.to_le_bytes());
            }
            let address = self.property_allocators[key].write(&self.record)?;
            self.property_offsets[key][node_id as usize].store(address, Ordering::Relaxed);
        }
        Ok(())
    }

    pub(crate) fn release(&self, staging: NodeStaging) {
        staging.release(self.tracker.as_ref());
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.allocator.close()?;
        for allocator in &mut self.property_allocators {
            allocator.close()?;
        }
        Ok(())
    }
}

/// Reorders `data` by `perm` using `scratch` as the swap buffer.
fn apply_permutation(perm: &[usize], data: &mut Vec<u64>, scratch: &mut Vec<u64>) {
    scratch.clear();
    scratch.extend(perm.iter().map(|&i| data[i]));
    std::mem::swap(data, scratch);
}

/// Collapses parallel edges in a sorted target sequence.
///
/// An edge is new if its target differs from the previous retained target,
/// or if every active policy is `None` (in which case nothing collapses).
/// Duplicates fold into the previous retained edge per-property, the first
/// occurrence seeding the merge. Returns the retained count; `targets` and
/// every property array are truncated to it.
pub(crate) fn aggregate(
    targets: &mut Vec<u64>,
    properties: &mut [Vec<u64>],
    aggregations: &[Aggregation],
) -> Result<usize> {
    if targets.is_empty() {
        return Ok(0);
    }
    let no_aggregation = aggregations.is_empty() || aggregations.iter().all(|a| a.is_none());
    if no_aggregation {
        return Ok(targets.len());
    }

    for (values, agg) in properties.iter_mut().zip(aggregations) {
        values[0] = agg.normalize(values[0]);
    }
    let mut write = 0usize;
    for read in 1..targets.len() {
        if targets[read] == targets[write] {
            for (values, agg) in properties.iter_mut().zip(aggregations) {
                let incoming = agg.normalize(values[read]);
                values[write] = agg.merge(values[write], incoming)?;
            }
        } else {
            write += 1;
            targets[write] = targets[read];
            for (values, agg) in properties.iter_mut().zip(aggregations) {
                values[write] = agg.normalize(values[read]);
            }
        }
    }

    let retained = write + 1;
    targets.truncate(retained);
    for values in properties.iter_mut() {
        values.truncate(retained);
    }
    Ok(retained)
}

/// Creates compressors for flush tasks and freezes the shared state into
/// the final [`AdjacencyList`].
///
/// Owns the adjacency arena, one arena per relationship property, and the
/// global offset/degree tables. One factory exists per relationship type
/// being imported.
pub struct CompressorFactory {
    kind: CompressionKind,
    node_count: u64,
    aggregations: Arc<[Aggregation]>,
    adjacency_arena: Arc<PageArena>,
    property_arenas: Vec<Arc<PageArena>>,
    offsets: Arc<Vec<AtomicU64>>,
    degrees: Arc<Vec<AtomicU32>>,
    property_offsets: Vec<Arc<Vec<AtomicU64>>>,
    tracker: Arc<dyn AllocationTracker>,
}

impl CompressorFactory {
    /// Creates a factory for `node_count` nodes and `property_count`
    /// relationship properties.
    ///
    /// `aggregations` carries one policy per property; with zero properties
    /// a single policy may still be given to deduplicate bare parallel
    /// edges.
    pub fn new(
        kind: CompressionKind,
        node_count: u64,
        property_count: usize,
        aggregations: &[Aggregation],
        page_size: usize,
        tracker: Arc<dyn AllocationTracker>,
    ) -> Result<Self> {
        let nodes = usize::try_from(node_count).map_err(|_| {
            BuildError::CapacityOverflow(format!("{node_count} nodes exceed the address space"))
        })?;
        if aggregations.len() != property_count && !(property_count == 0 && aggregations.len() <= 1)
        {
            return Err(BuildError::InvalidArgument(format!(
                "{} aggregation policies for {property_count} properties",
                aggregations.len()
            )));
        }

        let adjacency_arena = Arc::new(PageArena::new(page_size, Arc::clone(&tracker))?);
        let mut property_arenas = Vec::with_capacity(property_count);
        let mut property_offsets = Vec::with_capacity(property_count);
        for _ in 0..property_count {
            property_arenas.push(Arc::new(PageArena::new(page_size, Arc::clone(&tracker))?));
            property_offsets.push(Arc::new(
                std::iter::repeat_with(|| AtomicU64::new(0))
                    .take(nodes)
                    .collect::<Vec<_>>(),
            ));
        }

        Ok(Self {
            kind,
            node_count,
            aggregations: aggregations.into(),
            adjacency_arena,
            property_arenas,
            offsets: Arc::new(
                std::iter::repeat_with(|| AtomicU64::new(0))
                    .take(nodes)
                    .collect(),
            ),
            degrees: Arc::new(
                std::iter::repeat_with(|| AtomicU32::new(0))
                    .take(nodes)
                    .collect(),
            ),
            property_offsets,
            tracker,
        })
    }

    /// The storage strategy this factory builds with.
    pub fn kind(&self) -> CompressionKind {
        self.kind
    }

    /// Number of nodes in the dense id space.
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    /// Number of relationship properties carried per edge.
    pub fn property_count(&self) -> usize {
        self.property_arenas.len()
    }

    /// Hands a flush task its own compressor with dedicated local
    /// allocators.
    pub fn compressor(&self) -> Box<dyn AdjacencyCompressor> {
        let state = PipelineState {
            aggregations: Arc::clone(&self.aggregations),
            allocator: LocalAllocator::new(Arc::clone(&self.adjacency_arena)),
            property_allocators: self
                .property_arenas
                .iter()
                .map(|arena| LocalAllocator::new(Arc::clone(arena)))
                .collect(),
            offsets: Arc::clone(&self.offsets),
            degrees: Arc::clone(&self.degrees),
            property_offsets: self.property_offsets.iter().map(Arc::clone).collect(),
            tracker: Arc::clone(&self.tracker),
            targets: Vec::new(),
            properties: Vec::new(),
            perm: Vec::new(),
            scratch: Vec::new(),
            record: Vec::new(),
        };
        match self.kind {
            CompressionKind::DeltaVarLong => Box::new(DeltaVarLongCompressor::new(state)),
            CompressionKind::Raw => Box::new(RawCompressor::new(state)),
        }
    }

    /// Freezes all shared state into the read-only adjacency list.
    ///
    /// Fails if any compressor is still alive: build comes strictly after
    /// every flush task has finished.
    pub fn build(self) -> Result<AdjacencyList> {
        let still_active =
            |_| BuildError::InvariantViolation("compressors still active during build".into());

        let page_shift = self.adjacency_arena.page_shift();
        let arena = Arc::try_unwrap(self.adjacency_arena).map_err(|_| {
            BuildError::InvariantViolation("compressors still active during build".into())
        })?;
        let pages = arena.into_pages()?;
        let offsets: Vec<u64> = Arc::try_unwrap(self.offsets)
            .map_err(still_active)?
            .into_iter()
            .map(AtomicU64::into_inner)
            .collect();
        let degrees: Vec<u32> = Arc::try_unwrap(self.degrees)
            .map_err(|_| {
                BuildError::InvariantViolation("compressors still active during build".into())
            })?
            .into_iter()
            .map(AtomicU32::into_inner)
            .collect();

        let mut properties = Vec::with_capacity(self.property_arenas.len());
        for (arena, offsets) in self
            .property_arenas
            .into_iter()
            .zip(self.property_offsets)
        {
            let shift = arena.page_shift();
            let arena = Arc::try_unwrap(arena).map_err(|_| {
                BuildError::InvariantViolation("compressors still active during build".into())
            })?;
            let offsets: Vec<u64> = Arc::try_unwrap(offsets)
                .map_err(still_active)?
                .into_iter()
                .map(AtomicU64::into_inner)
                .collect();
            properties.push(PropertyList::new(shift, arena.into_pages()?, offsets));
        }

        let list = AdjacencyList::new(self.kind, page_shift, pages, offsets, degrees, properties);
        debug!(
            nodes = list.node_count(),
            edges = list.edge_count(),
            "froze adjacency list"
        );
        Ok(list)
    }
}

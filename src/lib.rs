//! In-memory graph topology storage: concurrent edge import into a
//! compressed sparse-row adjacency structure.
//!
//! The build runs in two phases. During **staging**, producer threads push
//! pre-grouped edge batches into an [`AdjacencyImporter`]; batches are
//! partitioned by source node into import pages, each guarded by its own
//! lock, and every node's targets are held zig-zag/delta/varint encoded in
//! a per-node buffer. During **flush**, each page becomes an independent
//! [`FlushTask`] that sorts, aggregates, and encodes its nodes through an
//! [`AdjacencyCompressor`] into shared arena pages. Freezing the factory
//! yields the immutable [`AdjacencyList`] for lock-free reads.
//!
//! ```
//! use std::sync::Arc;
//! use topograph::{
//!     AdjacencyImporter, CompressionKind, CompressorFactory, ImportSizing,
//!     TerminationFlag, run_flush_tasks,
//! };
//! use topograph::tracker::NoopTracker;
//!
//! # fn main() -> topograph::Result<()> {
//! let tracker: Arc<dyn topograph::AllocationTracker> = Arc::new(NoopTracker);
//! let sizing = ImportSizing::of(2, 3)?;
//! let importer = AdjacencyImporter::new(sizing, 0, TerminationFlag::running(), Arc::clone(&tracker));
//! importer.add_all(&[0, 0, 1], &[0, 1, 2], &[2, 1, 0], &[])?;
//!
//! let factory = CompressorFactory::new(
//!     CompressionKind::DeltaVarLong, 3, 0, &[], 1 << 12, tracker,
//! )?;
//! run_flush_tasks(importer.flush(&factory)?)?;
//! let adjacency = factory.build()?;
//! assert_eq!(adjacency.neighbors(0).collect::<Vec<_>>(), vec![1, 2]);
//! # Ok(())
//! # }
//! ```

/// Frozen adjacency list and its decoding cursors.
pub mod adjacency;
/// Paged arena allocator for encoded records.
pub mod arena;
/// ZigZag and varint codecs.
pub mod codec;
/// Compression strategies, aggregation, and the compressor factory.
pub mod compress;
/// Error types shared across the build pipeline.
pub mod error;
/// Concurrent edge-batch intake and flush tasks.
pub mod importer;
/// Tracing subscriber setup.
pub mod logging;
/// Per-node staging buffers.
pub mod staging;
/// Memory accounting hooks.
pub mod tracker;

pub use adjacency::{AdjacencyList, NeighborCursor, PropertyCursor};
pub use arena::{Address, LocalAllocator, PageArena, DEFAULT_PAGE_SIZE};
pub use compress::{
    AdjacencyCompressor, Aggregation, CompressionKind, CompressorFactory,
};
pub use error::{BuildError, Result};
pub use importer::{
    run_flush_tasks, AdjacencyImporter, FlushTask, ImportSizing, TerminationFlag,
};
pub use logging::init_logging;
pub use tracker::{default_tracker, AllocationTracker};

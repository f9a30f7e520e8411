//! Concurrent edge-batch intake and the staging-to-compression handoff.
//!
//! Producer threads call [`AdjacencyImporter::add_all`] with pre-grouped
//! edge batches. Each batch is routed to import pages by source node id;
//! one mutex per page serializes writers of the same page while leaving
//! other pages untouched, and consecutive groups that land on the same page
//! reuse the held lock. After all producers finish,
//! [`AdjacencyImporter::flush`] turns every non-empty page into an
//! independent [`FlushTask`] that compresses its nodes without any shared
//! locks.

mod sizing;

pub use sizing::ImportSizing;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::compress::{AdjacencyCompressor, CompressorFactory};
use crate::error::{BuildError, Result};
use crate::staging::StagingPage;
use crate::tracker::AllocationTracker;

/// Cooperative cancellation shared between the driver and import workers.
///
/// Workers poll the flag at batch and node granularity; a stopped flag
/// surfaces as [`BuildError::Terminated`] from the operation in flight.
#[derive(Clone)]
pub struct TerminationFlag {
    running: Arc<AtomicBool>,
}

impl TerminationFlag {
    /// A flag in the running state.
    pub fn running() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Requests termination; all clones observe it.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// True until [`stop`](Self::stop) is called on any clone.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Errors with [`BuildError::Terminated`] once stopped.
    pub fn check(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BuildError::Terminated)
        }
    }
}

impl Default for TerminationFlag {
    fn default() -> Self {
        Self::running()
    }
}

/// Concurrent staging area for edge batches, partitioned by source node.
pub struct AdjacencyImporter {
    sizing: ImportSizing,
    pages: Vec<Mutex<StagingPage>>,
    property_count: usize,
    edge_counter: Arc<AtomicU64>,
    termination: TerminationFlag,
    tracker: Arc<dyn AllocationTracker>,
}

impl AdjacencyImporter {
    /// Creates an importer for `node_count` nodes carrying `property_count`
    /// values per edge.
    pub fn new(
        sizing: ImportSizing,
        property_count: usize,
        termination: TerminationFlag,
        tracker: Arc<dyn AllocationTracker>,
    ) -> Self {
        let pages = (0..sizing.page_count())
            .map(|page| Mutex::new(StagingPage::new(sizing.nodes_in_page(page), property_count)))
            .collect();
        Self {
            sizing,
            pages,
            property_count,
            edge_counter: Arc::new(AtomicU64::new(0)),
            termination,
            tracker,
        }
    }

    /// The sizing this importer partitions with.
    pub fn sizing(&self) -> ImportSizing {
        self.sizing
    }

    /// Shared counter of compressed edges, populated by flush tasks.
    pub fn edge_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.edge_counter)
    }

    /// Stages one batch of pre-grouped edges.
    ///
    /// `sources[i]` owns the targets in `targets[offsets[i]..offsets[i+1]]`
    /// (the last group runs to the end of `targets`). `properties` carries
    /// one array per declared property, index-aligned with `targets`.
    /// Groups for the same source may repeat within and across batches.
    pub fn add_all(
        &self,
        sources: &[u64],
        offsets: &[usize],
        targets: &[u64],
        properties: &[&[u64]],
    ) -> Result<()> {
        self.termination.check()?;
        if offsets.len() != sources.len() {
            return Err(BuildError::InvalidArgument(format!(
                "{} group offsets for {} sources",
                offsets.len(),
                sources.len()
            )));
        }
        if properties.len() != self.property_count {
            return Err(BuildError::InvalidArgument(format!(
                "expected {} property arrays, got {}",
                self.property_count,
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

        let mut group_properties: Vec<&[u64]> = Vec::with_capacity(self.property_count);
        // consecutive groups often hit the same page; keep the lock across
        // them instead of re-acquiring per group
        let mut held: Option<(usize, MutexGuard<'_, StagingPage>)> = None;
        for (i, &source) in sources.iter().enumerate() {
            if source >= self.sizing.node_count() {
                return Err(BuildError::InvalidArgument(format!(
                    "source {source} outside the node space of {}",
                    self.sizing.node_count()
                )));
            }
            let start = offsets[i];
            let end = offsets.get(i + 1).copied().unwrap_or(targets.len());
            if start > end || end > targets.len() {
                return Err(BuildError::InvalidArgument(format!(
                    "group {i} spans {start}..{end} of {} targets",
                    targets.len()
                )));
            }

            let page = self.sizing.page_of(source);
            let staging_page = match &mut held {
                Some((locked, guard)) if *locked == page => guard,
                slot => {
                    // release before acquiring: holding one page lock while
                    // waiting on another deadlocks producers that visit the
                    // same pages in opposite order
                    *slot = None;
                    &mut slot.insert((page, self.pages[page].lock())).1
                }
            };
            let node = staging_page.node_mut(self.sizing.local_id(source));
            if self.property_count == 0 {
                node.add(&targets[start..end], self.tracker.as_ref())?;
            } else {
                group_properties.clear();
                group_properties.extend(properties.iter().map(|values| &values[start..end]));
                node.add_with_properties(
                    &targets[start..end],
                    &group_properties,
                    self.tracker.as_ref(),
                )?;
            }
        }
        trace!(groups = sources.len(), targets = targets.len(), "staged batch");
        Ok(())
    }

    /// Number of nodes with staged edges, across all pages.
    pub fn staged_node_count(&self) -> usize {
        self.pages.iter().map(|page| page.lock().staged_nodes()).sum()
    }

    /// Consumes the importer into one flush task per non-empty page.
    ///
    /// Must only be called after all producers have finished staging. Each
    /// task carries its own compressor from `factory` and can run on any
    /// thread.
    pub fn flush(self, factory: &CompressorFactory) -> Result<Vec<FlushTask>> {
        if factory.property_count() != self.property_count {
            return Err(BuildError::InvalidArgument(format!(
                "factory built for {} properties, importer staged {}",
                factory.property_count(),
                self.property_count
            )));
        }
        if factory.node_count() != self.sizing.node_count() {
            return Err(BuildError::InvalidArgument(format!(
                "factory built for {} nodes, importer sized for {}",
                factory.node_count(),
                self.sizing.node_count()
            )));
        }

        let mut tasks = Vec::new();
        for (page_index, page) in self.pages.into_iter().enumerate() {
            let staging = page.into_inner();
            if staging.staged_nodes() == 0 {
                continue;
            }
            tasks.push(FlushTask {
                base_node: self.sizing.node_id(page_index, 0),
                staging,
                compressor: factory.compressor(),
                edge_counter: Arc::clone(&self.edge_counter),
                termination: self.termination.clone(),
            });
        }
        debug!(tasks = tasks.len(), "prepared flush tasks");
        Ok(tasks)
    }
}

/// Compresses all staged nodes of one import page.
pub struct FlushTask {
    base_node: u64,
    staging: StagingPage,
    compressor: Box<dyn AdjacencyCompressor>,
    edge_counter: Arc<AtomicU64>,
    termination: TerminationFlag,
}

impl FlushTask {
    /// Compresses every staged node of the page and returns the number of
    /// edges written.
    pub fn run(self) -> Result<u64> {
        let FlushTask {
            base_node,
            staging,
            mut compressor,
            edge_counter,
            termination,
        } = self;
        let mut edges = 0u64;
        for (local_id, node_staging) in staging.drain() {
            termination.check()?;
            let degree = compressor.compress(base_node + local_id as u64, node_staging)?;
            edges += u64::from(degree);
        }
        compressor.close()?;
        edge_counter.fetch_add(edges, Ordering::Relaxed);
        Ok(edges)
    }
}

/// Runs flush tasks on the rayon pool and returns the total edge count.
pub fn run_flush_tasks(tasks: Vec<FlushTask>) -> Result<u64> {
    let edges: Vec<u64> = tasks.into_par_iter().map(FlushTask::run).collect::<Result<_>>()?;
    Ok(edges.into_iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::NoopTracker;

    fn importer(node_count: u64, properties: usize) -> AdjacencyImporter {
        let sizing = ImportSizing::with_page_capacity(4, node_count).unwrap();
        AdjacencyImporter::new(
            sizing,
            properties,
            TerminationFlag::running(),
            Arc::new(NoopTracker),
        )
    }

    #[test]
    fn batches_route_to_their_pages() {
        let imp = importer(16, 0);
        // sources 1 and 2 share page 0; source 9 is on page 2
        imp.add_all(&[1, 9, 2], &[0, 2, 3], &[5, 6, 7, 8], &[])
            .unwrap();
        assert_eq!(imp.staged_node_count(), 3);
    }

    #[test]
    fn repeated_sources_accumulate() {
        let imp = importer(8, 0);
        imp.add_all(&[3, 3], &[0, 2], &[1, 2, 3], &[]).unwrap();
        imp.add_all(&[3], &[0], &[4], &[]).unwrap();
        assert_eq!(imp.staged_node_count(), 1);
    }

    #[test]
    fn rejects_malformed_batches() {
        let imp = importer(8, 1);
        // offsets/sources length mismatch
        assert!(imp.add_all(&[1], &[0, 1], &[2], &[&[1]]).is_err());
        // missing property array
        assert!(imp.add_all(&[1], &[0], &[2], &[]).is_err());
        // property array shorter than targets
        assert!(imp.add_all(&[1], &[0], &[2, 3], &[&[1]]).is_err());
        // source outside the node space
        assert!(imp.add_all(&[99], &[0], &[2], &[&[1]]).is_err());
    }

    #[test]
    fn stopped_flag_fails_staging() {
        let flag = TerminationFlag::running();
        let sizing = ImportSizing::with_page_capacity(4, 8).unwrap();
        let imp = AdjacencyImporter::new(sizing, 0, flag.clone(), Arc::new(NoopTracker));
        flag.stop();
        let err = imp.add_all(&[1], &[0], &[2], &[]).unwrap_err();
        assert!(matches!(err, BuildError::Terminated));
    }

    #[test]
    fn opposite_order_cross_page_batches_make_progress() {
        use std::thread;
        let sizing = ImportSizing::with_page_capacity(4, 8).unwrap();
        let imp = Arc::new(AdjacencyImporter::new(
            sizing,
            0,
            TerminationFlag::running(),
            Arc::new(NoopTracker),
        ));
        // sources 0 and 4 live on different pages; one thread stages them
        // as (0, 4), the other as (4, 0), so each batch crosses pages in
        // the opposite order of its peer
        let mut handles = Vec::new();
        for order in [[0u64, 4], [4, 0]] {
            let imp = Arc::clone(&imp);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    imp.add_all(&order, &[0, 1], &[1, 2], &[]).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(imp.staged_node_count(), 2);
    }

    #[test]
    fn concurrent_staging_keeps_all_edges() {
        use std::thread;
        let sizing = ImportSizing::with_page_capacity(8, 64).unwrap();
        let imp = Arc::new(AdjacencyImporter::new(
            sizing,
            0,
            TerminationFlag::running(),
            Arc::new(NoopTracker),
        ));
        let mut handles = Vec::new();
        for t in 0..4u64 {
            let imp = Arc::clone(&imp);
            handles.push(thread::spawn(move || {
                for round in 0..50u64 {
                    let source = (t * 16 + round) % 64;
                    imp.add_all(&[source], &[0], &[round, round + 1], &[])
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(imp.staged_node_count() > 0);
    }
}

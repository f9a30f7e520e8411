//! Uncompressed storage strategy.

use crate::error::Result;
use crate::staging::NodeStaging;

use super::{AdjacencyCompressor, PipelineState};

/// Stores sorted, aggregated targets verbatim: a `u32` degree prefix
/// followed by one little-endian `u64` word per target. Trades footprint
/// for constant-time decode of individual neighbors.
pub struct RawCompressor {
    state: PipelineState,
}

impl RawCompressor {
    pub(crate) fn new(state: PipelineState) -> Self {
        Self { state }
    }
}

impl AdjacencyCompressor for RawCompressor {
    fn compress(&mut self, node_id: u64, mut staging: NodeStaging) -> Result<u32> {
        let degree = self.state.decode_sort_aggregate(&mut staging)?;
        let record = &mut self.state.record;
        record.clear();
        record.extend_from_slice(&degree.to_le_bytes());
        for &target in &self.state.targets {
            record.extend_from_slice(&target.to_le_bytes());
        }
        self.state.write_topology(node_id, degree)?;
        self.state.write_properties(node_id, degree)?;
        self.state.release(staging);
        Ok(degree)
    }

    fn close(&mut self) -> Result<()> {
        self.state.close()
    }
}

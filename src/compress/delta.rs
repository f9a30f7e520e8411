//! Delta + varint storage strategy.

use crate::codec::{encode_vlong, zigzag};
use crate::error::Result;
use crate::staging::NodeStaging;

use super::{AdjacencyCompressor, PipelineState};

/// Encodes sorted, aggregated targets as a `u32` degree prefix followed by
/// zig-zag varint deltas. The first target is delta-encoded against zero,
/// every later one against its predecessor; after sorting all deltas are
/// non-negative, so zig-zag costs at most one extra bit per value.
pub struct DeltaVarLongCompressor {
    state: PipelineState,
}

impl DeltaVarLongCompressor {
    pub(crate) fn new(state: PipelineState) -> Self {
        Self { state }
    }
}

impl AdjacencyCompressor for DeltaVarLongCompressor {
    fn compress(&mut self, node_id: u64, mut staging: NodeStaging) -> Result<u32> {
        let degree = self.state.decode_sort_aggregate(&mut staging)?;
        encode_record(&self.state.targets, &mut self.state.record);
        self.state.write_topology(node_id, degree)?;
        self.state.write_properties(node_id, degree)?;
        self.state.release(staging);
        Ok(degree)
    }

    fn close(&mut self) -> Result<()> {
        self.state.close()
    }
}

/// Assembles the on-page record for one node into `record`.
fn encode_record(targets: &[u64], record: &mut Vec<u8>) {
    record.clear();
    record.extend_from_slice(&(targets.len() as u32).to_le_bytes());
    let mut previous = 0u64;
    for &target in targets {
        encode_vlong(zigzag(target.wrapping_sub(previous) as i64), record);
        previous = target;
    }
}

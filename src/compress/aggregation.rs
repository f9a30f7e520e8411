//! Merge policies for parallel edges between the same node pair.

use crate::error::{BuildError, Result};

/// How multiple parallel edges between the same source/target pair collapse
/// into one encoded edge.
///
/// `None` preserves all parallel edges. Every other policy deduplicates:
/// the first occurrence seeds the running value, each later duplicate folds
/// in. `Min`/`Max`/`Sum`/`Count` are associative, so the fold order between
/// duplicates is irrelevant; `Single` keeps the first-seen value.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Aggregation {
    /// Keep all parallel edges, no collapsing.
    None,
    /// Keep the first-seen property value.
    Single,
    /// Keep the minimum property value.
    Min,
    /// Keep the maximum property value.
    Max,
    /// Sum the property values.
    Sum,
    /// Count parallel edges; every occurrence contributes `1.0`.
    Count,
}

impl Aggregation {
    /// True if this policy does not collapse parallel edges.
    pub fn is_none(self) -> bool {
        matches!(self, Aggregation::None)
    }

    /// Maps an incoming raw bit-pattern into the value that participates in
    /// the merge. `Count` replaces every occurrence with `1.0`.
    pub fn normalize(self, value: u64) -> u64 {
        match self {
            Aggregation::Count => 1.0f64.to_bits(),
            _ => value,
        }
    }

    /// Folds a duplicate edge's normalized value into the running value.
    ///
    /// Bit-patterns are interpreted as IEEE-754 doubles; a NaN under a
    /// merging policy is an unsupported value and fails the build.
    pub fn merge(self, running: u64, incoming: u64) -> Result<u64> {
        match self {
            // under a mixed configuration a `None` property keeps its
            // first-seen value when another policy forces deduplication
            Aggregation::None | Aggregation::Single => Ok(running),
            Aggregation::Min | Aggregation::Max | Aggregation::Sum | Aggregation::Count => {
                let a = f64::from_bits(running);
                let b = f64::from_bits(incoming);
                if a.is_nan() || b.is_nan() {
                    return Err(BuildError::UnsupportedValue(format!(
                        "NaN property value under {self:?} aggregation"
                    )));
                }
                let merged = match self {
                    Aggregation::Min => a.min(b),
                    Aggregation::Max => a.max(b),
                    Aggregation::Sum | Aggregation::Count => a + b,
                    _ => unreachable!(),
                };
                Ok(merged.to_bits())
            }
        }
    }
}

//! Error handling for topology builds.
//!
//! All fallible public APIs return [`Result<T>`]. A failed build has no
//! partial result: callers must discard the importer and every table the
//! factory produced.

use thiserror::Error;

/// Result type for build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that can occur while importing edges and building adjacency lists.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A size computation overflowed its integer domain.
    ///
    /// Raised when a staging buffer's edge count or byte size can no longer
    /// be represented. Fatal for the whole import.
    #[error("capacity overflow: {0}")]
    CapacityOverflow(String),

    /// A property value that cannot be aggregated reached the pipeline.
    ///
    /// Merging policies interpret property bits as IEEE-754 doubles; a NaN
    /// pattern under `MIN`/`MAX`/`SUM`/`COUNT` is surfaced immediately
    /// instead of being silently defaulted.
    #[error("unsupported property value: {0}")]
    UnsupportedValue(String),

    /// Invalid argument or caller contract violation.
    ///
    /// Mismatched slice lengths, out-of-range node ids, or a page size that
    /// is not a power of two.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An internal write-once or installation contract was broken.
    ///
    /// Indicates a bug in the build pipeline, e.g. a reserved page that was
    /// never installed or a factory consumed while compressors are alive.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The import was cancelled between nodes or pages.
    #[error("import terminated")]
    Terminated,
}

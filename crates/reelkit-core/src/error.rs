//! Structured error types for the service graph and frame pipeline.
//!
//! Every fallible operation returns [`Result<T>`]; the pipeline itself never
//! unwinds. Transient, frame-level failures are not represented here — those
//! are caught at the producer boundary and turned into substitute frames
//! carrying `meta.error` (see `crate::producer`).

use thiserror::Error;

/// Error kinds a caller can act on, grouped the way the pipeline recovers
/// from them.
#[derive(Debug, Error)]
pub enum Error {
    /// A service id was not registered in the repository, or a resource
    /// string could not be opened by any loader candidate.
    #[error("not found: {0}")]
    NotFound(String),

    /// A malformed property value, an out-of-range index, or any other
    /// caller-supplied argument that fails validation. The operation's
    /// state is left unchanged.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `get_image`/`get_audio` was asked for a format no converter can
    /// produce and no cached buffer satisfies.
    #[error("unsupported format: {0}")]
    FormatUnsupported(String),

    /// Out-of-memory or pool exhaustion beyond the heap fallback. The
    /// consumer should log this and stop its pull loop.
    #[error("fatal: {0}")]
    Fatal(String),

    /// Underlying I/O failure (config file reads, resource probing).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

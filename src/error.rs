//! Crate-wide error type. See SPEC_FULL.md §7 for the error-kind taxonomy:
//! bad input, domain-construction failure, and resource exhaustion are all
//! recoverable and reported to the caller; solver instability is a
//! programming error and is asserted rather than returned here.

use thiserror::Error;

/// Errors produced by the public pipeline API.
#[derive(Debug, Error)]
pub enum SimError {
    /// The request itself is malformed: an unreadable/empty mesh, an
    /// unrecognized quality tier, or similar caller mistakes.
    #[error("bad input: {0}")]
    BadInput(String),

    /// Voxelization produced a domain that cannot be simulated (no fluid
    /// cells, or no inlet cluster reachable from the source point). Carries
    /// the sequence of clamp/retarget decisions that led to the failure.
    #[error("domain construction failed: {message}\ntrace:\n{}", trace.join("\n"))]
    DomainConstruction { message: String, trace: Vec<String> },

    /// A buffer the solver or advector would need to allocate exceeds a
    /// safe size, detected before the allocation is attempted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Filesystem failure reading a mesh or writing the output artifact.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

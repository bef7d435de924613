//! Error types for the page cache.

use thiserror::Error;

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Error variants for page cache operations.
///
/// These are the expected negative outcomes; contract violations (illegal
/// state transitions, double delete, ownership misuse) panic at the
/// violation site instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    /// The page was concurrently moved to the freeing state; there is
    /// nothing for the caller to do.
    #[error("page is being freed")]
    Gone,

    /// A layer's ownership sub-lock is contended and the caller asked
    /// not to block.
    #[error("page is busy")]
    Busy,

    /// The client cache has no remaining page budget; the caller must
    /// trigger eviction before retrying admission.
    #[error("client cache page budget exhausted")]
    NoBudget,

    /// A layer callback failed.
    #[error("layer {layer} failed: {reason}")]
    LayerFailed {
        /// Name of the failing layer.
        layer: &'static str,
        /// Layer-reported reason.
        reason: String,
    },
}

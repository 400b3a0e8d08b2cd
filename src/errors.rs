//! Error taxonomy, per spec.md §7.
//!
//! Grounded on `tokamak-debugger/src/error.rs`'s `DebuggerError`: a single
//! `thiserror` enum per crate, `#[from]` conversions for the errors we wrap
//! rather than originate, and a nested sub-enum for a family that needs its
//! own helper methods. Assumption invalidation is deliberately *not* a
//! variant here — per spec.md §7 it's a local control-flow signal, not an
//! error.

use thiserror::Error;

use crate::symbol::Symbol;

/// Errors the runtime can surface to its host.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A lookup found no binding for `name` anywhere up the enclosing chain.
    #[error("object '{0}' not found")]
    UnboundIdentifier(Symbol),

    /// A read observed a promise still in `Forcing` state for itself
    /// (self-referential default argument evaluation).
    #[error("promise already under evaluation")]
    RecursiveForce,

    /// `sys.frame`/`sys.parent`/`parent.frame` received a depth argument
    /// that decodes to something outside the currently valid stack.
    #[error("not that many frames on the call stack")]
    FrameOutOfRange,

    /// The caller chain contains a cycle or a dangling id — an internal
    /// invariant violation, not a user-facing mistake.
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),

    /// The profiler failed to start, stop or write its output.
    #[error("profiler error: {0}")]
    Profiler(#[from] ProfilerError),
}

/// Invariant violations that should never happen if the rest of the crate
/// is implemented correctly; kept distinct from user-facing errors so a host
/// can choose to treat them as bugs (log + abort) rather than recoverable
/// conditions.
#[derive(Debug, Error)]
pub enum InternalError {
    #[error("dangling caller id {0:?}")]
    DanglingCallerId(crate::caller::CallerId),

    #[error("dangling frame descriptor id {0:?}")]
    DanglingFdId(crate::environment::FdId),

    #[error("cycle detected while walking the enclosing chain from {0:?}")]
    EnclosingCycle(crate::environment::FdId),

    #[error("slot {0:?} read before being written")]
    UninitializedSlot(crate::frame::SlotId),
}

/// Errors from starting, sampling, or writing out the profiler.
#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("profiler is already running")]
    AlreadyRunning,

    #[error("profiler is not running")]
    NotRunning,

    #[error("failed to spawn profiler sampling thread: {0}")]
    SpawnFailed(String),

    #[error("failed to write profile output: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_identifier_message_contains_name() {
        let sym = Symbol::intern("missing_var_marker");
        let err = RuntimeError::UnboundIdentifier(sym);
        assert!(err.to_string().contains("missing_var_marker"));
    }

    #[test]
    fn internal_error_wraps_into_runtime_error() {
        let inner = InternalError::UninitializedSlot(crate::frame::SlotId::from_raw(3));
        let err: RuntimeError = inner.into();
        assert!(matches!(err, RuntimeError::Internal(_)));
    }
}

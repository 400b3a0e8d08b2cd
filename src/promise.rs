//! Lazy promises (C5), spec.md §4.4.
//!
//! The promise body itself is a `Thunk` trait object, the same shape the
//! teacher uses for an external extension point invoked at defined
//! lifecycle points (`ethrex-levm/src/hooks/hook.rs`'s `Hook` trait) —
//! expression evaluation belongs to the host evaluator (§1 scope), so
//! `langrt` only owns the state machine around forcing it.

use std::cell::RefCell;

use tracing::{trace, warn};

use crate::caller::CallerId;
use crate::environment::FdId;
use crate::errors::RuntimeError;
use crate::value::Value;

/// Where a promise is in its lifecycle, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Unforced,
    Forcing,
    Forced,
}

/// The unevaluated body of a promise. A host evaluator implements this to
/// bridge back into its own expression-evaluation machinery.
pub trait Thunk {
    /// Evaluates the promise body in `env`, with `caller` as the
    /// call-activation record active at the point of forcing (not the
    /// promise's own defining call — see spec.md §4.4's deoptimization
    /// rule).
    fn evaluate(&self, env: FdId, caller: CallerId) -> Result<Value, RuntimeError>;
}

/// Storage backing a `Promise`. Modeled as an enum rather than
/// `(PromiseState, Option<thunk>, Option<value>)` so the three lifecycle
/// states each carry exactly the data they can have — there's no
/// "Forced but value is None" state to guard against at the call site.
enum Storage {
    Unforced(Box<dyn Thunk>),
    Forcing,
    Forced(Value),
}

/// One lazy argument: an unevaluated expression plus the environment it
/// closes over, memoizing its value once forced.
pub struct Promise {
    storage: Storage,
    defining_env: FdId,
    /// Whether an optimizer may still assume this promise's slot can be
    /// elided (spec.md §4.4's deoptimization rule). Starts `true`; cleared
    /// the first time `sys.frame`/`sys.frames` exposes a frame holding this
    /// promise while it's still unforced.
    eager: bool,
}

impl Promise {
    pub fn new(thunk: Box<dyn Thunk>, defining_env: FdId) -> Self {
        Promise { storage: Storage::Unforced(thunk), defining_env, eager: true }
    }

    /// A promise that already holds a value (e.g. a strict argument
    /// wrapped for a uniform calling convention).
    pub fn already_forced(value: Value, defining_env: FdId) -> Self {
        Promise { storage: Storage::Forced(value), defining_env, eager: true }
    }

    pub fn state(&self) -> PromiseState {
        match self.storage {
            Storage::Unforced(_) => PromiseState::Unforced,
            Storage::Forcing => PromiseState::Forcing,
            Storage::Forced(_) => PromiseState::Forced,
        }
    }

    pub fn defining_env(&self) -> FdId {
        self.defining_env
    }

    /// Whether this promise is still assumed eager (eligible for
    /// slot-elision optimizations). See spec.md §4.4's deoptimization rule.
    pub fn is_eager(&self) -> bool {
        self.eager
    }

    /// Marks this promise non-eager, per spec.md §4.4: called on every
    /// still-unforced promise reachable from a frame `sys.frame`/
    /// `sys.frames` is about to expose to user code, so an optimizer never
    /// elides a slot user code might now introspect or force out of order.
    pub fn mark_non_eager(&mut self) {
        self.eager = false;
    }

    /// Forces the promise, per spec.md §4.4:
    /// - `Forced` returns the memoized value immediately.
    /// - `Forcing` means the promise is being evaluated by an enclosing
    ///   call on the stack (a self-referential default argument) — this is
    ///   a runtime error, not a silent re-entrant evaluation.
    /// - `Unforced` evaluates the thunk in `defining_env` using `caller` as
    ///   the dynamically active call, transitions through `Forcing`, then
    ///   memoizes the result and moves to `Forced`. If evaluation returns
    ///   an error the promise is left `Unforced` again so a retry (e.g.
    ///   after a condition handler resumes) can re-attempt it, matching
    ///   spec.md's "forcing is not required to be idempotent on failure"
    ///   note.
    pub fn force(&mut self, caller: CallerId) -> Result<Value, RuntimeError> {
        match std::mem::replace(&mut self.storage, Storage::Forcing) {
            Storage::Forced(value) => {
                trace!("promise already forced, returning memoized value");
                self.storage = Storage::Forced(value.clone());
                Ok(value)
            }
            Storage::Forcing => {
                warn!("recursive force detected");
                self.storage = Storage::Forcing;
                Err(RuntimeError::RecursiveForce)
            }
            Storage::Unforced(thunk) => match thunk.evaluate(self.defining_env, caller) {
                Ok(value) => {
                    self.storage = Storage::Forced(value.clone());
                    trace!("promise forced successfully");
                    Ok(value)
                }
                Err(err) => {
                    self.storage = Storage::Unforced(thunk);
                    Err(err)
                }
            },
        }
    }

    /// Forces a promise reached through shared, dynamically-borrowed
    /// storage (e.g. a slot's `Value::Promise(Rc<RefCell<Promise>>)`),
    /// without holding the `RefCell` borrow across thunk evaluation. A
    /// thunk that reaches back into the same promise (`x <- quote(x);
    /// eval(x)`, spec.md §8 scenario 6) then observes `Storage::Forcing`
    /// through its own fresh `borrow_mut()` and returns `RecursiveForce`,
    /// rather than panicking on a double mutable borrow of the same cell.
    pub fn force_shared(cell: &RefCell<Promise>, caller: CallerId) -> Result<Value, RuntimeError> {
        let thunk = {
            let mut promise = cell.borrow_mut();
            match std::mem::replace(&mut promise.storage, Storage::Forcing) {
                Storage::Forced(value) => {
                    trace!("promise already forced, returning memoized value");
                    promise.storage = Storage::Forced(value.clone());
                    return Ok(value);
                }
                Storage::Forcing => {
                    warn!("recursive force detected");
                    promise.storage = Storage::Forcing;
                    return Err(RuntimeError::RecursiveForce);
                }
                Storage::Unforced(thunk) => thunk,
            }
        };

        let defining_env = cell.borrow().defining_env;
        match thunk.evaluate(defining_env, caller) {
            Ok(value) => {
                let mut promise = cell.borrow_mut();
                promise.storage = Storage::Forced(value.clone());
                trace!("promise forced successfully");
                Ok(value)
            }
            Err(err) => {
                let mut promise = cell.borrow_mut();
                promise.storage = Storage::Unforced(thunk);
                Err(err)
            }
        }
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .field("defining_env", &self.defining_env)
            .field("eager", &self.eager)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingThunk {
        calls: Cell<u32>,
        result: Value,
    }

    impl Thunk for CountingThunk {
        fn evaluate(&self, _env: FdId, _caller: CallerId) -> Result<Value, RuntimeError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.result.clone())
        }
    }

    struct FailingThunk;

    impl Thunk for FailingThunk {
        fn evaluate(&self, _env: FdId, _caller: CallerId) -> Result<Value, RuntimeError> {
            Err(RuntimeError::FrameOutOfRange)
        }
    }

    fn dummy_caller() -> CallerId {
        CallerId::from_raw(0)
    }

    #[test]
    fn force_evaluates_once_and_memoizes() {
        let thunk = CountingThunk { calls: Cell::new(0), result: Value::Integer(5) };
        let calls_probe = &thunk.calls;
        let mut promise = Promise::new(Box::new(thunk), FdId::from_raw(0));
        let first = promise.force(dummy_caller()).unwrap();
        let second = promise.force(dummy_caller()).unwrap();
        assert!(matches!(first, Value::Integer(5)));
        assert!(matches!(second, Value::Integer(5)));
        assert_eq!(calls_probe.get(), 1);
        assert_eq!(promise.state(), PromiseState::Forced);
    }

    #[test]
    fn already_forced_promise_skips_thunk() {
        let mut promise = Promise::already_forced(Value::Integer(1), FdId::from_raw(0));
        assert!(matches!(promise.force(dummy_caller()).unwrap(), Value::Integer(1)));
    }

    #[test]
    fn failed_force_leaves_promise_unforced_for_retry() {
        let mut promise = Promise::new(Box::new(FailingThunk), FdId::from_raw(0));
        assert!(promise.force(dummy_caller()).is_err());
        assert_eq!(promise.state(), PromiseState::Unforced);
    }

    #[test]
    fn new_promise_starts_eager_and_can_be_marked_non_eager() {
        let mut promise = Promise::new(Box::new(FailingThunk), FdId::from_raw(0));
        assert!(promise.is_eager());
        promise.mark_non_eager();
        assert!(!promise.is_eager());
    }

    #[test]
    fn force_shared_memoizes_through_a_refcell() {
        let thunk = CountingThunk { calls: Cell::new(0), result: Value::Integer(9) };
        let calls_probe = &thunk.calls;
        let cell = RefCell::new(Promise::new(Box::new(thunk), FdId::from_raw(0)));
        let first = Promise::force_shared(&cell, dummy_caller()).unwrap();
        let second = Promise::force_shared(&cell, dummy_caller()).unwrap();
        assert!(matches!(first, Value::Integer(9)));
        assert!(matches!(second, Value::Integer(9)));
        assert_eq!(calls_probe.get(), 1);
        assert_eq!(cell.borrow().state(), PromiseState::Forced);
    }
}

//! Scenario 6 (spec.md §8): `x <- quote(x); eval(x)` — forcing a promise
//! whose own body re-enters forcing the same promise must fail with
//! `RecursivePromise` and leave the promise `Unforced` afterwards, never
//! silently re-evaluating and never getting stuck `Forcing` forever.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::caller::CallerId;
use crate::environment::FdId;
use crate::errors::RuntimeError;
use crate::promise::{Promise, PromiseState, Thunk};
use crate::value::Value;

/// A thunk that, when evaluated, tries to force the very promise it
/// belongs to — modeling `x <- quote(x); eval(x)`'s self-reference. Holds a
/// `Weak` rather than the owning `Rc` so constructing the promise and its
/// own self-referential thunk doesn't require the promise to exist first.
struct SelfForcingThunk {
    promise: Weak<RefCell<Promise>>,
}

impl Thunk for SelfForcingThunk {
    fn evaluate(&self, _env: FdId, caller: CallerId) -> Result<Value, RuntimeError> {
        let cell = self.promise.upgrade().expect("promise outlives its own forcing");
        Promise::force_shared(&cell, caller)
    }
}

#[test]
fn recursive_force_fails_and_leaves_the_promise_unforced() {
    let cell: Rc<RefCell<Promise>> = Rc::new_cyclic(|weak| {
        let thunk = SelfForcingThunk { promise: weak.clone() };
        RefCell::new(Promise::new(Box::new(thunk), FdId::from_raw(0)))
    });

    let caller = CallerId::from_raw(0);
    // `force_shared` drops its own borrow before calling into the thunk, so
    // the thunk's re-entrant `force_shared` call on the same cell observes
    // `Storage::Forcing` through a fresh borrow rather than panicking on a
    // double mutable borrow.
    let result = Promise::force_shared(&cell, caller);

    assert!(matches!(result, Err(RuntimeError::RecursiveForce)));
    assert_eq!(cell.borrow().state(), PromiseState::Unforced);
}

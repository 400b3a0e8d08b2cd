//! Interface-only stand-in for the external vector/numeric value layer (C1).
//!
//! The actual arithmetic, coercions and vector operations belong to the
//! host's data-type crate (§1 Non-goals); this module defines only the
//! shape the environment/frame/profiler subsystems need to reason about:
//! what a "value" tag looks like, whether it's shared, what its attributes
//! are, and how to measure its footprint for the profiler's allocation
//! accounting (spec.md §4.6).
//!
//! Modeled after `ethrex-levm/src/memory.rs`'s `Memory` (a shared mutable
//! buffer behind `Rc<RefCell<_>>`) generalized from "a byte buffer" to "a
//! tagged union of scalar / vector / closure / environment / promise /
//! external handle."

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::environment::FdId;
use crate::symbol::Symbol;

/// How many places currently hold a reference to a value's backing storage.
/// Mirrors the "is this safe to mutate in place" question the host's vector
/// layer asks before an in-place update; the environment/frame layer only
/// needs to know the answer, not how it's computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareState {
    /// Exactly one binding references this value; in-place mutation is safe.
    Unshared,
    /// Two or more bindings may reference this value; any mutation must
    /// copy first.
    Shared,
}

/// Name/value attribute map attached to a value (dimensions, class, names,
/// ...). Kept as an opaque map of attribute name to `Value` so the
/// environment layer can look one up without knowing what attributes the
/// host language defines.
pub type Attributes = FxHashMap<Symbol, Value>;

/// A runtime value, as seen by the environment/frame/profiler core.
///
/// This is a deliberately small supertype: the host's real value
/// representation will be larger and likely boxed/tagged differently
/// on-the-wire, but every operation this crate performs (stable-value
/// equality, allocation-size accounting, promise forcing) only needs the
/// shape below.
#[derive(Debug, Clone)]
pub enum Value {
    /// The "unset"/missing sentinel distinct from any user-observable value.
    Unbound,
    /// A scalar double, stored bitwise for the stable-value comparison in
    /// `frame::StableValue` (see DESIGN.md Open Question #1).
    Double(f64),
    /// A scalar integer.
    Integer(i64),
    /// A scalar boolean, with the three-valued logic the host language
    /// typically needs (true/false/NA) folded into `Option<bool>`.
    Logical(Option<bool>),
    /// A character scalar.
    Character(Rc<str>),
    /// An opaque vector payload; only its byte length matters to this
    /// crate's accounting, so it's kept as a share-counted blob rather than
    /// a typed buffer.
    Vector {
        share: ShareState,
        bytes: Rc<RefCell<Vec<u8>>>,
    },
    /// A closure capturing a defining environment.
    Closure { body: crate::ast_iface::NodeId, enclosing: FdId },
    /// A first-class reference to an environment.
    Environment(FdId),
    /// An external handle (connection, foreign object, ...) the host
    /// manages; `langrt` only needs to carry it around and report its
    /// declared size for profiler accounting.
    External { tag: Symbol, declared_size: usize },
    /// A lazy promise bound to this slot (spec.md §4.4's stable-value
    /// interaction: "until then, lookups through that slot return the
    /// promise and the caller forces it"). `Rc<RefCell<_>>` since forcing
    /// mutates the promise in place while more than one binding can read
    /// the same slot before it's forced.
    Promise(Rc<RefCell<crate::promise::Promise>>),
}

impl Value {
    /// Approximate footprint in bytes, used by the profiler to bucket
    /// allocation deltas into `large_v`/`small_v`/`nodes`/`copied`
    /// (spec.md §4.6, §6).
    pub fn allocation_size(&self) -> usize {
        match self {
            Value::Unbound => 0,
            Value::Double(_) => size_of::<f64>(),
            Value::Integer(_) => size_of::<i64>(),
            Value::Logical(_) => size_of::<Option<bool>>(),
            Value::Character(s) => s.len(),
            Value::Vector { bytes, .. } => bytes.borrow().len(),
            Value::Closure { .. } => size_of::<crate::ast_iface::NodeId>() + size_of::<FdId>(),
            Value::Environment(_) => size_of::<FdId>(),
            Value::External { declared_size, .. } => *declared_size,
            Value::Promise(_) => size_of::<Rc<RefCell<crate::promise::Promise>>>(),
        }
    }

    /// Bitwise stable-value equality (DESIGN.md Open Question #1): two
    /// values are "the same" for assumption-checking purposes only if their
    /// representations are bit-identical, not merely numerically equal.
    /// `NaN` payloads and signed zero therefore count as distinct.
    pub fn stable_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unbound, Value::Unbound) => true,
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Logical(a), Value::Logical(b)) => a == b,
            (Value::Character(a), Value::Character(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Vector { bytes: a, .. }, Value::Vector { bytes: b, .. }) => Rc::ptr_eq(a, b),
            (Value::Closure { body: ba, enclosing: ea }, Value::Closure { body: bb, enclosing: eb }) => {
                ba == bb && ea == eb
            }
            (Value::Environment(a), Value::Environment(b)) => a == b,
            (Value::External { tag: ta, declared_size: sa }, Value::External { tag: tb, declared_size: sb }) => {
                ta == tb && sa == sb
            }
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

//! Frame & slot store (C3), spec.md §4.1.
//!
//! `Frame` owns the slot array for one lexical scope plus whatever
//! fast-path assumptions let reads skip the general lookup protocol.
//! Mirrors the checkpoint discipline of `ethrex-levm/src/vm.rs`'s
//! `Substate` (push/commit/revert-style bookkeeping) and the
//! atomic-counter-under-a-lock shape of `jit/counter.rs`'s
//! `ExecutionCounter` for `Assumption`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::constants::{MAX_INVAL_NO_MULTI_SLOT, MAX_INVAL_NON_LOCAL_MODIFIED, MAX_INVAL_STABLE_VALUE};
use crate::symbol::Symbol;
use crate::value::Value;

/// Stable handle to a slot within one `Frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

impl SlotId {
    pub const fn from_raw(raw: u32) -> Self {
        SlotId(raw)
    }
}

/// A generation-counted assumption: a read path can cache "this still
/// holds" and only needs to recheck the counter, not recompute the
/// condition. Invalidating bumps the counter; once `invalidations` exceeds
/// `budget` the assumption is permanently considered broken (matches
/// spec.md Design Note §9's "model each assumption as an atomic generation
/// counter").
#[derive(Debug)]
pub struct Assumption {
    generation: AtomicU64,
    invalidations: AtomicU32,
    budget: u32,
}

impl Assumption {
    pub fn new(budget: u32) -> Self {
        Assumption {
            generation: AtomicU64::new(0),
            invalidations: AtomicU32::new(0),
            budget,
        }
    }

    /// Current generation, cheap to read under contention (fast path, no
    /// lock — matches `ExecutionCounter::increment`'s fast-path read).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether this assumption is still usable, i.e. hasn't exceeded its
    /// invalidation budget yet.
    pub fn is_valid(&self) -> bool {
        self.invalidations.load(Ordering::Acquire) <= self.budget
    }

    /// Records an invalidation, bumping the generation unconditionally so
    /// any cached generation number observed before this call is stale.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.invalidations.fetch_add(1, Ordering::AcqRel);
    }
}

impl Default for Assumption {
    fn default() -> Self {
        Assumption::new(0)
    }
}

/// A slot wrapped as an active binding (a getter/setter pair supplied by
/// the host rather than a plain stored value), per spec.md's "Tie-breaks
/// and edge cases" bullet for C3.
#[derive(Debug, Clone)]
pub struct ActiveBinding {
    pub getter: crate::ast_iface::NodeId,
    pub setter: Option<crate::ast_iface::NodeId>,
}

#[derive(Debug, Clone)]
enum SlotStorage {
    /// The common case: one value, one writer history.
    Single(Value),
    /// Promoted storage after a second concurrent context wrote a distinct
    /// value under the same slot while `no_multi_slot` was still assumed to
    /// hold (spec.md §4.1's multi-slot promotion). Retained for the
    /// lifetime of the `Frame` (DESIGN.md Open Question #2).
    Multi(FxHashMap<u32, Value>),
    /// A getter/setter pair rather than stored data.
    Active(ActiveBinding),
}

/// Per-slot bookkeeping: the `stable_value` assumption used by reads that
/// want to skip the general protocol, whether this slot currently holds
/// multi-context data, and `non_local_modified` — monotonically invalidated
/// the first time a non-local (`<<-`-style) write or a write on a frame
/// flagged irregular lands here (spec.md §4.1 step 5).
#[derive(Debug)]
pub struct SlotInfo {
    storage: SlotStorage,
    stable_value: Assumption,
    no_multi_slot: Assumption,
    non_local_modified: Assumption,
}

/// How a write reached this slot, per spec.md §4.1's four write modes.
/// Threaded explicitly through `Frame::write` rather than inferred, so the
/// caller states its intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// An ordinary `<-`/assignment local to this frame.
    Local,
    /// A `<<-`-style write that must walk the enclosing chain to find an
    /// existing binding rather than create a new local one.
    NonLocal,
    /// A promise's `force()` installing its evaluated value over the
    /// promise itself.
    ForceAndSet,
    /// A write arriving from a concurrently active context (e.g. a
    /// deparse/match.call path re-entering the same frame), which may
    /// trigger multi-slot promotion if the written value differs from what
    /// is already stored.
    MultiContext { context_id: u32 },
}

/// Outcome of `Frame::write`, letting a caller react when the write didn't
/// land in ordinary slot storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was stored (or multi-slotted) directly.
    Stored,
    /// The slot is an active binding: `Frame` has no callable to invoke, so
    /// the host evaluator (§1 scope) must route `value` through this setter
    /// node itself. The caller is also responsible for invalidating the
    /// FD-level `no_active_binding` assumption, since that assumption lives
    /// in `environment.rs`'s `FdMetadata`, not here.
    ActiveBinding(Option<crate::ast_iface::NodeId>),
}

/// One lexical scope's slot store.
#[derive(Debug, Default)]
pub struct Frame {
    slots: FxHashMap<SlotId, SlotInfo>,
    names: FxHashMap<Symbol, SlotId>,
    next_slot: u32,
    /// Set for frames materialized into a user-held environment (spec.md
    /// §4.1 step 5): every write here invalidates `non_local_modified`
    /// regardless of `WriteMode`, not just `NonLocal` writes.
    irregular: bool,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    /// Flags this frame irregular, per spec.md §4.1 step 5. One-way: an
    /// environment handed out to user code (e.g. captured by
    /// `sys.frame`/`parent.frame`) never becomes regular again.
    pub fn mark_irregular(&mut self) {
        self.irregular = true;
    }

    pub fn is_irregular(&self) -> bool {
        self.irregular
    }

    /// Allocates a new slot for `name` if one doesn't already exist,
    /// returning its id either way.
    pub fn slot_for(&mut self, name: Symbol) -> SlotId {
        if let Some(&id) = self.names.get(&name) {
            return id;
        }
        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        self.names.insert(name, id);
        self.slots.insert(
            id,
            SlotInfo {
                storage: SlotStorage::Single(Value::Unbound),
                stable_value: Assumption::new(MAX_INVAL_STABLE_VALUE),
                no_multi_slot: Assumption::new(MAX_INVAL_NO_MULTI_SLOT),
                non_local_modified: Assumption::new(MAX_INVAL_NON_LOCAL_MODIFIED),
            },
        );
        id
    }

    pub fn lookup_slot(&self, name: Symbol) -> Option<SlotId> {
        self.names.get(&name).copied()
    }

    pub fn is_active_binding(&self, id: SlotId) -> bool {
        matches!(self.slots.get(&id).map(|i| &i.storage), Some(SlotStorage::Active(_)))
    }

    pub fn install_active_binding(&mut self, name: Symbol, binding: ActiveBinding) {
        let id = self.slot_for(name);
        if let Some(info) = self.slots.get_mut(&id) {
            info.storage = SlotStorage::Active(binding);
        }
    }

    /// Whether `non_local_modified` is still live for `id` (i.e. no
    /// non-local write or irregular-frame write has landed here yet).
    pub fn non_local_modified_is_valid(&self, id: SlotId) -> bool {
        self.slots.get(&id).map(|i| i.non_local_modified.is_valid()).unwrap_or(false)
    }

    /// Write algorithm, spec.md §4.1's five steps:
    /// 1. resolve the target slot according to `mode`,
    /// 2. if the slot is an active binding, route through its setter,
    /// 3. if a concurrent context's write disagrees with the single stored
    ///    value, promote to multi-slot storage,
    /// 4. store the value (single or keyed by context),
    /// 5. invalidate `stable_value` unless the write is a no-op
    ///    (bit-identical value, matching `Value::stable_eq`); invalidate
    ///    `non_local_modified` if the write is non-local or this frame is
    ///    flagged irregular.
    pub fn write(&mut self, id: SlotId, mode: WriteMode, value: Value) -> WriteOutcome {
        let irregular = self.irregular;
        let Some(info) = self.slots.get_mut(&id) else {
            debug!(?id, "write to unknown slot ignored");
            return WriteOutcome::Stored;
        };

        if let SlotStorage::Active(binding) = &info.storage {
            trace!(?id, "write routed through active binding setter");
            return WriteOutcome::ActiveBinding(binding.setter);
        }

        match (&mut info.storage, mode) {
            (SlotStorage::Multi(map), WriteMode::MultiContext { context_id }) => {
                map.insert(context_id, value);
                info.stable_value.invalidate();
            }
            (SlotStorage::Single(existing), WriteMode::MultiContext { context_id }) => {
                if !existing.stable_eq(&value) {
                    info.no_multi_slot.invalidate();
                    info.non_local_modified.invalidate();
                    let mut map = FxHashMap::default();
                    map.insert(u32::MAX, existing.clone());
                    map.insert(context_id, value);
                    info.storage = SlotStorage::Multi(map);
                    trace!(?id, "slot promoted to multi-slot storage");
                } else {
                    trace!(?id, "multi-context write was a no-op, skipping promotion");
                }
                info.stable_value.invalidate();
            }
            (SlotStorage::Single(existing), _) => {
                let changed = !existing.stable_eq(&value);
                *existing = value;
                if changed {
                    info.stable_value.invalidate();
                }
            }
            (SlotStorage::Multi(map), _) => {
                map.insert(u32::MAX, value);
                info.stable_value.invalidate();
            }
            (SlotStorage::Active(_), _) => unreachable!("active bindings return above"),
        }

        if mode == WriteMode::NonLocal || irregular {
            info.non_local_modified.invalidate();
        }

        WriteOutcome::Stored
    }

    /// Read algorithm, spec.md §4.1: reads from the default (non-context)
    /// slot unless the slot has been promoted to multi-slot storage, in
    /// which case the caller must supply a `context_id`.
    pub fn read(&self, id: SlotId, context_id: Option<u32>) -> Option<Value> {
        let info = self.slots.get(&id)?;
        match &info.storage {
            SlotStorage::Single(value) => Some(value.clone()),
            SlotStorage::Multi(map) => {
                let key = context_id.unwrap_or(u32::MAX);
                map.get(&key).or_else(|| map.get(&u32::MAX)).cloned()
            }
            SlotStorage::Active(_) => None,
        }
    }

    /// Fast-path read that additionally reports whether `stable_value` is
    /// still trustworthy for this slot (i.e. hasn't exceeded its
    /// invalidation budget), letting a caller decide whether to keep using
    /// a cached generation number for this slot.
    pub fn read_stable(&self, id: SlotId) -> Option<(Value, bool)> {
        let info = self.slots.get(&id)?;
        let value = match &info.storage {
            SlotStorage::Single(value) => value.clone(),
            SlotStorage::Multi(map) => map.get(&u32::MAX).cloned()?,
            SlotStorage::Active(_) => return None,
        };
        Some((value, info.stable_value.is_valid()))
    }

    pub fn is_multi_slot(&self, id: SlotId) -> bool {
        matches!(self.slots.get(&id).map(|i| &i.storage), Some(SlotStorage::Multi(_)))
    }

    pub fn names(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.names.keys().copied()
    }

    /// Marks every still-unforced promise stored in this frame non-eager,
    /// per spec.md §4.4's deoptimization rule: called on a frame right
    /// before `sys.frame`/`sys.frames` exposes it to user code, so an
    /// optimizer never assumes a slot can be elided once user code might
    /// introspect or force it out of order.
    pub fn deoptimize_promises(&mut self) {
        for info in self.slots.values_mut() {
            match &info.storage {
                SlotStorage::Single(Value::Promise(cell)) => {
                    let mut promise = cell.borrow_mut();
                    if promise.state() == crate::promise::PromiseState::Unforced {
                        promise.mark_non_eager();
                    }
                }
                SlotStorage::Multi(map) => {
                    for value in map.values() {
                        if let Value::Promise(cell) = value {
                            let mut promise = cell.borrow_mut();
                            if promise.state() == crate::promise::PromiseState::Unforced {
                                promise.mark_non_eager();
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

//! Environment hierarchy & lookup cache (C4), spec.md §4.2.
//!
//! Grounded directly on `ethrex-levm/src/jit/cache.rs`'s `CodeCache`: an
//! arena (`HashMap` keyed by a stable id) behind one lock, with explicit
//! `insert`/`get`/`invalidate` operations rather than implicit eviction —
//! generalized here from "compiled code keyed by code hash" to "FD metadata
//! keyed by `FdId`, plus a reverse index from identifier to the FDs whose
//! cached lookup result depends on it."

use std::sync::RwLock;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::frame::{ActiveBinding, Assumption, Frame, SlotId, WriteOutcome};
use crate::symbol::Symbol;
use crate::value::Value;

/// Stable handle to one frame descriptor (environment) in an
/// `EnvironmentRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdId(u32);

impl FdId {
    pub const fn from_raw(raw: u32) -> Self {
        FdId(raw)
    }
}

/// Outcome of a cached lookup, per spec.md §3's `LookupResult`. Both
/// found-variants carry the *absolute* location of the binding (not one
/// relative to whichever FD the lookup started from), so the same result
/// can be cached verbatim at every FD visited while walking the enclosing
/// chain to find it.
#[derive(Debug, Clone)]
pub enum LookupResult {
    /// Bound, and the slot's `stable_value` assumption is currently live —
    /// a reader may use `value` directly without re-reading the frame.
    StableValue { fd: FdId, slot: SlotId, value: Value },
    /// Bound, but not cacheable as a stable value (the slot has no live
    /// `stable_value`, e.g. it was written to more than `MAX_INVAL` times);
    /// the caller re-reads `fd`/`slot` directly.
    FrameAndSlot { fd: FdId, slot: SlotId },
    /// Walked the entire enclosing chain without finding a binding.
    Unbound,
}

impl LookupResult {
    /// The absolute `(fd, slot)` this result resolved to, if bound.
    pub fn location(&self) -> Option<(FdId, SlotId)> {
        match self {
            LookupResult::StableValue { fd, slot, .. } => Some((*fd, *slot)),
            LookupResult::FrameAndSlot { fd, slot } => Some((*fd, *slot)),
            LookupResult::Unbound => None,
        }
    }
}

impl PartialEq for LookupResult {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                LookupResult::StableValue { fd, slot, value },
                LookupResult::StableValue { fd: fd2, slot: slot2, value: value2 },
            ) => fd == fd2 && slot == slot2 && value.stable_eq(value2),
            (LookupResult::FrameAndSlot { fd, slot }, LookupResult::FrameAndSlot { fd: fd2, slot: slot2 }) => {
                fd == fd2 && slot == slot2
            }
            (LookupResult::Unbound, LookupResult::Unbound) => true,
            _ => false,
        }
    }
}

/// Metadata for one frame descriptor: its `Frame` (slot store), its
/// enclosing FD (lexical parent, if any) together with an invalidatable
/// assumption over that link, whether it has ever been observed by more
/// than one `RCaller` (promoted to `Shared`, a one-way transition), the
/// per-identifier lookup cache, and the FD-level "no active binding"
/// assumption (spec.md §3's FD metadata, §4.1's active-binding tie-break).
#[derive(Debug)]
pub struct FdMetadata {
    pub frame: Frame,
    pub enclosing: Option<FdId>,
    pub shared: bool,
    /// Invalidated whenever `enclosing` is rewired (`reattach`); lets a
    /// cached lookup that crossed this FD on its way up the chain know
    /// whether the chain shape it was computed against still holds.
    enclosing_assumption: Assumption,
    /// Invalidated the first time any slot in `frame` becomes an active
    /// binding, or has one written to (spec.md §4.1: "writing one
    /// invalidates the FD-level 'no active binding' assumption").
    no_active_binding: Assumption,
    lookup_cache: FxHashMap<Symbol, LookupResult>,
}

impl FdMetadata {
    fn new(enclosing: Option<FdId>) -> Self {
        FdMetadata {
            frame: Frame::new(),
            enclosing,
            shared: false,
            enclosing_assumption: Assumption::new(0),
            no_active_binding: Assumption::new(0),
            lookup_cache: FxHashMap::default(),
        }
    }
}

/// Config for the environment registry, following the teacher's pattern of
/// a small `Deserialize`-able config struct with a `Default` impl
/// (`l2/prover/src/config.rs::ProverConfig`, `jit/types.rs::JitConfig`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Initial capacity hint for the FD arena, to avoid reallocation
    /// churn on deeply recursive programs.
    pub initial_capacity: usize,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        EnvironmentConfig { initial_capacity: 64 }
    }
}

struct RegistryInner {
    fds: Vec<FdMetadata>,
    /// Reverse index: for each identifier, every FD whose `lookup_cache`
    /// currently holds an entry for it. Used to invalidate all affected
    /// caches when a binding changes anywhere in the chain (spec.md §4.2's
    /// invalidation contract), mirroring `CodeCache`'s explicit
    /// `invalidate(key)` rather than a TTL/generation scheme.
    previous_lookups: FxHashMap<Symbol, FxHashSet<FdId>>,
}

/// Owns every environment created during execution, behind one lock —
/// matching spec.md §5's "one monitor serializes FD metadata, lookup-cache
/// and enclosing-chain rewiring" and the teacher's `RwLock<CodeCacheInner>`
/// granularity.
pub struct EnvironmentRegistry {
    inner: RwLock<RegistryInner>,
}

impl EnvironmentRegistry {
    pub fn new(config: &EnvironmentConfig) -> Self {
        EnvironmentRegistry {
            inner: RwLock::new(RegistryInner {
                fds: Vec::with_capacity(config.initial_capacity),
                previous_lookups: FxHashMap::default(),
            }),
        }
    }

    /// Creates a new environment whose lexical parent is `enclosing`.
    pub fn create(&self, enclosing: Option<FdId>) -> FdId {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        let id = FdId(inner.fds.len() as u32);
        inner.fds.push(FdMetadata::new(enclosing));
        debug!(fd = id.0, enclosing = ?enclosing, "environment created");
        id
    }

    /// Marks `fd` as observed from more than one call-activation record.
    /// One-way: once `Shared`, an FD never reverts to unshared (spec.md
    /// §4.2).
    pub fn mark_shared(&self, fd: FdId) {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        if let Some(meta) = inner.fds.get_mut(fd.0 as usize) {
            if !meta.shared {
                meta.shared = true;
                trace!(fd = fd.0, "environment promoted to shared");
            }
        }
    }

    /// Looks up `name` starting at `start`, walking the enclosing chain.
    /// Caches the result at every FD visited along the way so a repeat
    /// lookup from any of them is O(1), and records each visited FD in
    /// `previous_lookups[name]` so a later write can invalidate precisely
    /// the caches that depend on it.
    pub fn lookup(&self, start: FdId, name: Symbol) -> LookupResult {
        {
            #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
            let inner = self.inner.read().unwrap();
            if let Some(meta) = inner.fds.get(start.0 as usize) {
                if let Some(cached) = meta.lookup_cache.get(&name) {
                    trace!(fd = start.0, %name, "lookup cache hit");
                    return cached.clone();
                }
            }
        }

        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        let mut visited = Vec::new();
        let mut current = Some(start);
        let result = loop {
            let Some(fd) = current else {
                break LookupResult::Unbound;
            };
            visited.push(fd);
            let Some(meta) = inner.fds.get(fd.0 as usize) else {
                break LookupResult::Unbound;
            };
            if let Some(slot) = meta.frame.lookup_slot(name) {
                break match meta.frame.read_stable(slot) {
                    Some((value, true)) => LookupResult::StableValue { fd, slot, value },
                    _ => LookupResult::FrameAndSlot { fd, slot },
                };
            }
            current = meta.enclosing;
        };

        // Every FD on the walked chain resolves `name` to the same
        // absolute location, so the identical result is cacheable at all
        // of them — not just at `start`.
        for fd in &visited {
            if let Some(meta) = inner.fds.get_mut(fd.0 as usize) {
                meta.lookup_cache.insert(name, result.clone());
            }
            inner.previous_lookups.entry(name).or_default().insert(*fd);
        }

        trace!(fd = start.0, %name, ?result, "lookup resolved and cached");
        result
    }

    /// Invalidates every FD's cached lookup result for `name`, per
    /// spec.md §4.2: called whenever a binding for `name` is created,
    /// modified, or removed anywhere in the chain.
    pub fn invalidate(&self, name: Symbol) {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        if let Some(affected) = inner.previous_lookups.remove(&name) {
            let count = affected.len();
            for fd in affected {
                if let Some(meta) = inner.fds.get_mut(fd.0 as usize) {
                    meta.lookup_cache.remove(&name);
                }
            }
            trace!(%name, count, "lookup cache invalidated");
        }
    }

    /// Writes `name` in `fd`'s own frame and invalidates every cached
    /// lookup that depends on it, per spec.md §4.2's invalidation contract
    /// ("writing identifier `I` ... must invalidate all cached
    /// `LookupResult`s keyed by `I`"). This is the path a host should use
    /// for any write that's meant to be visible to lookups from other
    /// frames; `with_frame_mut` + `Frame::write` directly is for writes a
    /// host already knows are purely local (e.g. a fresh slot that has
    /// never been looked up through).
    ///
    /// Returns the slot's `WriteOutcome`: when it's `ActiveBinding`, this
    /// call has already invalidated `no_active_binding` for `fd`, but the
    /// host evaluator still owns actually invoking the returned setter node
    /// (`Frame` has no access to the AST evaluator, §1 scope).
    pub fn write_binding(&self, fd: FdId, name: Symbol, mode: crate::frame::WriteMode, value: crate::value::Value) -> WriteOutcome {
        let outcome = self
            .with_frame_mut(fd, |frame| {
                let slot = frame.slot_for(name);
                frame.write(slot, mode, value)
            })
            .unwrap_or(WriteOutcome::Stored);
        if matches!(outcome, WriteOutcome::ActiveBinding(_)) {
            self.invalidate_active_binding(fd);
        }
        self.invalidate(name);
        outcome
    }

    /// Installs `binding` as `name`'s active binding in `fd`'s frame and
    /// invalidates `fd`'s `no_active_binding` assumption, per spec.md §3's
    /// FD metadata and §4.1's active-binding tie-break.
    pub fn install_active_binding(&self, fd: FdId, name: Symbol, binding: ActiveBinding) {
        self.with_frame_mut(fd, |frame| frame.install_active_binding(name, binding));
        self.invalidate_active_binding(fd);
        self.invalidate(name);
    }

    fn invalidate_active_binding(&self, fd: FdId) {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        if let Some(meta) = inner.fds.get(fd.0 as usize) {
            meta.no_active_binding.invalidate();
            trace!(fd = fd.0, "no_active_binding assumption invalidated");
        }
    }

    /// Whether `fd` is still assumed to hold no active bindings.
    pub fn no_active_binding_is_valid(&self, fd: FdId) -> bool {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.fds.get(fd.0 as usize).map(|meta| meta.no_active_binding.is_valid()).unwrap_or(false)
    }

    /// Whether `fd`'s enclosing link is still the one any cached lookup
    /// that crossed it was computed against.
    pub fn enclosing_assumption_is_valid(&self, fd: FdId) -> bool {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.fds.get(fd.0 as usize).map(|meta| meta.enclosing_assumption.is_valid()).unwrap_or(false)
    }

    /// Rewires `fd`'s enclosing FD, invalidating any cached lookups that
    /// crossed through it (since the chain those caches were built against
    /// no longer matches reality) along with `fd`'s own enclosing
    /// assumption.
    pub fn reattach(&self, fd: FdId, new_enclosing: Option<FdId>) {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        if let Some(meta) = inner.fds.get_mut(fd.0 as usize) {
            meta.enclosing = new_enclosing;
            meta.enclosing_assumption.invalidate();
            let names: Vec<Symbol> = meta.lookup_cache.keys().copied().collect();
            meta.lookup_cache.clear();
            debug!(fd = fd.0, new_enclosing = ?new_enclosing, "environment reattached");
            drop(inner);
            for name in names {
                self.invalidate(name);
            }
        }
    }

    pub fn with_frame<R>(&self, fd: FdId, f: impl FnOnce(&Frame) -> R) -> Option<R> {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.fds.get(fd.0 as usize).map(|meta| f(&meta.frame))
    }

    pub fn with_frame_mut<R>(&self, fd: FdId, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();
        inner.fds.get_mut(fd.0 as usize).map(|meta| f(&mut meta.frame))
    }

    /// Marks every still-unforced promise in `fd`'s frame non-eager, per
    /// spec.md §4.4's deoptimization rule. Called by the stack-introspection
    /// builtins (`sys.frame`/`sys.frames`) right before handing `fd` out to
    /// user code.
    pub fn deoptimize_promises(&self, fd: FdId) {
        self.with_frame_mut(fd, |frame| frame.deoptimize_promises());
    }

    pub fn enclosing_of(&self, fd: FdId) -> Option<FdId> {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.fds.get(fd.0 as usize).and_then(|meta| meta.enclosing)
    }

    pub fn is_shared(&self, fd: FdId) -> bool {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.fds.get(fd.0 as usize).map(|meta| meta.shared).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::WriteMode;
    use crate::value::Value;

    fn registry() -> EnvironmentRegistry {
        EnvironmentRegistry::new(&EnvironmentConfig::default())
    }

    #[test]
    fn lookup_finds_local_binding() {
        let reg = registry();
        let fd = reg.create(None);
        let name = Symbol::intern("local_binding_marker");
        reg.with_frame_mut(fd, |frame| {
            let slot = frame.slot_for(name);
            frame.write(slot, WriteMode::Local, Value::Integer(10));
        });
        let result = reg.lookup(fd, name);
        let (found_fd, _) = result.location().expect("binding should be found");
        assert_eq!(found_fd, fd);
    }

    #[test]
    fn lookup_walks_enclosing_chain() {
        let reg = registry();
        let parent = reg.create(None);
        let child = reg.create(Some(parent));
        let name = Symbol::intern("enclosing_binding_marker");
        reg.with_frame_mut(parent, |frame| {
            let slot = frame.slot_for(name);
            frame.write(slot, WriteMode::Local, Value::Integer(99));
        });
        let result = reg.lookup(child, name);
        let (found_fd, _) = result.location().expect("binding should be found via enclosing chain");
        assert_eq!(found_fd, parent);
    }

    #[test]
    fn lookup_unbound_identifier_returns_unbound() {
        let reg = registry();
        let fd = reg.create(None);
        let name = Symbol::intern("never_defined_marker");
        assert_eq!(reg.lookup(fd, name), LookupResult::Unbound);
    }

    #[test]
    fn invalidate_clears_cached_entries() {
        let reg = registry();
        let fd = reg.create(None);
        let name = Symbol::intern("invalidate_marker");
        let _ = reg.lookup(fd, name);
        reg.invalidate(name);
        reg.with_frame_mut(fd, |frame| {
            let slot = frame.slot_for(name);
            frame.write(slot, WriteMode::Local, Value::Integer(1));
        });
        match reg.lookup(fd, name) {
            LookupResult::StableValue { .. } | LookupResult::FrameAndSlot { .. } => {}
            other => panic!("expected fresh bound lookup after invalidation, got {other:?}"),
        }
    }

    #[test]
    fn sharing_is_one_way() {
        let reg = registry();
        let fd = reg.create(None);
        reg.mark_shared(fd);
        assert!(reg.is_shared(fd));
    }

    #[test]
    fn installing_an_active_binding_invalidates_no_active_binding() {
        let reg = registry();
        let fd = reg.create(None);
        let name = Symbol::intern("active_binding_env_marker");
        assert!(reg.no_active_binding_is_valid(fd));
        reg.install_active_binding(
            fd,
            name,
            crate::frame::ActiveBinding { getter: crate::ast_iface::NodeId::from_raw(1), setter: Some(crate::ast_iface::NodeId::from_raw(2)) },
        );
        assert!(!reg.no_active_binding_is_valid(fd));
    }

    #[test]
    fn writing_an_active_binding_slot_also_invalidates_no_active_binding() {
        let reg = registry();
        let fd = reg.create(None);
        let name = Symbol::intern("active_binding_write_env_marker");
        reg.install_active_binding(
            fd,
            name,
            crate::frame::ActiveBinding { getter: crate::ast_iface::NodeId::from_raw(1), setter: Some(crate::ast_iface::NodeId::from_raw(2)) },
        );
        let outcome = reg.write_binding(fd, name, WriteMode::Local, Value::Integer(5));
        assert!(matches!(outcome, crate::frame::WriteOutcome::ActiveBinding(Some(_))));
        assert!(!reg.no_active_binding_is_valid(fd));
    }

    #[test]
    fn reattach_invalidates_the_enclosing_assumption() {
        let reg = registry();
        let parent_a = reg.create(None);
        let parent_b = reg.create(None);
        let child = reg.create(Some(parent_a));
        assert!(reg.enclosing_assumption_is_valid(child));
        reg.reattach(child, Some(parent_b));
        assert!(!reg.enclosing_assumption_is_valid(child));
        assert_eq!(reg.enclosing_of(child), Some(parent_b));
    }
}

//! Caller-chain model (C2), spec.md §4.3.
//!
//! Arena-indexed rather than `Rc`-linked for the same reason the teacher
//! keys its caches and backup chains by stable id/box rather than shared
//! pointers (`vm.rs`'s `Substate::parent: Option<Box<Self>>`,
//! `jit/cache.rs`'s `CodeCache`): the caller chain is not strictly a tree —
//! a promise-evaluation frame's `previous` can point back into an ancestor
//! of its own lexical parent — so an `Rc` graph would risk cycles neither
//! `Rc` nor `Weak` resolve cleanly on their own.

use tracing::trace;

use crate::ast_iface::CallNode;
use crate::environment::FdId;

/// Stable handle into a `CallerArena`. Never reused for the lifetime of the
/// arena, so a stale id is always detectable rather than silently
/// aliasing a newer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId(u32);

impl CallerId {
    pub const fn from_raw(raw: u32) -> Self {
        CallerId(raw)
    }
}

/// What an activation's dynamic predecessor represents, per spec.md §3's
/// `payload_kind` field. The R-side "payload" (a promise's logical caller,
/// or a captured environment for a non-function parent) is folded into the
/// variant's own data rather than kept as a separate field, since each kind
/// only ever carries its own shape of payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// An ordinary function call (this includes the top-level/global
    /// activation, which is simply the regular frame with no `previous`).
    Regular,
    /// A frame installed while forcing a promise. Transparent to most
    /// introspection: `unwrap_promise_caller` replaces it with
    /// `logical_caller`, the activation that was active at the moment the
    /// promise was forced (spec.md §4.4's force protocol, step 3).
    PromiseEvaluation { logical_caller: CallerId },
    /// A frame whose "parent" (in the `sys.parent`/`parent.frame` sense) is
    /// an arbitrary environment rather than another activation — e.g.
    /// `eval(expr, envir = e)`. Halts `sys.parent`'s walk (§4.3).
    NonFunctionParent { captured_env: FdId },
    /// Any other frame shape the host needs to represent that doesn't fit
    /// the three kinds above (spec.md's catch-all fourth kind). Treated
    /// like a promise-evaluation frame for depth purposes (transparent,
    /// does not open a new function frame) since the spec gives it no
    /// sharper definition.
    Irregular,
}

/// One call-activation record. Mirrors spec.md §3's RCaller: the dynamic
/// predecessor, the syntax of the call itself (for `sys.call`/`match.call`),
/// a frame descriptor id for the callee's own environment, and the
/// `payload_kind`/payload pair that governs how introspection unwraps this
/// record.
///
/// DESIGN.md Open Question resolution: the distilled spec lists `parent` and
/// `previous` as two separate RCaller fields, but `original_source/` (which
/// could disambiguate their exact difference) carries no files for this
/// retrieval. For every operation spec.md §4.3/§4.5 actually specifies,
/// walking `previous` with `unwrap_promise_caller` re-applied at each step
/// produces the same answer a separate lexical-logical `parent` chain would
/// for a regular call (previous *is* the lexically-and-dynamically enclosing
/// activation); the two fields are collapsed into one here rather than
/// carried as redundant state.
#[derive(Debug, Clone)]
pub struct RCaller {
    pub kind: PayloadKind,
    pub previous: Option<CallerId>,
    pub calling_fd: Option<FdId>,
    pub callee_fd: Option<FdId>,
    pub syntax_node: Option<CallNode>,
    pub depth: usize,
}

/// Arena owning every `RCaller` created during execution. A host creates
/// one per `Runtime`; records are appended, never removed, since
/// `sys.frame`/`sys.parent` need to be able to answer queries about frames
/// that have already returned (until the `Runtime` itself is dropped).
#[derive(Debug, Default)]
pub struct CallerArena {
    records: Vec<RCaller>,
}

impl CallerArena {
    pub fn new() -> Self {
        CallerArena { records: Vec::new() }
    }

    /// Pushes the top-level caller. Must be called exactly once, before any
    /// other `push_call`.
    pub fn push_top_level(&mut self) -> CallerId {
        debug_assert!(self.records.is_empty(), "top-level caller pushed twice");
        let id = CallerId(self.records.len() as u32);
        self.records.push(RCaller {
            kind: PayloadKind::Regular,
            previous: None,
            calling_fd: None,
            callee_fd: None,
            syntax_node: None,
            depth: 0,
        });
        id
    }

    /// Pushes a new call-activation record whose dynamic predecessor is
    /// `previous`. Depth arithmetic follows spec.md §8's monotonicity
    /// invariant: a `Regular` activation opens a new function frame (depth =
    /// `previous.depth + 1`); every other kind is transparent to depth and
    /// inherits `previous`'s depth unchanged.
    pub fn push_call(
        &mut self,
        kind: PayloadKind,
        previous: CallerId,
        calling_fd: Option<FdId>,
        callee_fd: Option<FdId>,
        syntax_node: Option<CallNode>,
    ) -> CallerId {
        let previous_depth = self.get(previous).map(|r| r.depth).unwrap_or(0);
        let depth = match kind {
            PayloadKind::Regular => previous_depth + 1,
            PayloadKind::PromiseEvaluation { .. } | PayloadKind::NonFunctionParent { .. } | PayloadKind::Irregular => {
                previous_depth
            }
        };
        let id = CallerId(self.records.len() as u32);
        trace!(caller_id = id.0, ?kind, depth, "push caller record");
        self.records.push(RCaller {
            kind,
            previous: Some(previous),
            calling_fd,
            callee_fd,
            syntax_node,
            depth,
        });
        id
    }

    pub fn get(&self, id: CallerId) -> Option<&RCaller> {
        self.records.get(id.0 as usize)
    }

    /// Depth of the call stack as of `id`, i.e. how many `Regular` frames
    /// separate it from the top-level caller. The top-level caller itself is
    /// depth 0.
    pub fn depth_of(&self, id: CallerId) -> usize {
        self.get(id).map(|r| r.depth).unwrap_or(0)
    }

    /// `unwrap_promise_caller(c)`, spec.md §4.3: while `c` is a
    /// promise-evaluation record, replace it with its logical caller. A
    /// no-op for every other kind, including on a first call (idempotent:
    /// applying this twice gives the same answer as applying it once).
    pub fn unwrap_promise_caller(&self, id: CallerId) -> CallerId {
        let mut current = id;
        while let Some(record) = self.get(current) {
            match record.kind {
                PayloadKind::PromiseEvaluation { logical_caller } => current = logical_caller,
                _ => break,
            }
        }
        current
    }

    /// `unwrap_sys_parent(c)`, spec.md §4.3: the captured environment if `c`
    /// is a non-function-parent record, else `None`.
    pub fn unwrap_sys_parent(&self, id: CallerId) -> Option<FdId> {
        match self.get(id)?.kind {
            PayloadKind::NonFunctionParent { captured_env } => Some(captured_env),
            _ => None,
        }
    }

    /// `unwrap_previous(c)`, spec.md §4.3: `c`'s dynamic predecessor, with
    /// any promise-evaluation records on the way unwrapped to their logical
    /// caller.
    pub fn unwrap_previous(&self, id: CallerId) -> Option<CallerId> {
        let previous = self.get(id)?.previous?;
        Some(self.unwrap_promise_caller(previous))
    }

    /// `sys.nframe()`: the depth of `unwrap_previous(c0)` (spec.md §4.5's
    /// builtin table) — the depth of the nearest real dynamic predecessor,
    /// not of `c0` itself.
    pub fn nframe(&self, c0: CallerId) -> usize {
        self.unwrap_previous(c0).map(|id| self.depth_of(id)).unwrap_or(0)
    }

    /// `sys.parent(n)`/`parent.frame(n)`'s shared walk, spec.md §4.3's
    /// "Depth arithmetic": unwrap `c0` itself first, then take `n` steps
    /// back along `previous`, re-unwrapping promise-evaluation records at
    /// every step. A non-function parent encountered mid-walk halts early
    /// and returns the activation reached just before it (spec.md: "halt
    /// the walk and return prev.depth").
    pub fn walk_parent(&self, c0: CallerId, n: usize) -> Option<CallerId> {
        let mut current = self.unwrap_promise_caller(c0);
        for _ in 0..n {
            let previous = self.get(current)?.previous?;
            let unwrapped = self.unwrap_promise_caller(previous);
            if self.unwrap_sys_parent(unwrapped).is_some() {
                return Some(current);
            }
            current = unwrapped;
        }
        Some(current)
    }

    /// `decode_frame_number(c, n)`'s resolution to an actual activation,
    /// spec.md §4.5: `d` is the depth of `unwrap_previous(c0)`; positive `n`
    /// selects the activation at absolute depth `n` (must be `<= d`);
    /// `n <= 0` selects the activation `d + n` steps up from the top, i.e.
    /// `-n` dynamic steps back from `d`. Used by `sys.call`/`sys.frame`,
    /// which — unlike `sys.parent` — select "by absolute depth... not by
    /// parent chain" (spec.md §4.3).
    pub fn decode_frame_number(&self, c0: CallerId, which: i64) -> Option<CallerId> {
        let base = self.unwrap_previous(c0)?;
        let d = self.depth_of(base);
        let target_depth = if which > 0 {
            let n = which as usize;
            if n > d {
                return None;
            }
            n
        } else {
            let back = which.unsigned_abs() as usize;
            if back > d {
                return None;
            }
            d - back
        };
        self.at_depth(base, target_depth)
    }

    /// Walks back from `from` along `previous` (unwrapping promise frames)
    /// until reaching an activation at exactly `target_depth`.
    fn at_depth(&self, from: CallerId, target_depth: usize) -> Option<CallerId> {
        let mut current = from;
        loop {
            let record = self.get(current)?;
            if record.depth == target_depth {
                return Some(current);
            }
            if record.depth < target_depth {
                return None;
            }
            current = self.unwrap_promise_caller(record.previous?);
        }
    }

    /// Walks from `from` back to the frame whose `callee_fd == Some(target)`,
    /// used by `parent.frame`'s lexical-parent-by-environment variant.
    pub fn find_by_callee_fd(&self, from: CallerId, target: FdId) -> Option<CallerId> {
        let mut current = Some(from);
        while let Some(id) = current {
            let record = self.get(id)?;
            if record.callee_fd == Some(target) {
                return Some(id);
            }
            current = record.previous;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_chain(arena: &mut CallerArena, n: usize) -> Vec<CallerId> {
        let mut ids = vec![arena.push_top_level()];
        for _ in 0..n {
            let prev = *ids.last().unwrap();
            ids.push(arena.push_call(PayloadKind::Regular, prev, None, None, None));
        }
        ids
    }

    #[test]
    fn walk_parent_zero_is_identity() {
        let mut arena = CallerArena::new();
        let ids = push_chain(&mut arena, 3);
        let last = *ids.last().unwrap();
        assert_eq!(arena.walk_parent(last, 0), Some(last));
    }

    #[test]
    fn walk_parent_past_top_level_is_none() {
        let mut arena = CallerArena::new();
        let ids = push_chain(&mut arena, 2);
        let last = *ids.last().unwrap();
        assert_eq!(arena.walk_parent(last, 10), None);
    }

    #[test]
    fn depth_matches_chain_position() {
        let mut arena = CallerArena::new();
        let ids = push_chain(&mut arena, 4);
        assert_eq!(arena.depth_of(ids[4]), 4);
        assert_eq!(arena.depth_of(ids[0]), 0);
    }

    #[test]
    fn promise_evaluation_frame_does_not_increase_depth() {
        let mut arena = CallerArena::new();
        let top = arena.push_top_level();
        let call = arena.push_call(PayloadKind::Regular, top, None, None, None);
        let forcing = arena.push_call(PayloadKind::PromiseEvaluation { logical_caller: call }, call, None, None, None);
        assert_eq!(arena.depth_of(forcing), arena.depth_of(call));
    }

    #[test]
    fn unwrap_promise_caller_follows_logical_caller() {
        let mut arena = CallerArena::new();
        let top = arena.push_top_level();
        let call = arena.push_call(PayloadKind::Regular, top, None, None, None);
        let forcing = arena.push_call(PayloadKind::PromiseEvaluation { logical_caller: call }, call, None, None, None);
        assert_eq!(arena.unwrap_promise_caller(forcing), call);
        // Idempotent per spec.md §8's unwrap-idempotence law.
        assert_eq!(arena.unwrap_promise_caller(arena.unwrap_promise_caller(forcing)), call);
        // A no-op on a record that was never a promise frame.
        assert_eq!(arena.unwrap_promise_caller(call), call);
    }

    #[test]
    fn decode_frame_number_positive_selects_absolute_depth() {
        let mut arena = CallerArena::new();
        let ids = push_chain(&mut arena, 5);
        let current = *ids.last().unwrap();
        // d = depth of unwrap_previous(current) = 4 (the caller of `current`).
        assert_eq!(arena.decode_frame_number(current, 3), Some(ids[3]));
        assert_eq!(arena.decode_frame_number(current, 6), None);
    }

    #[test]
    fn decode_frame_number_non_positive_counts_back_from_current() {
        let mut arena = CallerArena::new();
        let ids = push_chain(&mut arena, 5);
        let current = *ids.last().unwrap();
        // d = depth of unwrap_previous(current) = 4; n <= 0 selects frame d+n,
        // so n=0 resolves to the base itself (ids[4]), not the global frame.
        assert_eq!(arena.decode_frame_number(current, 0), Some(ids[4]));
        assert_eq!(arena.decode_frame_number(current, -1), Some(ids[3]));
        assert_eq!(arena.decode_frame_number(current, -4), Some(ids[0]));
        assert_eq!(arena.decode_frame_number(current, -5), None);
    }
}

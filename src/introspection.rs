//! Stack-introspection builtins (C6), spec.md §4.5.
//!
//! Grounded on `tokamak-debugger/src/engine.rs`'s `ReplayEngine`:
//! depth-indexed navigation (`forward`/`backward`/`goto(step)`) over a
//! recorded history, generalized here from "replay steps" to "frames on
//! the live caller chain."

use tracing::trace;

use crate::ast_iface::{CallNode, Formals};
use crate::caller::{CallerArena, CallerId};
use crate::environment::{EnvironmentRegistry, FdId};
use crate::errors::RuntimeError;

/// `sys.call(which)`: the syntax of the call that is `which` frames away
/// from `current`, per spec.md's frame-number decoding rules (absolute
/// depth, not a parent-chain walk).
pub fn sys_call(arena: &CallerArena, current: CallerId, which: i64) -> Result<Option<CallNode>, RuntimeError> {
    let frame = arena
        .decode_frame_number(current, which)
        .ok_or(RuntimeError::FrameOutOfRange)?;
    Ok(arena.get(frame).and_then(|r| r.syntax_node.clone()))
}

/// Marks every still-unforced promise in `fd`'s frame non-eager before it is
/// handed out to user code, per spec.md §4.4: "the only correctness
/// interaction between C5 and C6" — a stack-introspection builtin that
/// exposes a frame must deoptimize any promise it holds, since an optimizer
/// is no longer entitled to assume that promise's slot can be elided once
/// user code might inspect or force it out of the usual evaluation order.
fn deoptimize_promises(envs: &EnvironmentRegistry, fd: FdId) {
    envs.deoptimize_promises(fd);
}

/// `sys.frame(which)`: the environment active in the frame `which` steps
/// away from `current`, selected by absolute depth per spec.md §4.3
/// ("sys.frame(n) selects by absolute depth (0 = global), not by parent
/// chain").
pub fn sys_frame(
    arena: &CallerArena,
    envs: &EnvironmentRegistry,
    current: CallerId,
    which: i64,
) -> Result<Option<FdId>, RuntimeError> {
    let frame = arena
        .decode_frame_number(current, which)
        .ok_or(RuntimeError::FrameOutOfRange)?;
    let fd = arena.get(frame).and_then(|r| r.callee_fd);
    if let Some(fd) = fd {
        deoptimize_promises(envs, fd);
    }
    Ok(fd)
}

/// `sys.frames()`: every environment from depth 1 up to `current.depth - 1`,
/// in caller-chain order (innermost last). Excludes both `current`'s own
/// frame and the depth-0 global frame, per spec.md's range.
pub fn sys_frames(arena: &CallerArena, envs: &EnvironmentRegistry, current: CallerId) -> Vec<FdId> {
    let mut out = Vec::new();
    let mut cursor = arena.get(current).and_then(|r| r.previous);
    while let Some(id) = cursor {
        let Some(record) = arena.get(id) else { break };
        if record.depth == 0 {
            break;
        }
        if let Some(fd) = record.callee_fd {
            out.push(fd);
        }
        cursor = record.previous;
    }
    out.reverse();
    for fd in &out {
        deoptimize_promises(envs, *fd);
    }
    out
}

/// `sys.nframe()`: the depth of `unwrap_previous(current)`, per spec.md's
/// builtin table — not the depth of `current` itself.
pub fn sys_nframe(arena: &CallerArena, current: CallerId) -> usize {
    arena.nframe(current)
}

/// `sys.parent(n)`: the caller `n` dynamic steps back from `current`, per
/// spec.md §4.3's depth arithmetic (re-unwrapping promise frames at every
/// step, halting early on a non-function parent).
pub fn sys_parent(arena: &CallerArena, current: CallerId, n: usize) -> Result<CallerId, RuntimeError> {
    arena.walk_parent(current, n).ok_or(RuntimeError::FrameOutOfRange)
}

/// `sys.parents()`: the dynamic-depth number of every frame from depth 1
/// up to `current`'s depth.
pub fn sys_parents(arena: &CallerArena, current: CallerId) -> Vec<usize> {
    let mut out = Vec::new();
    let mut cursor = Some(current);
    while let Some(id) = cursor {
        let Some(record) = arena.get(id) else { break };
        out.push(record.depth);
        cursor = record.previous;
    }
    out.reverse();
    out
}

/// `sys.function(which)`: same resolution as `sys.call`, but returning the
/// callee's environment rather than its call syntax — a host looks up the
/// closure value through that environment's defining slot itself; this
/// crate only locates the frame.
pub fn sys_function(
    arena: &CallerArena,
    envs: &EnvironmentRegistry,
    current: CallerId,
    which: i64,
) -> Result<Option<FdId>, RuntimeError> {
    sys_frame(arena, envs, current, which)
}

/// `parent.frame(n)`: like `sys.parent(n)`, but returns the resolved
/// activation's *own* environment rather than a depth number (spec.md
/// §4.5: "returns the environment of the resolved activation").
pub fn parent_frame(arena: &CallerArena, current: CallerId, n: usize) -> Result<FdId, RuntimeError> {
    let resolved = arena.walk_parent(current, n).ok_or(RuntimeError::FrameOutOfRange)?;
    arena.get(resolved).and_then(|r| r.callee_fd).ok_or(RuntimeError::FrameOutOfRange)
}

/// Result of `match_call`: the rematched call, plus (when `expand_dots` is
/// false and `formals` declares a variadic) the args that would otherwise
/// have been spliced into the variadic position, pairlist-wrapped instead.
#[derive(Debug, Clone)]
pub struct MatchedCall {
    pub call: CallNode,
    pub dots_pairlist: Option<crate::ast_iface::ArgsAndNames>,
}

/// `match.call(def, call, expand_dots, env)`: rebuilds a call's argument
/// list with every argument matched against `formals` by name or position,
/// in formal order, with names filled in for positionally-matched
/// arguments. Per spec.md §4.5, a variadic formal's collected arguments are
/// either spliced into the result in place (`expand_dots = true`) or left
/// out of `call` and returned separately, pairlist-wrapped
/// (`expand_dots = false`).
///
/// `env` is accepted for signature parity with spec.md's four-argument
/// builtin; resolving a call-site `...` that itself passes through an
/// *outer* call's variadic binding (rather than a literal argument list)
/// would require evaluating against `env`, which needs the host's
/// expression evaluator (§1 Non-goals) — out of reach for this
/// interface-only AST stand-in, so it is unused here (DESIGN.md's
/// `match.call` entry records this simplification).
///
/// Name collisions — two arguments naming the same formal — are resolved
/// last-write-wins, logged at `trace` level (DESIGN.md Open Question #3):
/// this builtin is purely informational (it doesn't re-dispatch the call),
/// so a permissive resolution matches spec.md's general preference for
/// introspection builtins to degrade gracefully rather than error.
pub fn match_call(formals: &Formals, call: &CallNode, expand_dots: bool, _env: FdId) -> MatchedCall {
    let n = formals.params.len();
    let variadic_pos = formals.variadic_position();
    let mut matched: Vec<Option<crate::ast_iface::CallArg>> = vec![None; n];
    let mut dots_extra: Vec<crate::ast_iface::CallArg> = Vec::new();
    let mut unnamed: Vec<crate::ast_iface::CallArg> = Vec::new();

    // First pass: arguments named after a non-variadic formal bind there
    // directly; a name that doesn't match any formal (or names the
    // variadic formal itself, which a caller cannot address by name) falls
    // into the dots collector.
    for arg in &call.args.args {
        if let Some(name) = arg.name {
            if let Some(pos) = formals.position_of(name) {
                if Some(pos) != variadic_pos {
                    if matched[pos].is_some() {
                        trace!(%name, "match.call: name collision, keeping last write");
                    }
                    matched[pos] = Some(arg.clone());
                    continue;
                }
            }
            dots_extra.push(arg.clone());
        } else {
            unnamed.push(arg.clone());
        }
    }

    // Second pass: unnamed arguments fill open formal slots before the
    // variadic, in declaration order; only formals preceding `...` can be
    // matched positionally (matching spec.md's R-derived positional-match
    // semantics) — anything left over becomes a dots argument too.
    let fill_limit = variadic_pos.unwrap_or(n);
    let mut unnamed_iter = unnamed.into_iter();
    for pos in 0..fill_limit {
        if matched[pos].is_some() {
            continue;
        }
        if let Some(mut arg) = unnamed_iter.next() {
            arg.name = Some(formals.params[pos].name);
            matched[pos] = Some(arg);
        }
    }
    dots_extra.extend(unnamed_iter);

    if expand_dots || variadic_pos.is_none() {
        let mut out_args = Vec::with_capacity(n + dots_extra.len());
        for (pos, slot) in matched.into_iter().enumerate() {
            if Some(pos) == variadic_pos {
                out_args.append(&mut dots_extra);
                continue;
            }
            if let Some(arg) = slot {
                out_args.push(arg);
            }
        }
        out_args.extend(dots_extra);
        MatchedCall {
            call: CallNode { callee: call.callee, args: crate::ast_iface::ArgsAndNames { args: out_args } },
            dots_pairlist: None,
        }
    } else {
        let out_args = matched
            .into_iter()
            .enumerate()
            .filter(|(pos, _)| Some(*pos) != variadic_pos)
            .filter_map(|(_, slot)| slot)
            .collect();
        MatchedCall {
            call: CallNode { callee: call.callee, args: crate::ast_iface::ArgsAndNames { args: out_args } },
            dots_pairlist: Some(crate::ast_iface::ArgsAndNames { args: dots_extra }),
        }
    }
}

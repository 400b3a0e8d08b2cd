//! Scenario 3 (spec.md §8): `sys.parent(1)` evaluated while forcing a
//! promise argument reports the depth of the promise's *logical* caller's
//! own caller — i.e. the call forcing the promise is unwrapped for free by
//! `sys.parent`'s initial unwrap step, and the explicit `n = 1` step then
//! walks one further step back, landing on `f`'s caller rather than `f`
//! itself or the promise-evaluation frame.
//!
//! `f <- function(a) a`; call `f(g())` where `g <- function() sys.parent(1)`;
//! expected return: the depth of `f`'s caller (not `f` itself, not a promise
//! frame) — spec.md §8 scenario 3.

use crate::caller::{CallerArena, PayloadKind};
use crate::environment::{EnvironmentConfig, EnvironmentRegistry};
use crate::introspection::sys_parent;

#[test]
fn sys_parent_through_a_forced_promise_lands_one_step_past_the_forcing_call() {
    let mut arena = CallerArena::new();
    let envs = EnvironmentRegistry::new(&EnvironmentConfig::default());
    let global = envs.create(None);

    let top = arena.push_top_level();
    // `f(g())` is entered from the top level.
    let f_env = envs.create(Some(global));
    let f_call = arena.push_call(PayloadKind::Regular, top, None, Some(f_env), None);

    // Forcing `a`'s promise (whose body is `g()`) happens *inside* `f`, so
    // the promise-evaluation frame's `logical_caller` is `f_call` — the
    // activation active at the moment forcing began (spec.md §4.4 step 3).
    // `g()`'s own evaluation runs directly in this frame (it is the
    // promise's thunk body), so `sys.parent` is called with `current` set
    // to the promise-evaluation frame itself.
    let g_env = envs.create(Some(global));
    let forcing_frame = arena.push_call(
        PayloadKind::PromiseEvaluation { logical_caller: f_call },
        f_call,
        None,
        Some(g_env),
        None,
    );

    // `sys.parent(1)`'s initial unwrap replaces the promise-evaluation
    // frame with its logical caller (`f_call`) at zero cost; the explicit
    // single step then walks back from `f_call` to `f`'s own caller (`top`).
    let resolved = sys_parent(&arena, forcing_frame, 1).unwrap();
    assert_eq!(resolved, top);
    assert_ne!(resolved, f_call);
    assert_ne!(resolved, forcing_frame);
}

#[test]
fn promise_evaluation_frame_is_transparent_to_depth() {
    let mut arena = CallerArena::new();
    let top = arena.push_top_level();
    let f_call = arena.push_call(PayloadKind::Regular, top, None, None, None);
    let forcing_frame = arena.push_call(
        PayloadKind::PromiseEvaluation { logical_caller: f_call },
        f_call,
        None,
        None,
        None,
    );

    // spec.md §8's depth-monotonicity invariant: a promise-evaluation
    // frame's depth equals its dynamic predecessor's depth exactly, since
    // it does not open a new function frame.
    assert_eq!(arena.depth_of(f_call), arena.depth_of(forcing_frame));
}

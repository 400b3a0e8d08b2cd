//! Scenarios 1 & 2 (spec.md §8): repeated lookups through an intervening
//! frame are served from cache until the looked-up binding actually
//! changes, at which point the very next lookup sees the new value.

use crate::environment::{EnvironmentConfig, EnvironmentRegistry, LookupResult};
use crate::frame::WriteMode;
use crate::symbol::Symbol;
use crate::value::Value;

fn as_integer(result: LookupResult, envs: &EnvironmentRegistry) -> i64 {
    let (fd, slot) = result.location().unwrap_or_else(|| panic!("expected a bound result, got {result:?}"));
    match envs.with_frame(fd, |frame| frame.read(slot, None)) {
        Some(Some(Value::Integer(n))) => n,
        other => panic!("expected an integer binding, got {other:?}"),
    }
}

#[test]
fn repeated_lookups_are_cached_until_the_binding_changes() {
    let envs = EnvironmentRegistry::new(&EnvironmentConfig::default());
    let global = envs.create(None);
    // g's own frame has no `x`; it resolves through global on every call.
    let g_env = envs.create(Some(global));

    let x = Symbol::intern("x_lookup_cache_scenario");
    envs.write_binding(global, x, WriteMode::Local, Value::Integer(1));

    for _ in 0..1_000 {
        let result = envs.lookup(g_env, x);
        assert_eq!(as_integer(result, &envs), 1);
    }

    envs.write_binding(global, x, WriteMode::Local, Value::Integer(2));
    let result = envs.lookup(g_env, x);
    assert_eq!(as_integer(result, &envs), 2);
}

#[test]
fn write_through_a_freshly_attached_child_environment_invalidates_the_cache() {
    let envs = EnvironmentRegistry::new(&EnvironmentConfig::default());
    let global = envs.create(None);
    let g_env = envs.create(Some(global));

    let x = Symbol::intern("x_invalidation_subtree_scenario");
    envs.write_binding(global, x, WriteMode::Local, Value::Integer(1));
    let warm = envs.lookup(g_env, x);
    assert_eq!(as_integer(warm, &envs), 1);

    // A fresh child environment attached under global, performing `x <- x + 1`.
    let child = envs.create(Some(global));
    let current = as_integer(envs.lookup(child, x), &envs);
    envs.write_binding(global, x, WriteMode::Local, Value::Integer(current + 1));

    let after = envs.lookup(g_env, x);
    assert_eq!(as_integer(after, &envs), 2);
}

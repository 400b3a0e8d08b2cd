//! End-to-end scenarios, one file per concrete scenario this crate commits
//! to supporting. Placed under `src/tests/` rather than inline
//! `#[cfg(test)]` modules because these exercise several subsystems
//! together, the same separation `tokamak-debugger` uses between its
//! per-module unit tests and its own scenario-level tests.

mod lookup_cache;
mod profiler_output;
mod recursive_promise;
mod sys_parent_through_promise;

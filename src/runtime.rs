//! Top-level façade tying the caller arena, environment registry and
//! profiler together into the one entry point a host evaluator embeds.
//!
//! Grounded on `ethrex-levm/src/vm.rs`'s `VM<'a>`: one struct aggregating
//! every subsystem (`call_frames`, `current_call_frame`, `env`, `substate`,
//! `hooks`, `tracer`), with `new()` building the initial state and
//! `execute()`-style methods driving it forward.

use std::sync::Arc;

use tracing::{debug, info};

use crate::ast_iface::CallNode;
use crate::caller::{CallerArena, CallerId, PayloadKind};
use crate::environment::{EnvironmentConfig, EnvironmentRegistry, FdId, LookupResult};
use crate::errors::RuntimeError;
use crate::profiler::{Profiler, ProfilerConfig, StackSampler, StartOptions};
use crate::symbol::Symbol;

/// Configuration for an entire `Runtime`, bundling the environment and
/// profiler configs the way the teacher's top-level configs nest smaller
/// per-subsystem configs.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub environment: EnvironmentConfig,
    pub profiler: ProfilerConfig,
}

/// The execution-time environment core: owns the caller-chain arena, the
/// environment registry, the currently active caller, and an optional
/// profiler. A host evaluator drives calls through `enter_call`/
/// `exit_call` and reads/writes bindings through the exposed `environments`
/// handle.
pub struct Runtime {
    callers: CallerArena,
    environments: EnvironmentRegistry,
    current: CallerId,
    global_env: FdId,
    profiler: Profiler,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let mut callers = CallerArena::new();
        let environments = EnvironmentRegistry::new(&config.environment);
        let global_env = environments.create(None);
        let current = callers.push_top_level();
        info!(global_env = ?global_env, "runtime initialized");
        Runtime {
            callers,
            environments,
            current,
            global_env,
            profiler: Profiler::new(config.profiler),
        }
    }

    pub fn global_env(&self) -> FdId {
        self.global_env
    }

    pub fn current_caller(&self) -> CallerId {
        self.current
    }

    pub fn callers(&self) -> &CallerArena {
        &self.callers
    }

    pub fn environments(&self) -> &EnvironmentRegistry {
        &self.environments
    }

    /// Enters a new call activation: creates an environment enclosed by
    /// `lexical_parent`, pushes a caller record whose dynamic predecessor
    /// is the runtime's current caller, and makes it current. Returns the
    /// new caller id and environment so the host can continue evaluating
    /// the callee's body in them.
    pub fn enter_call(
        &mut self,
        kind: PayloadKind,
        lexical_parent: Option<FdId>,
        syntax_node: Option<CallNode>,
    ) -> (CallerId, FdId) {
        let callee_fd = self.environments.create(lexical_parent);
        if lexical_parent.is_some() {
            self.environments.mark_shared(callee_fd);
        }
        let previous = self.current;
        let calling_fd = self.callers.get(previous).and_then(|r| r.callee_fd);
        let id = self
            .callers
            .push_call(kind, previous, calling_fd, Some(callee_fd), syntax_node);
        debug!(caller = ?id, env = ?callee_fd, "call entered");
        self.current = id;
        (id, callee_fd)
    }

    /// Returns to the caller active before the given call, per the
    /// caller-chain's dynamic unwind rule. The runtime does not forget the
    /// record (it stays in the arena for later introspection) — only
    /// `current` moves.
    pub fn exit_call(&mut self, entered: CallerId) {
        if let Some(record) = self.callers.get(entered) {
            if let Some(previous) = record.previous {
                debug!(caller = ?entered, "call exited");
                self.current = previous;
            }
        }
    }

    /// Resolves `name` starting from `start_env`, bumping the lookup cache
    /// as a side effect (spec.md §4.2).
    pub fn lookup(&self, start_env: FdId, name: Symbol) -> LookupResult {
        self.environments.lookup(start_env, name)
    }

    /// Invalidates every cached lookup for `name`. A host calls this after
    /// any assignment that could shadow or shadow-break an existing
    /// binding the lookup cache may have already memoized.
    pub fn invalidate(&self, name: Symbol) {
        self.environments.invalidate(name);
    }

    pub fn start_profiler(&mut self, sampler: Arc<dyn StackSampler>, options: StartOptions) -> Result<(), RuntimeError> {
        self.profiler.start(sampler, options).map_err(RuntimeError::from)
    }

    pub fn stop_profiler(&mut self) -> Result<Vec<crate::profiler::Sample>, RuntimeError> {
        self.profiler.stop().map_err(RuntimeError::from)
    }

    /// Statement-entry hook a host evaluator calls at every statement
    /// boundary, draining the profiler's `tick` flag and taking a sample on
    /// this thread if the timer has fired since the last call (spec.md
    /// §4.6/§5). A no-op when the profiler isn't running.
    pub fn on_profiler_statement_boundary(&self) {
        self.profiler.on_statement_boundary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_runtime_has_a_global_env_and_top_level_caller() {
        let rt = Runtime::new(RuntimeConfig::default());
        assert_eq!(rt.callers().depth_of(rt.current_caller()), 0);
        assert!(rt.environments().enclosing_of(rt.global_env()).is_none());
    }

    #[test]
    fn enter_then_exit_call_restores_current() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let top = rt.current_caller();
        let (entered, env) = rt.enter_call(PayloadKind::Regular, Some(rt.global_env()), None);
        assert_ne!(entered, top);
        assert_ne!(env, rt.global_env());
        rt.exit_call(entered);
        assert_eq!(rt.current_caller(), top);
    }

    #[test]
    fn nested_calls_increase_depth() {
        let mut rt = Runtime::new(RuntimeConfig::default());
        let (first, env1) = rt.enter_call(PayloadKind::Regular, Some(rt.global_env()), None);
        let (second, _) = rt.enter_call(PayloadKind::Regular, Some(env1), None);
        assert_eq!(rt.callers().depth_of(second), rt.callers().depth_of(first) + 1);
    }
}

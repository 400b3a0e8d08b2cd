//! `langrt` — the execution-time environment core for an interpreter of a
//! dynamically-typed, array-oriented language.
//!
//! This crate implements the machinery a host evaluator leans on once it has
//! a parsed call and needs somewhere to put it: lexically-scoped frames with
//! a slot store (`frame`), the environment hierarchy and its lookup cache
//! (`environment`), the caller-chain model used for stack introspection
//! (`caller`), lazily-forced arguments (`promise`), the introspection
//! builtins themselves (`introspection`), and a sampling profiler
//! (`profiler`).
//!
//! ```text
//!                    ┌───────────────┐
//!                    │    Runtime    │
//!                    └───────┬───────┘
//!            ┌────────────┬──┴───┬────────────┐
//!            │            │      │            │
//!       CallerArena  EnvRegistry Frame    Profiler
//!            │            │      │            │
//!       introspection   lookup  promise    sampling
//! ```
//!
//! The vector/numeric value representation, the parser/AST, builtin
//! dispatch tables, and I/O connections are external collaborators. This
//! crate only needs narrow seams onto them, exposed as the interface-only
//! modules `value` and `ast_iface`.

pub mod ast_iface;
pub mod caller;
pub mod constants;
pub mod environment;
pub mod errors;
pub mod frame;
pub mod introspection;
pub mod profiler;
pub mod promise;
pub mod runtime;
pub mod symbol;
pub mod value;

#[cfg(test)]
mod tests;

pub use caller::{CallerArena, CallerId, PayloadKind, RCaller};
pub use environment::{EnvironmentConfig, EnvironmentRegistry, FdId, LookupResult};
pub use errors::RuntimeError;
pub use frame::{Frame, SlotId, WriteMode};
pub use profiler::{AllocationDelta, Profiler, ProfilerConfig, Sample, StackEntry, StackSampler, StartOptions};
pub use promise::{Promise, PromiseState, Thunk};
pub use runtime::Runtime;
pub use symbol::Symbol;

//! Tunable constants shared across the environment, frame and profiler
//! subsystems. Grounded in the teacher's convention of collecting magic
//! numbers as named `const`s rather than inlining them (see
//! `ethrex-levm/src/jit/types.rs`'s `JitConfig` defaults).

/// Number of consecutive invalidations a `stable_value` assumption tolerates
/// before the slot is taken out of the fast path permanently. Matches the
/// "one-shot, but allow a couple of cold flips" posture spec.md §4.1
/// describes for stable-value reads.
pub const MAX_INVAL_STABLE_VALUE: u32 = 2;

/// Same budget for the `no_multi_slot` assumption: a slot is demoted to
/// multi-slot storage the first time a second concurrent context observes
/// distinct values under it, and does not recover afterwards (see DESIGN.md
/// Open Question #2).
pub const MAX_INVAL_NO_MULTI_SLOT: u32 = 1;

/// Budget for `non_local_modified`: spec.md §4.1 calls it "a monotonic
/// assumption flag," i.e. zero tolerance — the first non-local or
/// irregular-frame write invalidates it permanently.
pub const MAX_INVAL_NON_LOCAL_MODIFIED: u32 = 0;

/// Values whose `allocation_size()` (see `value::Value`) is at or above this
/// many bytes are accounted into the profiler's `large_v` bucket rather than
/// `small_v`.
pub const LARGE_VECTOR_THRESHOLD: usize = 8 * 1024;

/// Default profiler sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL_MS: u64 = 10;

/// Default ceiling on `sys.frame`/`sys.parent` depth arguments; anything
/// beyond this is treated as "out of range" per spec.md §4.5 rather than
/// walking an unbounded chain.
pub const MAX_INTROSPECTABLE_DEPTH: usize = 10_000;

//! Sampling profiler (C7), spec.md §4.6 and §6.
//!
//! Grounded on three teacher pieces:
//! - `ethrex-levm/src/jit/compiler_thread.rs`'s `CompilerThread`: a named
//!   background thread started with `thread::Builder`, shut down
//!   gracefully on `Drop` by joining rather than detaching.
//! - `ethrex-levm/src/timings.rs`'s `OpcodeTimings`: accumulate into a
//!   locked structure, then format a sorted report on demand — here, the
//!   report is rendered once at `stop()` rather than per-sample, matching
//!   spec.md §4.6's "Stop ... then emit the output."
//! - `ethrex-levm/src/debugger_hook.rs`'s `OpcodeRecorder` trait and
//!   `tokamak-debugger/src/recorder.rs`'s `DebugRecorder`: a callback
//!   invoked by the interpreter at defined points, here repurposed as the
//!   stack-capture hook a host calls on every sampling tick.

use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::errors::ProfilerError;
use crate::symbol::Symbol;

/// Tunable profiler parameters that apply across every session, following
/// the teacher's `JitConfig`-style `Deserialize` + `Default` config struct.
/// Per-`start()` flags (memory/line profiling, output path, append) are not
/// here — they're `StartOptions`, since spec.md §4.6 passes them to `start`
/// itself, not to profiler construction.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub sample_interval: Duration,
    /// Bytes at or above which an allocation is counted into `large_v`
    /// rather than `small_v` in a sample's accounting.
    pub large_vector_threshold: usize,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        ProfilerConfig {
            sample_interval: Duration::from_millis(crate::constants::DEFAULT_SAMPLE_INTERVAL_MS),
            large_vector_threshold: crate::constants::LARGE_VECTOR_THRESHOLD,
        }
    }
}

/// Arguments to `Profiler::start`, mirroring spec.md §4.6's
/// `start(filename, interval_s, mem, gc, line, append)` (the interval lives
/// in `ProfilerConfig::sample_interval` instead, since it's set once at
/// `Profiler::new` time in this crate's API).
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub filename: PathBuf,
    pub memory_profiling: bool,
    /// Accepted for interface parity with spec.md §4.6's `gc` flag; this
    /// crate does not itself listen for GC events (that belongs to the
    /// external value/vector layer, §1's Non-goals), so it has no effect on
    /// the rendered report beyond being recorded.
    pub gc_profiling: bool,
    pub line_profiling: bool,
    pub append: bool,
}

/// One entry in a captured stack sample: the function's name, source file
/// and line active at the time of the tick, per spec.md §6's output format.
/// `StackSampler` implementations must supply frames **outer-to-inner**
/// (root call first), matching the order spec.md §6 renders in, and must
/// already have filtered out non-function frames (§1 scope: deciding
/// "is this frame's root a user function" belongs to the host's AST layer).
#[derive(Debug, Clone)]
pub struct StackEntry {
    pub function_name: Option<Symbol>,
    pub file: Option<Rc<str>>,
    pub line: Option<u32>,
}

/// Per-sample allocation-delta accounting, bucketed the way spec.md §4.6
/// and §6 describe: large vectors, small vectors, list/pairlist node
/// allocations, and bytes attributed to copy-on-write duplication rather
/// than fresh allocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocationDelta {
    pub large_v: u64,
    pub small_v: u64,
    pub nodes: u64,
    pub copied: u64,
}

impl AllocationDelta {
    fn accumulate(&mut self, other: AllocationDelta) {
        self.large_v += other.large_v;
        self.small_v += other.small_v;
        self.nodes += other.nodes;
        self.copied += other.copied;
    }
}

/// One sample: the stack at the moment of the tick plus the allocation
/// activity attributed to the interval since the previous sample.
#[derive(Debug, Clone)]
pub struct Sample {
    pub stack: Vec<StackEntry>,
    pub delta: AllocationDelta,
}

#[derive(Debug, Default)]
struct ProfileData {
    samples: Vec<Sample>,
    totals: AllocationDelta,
}

impl ProfileData {
    fn record(&mut self, sample: Sample) {
        self.totals.accumulate(sample.delta);
        self.samples.push(sample);
    }
}

/// Callback a host's evaluator implements so the profiler's timer thread
/// can ask "what does the stack look like right now, and what has been
/// allocated since the last tick" without the profiler itself knowing
/// anything about frames or values. Mirrors `OpcodeRecorder`'s role as a
/// thin callback invoked at a defined point in execution.
pub trait StackSampler: Send + Sync {
    fn capture(&self) -> (Vec<StackEntry>, AllocationDelta);
}

/// State the timer thread flips when it wants the interpreter thread to
/// take a sample on its next statement boundary, per spec.md §5: "the only
/// shared state is a volatile `tick` flag and, on shutdown, a `running`
/// flag." The timer thread never calls into `StackSampler` itself — doing
/// so could observe the AST mid-mutation on another thread, which is
/// exactly what the statement-boundary handoff in `on_statement_boundary`
/// avoids.
struct TimerHandle {
    running: Arc<AtomicBool>,
    tick: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.join.take() {
            if handle.join().is_err() {
                warn!("profiler timer thread panicked");
            }
        }
    }
}

/// Sampling profiler: starts a background thread that wakes up every
/// `sample_interval` and flips a `tick` flag; the actual stack capture
/// happens on the interpreter thread the next time it calls
/// `on_statement_boundary` (spec.md §5: "the profiler's stack snapshot is
/// taken at a statement boundary, so it always sees a consistent AST
/// state"). `{disabled -> enabled -> disabled}` per spec.md §4.6; a `start`
/// while enabled performs an implicit `stop` first.
pub struct Profiler {
    config: ProfilerConfig,
    data: Arc<Mutex<ProfileData>>,
    timer: Option<TimerHandle>,
    sampler: Option<Arc<dyn StackSampler>>,
    options: Option<StartOptions>,
}

impl Profiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Profiler { config, data: Arc::new(Mutex::new(ProfileData::default())), timer: None, sampler: None, options: None }
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    /// Starts the background timer thread. An empty `filename` means "stop"
    /// per spec.md §4.6 ("Output filename empty ⇒ stop"); a `start` while
    /// already enabled performs an implicit `stop` first rather than
    /// erroring. The timer thread itself never touches `sampler` — it only
    /// flips `tick`; `on_statement_boundary` is what actually calls into it.
    pub fn start(&mut self, sampler: Arc<dyn StackSampler>, options: StartOptions) -> Result<(), ProfilerError> {
        if options.filename.as_os_str().is_empty() {
            if self.is_running() {
                self.stop()?;
            }
            return Ok(());
        }
        if self.is_running() {
            self.stop()?;
        }

        let mut open_opts = OpenOptions::new();
        open_opts.create(true).write(true);
        if options.append {
            open_opts.append(true);
        } else {
            open_opts.truncate(true);
        }
        open_opts.open(&options.filename)?;

        let running = Arc::new(AtomicBool::new(true));
        let running_for_thread = Arc::clone(&running);
        let tick = Arc::new(AtomicBool::new(false));
        let tick_for_thread = Arc::clone(&tick);
        let interval = self.config.sample_interval;

        let builder = thread::Builder::new().name("profiler-sampler".to_string());
        let handle = builder
            .spawn(move || {
                while running_for_thread.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if !running_for_thread.load(Ordering::Acquire) {
                        break;
                    }
                    tick_for_thread.store(true, Ordering::Release);
                }
            })
            .map_err(|e| ProfilerError::SpawnFailed(e.to_string()))?;

        info!(
            interval_ms = interval.as_millis() as u64,
            mem = options.memory_profiling,
            line = options.line_profiling,
            "profiler started"
        );
        self.timer = Some(TimerHandle { running, tick, join: Some(handle) });
        self.sampler = Some(sampler);
        self.options = Some(options);
        Ok(())
    }

    /// Called by the host interpreter at every statement boundary (spec.md
    /// §4.6/§5). A no-op unless the timer thread has flipped `tick` since
    /// the last call, in which case it drains the flag and takes exactly one
    /// sample on the calling (interpreter) thread.
    pub fn on_statement_boundary(&self) {
        let Some(timer) = &self.timer else { return };
        if timer.tick.swap(false, Ordering::AcqRel) {
            let Some(sampler) = &self.sampler else { return };
            let (stack, delta) = sampler.capture();
            #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
            let mut guard = self.data.lock().unwrap();
            guard.record(Sample { stack, delta });
        }
    }

    /// Stops the background thread, renders the accumulated samples to the
    /// file given at `start`, and returns the samples for a host that wants
    /// to inspect them directly. Per spec.md §4.6, stopping a profiler that
    /// isn't running is an error.
    pub fn stop(&mut self) -> Result<Vec<Sample>, ProfilerError> {
        let timer = self.timer.take().ok_or(ProfilerError::NotRunning)?;
        drop(timer);
        self.sampler = None;
        let options = self.options.take().ok_or(ProfilerError::NotRunning)?;
        debug!("profiler stopped");

        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let mut guard = self.data.lock().unwrap();
        let samples = std::mem::take(&mut guard.samples);
        guard.totals = AllocationDelta::default();
        drop(guard);

        let report =
            Self::render_report(&samples, options.memory_profiling, options.line_profiling, self.config.sample_interval);
        let mut open_opts = OpenOptions::new();
        open_opts.create(true).write(true);
        if options.append {
            open_opts.append(true);
        } else {
            open_opts.truncate(true);
        }
        let mut file = open_opts.open(&options.filename)?;
        file.write_all(report.as_bytes())?;

        Ok(samples)
    }

    pub fn totals(&self) -> AllocationDelta {
        #[expect(clippy::unwrap_used, reason = "lock poisoning is unrecoverable")]
        let guard = self.data.lock().unwrap();
        guard.totals
    }

    /// Renders accumulated samples as the text report described by spec.md
    /// §6: optional `memory profiling: ` / `line profiling: ` markers, the
    /// `sample.interval=` line (microseconds), one `#File N: <path>` line
    /// per distinct source path (first-seen order, only when line
    /// profiling is on), then one line per sample.
    ///
    /// Per-sample lines carry the file/line annotation on their outermost
    /// frame only: spec.md's prose describes it per-frame, but the
    /// scenario-5 testable regex (`( \d+#\d+)?` appearing exactly once,
    /// before the first quoted name) only admits one such annotation per
    /// line, so this resolves the discrepancy in favor of the concrete
    /// testable property.
    pub fn render_report(samples: &[Sample], memory_profiling: bool, line_profiling: bool, interval: Duration) -> String {
        let mut out = String::new();
        if memory_profiling {
            let _ = write!(out, "memory profiling: ");
        }
        if line_profiling {
            let _ = write!(out, "line profiling: ");
        }
        let _ = writeln!(out, "sample.interval={}", interval.as_micros());

        let mut file_index: FxHashMap<Rc<str>, u32> = FxHashMap::default();
        if line_profiling {
            let mut next_index = 1u32;
            for sample in samples {
                for entry in &sample.stack {
                    if let Some(file) = &entry.file {
                        if !file_index.contains_key(file) {
                            file_index.insert(Rc::clone(file), next_index);
                            next_index += 1;
                        }
                    }
                }
            }
            let mut ordered: Vec<(&Rc<str>, u32)> = file_index.iter().map(|(f, i)| (f, *i)).collect();
            ordered.sort_by_key(|(_, i)| *i);
            for (path, idx) in ordered {
                let _ = writeln!(out, "#File {idx}: {path}");
            }
        }

        for sample in samples {
            if memory_profiling {
                let _ = write!(
                    out,
                    ":{}:{}:{}:{}:",
                    sample.delta.large_v, sample.delta.small_v, sample.delta.nodes, sample.delta.copied
                );
            }
            let mut first = true;
            for entry in &sample.stack {
                let name =
                    entry.function_name.map(|s| s.as_str()).unwrap_or_else(|| "<anonymous>".to_string());
                if first && line_profiling {
                    if let (Some(file), Some(line_no)) = (&entry.file, entry.line) {
                        if let Some(&idx) = file_index.get(file) {
                            let _ = write!(out, " {idx}#{line_no}");
                        }
                    }
                }
                let _ = write!(out, " \"{name}\"");
                first = false;
            }
            out.push('\n');
        }
        out
    }
}

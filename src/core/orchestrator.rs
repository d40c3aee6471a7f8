use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, mapref::entry::Entry};
use itertools::Itertools;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::core::{
    domain::{BatchReport, CompilationResult, Problem, RunEvent, RunResult, TestBoard, TestCase},
    pipeline::{
        compiling::{CompileOutcome, compile_error_results, compile_phase, emit},
        registry::ProcessRegistry,
        running::{RunBatch, judge_output, run_tests_concurrently},
    },
    toolchain::{ToolchainDescriptor, ToolchainTable},
    traits::{
        compiler::Compiler,
        runner::{KillSignal, Runner},
    },
};
use crate::error::JudgeError;
use crate::native::{command::ArtifactLocator, compiler::NativeCompiler, runner::NativeRunner};

#[derive(Clone, Debug)]
pub struct JudgeSettings {
    /// Used by `run_one` and by problems without a time limit of their own.
    pub time_limit: Duration,
    pub max_concurrency: Option<usize>,
    /// When false, `time_limit` applies to every problem.
    pub use_problem_time_limit: bool,
}

impl JudgeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            time_limit: config.time_limit(),
            max_concurrency: config.max_concurrency,
            use_problem_time_limit: config.use_problem_time_limit,
        }
    }
}

/// Entry point for hosts: compiles, runs and judges programs.
///
/// At most one operation is in flight per source file and per artifact; a
/// second one touching either is rejected with [`JudgeError::Busy`] until the
/// first has completed.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    toolchains: Arc<ToolchainTable>,
    compiler: Arc<dyn Compiler>,
    runner: Arc<dyn Runner>,
    locator: ArtifactLocator,
    settings: JudgeSettings,
    in_flight: Arc<DashMap<PathBuf, Uuid>>,
}

/// Holds a source path and its artifact path in the in-flight registry until dropped.
#[derive(Debug)]
struct SourceLease {
    in_flight: Arc<DashMap<PathBuf, Uuid>>,
    keys: Vec<PathBuf>,
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        for key in &self.keys {
            self.in_flight.remove(key);
        }
    }
}

impl Orchestrator {
    pub fn new(
        toolchains: Arc<ToolchainTable>,
        compiler: Arc<dyn Compiler>,
        runner: Arc<dyn Runner>,
        locator: ArtifactLocator,
        settings: JudgeSettings,
    ) -> Self {
        Self {
            toolchains,
            compiler,
            runner,
            locator,
            settings,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Wires the native compiler and runner from configuration.
    pub fn native(config: &Config) -> Result<Self, JudgeError> {
        let toolchains = ToolchainTable::from_config(&config.effective_toolchains())?;
        let locator = ArtifactLocator::new(config.save_location.clone());
        let compiler = NativeCompiler::new(locator.clone(), config.compile_timeout())
            .skip_up_to_date(config.skip_up_to_date);
        let runner = NativeRunner::new(locator.clone());

        Ok(Self::new(
            Arc::new(toolchains),
            Arc::new(compiler),
            Arc::new(runner),
            locator,
            JudgeSettings::from_config(config),
        ))
    }

    pub fn toolchains(&self) -> &ToolchainTable {
        &self.toolchains
    }

    pub fn is_busy(&self, source_path: &Path) -> bool {
        match self.toolchains.resolve_source(source_path) {
            Ok(toolchain) => self
                .lease_keys(source_path, &toolchain)
                .iter()
                .any(|key| self.in_flight.contains_key(key)),
            Err(_) => self.in_flight.contains_key(&lease_key(source_path)),
        }
    }

    fn lease_keys(&self, source_path: &Path, toolchain: &ToolchainDescriptor) -> Vec<PathBuf> {
        let artifact_path = self.locator.artifact_path(source_path, toolchain);
        [lease_key(source_path), lease_key(&artifact_path)]
            .into_iter()
            .sorted()
            .dedup()
            .collect()
    }

    /// Takes the keys in sorted order; on conflict the keys already taken are
    /// released when the partial lease drops.
    fn lease(
        &self,
        source_path: &Path,
        toolchain: &ToolchainDescriptor,
        owner: Uuid,
    ) -> Result<SourceLease, JudgeError> {
        let mut lease = SourceLease {
            in_flight: self.in_flight.clone(),
            keys: Vec::with_capacity(2),
        };
        for key in self.lease_keys(source_path, toolchain) {
            let taken = match self.in_flight.entry(key.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(entry) => {
                    entry.insert(owner);
                    true
                }
            };
            if !taken {
                tracing::debug!(key = %key.display(), "In flight elsewhere");
                return Err(JudgeError::Busy(key));
            }
            lease.keys.push(key);
        }
        Ok(lease)
    }

    #[tracing::instrument(skip(self))]
    pub async fn compile(&self, source_path: &Path) -> Result<CompilationResult, JudgeError> {
        let toolchain = self.toolchains.resolve_source(source_path)?;
        let _lease = self.lease(source_path, &toolchain, Uuid::new_v4())?;
        Ok(self.compiler.compile(source_path, &toolchain).await)
    }

    /// Runs one test against the existing artifact without compiling.
    #[tracing::instrument(skip(self, test_case), fields(id = test_case.id))]
    pub async fn run_one(
        &self,
        source_path: &Path,
        test_case: &TestCase,
    ) -> Result<RunResult, JudgeError> {
        let toolchain = self.toolchains.resolve_source(source_path)?;
        let _lease = self.lease(source_path, &toolchain, Uuid::new_v4())?;
        let output = self
            .runner
            .run(
                source_path,
                &toolchain,
                test_case,
                self.settings.time_limit,
                KillSignal::never(),
            )
            .await;
        Ok(judge_output(test_case, output))
    }

    /// Starts compile-then-run for every test of `problem` on a background task.
    ///
    /// Must be called from within a tokio runtime. Configuration problems are
    /// reported here, before anything is spawned; everything else arrives
    /// through the returned handle.
    #[tracing::instrument(skip(self, problem), fields(source = %problem.source_path.display()))]
    pub fn run_all(&self, problem: Problem) -> Result<RunHandle, JudgeError> {
        problem.validate()?;
        let toolchain = self.toolchains.resolve_source(&problem.source_path)?;
        let run_id = Uuid::new_v4();
        let lease = self.lease(&problem.source_path, &toolchain, run_id)?;

        let time_limit = match problem.time_limit {
            ms if ms > 0 && self.settings.use_problem_time_limit => Duration::from_millis(ms),
            _ => self.settings.time_limit,
        };
        let job = BatchJob {
            run_id,
            compiler: self.compiler.clone(),
            batch: RunBatch {
                runner: self.runner.clone(),
                source_path: problem.source_path.clone(),
                toolchain,
                time_limit,
                limiter: self
                    .settings
                    .max_concurrency
                    .map(|n| Arc::new(Semaphore::new(n.max(1)))),
                registry: Arc::new(ProcessRegistry::new()),
            },
            problem,
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel) = KillSignal::pair();
        let span = tracing::info_span!("batch", %run_id);
        tokio::spawn(job.execute(lease, events_tx, cancel).instrument(span));

        Ok(RunHandle {
            run_id,
            events: events_rx,
            cancel: CancelHandle::new(cancel_tx),
        })
    }
}

/// Canonical form of `path`. Files that do not exist yet are resolved through
/// their parent directory so `x/../a.cpp` and `a.cpp` still collide.
fn lease_key(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let resolved = match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent).ok().map(|p| p.join(name)),
        _ => None,
    };
    resolved.unwrap_or(absolute)
}

struct BatchJob {
    run_id: Uuid,
    compiler: Arc<dyn Compiler>,
    batch: RunBatch,
    problem: Problem,
}

impl BatchJob {
    async fn execute(
        self,
        lease: SourceLease,
        events: mpsc::UnboundedSender<RunEvent>,
        mut cancel: KillSignal,
    ) {
        let started_at = Utc::now();
        let tests = &self.problem.tests;
        tracing::info!(
            tests = tests.len(),
            time_limit = ?self.batch.time_limit,
            "Starting run"
        );
        if self.problem.interactive {
            tracing::warn!("Interactive problem judged as a plain stdin/stdout program");
        }

        let board = TestBoard::new(tests);
        let (compilation, results, cancelled) = if tests.is_empty() {
            (None, Vec::new(), false)
        } else {
            let outcome = compile_phase(
                self.compiler.as_ref(),
                &self.batch.source_path,
                &self.batch.toolchain,
                &events,
                &mut cancel,
            )
            .await;

            match outcome {
                CompileOutcome::Cancelled => (None, Vec::new(), true),
                CompileOutcome::Finished(compilation) if !compilation.success => {
                    let results = compile_error_results(tests, &board);
                    (Some(compilation), results, false)
                }
                CompileOutcome::Finished(compilation) => {
                    let outcome =
                        run_tests_concurrently(&self.batch, tests, &board, &events, &mut cancel)
                            .await;
                    (Some(compilation), outcome.results, outcome.cancelled)
                }
            }
        };

        if cancelled {
            let unfinished = board.cancel_unfinished();
            tracing::debug!(unfinished, "Marked unfinished tests as cancelled");
        }

        let report = BatchReport {
            run_id: self.run_id,
            source_path: self.batch.source_path.clone(),
            compilation,
            results: results
                .into_iter()
                .sorted_by_key(|r| r.test_case_id)
                .collect(),
            states: board.snapshot(),
            cancelled,
            started_at,
            finished_at: Utc::now(),
        };
        tracing::info!(
            passed = report.passed(),
            finished = report.results.len(),
            total = tests.len(),
            cancelled,
            "Run completed"
        );

        // Release first so a host reacting to `Completed` can start the next run.
        drop(lease);
        emit(&events, RunEvent::Completed(report));
    }
}

/// Cancels a batch. Cloneable so it can be handed to another task.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl CancelHandle {
    fn new(tx: oneshot::Sender<()>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    /// Returns false if the batch was already cancelled or has finished.
    pub fn cancel(&self) -> bool {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        match tx {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

/// Host side of a running batch: a stream of [`RunEvent`]s that ends with
/// exactly one `Completed`, plus cancellation.
#[derive(Debug)]
pub struct RunHandle {
    run_id: Uuid,
    events: mpsc::UnboundedReceiver<RunEvent>,
    cancel: CancelHandle,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Discards progress events and returns the final report.
    pub async fn wait(mut self) -> Result<BatchReport, JudgeError> {
        while let Some(event) = self.events.recv().await {
            if let RunEvent::Completed(report) = event {
                return Ok(report);
            }
        }
        Err(JudgeError::Aborted(self.run_id))
    }

    /// Dropping the handle does not cancel; take a [`CancelHandle`] first if needed.
    pub fn into_stream(self) -> UnboundedReceiverStream<RunEvent> {
        UnboundedReceiverStream::new(self.events)
    }
}

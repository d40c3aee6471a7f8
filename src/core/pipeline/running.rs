use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::FuturesUnordered;
use tokio::sync::{Semaphore, mpsc::UnboundedSender};
use tokio_stream::StreamExt;

use crate::core::{
    domain::{RunEvent, RunResult, TestBoard, TestCase, TestState, Verdict},
    judge::is_match,
    pipeline::{compiling::emit, registry::ProcessRegistry},
    toolchain::ToolchainDescriptor,
    traits::runner::{KillSignal, ProcessOutput, Runner},
};

/// Verdict precedence: timeout, then nonzero exit, then output comparison.
pub fn derive_verdict(test_case: &TestCase, output: &ProcessOutput) -> Verdict {
    if output.timed_out {
        Verdict::TimedOut
    } else if output.exit_code != Some(0) {
        Verdict::RuntimeError
    } else if is_match(&test_case.expected_output, &output.stdout) {
        Verdict::Passed
    } else {
        Verdict::WrongAnswer
    }
}

pub fn judge_output(test_case: &TestCase, output: ProcessOutput) -> RunResult {
    RunResult {
        test_case_id: test_case.id,
        verdict: derive_verdict(test_case, &output),
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.exit_code,
        termination_signal: output.signal,
        elapsed_ms: output.elapsed_ms,
        timed_out: output.timed_out,
    }
}

/// Everything the fan-out needs to execute one batch of test cases.
#[derive(Debug)]
pub struct RunBatch {
    pub runner: Arc<dyn Runner>,
    pub source_path: PathBuf,
    pub toolchain: Arc<ToolchainDescriptor>,
    pub time_limit: Duration,
    pub limiter: Option<Arc<Semaphore>>,
    pub registry: Arc<ProcessRegistry>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    /// In arrival order.
    pub results: Vec<RunResult>,
    pub cancelled: bool,
}

/// Runs every test concurrently, reporting each result as soon as it arrives.
///
/// On cancellation every tracked process is killed and the remaining futures
/// are drained so their children are reaped; their results are discarded and
/// no further `Finished` events are emitted.
pub async fn run_tests_concurrently(
    batch: &RunBatch,
    tests: &[TestCase],
    board: &TestBoard,
    events: &UnboundedSender<RunEvent>,
    cancel: &mut KillSignal,
) -> BatchOutcome {
    let mut futures: FuturesUnordered<_> = tests
        .iter()
        .map(|test_case| run_single(batch, test_case, board, events))
        .collect();

    let mut results = Vec::with_capacity(tests.len());
    let mut cancelled = false;

    loop {
        tokio::select! {
            biased;
            _ = cancel.triggered() => {
                let killed = batch.registry.kill_all();
                tracing::info!(killed, finished = results.len(), "Run cancelled");
                cancelled = true;
                break;
            }
            next = futures.next() => match next {
                Some(Some(result)) => {
                    board.advance(result.test_case_id, TestState::Done(result.verdict));
                    tracing::debug!(
                        id = result.test_case_id,
                        verdict = ?result.verdict,
                        elapsed_ms = result.elapsed_ms,
                        "Test finished"
                    );
                    emit(events, RunEvent::Finished(result.clone()));
                    results.push(result);
                }
                Some(None) => {}
                None => break,
            },
        }
    }

    if cancelled {
        while futures.next().await.is_some() {}
        debug_assert!(batch.registry.is_empty());
    }

    BatchOutcome { results, cancelled }
}

/// Yields `None` when the batch was cancelled before this test could start.
async fn run_single(
    batch: &RunBatch,
    test_case: &TestCase,
    board: &TestBoard,
    events: &UnboundedSender<RunEvent>,
) -> Option<RunResult> {
    let _permit = match &batch.limiter {
        Some(limiter) => Some(limiter.acquire().await.ok()?),
        None => None,
    };

    let kill = batch.registry.register(test_case.id)?;
    board.advance(test_case.id, TestState::Running);
    emit(events, RunEvent::Started { test_case_id: test_case.id });

    let output = batch
        .runner
        .run(&batch.source_path, &batch.toolchain, test_case, batch.time_limit, kill)
        .await;
    batch.registry.release(test_case.id);

    Some(judge_output(test_case, output))
}

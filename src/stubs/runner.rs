use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{
    domain::{TestCase, TestCaseId},
    toolchain::ToolchainDescriptor,
    traits::runner::{KillSignal, ProcessOutput, Runner},
};

/// Pretends to run a process for a configurable time per test case and
/// tracks how many "processes" are alive at once.
#[derive(Debug, Clone)]
pub struct RunnerStub {
    default: (ProcessOutput, Duration),
    outputs: HashMap<TestCaseId, (ProcessOutput, Duration)>,
    alive: Arc<AtomicUsize>,
    peak_alive: Arc<AtomicUsize>,
    spawned: Arc<AtomicUsize>,
}

struct AliveGuard(Arc<AtomicUsize>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RunnerStub {
    pub fn new(output: ProcessOutput, delay: Duration) -> Self {
        Self {
            default: (output, delay),
            outputs: HashMap::new(),
            alive: Arc::new(AtomicUsize::new(0)),
            peak_alive: Arc::new(AtomicUsize::new(0)),
            spawned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_outputs(mut self, outputs: HashMap<TestCaseId, (ProcessOutput, Duration)>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn alive(&self) -> Arc<AtomicUsize> {
        self.alive.clone()
    }

    pub fn peak_alive(&self) -> Arc<AtomicUsize> {
        self.peak_alive.clone()
    }

    pub fn spawned(&self) -> Arc<AtomicUsize> {
        self.spawned.clone()
    }
}

#[async_trait::async_trait]
impl Runner for RunnerStub {
    #[tracing::instrument(skip(self, toolchain, kill))]
    async fn run(
        &self,
        source_path: &Path,
        toolchain: &ToolchainDescriptor,
        test_case: &TestCase,
        time_limit: Duration,
        mut kill: KillSignal,
    ) -> ProcessOutput {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        let now_alive = self.alive.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_alive.fetch_max(now_alive, Ordering::SeqCst);
        let _guard = AliveGuard(self.alive.clone());

        let (output, delay) = self
            .outputs
            .get(&test_case.id)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        tokio::select! {
            _ = tokio::time::sleep(delay.min(time_limit)) => {
                if delay > time_limit {
                    ProcessOutput {
                        timed_out: true,
                        exit_code: None,
                        signal: Some(9),
                        elapsed_ms: time_limit.as_millis() as u64,
                        ..output
                    }
                } else {
                    output
                }
            }
            _ = kill.triggered() => {
                tracing::debug!("Killed");
                ProcessOutput {
                    exit_code: None,
                    signal: Some(9),
                    ..Default::default()
                }
            }
        }
    }
}

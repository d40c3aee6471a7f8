use std::path::Path;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::core::{domain::TestCase, toolchain::ToolchainDescriptor};

/// Raw telemetry of one execution. Correctness is judged elsewhere.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn launch_failure(msg: impl Into<String>) -> Self {
        Self {
            stderr: msg.into(),
            exit_code: Some(-1),
            ..Default::default()
        }
    }
}

/// One-shot request to terminate. A dropped sender never fires.
#[derive(Debug, Default)]
pub struct KillSignal {
    rx: Option<oneshot::Receiver<()>>,
}

impl KillSignal {
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn pair() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx: Some(rx) })
    }

    /// Resolves once the signal has been sent; pending forever otherwise.
    pub async fn triggered(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            let fired = rx.await.is_ok();
            self.rx = None;
            if fired {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait Runner: std::fmt::Debug + Send + Sync {
    async fn run(
        &self,
        source_path: &Path,
        toolchain: &ToolchainDescriptor,
        test_case: &TestCase,
        time_limit: Duration,
        kill: KillSignal,
    ) -> ProcessOutput;
}

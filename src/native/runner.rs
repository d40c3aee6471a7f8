use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::{
    domain::TestCase,
    toolchain::ToolchainDescriptor,
    traits::runner::{KillSignal, ProcessOutput, Runner},
};
use crate::native::{
    command::{ArtifactLocator, RenderedCommand, TemplateContext},
    process::supervise,
};

#[derive(Clone, Debug)]
pub struct NativeRunner {
    locator: ArtifactLocator,
}

impl NativeRunner {
    pub fn new(locator: ArtifactLocator) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl Runner for NativeRunner {
    #[tracing::instrument(skip(self, toolchain, test_case, kill), fields(id = test_case.id))]
    async fn run(
        &self,
        source_path: &Path,
        toolchain: &ToolchainDescriptor,
        test_case: &TestCase,
        time_limit: Duration,
        mut kill: KillSignal,
    ) -> ProcessOutput {
        let artifact_path = self.locator.artifact_path(source_path, toolchain);
        if !toolchain.skip_compile() && !artifact_path.exists() {
            return ProcessOutput::launch_failure(format!(
                "Executable not found: {}",
                artifact_path.display()
            ));
        }

        let command = RenderedCommand::render(
            toolchain.run(),
            &TemplateContext::new(source_path, &artifact_path),
        );
        tracing::debug!("Running: {}", command.display());

        let started = Instant::now();
        let child = match command
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to launch {}: {}", command.program, e);
                return ProcessOutput::launch_failure(format!(
                    "Failed to launch {}: {}",
                    command.program, e
                ));
            }
        };

        let out = supervise(
            child,
            started,
            Some(test_case.input.as_bytes().to_vec()),
            time_limit,
            &mut kill,
        )
        .await;

        if out.killed {
            tracing::debug!("Killed on request");
        }

        ProcessOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            exit_code: out.exit_code(),
            signal: out.signal(),
            elapsed_ms: out.elapsed.as_millis() as u64,
            timed_out: out.timed_out,
        }
    }
}

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::{
    domain::CompilationResult,
    toolchain::ToolchainDescriptor,
    traits::{compiler::Compiler, runner::KillSignal},
};
use crate::native::{
    command::{ArtifactLocator, RenderedCommand, TemplateContext, needs_recompilation},
    process::supervise,
};

#[derive(Clone, Debug)]
pub struct NativeCompiler {
    locator: ArtifactLocator,
    timeout: Duration,
    skip_up_to_date: bool,
}

impl NativeCompiler {
    pub fn new(locator: ArtifactLocator, timeout: Duration) -> Self {
        Self {
            locator,
            timeout,
            skip_up_to_date: false,
        }
    }

    /// Reuse an artifact that is newer than its source instead of rebuilding it.
    pub fn skip_up_to_date(mut self, enabled: bool) -> Self {
        self.skip_up_to_date = enabled;
        self
    }
}

#[async_trait]
impl Compiler for NativeCompiler {
    #[tracing::instrument(skip(self, toolchain), fields(language = toolchain.language()))]
    async fn compile(
        &self,
        source_path: &Path,
        toolchain: &ToolchainDescriptor,
    ) -> CompilationResult {
        let Some(template) = toolchain.compile() else {
            return CompilationResult::skipped("Compilation skipped for interpreted language");
        };

        let artifact_path = self.locator.artifact_path(source_path, toolchain);
        if self.skip_up_to_date && !needs_recompilation(source_path, &artifact_path) {
            tracing::debug!("Artifact is up to date: {}", artifact_path.display());
            return CompilationResult::skipped("Artifact is up to date");
        }

        let command = RenderedCommand::render(template, &TemplateContext::new(source_path, &artifact_path));
        tracing::info!("Compiling with: {}", command.display());

        let started = Instant::now();
        let child = match command
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to start compiler {}: {}", command.program, e);
                return CompilationResult::failed(format!("Failed to start compiler: {}", e));
            }
        };

        let out = supervise(child, started, None, self.timeout, &mut KillSignal::never()).await;
        if out.timed_out {
            tracing::warn!("Compilation timed out after {:?}", out.elapsed);
            return CompilationResult::timed_out();
        }

        let exit_code = out.exit_code().unwrap_or(-1);
        let result = CompilationResult {
            success: exit_code == 0,
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            exit_code,
        };
        tracing::debug!(exit_code, elapsed = ?out.elapsed, "Compiler finished");
        result
    }
}

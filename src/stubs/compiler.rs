use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{
    domain::CompilationResult, toolchain::ToolchainDescriptor, traits::compiler::Compiler,
};

#[derive(Debug, Clone)]
pub struct CompilerStub {
    result: CompilationResult,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl CompilerStub {
    pub fn new(result: CompilationResult, delay: Duration) -> Self {
        Self {
            result,
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait::async_trait]
impl Compiler for CompilerStub {
    #[tracing::instrument]
    async fn compile(
        &self,
        source_path: &Path,
        toolchain: &ToolchainDescriptor,
    ) -> CompilationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            "Start compilation: source={:?}, language={:?}",
            source_path,
            toolchain.language()
        );
        tokio::time::sleep(self.delay).await;
        tracing::debug!("Compilation result: {:?}", self.result);

        self.result.clone()
    }
}

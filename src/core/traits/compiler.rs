use std::path::Path;

use crate::core::{domain::CompilationResult, toolchain::ToolchainDescriptor};

/// Builds the artifact for a source file. Every failure, including a missing
/// compiler binary or a timeout, is reported through `CompilationResult`.
#[mockall::automock]
#[async_trait::async_trait]
pub trait Compiler: std::fmt::Debug + Send + Sync {
    async fn compile(&self, source_path: &Path, toolchain: &ToolchainDescriptor)
    -> CompilationResult;
}

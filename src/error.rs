use std::path::PathBuf;

use uuid::Uuid;

use crate::core::domain::TestCaseId;

/// Failures reported instead of a result value. Compile, launch, runtime and
/// timeout failures are never errors; they surface as `CompilationResult` and `RunResult`.
#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid toolchain `{language}`: {reason}")]
    InvalidToolchain { language: String, reason: String },

    #[error("a run is already in flight for {}", .0.display())]
    Busy(PathBuf),

    #[error("duplicate test case id {0}")]
    DuplicateTestId(TestCaseId),

    #[error("run {0} ended without a report")]
    Aborted(Uuid),

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("invalid problem: {0}")]
    Problem(#[from] serde_json::Error),
}

impl JudgeError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JudgeError::Io {
            path: path.into(),
            source,
        }
    }
}

use std::path::Path;

use tokio::sync::mpsc::UnboundedSender;

use crate::core::{
    domain::{CompilationResult, RunEvent, RunResult, TestBoard, TestCase, TestState, Verdict},
    toolchain::ToolchainDescriptor,
    traits::{compiler::Compiler, runner::KillSignal},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileOutcome {
    Finished(CompilationResult),
    Cancelled,
}

pub(crate) fn emit(events: &UnboundedSender<RunEvent>, event: RunEvent) {
    if events.send(event).is_err() {
        tracing::debug!("Run events receiver dropped");
    }
}

/// Compiles once, racing the compiler against cancellation. A cancelled
/// compile drops the compiler future, which kills its subprocess.
#[tracing::instrument(skip(compiler, toolchain, events, cancel))]
pub async fn compile_phase(
    compiler: &dyn Compiler,
    source_path: &Path,
    toolchain: &ToolchainDescriptor,
    events: &UnboundedSender<RunEvent>,
    cancel: &mut KillSignal,
) -> CompileOutcome {
    emit(events, RunEvent::Compiling);

    tracing::debug!("Start compiling");
    let result = tokio::select! {
        biased;
        _ = cancel.triggered() => {
            tracing::info!("Compilation cancelled");
            return CompileOutcome::Cancelled;
        }
        result = compiler.compile(source_path, toolchain) => result,
    };
    tracing::debug!("Compilation result: {:?}", result);

    emit(events, RunEvent::Compiled(result.clone()));
    CompileOutcome::Finished(result)
}

/// Marks every test as a compile error without running anything.
pub fn compile_error_results(tests: &[TestCase], board: &TestBoard) -> Vec<RunResult> {
    tests
        .iter()
        .map(|test| {
            board.advance(test.id, TestState::Done(Verdict::CompileError));
            RunResult::compile_error(test.id)
        })
        .collect()
}

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JudgeError;

pub type TestCaseId = i64;

const DEFAULT_MEMORY_LIMIT_MB: u32 = 256;
const DEFAULT_TIME_LIMIT_MS: u64 = 2000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: TestCaseId,
    #[serde(default)]
    pub input: String,
    #[serde(default, rename = "output")]
    pub expected_output: String,
}

impl TestCase {
    pub fn new(id: TestCaseId, input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            id,
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// A problem in the Competitive Companion format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub interactive: bool,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u32,
    #[serde(default = "default_time_limit")]
    pub time_limit: u64,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tests: Vec<TestCase>,
    #[serde(default, rename = "srcPath")]
    pub source_path: PathBuf,
    #[serde(default)]
    pub local: bool,
}

fn default_memory_limit() -> u32 {
    DEFAULT_MEMORY_LIMIT_MB
}

fn default_time_limit() -> u64 {
    DEFAULT_TIME_LIMIT_MS
}

impl Problem {
    /// A problem for a source file that was not ingested from a judge, seeded with one empty test.
    pub fn local(source_path: impl AsRef<Path>) -> Self {
        let source_path = source_path.as_ref().to_path_buf();
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            name: format!("Local: {}", stem),
            url: source_path.display().to_string(),
            interactive: false,
            memory_limit: DEFAULT_MEMORY_LIMIT_MB,
            time_limit: DEFAULT_TIME_LIMIT_MS,
            group: String::new(),
            tests: vec![TestCase::new(Utc::now().timestamp_millis(), "", "")],
            source_path,
            local: true,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, JudgeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, JudgeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), JudgeError> {
        match self.tests.iter().map(|t| t.id).duplicates().next() {
            Some(id) => Err(JudgeError::DuplicateTestId(id)),
            None => Ok(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CompilationResult {
    pub fn skipped(msg: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: msg.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: -1,
        }
    }

    pub fn timed_out() -> Self {
        Self::failed("Compilation timed out")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Passed,
    WrongAnswer,
    RuntimeError,
    TimedOut,
    CompileError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub test_case_id: TestCaseId,
    pub verdict: Verdict,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub termination_signal: Option<i32>,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

impl RunResult {
    pub fn compile_error(test_case_id: TestCaseId) -> Self {
        Self {
            test_case_id,
            verdict: Verdict::CompileError,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            termination_signal: None,
            elapsed_ms: 0,
            timed_out: false,
        }
    }
}

/// Lifecycle of a single test case within one batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestState {
    Pending,
    Running,
    Done(Verdict),
    /// The batch was cancelled before this test produced a result.
    Cancelled,
}

impl TestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TestState::Done(_) | TestState::Cancelled)
    }

    /// Compile errors skip `Running`; every other verdict must pass through it.
    pub fn can_advance_to(&self, next: TestState) -> bool {
        match (self, next) {
            (TestState::Pending, TestState::Running) => true,
            (TestState::Pending, TestState::Done(Verdict::CompileError)) => true,
            (TestState::Running, TestState::Done(Verdict::CompileError)) => false,
            (TestState::Running, TestState::Done(_)) => true,
            (TestState::Pending | TestState::Running, TestState::Cancelled) => true,
            _ => false,
        }
    }
}

/// Per-batch view of every test case's state, shared between in-flight run futures.
#[derive(Debug)]
pub struct TestBoard {
    states: Mutex<HashMap<TestCaseId, TestState>>,
}

impl TestBoard {
    pub fn new(tests: &[TestCase]) -> Self {
        Self {
            states: Mutex::new(tests.iter().map(|t| (t.id, TestState::Pending)).collect()),
        }
    }

    pub fn advance(&self, id: TestCaseId, next: TestState) -> bool {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match states.get_mut(&id) {
            Some(state) if state.can_advance_to(next) => {
                *state = next;
                true
            }
            Some(state) => {
                tracing::warn!(id, from = ?state, to = ?next, "rejected test state transition");
                false
            }
            None => {
                tracing::warn!(id, "unknown test case");
                false
            }
        }
    }

    pub fn state(&self, id: TestCaseId) -> Option<TestState> {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .copied()
    }

    /// Moves every test that has not finished to `Cancelled`. Returns how many moved.
    pub fn cancel_unfinished(&self) -> usize {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        states
            .values_mut()
            .filter(|state| !state.is_terminal())
            .map(|state| *state = TestState::Cancelled)
            .count()
    }

    pub fn snapshot(&self) -> BTreeMap<TestCaseId, TestState> {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(id, state)| (*id, *state))
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&TestState) -> bool) -> usize {
        self.states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|s| predicate(s))
            .count()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub source_path: PathBuf,
    /// `None` when nothing was compiled: no tests, or cancelled before compilation finished.
    pub compilation: Option<CompilationResult>,
    /// Sorted by test case id.
    pub results: Vec<RunResult>,
    /// Final state of every test case; `Cancelled` for those without a result.
    pub states: BTreeMap<TestCaseId, TestState>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.verdict == Verdict::Passed)
            .count()
    }

    pub fn all_passed(&self) -> bool {
        !self.cancelled && self.results.iter().all(|r| r.verdict == Verdict::Passed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunEvent {
    Compiling,
    Compiled(CompilationResult),
    Started { test_case_id: TestCaseId },
    Finished(RunResult),
    Completed(BatchReport),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_from_companion_json() {
        let json = r#"{
            "name": "A. Watermelon",
            "group": "Codeforces - Round 4",
            "url": "https://codeforces.com/problemset/problem/4/A",
            "interactive": false,
            "memoryLimit": 64,
            "timeLimit": 1000,
            "tests": [{"id": 1, "input": "8\n", "output": "YES\n"}],
            "srcPath": "/tmp/a.cpp",
            "local": false
        }"#;

        let problem = Problem::from_json(json).unwrap();
        assert_eq!(problem.name, "A. Watermelon");
        assert_eq!(problem.memory_limit, 64);
        assert_eq!(problem.time_limit, 1000);
        assert_eq!(problem.source_path, PathBuf::from("/tmp/a.cpp"));
        assert_eq!(problem.tests, vec![TestCase::new(1, "8\n", "YES\n")]);
    }

    #[test]
    fn test_problem_defaults_for_missing_fields() {
        let problem = Problem::from_json(r#"{"tests": []}"#).unwrap();
        assert_eq!(problem.memory_limit, 256);
        assert_eq!(problem.time_limit, 2000);
        assert!(!problem.interactive);
        assert!(problem.tests.is_empty());
    }

    #[test]
    fn test_problem_json_uses_companion_field_names() {
        let problem = Problem::local("/tmp/b.py");
        let value: serde_json::Value = serde_json::from_str(&problem.to_json().unwrap()).unwrap();
        assert_eq!(value["srcPath"], "/tmp/b.py");
        assert_eq!(value["timeLimit"], 2000);
        assert_eq!(value["memoryLimit"], 256);
        assert!(value["tests"][0].get("output").is_some());
        assert_eq!(value["local"], true);
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let mut problem = Problem::local("/tmp/a.cpp");
        problem.tests = vec![
            TestCase::new(1, "", ""),
            TestCase::new(2, "", ""),
            TestCase::new(1, "", ""),
        ];
        assert!(matches!(
            problem.validate(),
            Err(JudgeError::DuplicateTestId(1))
        ));
    }

    #[test]
    fn test_state_transitions() {
        assert!(TestState::Pending.can_advance_to(TestState::Running));
        assert!(TestState::Pending.can_advance_to(TestState::Done(Verdict::CompileError)));
        assert!(!TestState::Pending.can_advance_to(TestState::Done(Verdict::Passed)));
        assert!(TestState::Running.can_advance_to(TestState::Done(Verdict::TimedOut)));
        assert!(!TestState::Running.can_advance_to(TestState::Done(Verdict::CompileError)));
        assert!(!TestState::Done(Verdict::Passed).can_advance_to(TestState::Running));
        assert!(
            !TestState::Done(Verdict::Passed).can_advance_to(TestState::Done(Verdict::WrongAnswer))
        );
    }

    #[test]
    fn test_board_keeps_terminal_states() {
        let board = TestBoard::new(&[TestCase::new(1, "", ""), TestCase::new(2, "", "")]);

        assert!(board.advance(1, TestState::Running));
        assert!(board.advance(1, TestState::Done(Verdict::Passed)));
        assert!(!board.advance(1, TestState::Done(Verdict::WrongAnswer)));
        assert!(!board.advance(3, TestState::Running));

        assert_eq!(board.state(1), Some(TestState::Done(Verdict::Passed)));
        assert_eq!(board.state(2), Some(TestState::Pending));
        assert_eq!(board.count(TestState::is_terminal), 1);
    }

    #[test]
    fn test_cancel_unfinished() {
        let tests = [
            TestCase::new(1, "", ""),
            TestCase::new(2, "", ""),
            TestCase::new(3, "", ""),
        ];
        let board = TestBoard::new(&tests);
        board.advance(1, TestState::Running);
        board.advance(1, TestState::Done(Verdict::Passed));
        board.advance(2, TestState::Running);

        assert_eq!(board.cancel_unfinished(), 2);
        assert_eq!(
            board.snapshot(),
            BTreeMap::from([
                (1, TestState::Done(Verdict::Passed)),
                (2, TestState::Cancelled),
                (3, TestState::Cancelled),
            ])
        );
        assert!(!board.advance(2, TestState::Done(Verdict::Passed)));
    }

    #[test]
    fn test_report_serializes() {
        let report = BatchReport {
            run_id: Uuid::new_v4(),
            source_path: PathBuf::from("/tmp/a.cpp"),
            compilation: Some(CompilationResult::skipped("ok")),
            results: vec![RunResult::compile_error(1)],
            states: BTreeMap::from([(1, TestState::Done(Verdict::CompileError))]),
            cancelled: false,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        let json = serde_json::to_string(&report).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["run_id"], report.run_id.to_string());
        assert_eq!(value["results"][0]["verdict"], "CompileError");

        let parsed: BatchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}

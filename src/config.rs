use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::toolchain::CommandTemplate;
use crate::error::JudgeError;

const DEFAULT_TIME_LIMIT_MS: u64 = 3000;
const DEFAULT_COMPILE_TIMEOUT_MS: u64 = 60_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Absent for interpreted languages.
    #[serde(default)]
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
    #[serde(default)]
    pub artifact_extension: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Per-test limit used when a problem does not carry its own.
    pub time_limit_ms: u64,
    pub compile_timeout_ms: u64,
    /// Artifact and problem file directory; ignored unless it exists.
    pub save_location: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
    /// Honour a problem's own `timeLimit`; when false `time_limit_ms` applies to every run.
    pub use_problem_time_limit: bool,
    pub skip_up_to_date: bool,
    /// Overrides merged over the built-in toolchains, keyed by language id.
    pub toolchains: BTreeMap<String, ToolchainConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_limit_ms: DEFAULT_TIME_LIMIT_MS,
            compile_timeout_ms: DEFAULT_COMPILE_TIMEOUT_MS,
            save_location: None,
            max_concurrency: None,
            use_problem_time_limit: true,
            skip_up_to_date: false,
            toolchains: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, JudgeError> {
        Ok(toml::from_str(text)?)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, JudgeError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| JudgeError::io(path, e))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    pub fn effective_toolchains(&self) -> BTreeMap<String, ToolchainConfig> {
        let mut toolchains = default_toolchains();
        toolchains.extend(self.toolchains.clone());
        toolchains
    }
}

fn compiled(extensions: &[&str], compile: CommandTemplate) -> ToolchainConfig {
    ToolchainConfig {
        extensions: extensions.iter().map(|e| e.to_string()).collect(),
        compile: Some(compile),
        run: CommandTemplate::new("{artifact}", Vec::<String>::new()),
        artifact_extension: None,
    }
}

fn interpreted(extensions: &[&str], program: &str) -> ToolchainConfig {
    ToolchainConfig {
        extensions: extensions.iter().map(|e| e.to_string()).collect(),
        compile: None,
        run: CommandTemplate::new(program, ["{source}"]),
        artifact_extension: None,
    }
}

pub fn default_toolchains() -> BTreeMap<String, ToolchainConfig> {
    let mut toolchains = BTreeMap::new();

    toolchains.insert(
        "c".to_string(),
        compiled(&["c"], CommandTemplate::new("gcc", ["{source}", "-o", "{artifact}"])),
    );
    toolchains.insert(
        "cpp".to_string(),
        compiled(
            &["cpp", "cc", "cxx"],
            CommandTemplate::new(
                "g++",
                ["{source}", "-o", "{artifact}", "-D", "DEBUG", "-D", "CPH"],
            ),
        ),
    );
    toolchains.insert(
        "rust".to_string(),
        compiled(&["rs"], CommandTemplate::new("rustc", ["{source}", "-o", "{artifact}"])),
    );
    toolchains.insert(
        "go".to_string(),
        compiled(
            &["go"],
            CommandTemplate::new("go", ["build", "-o", "{artifact}", "{source}"]),
        ),
    );
    toolchains.insert(
        "haskell".to_string(),
        compiled(
            &["hs"],
            CommandTemplate::new(
                "ghc",
                [
                    "{source}",
                    "-o",
                    "{artifact}",
                    "-no-keep-hi-files",
                    "-no-keep-o-files",
                ],
            ),
        ),
    );
    toolchains.insert(
        "java".to_string(),
        ToolchainConfig {
            extensions: vec!["java".to_string()],
            compile: Some(CommandTemplate::new(
                "javac",
                ["{source}", "-d", "{artifact_dir}"],
            )),
            run: CommandTemplate::new("java", ["-cp", "{artifact_dir}", "{stem}"]),
            artifact_extension: Some(".class".to_string()),
        },
    );
    toolchains.insert("python".to_string(), interpreted(&["py"], "python3"));
    toolchains.insert("ruby".to_string(), interpreted(&["rb"], "ruby"));
    toolchains.insert("js".to_string(), interpreted(&["js"], "node"));

    toolchains
}

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ToolchainConfig;
use crate::error::JudgeError;

/// A program plus argument list. Arguments may contain `{source}`, `{artifact}`,
/// `{artifact_dir}`, `{stem}` and `{source_dir}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolchainDescriptor {
    language: String,
    compile: Option<CommandTemplate>,
    run: CommandTemplate,
    skip_compile: bool,
    artifact_extension: Option<String>,
}

impl ToolchainDescriptor {
    pub fn compiled(language: impl Into<String>, compile: CommandTemplate, run: CommandTemplate) -> Self {
        Self {
            language: language.into(),
            compile: Some(compile),
            run,
            skip_compile: false,
            artifact_extension: None,
        }
    }

    pub fn interpreted(language: impl Into<String>, run: CommandTemplate) -> Self {
        Self {
            language: language.into(),
            compile: None,
            run,
            skip_compile: true,
            artifact_extension: None,
        }
    }

    pub fn with_artifact_extension(mut self, extension: impl Into<String>) -> Self {
        self.artifact_extension = Some(extension.into());
        self
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// `None` exactly when `skip_compile()` is true.
    pub fn compile(&self) -> Option<&CommandTemplate> {
        self.compile.as_ref()
    }

    pub fn run(&self) -> &CommandTemplate {
        &self.run
    }

    pub fn skip_compile(&self) -> bool {
        self.skip_compile
    }

    pub fn artifact_extension(&self) -> Option<&str> {
        self.artifact_extension.as_deref()
    }

    fn from_config(language: &str, config: &ToolchainConfig) -> Result<Self, JudgeError> {
        let invalid = |reason: &str| JudgeError::InvalidToolchain {
            language: language.to_string(),
            reason: reason.to_string(),
        };

        if config.run.program.trim().is_empty() {
            return Err(invalid("run program is empty"));
        }

        let descriptor = match &config.compile {
            Some(compile) if compile.program.trim().is_empty() => {
                return Err(invalid("compile program is empty"));
            }
            Some(compile) => Self::compiled(language, compile.clone(), config.run.clone()),
            None => Self::interpreted(language, config.run.clone()),
        };

        Ok(match &config.artifact_extension {
            Some(ext) => descriptor.with_artifact_extension(ext.clone()),
            None => descriptor,
        })
    }
}

/// Lookup from a language tag (language id or file extension) to its toolchain.
#[derive(Clone, Debug, Default)]
pub struct ToolchainTable {
    by_tag: HashMap<String, Arc<ToolchainDescriptor>>,
}

impl ToolchainTable {
    pub fn from_config(toolchains: &BTreeMap<String, ToolchainConfig>) -> Result<Self, JudgeError> {
        let mut table = Self::default();
        for (language, config) in toolchains {
            let descriptor = Arc::new(ToolchainDescriptor::from_config(language, config)?);
            let tags = std::iter::once(language).chain(config.extensions.iter());
            for tag in tags {
                table.insert(tag, descriptor.clone())?;
            }
        }
        Ok(table)
    }

    pub fn insert(&mut self, tag: &str, descriptor: Arc<ToolchainDescriptor>) -> Result<(), JudgeError> {
        let tag = tag.to_lowercase();
        match self.by_tag.get(&tag) {
            Some(existing) if existing.language() != descriptor.language() => {
                Err(JudgeError::InvalidToolchain {
                    language: descriptor.language().to_string(),
                    reason: format!("tag `{}` is already mapped to `{}`", tag, existing.language()),
                })
            }
            _ => {
                self.by_tag.insert(tag, descriptor);
                Ok(())
            }
        }
    }

    pub fn resolve(&self, tag: &str) -> Result<Arc<ToolchainDescriptor>, JudgeError> {
        self.by_tag
            .get(&tag.to_lowercase())
            .cloned()
            .ok_or_else(|| JudgeError::UnsupportedLanguage(tag.to_string()))
    }

    /// Resolves by the source file's extension.
    pub fn resolve_source(&self, source_path: &Path) -> Result<Arc<ToolchainDescriptor>, JudgeError> {
        let extension = source_path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| JudgeError::UnsupportedLanguage(source_path.display().to_string()))?;
        self.resolve(extension)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::Config;

    #[test]
    fn test_resolve_default_extensions() {
        let table = ToolchainTable::from_config(&Config::default().effective_toolchains()).unwrap();

        let cpp = table.resolve("cc").unwrap();
        assert_eq!(cpp.language(), "cpp");
        assert!(!cpp.skip_compile());
        assert!(cpp.compile().is_some());

        let python = table.resolve_source(&PathBuf::from("/work/a.PY")).unwrap();
        assert_eq!(python.language(), "python");
        assert!(python.skip_compile());
        assert!(python.compile().is_none());

        assert_eq!(table.resolve("java").unwrap().artifact_extension(), Some(".class"));
    }

    #[test]
    fn test_resolve_unsupported() {
        let table = ToolchainTable::from_config(&Config::default().effective_toolchains()).unwrap();

        assert!(matches!(
            table.resolve("cobol"),
            Err(JudgeError::UnsupportedLanguage(tag)) if tag == "cobol"
        ));
        assert!(matches!(
            table.resolve_source(&PathBuf::from("/work/Makefile")),
            Err(JudgeError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_reject_empty_run_program() {
        let mut toolchains = BTreeMap::new();
        toolchains.insert(
            "broken".to_string(),
            ToolchainConfig {
                extensions: vec!["brk".to_string()],
                compile: None,
                run: CommandTemplate::new("  ", Vec::<String>::new()),
                artifact_extension: None,
            },
        );

        assert!(matches!(
            ToolchainTable::from_config(&toolchains),
            Err(JudgeError::InvalidToolchain { language, .. }) if language == "broken"
        ));
    }

    #[test]
    fn test_reject_conflicting_extension() {
        let run = CommandTemplate::new("{artifact}", Vec::<String>::new());
        let compile = CommandTemplate::new("cc", ["{source}"]);
        let mut toolchains = BTreeMap::new();
        for language in ["first", "second"] {
            toolchains.insert(
                language.to_string(),
                ToolchainConfig {
                    extensions: vec!["x".to_string()],
                    compile: Some(compile.clone()),
                    run: run.clone(),
                    artifact_extension: None,
                },
            );
        }

        assert!(matches!(
            ToolchainTable::from_config(&toolchains),
            Err(JudgeError::InvalidToolchain { .. })
        ));
    }
}

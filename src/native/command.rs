use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::core::toolchain::{CommandTemplate, ToolchainDescriptor};

/// Derives where a source file's artifact lives. The compiler writes to and the
/// runner reads from the same path.
#[derive(Clone, Debug, Default)]
pub struct ArtifactLocator {
    save_location: Option<PathBuf>,
}

impl ArtifactLocator {
    pub fn new(save_location: Option<PathBuf>) -> Self {
        Self { save_location }
    }

    /// `<stem><ext>` in the save location if it exists, otherwise next to the
    /// source. Interpreted languages run straight from the source file.
    pub fn artifact_path(&self, source_path: &Path, toolchain: &ToolchainDescriptor) -> PathBuf {
        let source_path = absolute(source_path);
        if toolchain.skip_compile() {
            return source_path;
        }

        let extension = toolchain
            .artifact_extension()
            .unwrap_or(if cfg!(windows) { ".exe" } else { ".bin" });
        let file_name = format!("{}{}", file_stem(&source_path), extension);

        match &self.save_location {
            Some(dir) if dir.is_dir() => absolute(dir).join(file_name),
            _ => source_dir(&source_path).join(file_name),
        }
    }

    pub fn save_location(&self) -> Option<&Path> {
        self.save_location.as_deref()
    }
}

/// True when the artifact is missing or older than its source.
pub fn needs_recompilation(source_path: &Path, artifact_path: &Path) -> bool {
    let modified = |path: &Path| std::fs::metadata(path).and_then(|m| m.modified()).ok();
    match (modified(source_path), modified(artifact_path)) {
        (Some(source), Some(artifact)) => source > artifact,
        _ => true,
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn source_dir(source_path: &Path) -> PathBuf {
    match source_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Values substituted into command templates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateContext {
    pub source: PathBuf,
    pub artifact: PathBuf,
    pub artifact_dir: PathBuf,
    pub stem: String,
    pub source_dir: PathBuf,
}

impl TemplateContext {
    pub fn new(source_path: &Path, artifact_path: &Path) -> Self {
        let source = absolute(source_path);
        let artifact = absolute(artifact_path);
        Self {
            artifact_dir: source_dir(&artifact),
            stem: file_stem(&source),
            source_dir: source_dir(&source),
            source,
            artifact,
        }
    }

    fn substitute(&self, text: &str) -> String {
        text.replace("{source_dir}", &self.source_dir.to_string_lossy())
            .replace("{source}", &self.source.to_string_lossy())
            .replace("{artifact_dir}", &self.artifact_dir.to_string_lossy())
            .replace("{artifact}", &self.artifact.to_string_lossy())
            .replace("{stem}", &self.stem)
    }
}

/// A fully substituted command, run from the source file's directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl RenderedCommand {
    pub fn render(template: &CommandTemplate, ctx: &TemplateContext) -> Self {
        Self {
            program: ctx.substitute(&template.program),
            args: template
                .args
                .iter()
                .filter(|arg| !arg.is_empty())
                .map(|arg| ctx.substitute(arg))
                .collect(),
            working_dir: ctx.source_dir.clone(),
        }
    }

    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.working_dir);
        // Leads its own group so that timeouts and cancellation reach every descendant.
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

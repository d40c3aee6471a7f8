use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::core::domain::Problem;
use crate::error::JudgeError;

const STORE_DIR: &str = ".cph";
const PROBLEM_FILE_EXTENSION: &str = "prob";

/// Persists problems as `.cph/<stem>.prob` JSON files, either under the save
/// location or next to the source file.
#[derive(Clone, Debug, Default)]
pub struct ProblemStore {
    save_location: Option<PathBuf>,
}

impl ProblemStore {
    pub fn new(save_location: Option<PathBuf>) -> Self {
        Self { save_location }
    }

    pub fn problem_file_path(&self, source_path: &Path) -> PathBuf {
        let base = match &self.save_location {
            Some(dir) if dir.is_dir() => dir.clone(),
            _ => match source_path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            },
        };
        let stem = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let path = base
            .join(STORE_DIR)
            .join(format!("{}.{}", stem, PROBLEM_FILE_EXTENSION));
        std::path::absolute(&path).unwrap_or(path)
    }

    /// `Ok(None)` when no problem has been saved for this source.
    #[tracing::instrument(skip(self))]
    pub async fn load(&self, source_path: &Path) -> Result<Option<Problem>, JudgeError> {
        let path = self.problem_file_path(source_path);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(JudgeError::io(path, e)),
        };

        let problem = Problem::from_json(&text)?;
        tracing::debug!(path = %path.display(), tests = problem.tests.len(), "Loaded problem");
        Ok(Some(problem))
    }

    #[tracing::instrument(skip(self, problem), fields(name = %problem.name))]
    pub async fn save(&self, source_path: &Path, problem: &Problem) -> Result<PathBuf, JudgeError> {
        let path = self.problem_file_path(source_path);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| JudgeError::io(dir, e))?;
        }
        fs::write(&path, problem.to_json()?)
            .await
            .map_err(|e| JudgeError::io(&path, e))?;

        tracing::info!("Saved problem to {}", path.display());
        Ok(path)
    }

    /// Removes the problem file and, if nothing else is left, its `.cph` directory.
    /// Returns false when there was nothing to delete.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, source_path: &Path) -> Result<bool, JudgeError> {
        let path = self.problem_file_path(source_path);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(JudgeError::io(path, e)),
        }

        if let Some(dir) = path.parent() {
            // Fails while the directory still holds other problems.
            if fs::remove_dir(dir).await.is_ok() {
                tracing::debug!("Removed empty {}", dir.display());
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::core::domain::TestCase;

    async fn create_workdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("localjudge_store_{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).await.unwrap();
        dir
    }

    #[test]
    fn test_problem_file_next_to_source() {
        let store = ProblemStore::new(Some(PathBuf::from("/nonexistent/save")));
        assert_eq!(
            store.problem_file_path(Path::new("/work/contest/A.cpp")),
            PathBuf::from("/work/contest/.cph/A.prob")
        );
    }

    #[tokio::test]
    async fn test_problem_file_in_save_location() {
        let save = create_workdir().await;
        let store = ProblemStore::new(Some(save.clone()));
        assert_eq!(
            store.problem_file_path(Path::new("/work/B.py")),
            save.join(".cph").join("B.prob")
        );
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = create_workdir().await;
        let source = dir.join("a.cpp");
        let store = ProblemStore::default();

        assert_eq!(store.load(&source).await.unwrap(), None);

        let mut problem = Problem::local(&source);
        problem.tests = vec![TestCase::new(1, "1 2\n", "3\n")];
        let path = store.save(&source, &problem).await.unwrap();
        assert!(path.ends_with(".cph/a.prob"));

        let loaded = store.load(&source).await.unwrap().unwrap();
        assert_eq!(loaded, problem);

        assert!(store.delete(&source).await.unwrap());
        assert!(!dir.join(".cph").exists());
        assert!(!store.delete(&source).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_keeps_shared_directory() {
        let dir = create_workdir().await;
        let store = ProblemStore::default();
        let (a, b) = (dir.join("a.cpp"), dir.join("b.cpp"));
        store.save(&a, &Problem::local(&a)).await.unwrap();
        store.save(&b, &Problem::local(&b)).await.unwrap();

        store.delete(&a).await.unwrap();

        assert!(dir.join(".cph").is_dir());
        assert!(store.load(&b).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_corrupt_file() {
        let dir = create_workdir().await;
        let source = dir.join("c.cpp");
        let store = ProblemStore::default();
        fs::create_dir_all(dir.join(".cph")).await.unwrap();
        fs::write(dir.join(".cph/c.prob"), "{ not json").await.unwrap();

        assert!(matches!(
            store.load(&source).await,
            Err(JudgeError::Problem(_))
        ));
    }
}

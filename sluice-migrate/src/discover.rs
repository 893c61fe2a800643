//! Candidate file discovery.

use std::path::{Path, PathBuf};

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checksum::{path_key, sort_keys};
use crate::error::{MigrateError, MigrateResult};

/// Extensions picked up when walking a directory.
pub const SQL_EXTENSIONS: [&str; 2] = [".sql", ".sql.tpl"];

/// Include/exclude rules for discovery.
///
/// Includes are files or directories relative to the project root.
/// Excludes are regular expressions matched against the relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rules {
    /// Files or directories to collect.
    #[serde(default)]
    pub include: Vec<PathBuf>,
    /// Patterns of relative paths to leave out.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Rules {
    /// Create empty rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an include path.
    pub fn include(mut self, path: impl Into<PathBuf>) -> Self {
        self.include.push(path.into());
        self
    }

    /// Add an exclude pattern.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    fn compiled_excludes(&self) -> MigrateResult<Vec<Regex>> {
        self.exclude
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    MigrateError::config(format!("invalid exclude pattern '{}': {}", pattern, e))
                })
            })
            .collect()
    }
}

/// A file selected for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Absolute (or root-joined) path on disk.
    pub path: PathBuf,
    /// History key: path relative to the project root.
    pub key: String,
}

impl Candidate {
    /// Build a candidate for `path` under `root`.
    pub fn new(root: &Path, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = path_key(root, &path);
        Self { path, key }
    }
}

/// Whether `path` looks like a SQL file or SQL template.
pub fn is_sql_file(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    SQL_EXTENSIONS.iter().any(|ext| name.ends_with(ext))
}

/// Every SQL file below `dir`, recursively, in lexical order.
pub async fn walk_sql_files(dir: &Path) -> MigrateResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(path);
            } else if is_sql_file(&path) {
                files.push(path);
            }
        }
    }

    files.sort_by_cached_key(|path| path.to_string_lossy().into_owned());
    Ok(files)
}

/// Resolve `rules` under `root` into an ordered, de-duplicated candidate list.
pub async fn discover(root: &Path, rules: &Rules) -> MigrateResult<Vec<Candidate>> {
    let excludes = rules.compiled_excludes()?;
    let mut candidates = Vec::new();

    for include in &rules.include {
        let path = if include.is_absolute() {
            include.clone()
        } else {
            root.join(include)
        };

        let metadata = tokio::fs::metadata(&path).await.map_err(|_| {
            MigrateError::config(format!("include path not found: {}", path.display()))
        })?;

        let files = if metadata.is_dir() {
            walk_sql_files(&path).await?
        } else {
            vec![path]
        };

        candidates.extend(files.into_iter().map(|file| Candidate::new(root, file)));
    }

    candidates.retain(|candidate| !excludes.iter().any(|re| re.is_match(&candidate.key)));
    sort_keys(&mut candidates, |c| c.key.as_str());

    debug!(count = candidates.len(), "Discovered candidate files");
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(path, "SELECT 1;").await.unwrap();
    }

    #[test]
    fn test_is_sql_file() {
        assert!(is_sql_file(Path::new("a/001_users.sql")));
        assert!(is_sql_file(Path::new("a/002_view.SQL.tpl")));
        assert!(!is_sql_file(Path::new("a/readme.md")));
    }

    #[tokio::test]
    async fn test_discover_orders_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "schema/010_posts.sql").await;
        touch(root, "schema/001_users.sql").await;
        touch(root, "schema/views/005_active.sql.tpl").await;
        touch(root, "schema/notes.txt").await;
        touch(root, "schema/scratch/999_tmp.sql").await;
        touch(root, "seed/001_data.sql").await;

        let rules = Rules::new()
            .include("seed/001_data.sql")
            .include("schema")
            .include("schema/001_users.sql")
            .exclude("^schema/scratch/");

        let keys: Vec<String> = discover(root, &rules)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.key)
            .collect();

        assert_eq!(
            keys,
            vec![
                "schema/001_users.sql",
                "schema/010_posts.sql",
                "schema/views/005_active.sql.tpl",
                "seed/001_data.sql",
            ]
        );
    }

    #[tokio::test]
    async fn test_walk_orders_by_path_text() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(root, "a/x.sql").await;
        touch(root, "a-b/x.sql").await;

        let keys: Vec<String> = walk_sql_files(root)
            .await
            .unwrap()
            .iter()
            .map(|path| path_key(root, path))
            .collect();

        assert_eq!(keys, vec!["a-b/x.sql", "a/x.sql"]);
    }

    #[tokio::test]
    async fn test_discover_missing_include() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(dir.path(), &Rules::new().include("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[tokio::test]
    async fn test_discover_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(dir.path(), &Rules::new().exclude("("))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid exclude pattern"));
    }
}

//! Directory-backed workspace.

use super::{validate_name, Category, Workspace};
use crate::errors::WorkspaceError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

const TEMP_MARKER: &str = ".devflow-tmp-";

/// A workspace with one directory per category under a root.
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    /// Opens a workspace, creating the root and every category directory.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceError::Io` if a directory cannot be created.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, WorkspaceError> {
        let root = root.into();
        for category in Category::ALL {
            let dir = root.join(category.as_str());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| WorkspaceError::io(&dir, e))?;
        }
        debug!(root = %root.display(), "Opened workspace");
        Ok(Self { root })
    }

    fn artifact_path(&self, category: Category, name: &str) -> Result<PathBuf, WorkspaceError> {
        validate_name(name)?;
        Ok(self.root.join(category.as_str()).join(name))
    }

    /// Removes every artifact in a category.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceError::Io` if removal fails.
    pub async fn clear(&self, category: Category) -> Result<(), WorkspaceError> {
        let dir = self.location(category);
        tokio::fs::remove_dir_all(&dir)
            .await
            .map_err(|e| WorkspaceError::io(&dir, e))?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| WorkspaceError::io(&dir, e))
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.contains(TEMP_MARKER))
}

#[async_trait]
impl Workspace for FsWorkspace {
    async fn save(
        &self,
        category: Category,
        name: &str,
        content: &str,
    ) -> Result<String, WorkspaceError> {
        let path = self.artifact_path(category, name)?;
        let parent = path
            .parent()
            .map_or_else(|| self.location(category), Path::to_path_buf);
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| WorkspaceError::io(&parent, e))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| WorkspaceError::InvalidName(name.to_string()))?;
        let temp = parent.join(format!(".{file_name}{TEMP_MARKER}{}", uuid::Uuid::new_v4()));

        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| WorkspaceError::io(&temp, e))?;
        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(WorkspaceError::io(&path, e));
        }

        debug!(category = %category, name, bytes = content.len(), "Saved artifact");
        Ok(path.display().to_string())
    }

    async fn load(&self, category: Category, name: &str) -> Result<String, WorkspaceError> {
        let path = self.artifact_path(category, name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(WorkspaceError::NotFound {
                category: category.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(WorkspaceError::io(&path, e)),
        }
    }

    async fn list(&self, category: Category) -> Result<Vec<String>, WorkspaceError> {
        let base = self.location(category);
        let mut names = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(WorkspaceError::io(&dir, e)),
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| WorkspaceError::io(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| WorkspaceError::io(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() && !is_temp_file(&path) {
                    if let Ok(relative) = path.strip_prefix(&base) {
                        let name = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        names.push(name);
                    }
                }
            }
        }

        names.sort();
        Ok(names)
    }

    fn root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

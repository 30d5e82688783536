//! In-memory workspace for tests and dry runs.

use super::{validate_name, Category, Workspace};
use crate::errors::WorkspaceError;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;

/// A run-isolated workspace backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryWorkspace {
    files: RwLock<BTreeMap<(Category, String), String>>,
}

impl InMemoryWorkspace {
    /// Creates an empty workspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored artifacts across all categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl Workspace for InMemoryWorkspace {
    async fn save(
        &self,
        category: Category,
        name: &str,
        content: &str,
    ) -> Result<String, WorkspaceError> {
        validate_name(name)?;
        self.files
            .write()
            .insert((category, name.to_string()), content.to_string());
        Ok(format!("{category}/{name}"))
    }

    async fn load(&self, category: Category, name: &str) -> Result<String, WorkspaceError> {
        self.files
            .read()
            .get(&(category, name.to_string()))
            .cloned()
            .ok_or_else(|| WorkspaceError::NotFound {
                category: category.to_string(),
                name: name.to_string(),
            })
    }

    async fn list(&self, category: Category) -> Result<Vec<String>, WorkspaceError> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|(c, _)| *c == category)
            .map(|(_, name)| name.clone())
            .collect())
    }

    fn root(&self) -> Option<&Path> {
        None
    }
}

//! Durable artifact storage keyed by (category, name).
//!
//! The workspace is the only resource shared across runs. Each save
//! overwrites one artifact atomically; there are no cross-key transactions.

mod fs;
mod memory;

pub use fs::FsWorkspace;
pub use memory::InMemoryWorkspace;

use crate::errors::WorkspaceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// The closed set of artifact categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Requirement documents.
    Requirements,
    /// Architecture documents.
    Design,
    /// Generated code.
    Code,
    /// Generated checks.
    Tests,
    /// Reports and the iteration log.
    Reports,
    /// Release packages.
    Releases,
}

impl Category {
    /// All categories, in directory creation order.
    pub const ALL: [Self; 6] = [
        Self::Requirements,
        Self::Design,
        Self::Code,
        Self::Tests,
        Self::Reports,
        Self::Releases,
    ];

    /// Returns the directory name of the category.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirements => "requirements",
            Self::Design => "design",
            Self::Code => "code",
            Self::Tests => "tests",
            Self::Reports => "reports",
            Self::Releases => "releases",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = WorkspaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| WorkspaceError::InvalidCategory(s.to_string()))
    }
}

/// Storage contract used by stages.
#[async_trait]
pub trait Workspace: Send + Sync + fmt::Debug {
    /// Writes an artifact, replacing any previous content.
    ///
    /// Returns the artifact's location.
    async fn save(&self, category: Category, name: &str, content: &str)
        -> Result<String, WorkspaceError>;

    /// Reads an artifact.
    ///
    /// Fails with `WorkspaceError::NotFound` if it does not exist.
    async fn load(&self, category: Category, name: &str) -> Result<String, WorkspaceError>;

    /// Lists the artifact names in a category, sorted.
    async fn list(&self, category: Category) -> Result<Vec<String>, WorkspaceError>;

    /// Returns the on-disk root, if the workspace has one.
    fn root(&self) -> Option<&Path>;

    /// Returns where a category lives.
    fn location(&self, category: Category) -> PathBuf {
        match self.root() {
            Some(root) => root.join(category.as_str()),
            None => PathBuf::from(category.as_str()),
        }
    }
}

/// Checks that an artifact name stays inside its category.
///
/// Names are relative paths and may contain subdirectories.
pub(crate) fn validate_name(name: &str) -> Result<(), WorkspaceError> {
    let path = Path::new(name);
    let mut has_normal = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(WorkspaceError::InvalidName(name.to_string()));
            }
        }
    }
    if has_normal {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidName(name.to_string()))
    }
}

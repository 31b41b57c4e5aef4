use std::path::{Path, PathBuf};

/// A repository row. `clone_path` is the single source of the cloned flag,
/// so a cloned repository without a path cannot be represented.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GitRepository {
    pub id: String,
    /// `None` for repositories registered by hand rather than discovered.
    pub project_id: Option<String>,
    pub name: String,
    pub url: String,
    pub clone_path: Option<PathBuf>,
}

impl GitRepository {
    pub fn new(id: &str, project_id: Option<&str>, name: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            project_id: project_id.map(str::to_string),
            name: name.to_string(),
            url: url.to_string(),
            clone_path: None,
        }
    }

    pub fn is_cloned(&self) -> bool {
        self.clone_path.is_some()
    }

    pub fn clone_path(&self) -> Option<&Path> {
        self.clone_path.as_deref()
    }
}

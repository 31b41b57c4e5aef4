mod projects;
mod repos;
pub mod types;
mod work_items;

pub use types::GitRepository;

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::core::remote::{Project, WorkItemSummary};
use crate::platform::{NativePlatform, Platform};

/// Repository rows. Writes are single-row upserts keyed by repository id.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Returns `false` (and stores nothing) when the id or the URL is already
    /// known within the repository's project.
    async fn store_repo(&self, repo: &GitRepository) -> Result<bool>;

    /// `Some(path)` marks the repository cloned at `path`, `None` unlinks it.
    /// Returns `false` when no such repository exists.
    async fn update_clone_status(&self, repo_id: &str, clone_path: Option<&Path>) -> Result<bool>;

    async fn get_repo(&self, repo_id: &str) -> Result<Option<GitRepository>>;

    async fn get_repos_by_project_id(&self, project_id: &str) -> Result<Vec<GitRepository>>;

    async fn list_repos(&self) -> Result<Vec<GitRepository>>;

    async fn check_if_repo_exists(&self, project_id: Option<&str>, url: &str) -> Result<bool>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn upsert_project(&self, project: &Project) -> Result<()>;

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn delete_project(&self, project_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait WorkItemStore: Send + Sync {
    async fn upsert_work_items(&self, items: &[WorkItemSummary]) -> Result<()>;

    async fn get_work_items(&self, project_id: &str) -> Result<Vec<WorkItemSummary>>;

    async fn update_work_item_state(&self, project_id: &str, id: i64, state: &str) -> Result<bool>;
}

/// Resolves the personal access token used to authenticate git transfers.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn personal_access_token(&self, project_id: &str) -> Result<Option<String>>;
}

/// SQLite-backed implementation of every persistence trait above.
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
            NativePlatform::restrict_dir_permissions(parent);
        }
        let db = Connection::open(path)?;
        NativePlatform::restrict_file_permissions(path);
        info!("Opened mirror database at {}", path.display());
        Self::from_connection(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        db.execute(
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                base_url TEXT NOT NULL,
                mode TEXT NOT NULL,
                token TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS repositories (
                id TEXT PRIMARY KEY,
                project_id TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                is_cloned INTEGER NOT NULL DEFAULT 0,
                clone_path TEXT,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (project_id, url)
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS work_items (
                project_id TEXT NOT NULL,
                id INTEGER NOT NULL,
                title TEXT NOT NULL,
                state TEXT NOT NULL,
                work_item_type TEXT NOT NULL,
                assigned_to TEXT,
                changed_date TEXT,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (project_id, id)
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_repositories_project ON repositories(project_id)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::remote::ServiceMode;
    use std::path::PathBuf;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().expect("in-memory store")
    }

    fn project(id: &str, token: Option<&str>) -> Project {
        Project {
            id: id.to_string(),
            name: format!("Project {}", id),
            base_url: "https://dev.azure.com/contoso".to_string(),
            mode: ServiceMode::Service,
            token: token.map(str::to_string),
        }
    }

    fn work_item(project_id: &str, id: i64, state: &str) -> WorkItemSummary {
        WorkItemSummary {
            project_id: project_id.to_string(),
            id,
            title: format!("Item {}", id),
            state: state.to_string(),
            work_item_type: "Task".to_string(),
            assigned_to: None,
            changed_date: None,
        }
    }

    // --- Repositories ---

    #[tokio::test]
    async fn store_repo_twice_with_same_url_keeps_one_row() {
        let store = test_store();
        let first = GitRepository::new("r1", Some("p1"), "R1", "https://host/u1");
        let second = GitRepository::new("r2", Some("p1"), "R2", "https://host/u1");
        assert!(store.store_repo(&first).await.unwrap());
        let before = store.get_repos_by_project_id("p1").await.unwrap().len();
        assert!(!store.store_repo(&second).await.unwrap());
        let after = store.get_repos_by_project_id("p1").await.unwrap().len();
        assert_eq!(before, 1);
        assert_eq!(after, 1);
    }

    #[tokio::test]
    async fn same_url_in_different_projects_is_allowed() {
        let store = test_store();
        let a = GitRepository::new("r1", Some("p1"), "R", "https://host/u1");
        let b = GitRepository::new("r2", Some("p2"), "R", "https://host/u1");
        assert!(store.store_repo(&a).await.unwrap());
        assert!(store.store_repo(&b).await.unwrap());
        assert_eq!(store.list_repos().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn manual_repos_are_deduplicated_too() {
        let store = test_store();
        let a = GitRepository::new("m1", None, "Manual", "https://host/m");
        let b = GitRepository::new("m2", None, "Manual copy", "https://host/m");
        assert!(store.store_repo(&a).await.unwrap());
        assert!(!store.store_repo(&b).await.unwrap());
        assert!(store.check_if_repo_exists(None, "https://host/m").await.unwrap());
        let got = store.get_repo("m1").await.unwrap().unwrap();
        assert_eq!(got.project_id, None);
    }

    #[tokio::test]
    async fn clone_status_roundtrip() {
        let store = test_store();
        store
            .store_repo(&GitRepository::new("r1", Some("p1"), "R1", "https://host/u1"))
            .await
            .unwrap();
        let path = PathBuf::from("/work/R1");
        assert!(store.update_clone_status("r1", Some(&path)).await.unwrap());
        let repo = store.get_repo("r1").await.unwrap().unwrap();
        assert!(repo.is_cloned());
        assert_eq!(repo.clone_path(), Some(path.as_path()));

        assert!(store.update_clone_status("r1", None).await.unwrap());
        let repo = store.get_repo("r1").await.unwrap().unwrap();
        assert!(!repo.is_cloned());
        assert!(repo.clone_path.is_none());
    }

    #[tokio::test]
    async fn clone_status_on_unknown_repo_returns_false() {
        let store = test_store();
        assert!(
            !store
                .update_clone_status("ghost", Some(Path::new("/x")))
                .await
                .unwrap()
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_clone_path_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let store = test_store();
        store
            .store_repo(&GitRepository::new("r1", Some("p1"), "R1", "https://host/u1"))
            .await
            .unwrap();
        let path = Path::new("/work").join(OsStr::from_bytes(b"R\xff1"));
        assert!(store.update_clone_status("r1", Some(&path)).await.is_err());
        assert!(!store.get_repo("r1").await.unwrap().unwrap().is_cloned());
    }

    #[tokio::test]
    async fn rediscovery_keeps_clone_state() {
        let store = test_store();
        let repo = GitRepository::new("r1", Some("p1"), "R1", "https://host/u1");
        store.store_repo(&repo).await.unwrap();
        store
            .update_clone_status("r1", Some(Path::new("/work/R1")))
            .await
            .unwrap();
        assert!(!store.store_repo(&repo).await.unwrap());
        assert!(store.get_repo("r1").await.unwrap().unwrap().is_cloned());
    }

    // --- Projects ---

    #[tokio::test]
    async fn project_upsert_and_list() {
        let store = test_store();
        store.upsert_project(&project("p1", Some("tok"))).await.unwrap();
        let mut changed = project("p1", None);
        changed.mode = ServiceMode::Server;
        store.upsert_project(&changed).await.unwrap();
        let all = store.list_projects().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].mode, ServiceMode::Server);
        assert_eq!(all[0].token, None);
    }

    #[tokio::test]
    async fn credential_resolution_ignores_blank_tokens() {
        let store = test_store();
        store.upsert_project(&project("p1", Some("secret"))).await.unwrap();
        store.upsert_project(&project("p2", Some("  "))).await.unwrap();
        assert_eq!(
            store.personal_access_token("p1").await.unwrap(),
            Some("secret".to_string())
        );
        assert_eq!(store.personal_access_token("p2").await.unwrap(), None);
        assert_eq!(store.personal_access_token("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_project_drops_work_items_but_not_repos() {
        let store = test_store();
        store.upsert_project(&project("p1", None)).await.unwrap();
        store
            .store_repo(&GitRepository::new("r1", Some("p1"), "R1", "https://host/u1"))
            .await
            .unwrap();
        store
            .upsert_work_items(&[work_item("p1", 1, "New")])
            .await
            .unwrap();
        assert!(store.delete_project("p1").await.unwrap());
        assert!(!store.delete_project("p1").await.unwrap());
        assert!(store.get_work_items("p1").await.unwrap().is_empty());
        assert_eq!(store.get_repos_by_project_id("p1").await.unwrap().len(), 1);
    }

    // --- Work items ---

    #[tokio::test]
    async fn work_items_upsert_replaces_state() {
        let store = test_store();
        store
            .upsert_work_items(&[work_item("p1", 1, "New"), work_item("p1", 2, "Active")])
            .await
            .unwrap();
        store
            .upsert_work_items(&[work_item("p1", 1, "Closed")])
            .await
            .unwrap();
        let items = store.get_work_items("p1").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].state, "Closed");
    }

    #[tokio::test]
    async fn work_item_state_update() {
        let store = test_store();
        store
            .upsert_work_items(&[work_item("p1", 5, "New")])
            .await
            .unwrap();
        assert!(store.update_work_item_state("p1", 5, "Active").await.unwrap());
        assert!(!store.update_work_item_state("p1", 6, "Active").await.unwrap());
        assert_eq!(store.get_work_items("p1").await.unwrap()[0].state, "Active");
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mirror.db");
        let store = SqliteStore::open(&path).await.unwrap();
        store.upsert_project(&project("p1", None)).await.unwrap();
        assert!(path.exists());
    }
}

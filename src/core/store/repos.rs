use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rusqlite::{OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

use super::{GitRepository, RepoStore, SqliteStore};

const REPO_COLUMNS: &str = "id, project_id, name, url, is_cloned, clone_path";

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<GitRepository> {
    let project_id: String = row.get(1)?;
    let is_cloned: bool = row.get(4)?;
    let clone_path: Option<String> = row.get(5)?;
    Ok(GitRepository {
        id: row.get(0)?,
        project_id: (!project_id.is_empty()).then_some(project_id),
        name: row.get(2)?,
        url: row.get(3)?,
        clone_path: clone_path.filter(|_| is_cloned).map(PathBuf::from),
    })
}

/// Clone paths are stored as text; a path that is not valid UTF-8 could not
/// be read back unchanged.
fn path_column(path: Option<&Path>) -> Result<Option<&str>> {
    path.map(|p| {
        p.to_str()
            .ok_or_else(|| anyhow!("clone path {} is not valid UTF-8", p.display()))
    })
    .transpose()
}

#[async_trait]
impl RepoStore for SqliteStore {
    async fn store_repo(&self, repo: &GitRepository) -> Result<bool> {
        let clone_path = path_column(repo.clone_path())?;
        let db = self.db.lock().await;
        let inserted = db.execute(
            "INSERT OR IGNORE INTO repositories (id, project_id, name, url, is_cloned, clone_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                repo.id,
                repo.project_id.as_deref().unwrap_or(""),
                repo.name,
                repo.url,
                repo.is_cloned(),
                clone_path
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn update_clone_status(&self, repo_id: &str, clone_path: Option<&Path>) -> Result<bool> {
        let path = path_column(clone_path)?;
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE repositories SET is_cloned = ?1, clone_path = ?2 WHERE id = ?3",
            params![path.is_some(), path, repo_id],
        )?;
        Ok(updated > 0)
    }

    async fn get_repo(&self, repo_id: &str) -> Result<Option<GitRepository>> {
        let db = self.db.lock().await;
        let repo = db
            .query_row(
                &format!("SELECT {} FROM repositories WHERE id = ?1", REPO_COLUMNS),
                [repo_id],
                repo_from_row,
            )
            .optional()?;
        Ok(repo)
    }

    async fn get_repos_by_project_id(&self, project_id: &str) -> Result<Vec<GitRepository>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM repositories WHERE project_id = ?1 ORDER BY name COLLATE NOCASE",
            REPO_COLUMNS
        ))?;
        let rows = stmt.query_map([project_id], repo_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn list_repos(&self) -> Result<Vec<GitRepository>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT {} FROM repositories ORDER BY project_id, name COLLATE NOCASE",
            REPO_COLUMNS
        ))?;
        let rows = stmt.query_map([], repo_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn check_if_repo_exists(&self, project_id: Option<&str>, url: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM repositories WHERE project_id = ?1 AND url = ?2",
            params![project_id.unwrap_or(""), url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

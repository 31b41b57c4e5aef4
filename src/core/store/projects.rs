use anyhow::{Result, anyhow};
use async_trait::async_trait;
use rusqlite::{OptionalExtension, Row, params};

use super::{CredentialResolver, ProjectStore, SqliteStore};
use crate::core::remote::{Project, ServiceMode};

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<(Project, String)> {
    let mode: String = row.get(3)?;
    Ok((
        Project {
            id: row.get(0)?,
            name: row.get(1)?,
            base_url: row.get(2)?,
            mode: ServiceMode::default(),
            token: row.get(4)?,
        },
        mode,
    ))
}

fn with_mode((mut project, mode): (Project, String)) -> Result<Project> {
    project.mode = ServiceMode::from_name(&mode)
        .ok_or_else(|| anyhow!("project {} has unknown mode '{}'", project.id, mode))?;
    Ok(project)
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn upsert_project(&self, project: &Project) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO projects (id, name, base_url, mode, token) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                base_url = excluded.base_url,
                mode = excluded.mode,
                token = excluded.token",
            params![
                project.id,
                project.name,
                project.base_url,
                project.mode.as_str(),
                project.token
            ],
        )?;
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        let db = self.db.lock().await;
        let row = db
            .query_row(
                "SELECT id, name, base_url, mode, token FROM projects WHERE id = ?1",
                [project_id],
                project_from_row,
            )
            .optional()?;
        row.map(with_mode).transpose()
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, name, base_url, mode, token FROM projects ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([], project_from_row)?;

        let mut results = Vec::new();
        for row in rows {
            results.push(with_mode(row?)?);
        }
        Ok(results)
    }

    async fn delete_project(&self, project_id: &str) -> Result<bool> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        tx.execute("DELETE FROM work_items WHERE project_id = ?1", [project_id])?;
        let deleted = tx.execute("DELETE FROM projects WHERE id = ?1", [project_id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl CredentialResolver for SqliteStore {
    async fn personal_access_token(&self, project_id: &str) -> Result<Option<String>> {
        Ok(self
            .get_project(project_id)
            .await?
            .and_then(|p| p.credential().map(str::to_string)))
    }
}

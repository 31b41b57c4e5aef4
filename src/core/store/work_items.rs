use anyhow::Result;
use async_trait::async_trait;
use rusqlite::params;

use super::{SqliteStore, WorkItemStore};
use crate::core::remote::WorkItemSummary;

#[async_trait]
impl WorkItemStore for SqliteStore {
    async fn upsert_work_items(&self, items: &[WorkItemSummary]) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO work_items
                    (project_id, id, title, state, work_item_type, assigned_to, changed_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(project_id, id) DO UPDATE SET
                    title = excluded.title,
                    state = excluded.state,
                    work_item_type = excluded.work_item_type,
                    assigned_to = excluded.assigned_to,
                    changed_date = excluded.changed_date,
                    updated_at = CURRENT_TIMESTAMP",
            )?;
            for item in items {
                stmt.execute(params![
                    item.project_id,
                    item.id,
                    item.title,
                    item.state,
                    item.work_item_type,
                    item.assigned_to,
                    item.changed_date
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_work_items(&self, project_id: &str) -> Result<Vec<WorkItemSummary>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT project_id, id, title, state, work_item_type, assigned_to, changed_date
             FROM work_items WHERE project_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([project_id], |row| {
            Ok(WorkItemSummary {
                project_id: row.get(0)?,
                id: row.get(1)?,
                title: row.get(2)?,
                state: row.get(3)?,
                work_item_type: row.get(4)?,
                assigned_to: row.get(5)?,
                changed_date: row.get(6)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    async fn update_work_item_state(&self, project_id: &str, id: i64, state: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let updated = db.execute(
            "UPDATE work_items SET state = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE project_id = ?2 AND id = ?3",
            params![state, project_id, id],
        )?;
        Ok(updated > 0)
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use tokio_stream::Stream;
use tracing::{debug, info};

use super::Reconciler;
use crate::core::cache::{Cached, RemoteStateCache};
use crate::core::error::SyncError;
use crate::core::notify::Notifier;
use crate::core::remote::{Project, RemoteApi, WorkItemSummary};
use crate::core::store::{GitRepository, RepoStore, WorkItemStore};

pub const WORK_ITEM_UPDATED: &str = "Work item updated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub id: i64,
    pub title: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub repositories_seen: usize,
    pub repositories_added: usize,
    pub work_items: usize,
    pub state_changes: Vec<StateChange>,
}

/// Work items whose state differs from the previously known one. Items
/// without a previous record are not changes.
pub fn state_changes(prior: &[WorkItemSummary], fresh: &[WorkItemSummary]) -> Vec<StateChange> {
    let known: BTreeMap<_, &str> = prior.iter().map(|w| (w.key(), w.state.as_str())).collect();
    fresh
        .iter()
        .filter_map(|item| {
            let before = known.get(&item.key())?;
            (*before != item.state).then(|| StateChange {
                id: item.id,
                title: item.title.clone(),
                from: before.to_string(),
                to: item.state.clone(),
            })
        })
        .collect()
}

/// Keeps a project's repository list and work items in step with the server.
pub struct ProjectSync {
    api: Arc<dyn RemoteApi>,
    repos: Arc<dyn RepoStore>,
    work_items: Arc<dyn WorkItemStore>,
    notifier: Arc<dyn Notifier>,
    cache: RemoteStateCache<WorkItemSummary>,
    seeded: Mutex<BTreeSet<String>>,
}

impl ProjectSync {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        repos: Arc<dyn RepoStore>,
        work_items: Arc<dyn WorkItemStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            api,
            repos,
            work_items,
            notifier,
            cache: RemoteStateCache::new(),
            seeded: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn work_item_stream(&self) -> impl Stream<Item = Vec<WorkItemSummary>> + Send + 'static {
        self.cache.subscribe()
    }

    pub fn cached(&self, project_id: Option<&str>) -> Vec<WorkItemSummary> {
        self.cache.list(project_id)
    }

    pub fn remove_project(&self, project_id: &str) -> usize {
        self.seeded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(project_id);
        self.cache.remove_by_scope(project_id)
    }

    /// Pushes a new state to the server and, when it accepts, to the cache
    /// and the store. Returns whether the server accepted the change.
    pub async fn update_work_item_state(
        &self,
        project: &Project,
        work_item_id: i64,
        new_state: &str,
    ) -> Result<bool, SyncError> {
        let new_state = new_state.trim();
        if new_state.is_empty() {
            return Err(SyncError::Blank("state"));
        }

        let accepted = self
            .api
            .update_work_item_state(project, work_item_id, new_state)
            .await?;
        if !accepted {
            return Ok(false);
        }

        if let Some(mut item) = self.cache.get(&(project.id.clone(), work_item_id)) {
            item.state = new_state.to_string();
            self.cache.upsert(item);
        }
        self.work_items
            .update_work_item_state(&project.id, work_item_id, new_state)
            .await?;
        info!("Work item {} moved to {}", work_item_id, new_state);
        Ok(true)
    }

    async fn sync_repositories(&self, project: &Project, report: &mut SyncReport) -> Result<()> {
        let remote = self.api.fetch_project_repositories(project).await?;
        report.repositories_seen = remote.len();
        for info in remote {
            let repo =
                GitRepository::new(&info.id, Some(&project.id), &info.name, &info.remote_url);
            if self.repos.store_repo(&repo).await? {
                report.repositories_added += 1;
            }
        }
        Ok(())
    }

    async fn seed_once(&self, project: &Project) -> Result<()> {
        let first_contact = !self
            .seeded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&project.id);
        if first_contact {
            let stored = self.work_items.get_work_items(&project.id).await?;
            debug!("{}: seeded {} work items from store", project.name, stored.len());
            self.cache.replace_scope(&project.id, stored);
            self.seeded
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(project.id.clone());
        }
        Ok(())
    }

    async fn sync_work_items(&self, project: &Project, report: &mut SyncReport) -> Result<()> {
        self.seed_once(project).await?;

        let fresh = self.api.fetch_work_items(project).await?;
        let mut prior = self.cache.replace_scope(&project.id, fresh.iter().cloned());

        // The fetch only covers the most recently changed items, so an item
        // can drop out of the cache and come back later. Its last known state
        // is then the persisted one.
        let cached: BTreeSet<i64> = prior.iter().map(|w| w.id).collect();
        if fresh.iter().any(|w| !cached.contains(&w.id)) {
            let stored = self.work_items.get_work_items(&project.id).await?;
            prior.extend(stored.into_iter().filter(|w| !cached.contains(&w.id)));
        }
        let changes = state_changes(&prior, &fresh);

        self.work_items.upsert_work_items(&fresh).await?;

        for change in &changes {
            self.notifier.add_notification(
                WORK_ITEM_UPDATED,
                &format!(
                    "#{} {}: {} -> {}",
                    change.id, change.title, change.from, change.to
                ),
            );
        }
        report.work_items = fresh.len();
        report.state_changes = changes;
        Ok(())
    }
}

#[async_trait]
impl Reconciler for ProjectSync {
    type Outcome = SyncReport;

    fn name(&self) -> &'static str {
        "project sync"
    }

    async fn reconcile(&self, project: &Project) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        // A failed repository listing does not hold back work items.
        let repositories = self.sync_repositories(project, &mut report).await;
        self.sync_work_items(project, &mut report).await?;
        repositories?;
        if report.repositories_added > 0 || !report.state_changes.is_empty() {
            info!(
                "{}: {} new repositories, {} work item changes",
                project.name,
                report.repositories_added,
                report.state_changes.len()
            );
        }
        Ok(report)
    }
}

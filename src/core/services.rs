//! Wires the stores, remote client, monitors and orchestrator together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::Mutex;
use tracing::info;

use crate::core::config::SyncConfig;
use crate::core::error::SyncError;
use crate::core::lifecycle::{LifecycleManager, MonitorComponent};
use crate::core::monitor::{AgentMonitor, PollLoop, ProjectSync, SyncReport};
use crate::core::notify::NotificationCenter;
use crate::core::remote::{AzureDevOpsClient, MonitoredAgent, Project, RemoteApi};
use crate::core::repos::{CloneRequest, RepoManager};
use crate::core::store::{GitRepository, ProjectStore, SqliteStore};
use crate::core::tracker::DownloadTracker;

pub struct Services {
    pub config: SyncConfig,
    pub data_dir: PathBuf,
    pub store: Arc<SqliteStore>,
    pub notifications: Arc<NotificationCenter>,
    pub repos: RepoManager,
    pub agents: Arc<PollLoop<AgentMonitor>>,
    pub projects: Arc<PollLoop<ProjectSync>>,
}

impl Services {
    pub async fn build(data_dir: &Path, config: SyncConfig) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config.database_path(data_dir)).await?);
        let api = Arc::new(AzureDevOpsClient::new(config.monitor.request_timeout())?);
        Ok(Self::with_parts(data_dir, config, store, api))
    }

    pub fn with_parts(
        data_dir: &Path,
        config: SyncConfig,
        store: Arc<SqliteStore>,
        api: Arc<dyn RemoteApi>,
    ) -> Self {
        let notifications = Arc::new(NotificationCenter::new());
        let repos = RepoManager::new(
            store.clone(),
            store.clone(),
            notifications.clone(),
            DownloadTracker::new(),
        );

        let agent_monitor = AgentMonitor::new(api.clone(), notifications.clone());
        let agents = Arc::new(PollLoop::new(
            Arc::new(agent_monitor),
            store.clone(),
            config.monitor.agent_interval(),
        ));

        let project_sync =
            ProjectSync::new(api, store.clone(), store.clone(), notifications.clone());
        let projects = Arc::new(PollLoop::new(
            Arc::new(project_sync),
            store.clone(),
            config.monitor.project_interval(),
        ));

        Self {
            config,
            data_dir: data_dir.to_path_buf(),
            store,
            notifications,
            repos,
            agents,
            projects,
        }
    }

    /// Both poll loops as lifecycle components, agents first.
    pub fn lifecycle(&self) -> LifecycleManager {
        let mut manager = LifecycleManager::new();
        manager.attach(Arc::new(Mutex::new(MonitorComponent::new(self.agents.clone()))));
        manager.attach(Arc::new(Mutex::new(MonitorComponent::new(
            self.projects.clone(),
        ))));
        manager
    }

    pub fn start_monitoring(&self) -> bool {
        let agents = self.agents.start();
        let projects = self.projects.start();
        agents || projects
    }

    pub fn stop_monitoring(&self) {
        self.agents.stop();
        self.projects.stop();
    }

    pub fn is_monitoring(&self) -> bool {
        self.agents.is_running() || self.projects.is_running()
    }

    async fn project(&self, project_id: &str) -> Result<Project> {
        self.store
            .get_project(project_id)
            .await?
            .ok_or_else(|| anyhow!("unknown project '{}'", project_id))
    }

    /// One immediate agent check and project sync for `project_id`.
    pub async fn force_check(&self, project_id: &str) -> Result<(Vec<MonitoredAgent>, SyncReport)> {
        let project = self.project(project_id).await?;
        let online = self.agents.force_check(&project).await?;
        let report = self.projects.force_check(&project).await?;
        Ok((online, report))
    }

    pub async fn update_work_item_state(
        &self,
        project_id: &str,
        work_item_id: i64,
        new_state: &str,
    ) -> Result<bool, SyncError> {
        let project = self.project(project_id).await?;
        self.projects
            .reconciler()
            .update_work_item_state(&project, work_item_id, new_state)
            .await
    }

    /// Deletes the project and evicts its cached agents and work items.
    /// Repository rows stay.
    pub async fn remove_project(&self, project_id: &str) -> Result<bool> {
        let removed = self.store.delete_project(project_id).await?;
        self.agents.reconciler().remove_project(project_id);
        self.projects.reconciler().remove_project(project_id);
        if removed {
            info!("Removed project {}", project_id);
        }
        Ok(removed)
    }

    /// A clone request rooted at the configured clone directory unless
    /// `target_dir` overrides it.
    pub fn clone_request(
        &self,
        repo: GitRepository,
        target_dir: Option<PathBuf>,
        custom_name: Option<String>,
    ) -> CloneRequest {
        let target = target_dir.unwrap_or_else(|| self.config.clone_root(&self.data_dir));
        CloneRequest {
            custom_name,
            ..CloneRequest::new(repo, target)
        }
    }
}

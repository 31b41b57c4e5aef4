//! Fixed-interval poll loops that reconcile remote state per project.

pub mod agents;
pub mod projects;

pub use agents::{AGENT_ONLINE, AgentMonitor};
pub use projects::{ProjectSync, StateChange, SyncReport, WORK_ITEM_UPDATED};

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::remote::Project;
use crate::core::store::ProjectStore;

/// One project's worth of work for a poll loop.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Outcome: Send;

    fn name(&self) -> &'static str;

    async fn reconcile(&self, project: &Project) -> Result<Self::Outcome>;
}

struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PollLoop<R: Reconciler> {
    reconciler: Arc<R>,
    projects: Arc<dyn ProjectStore>,
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl<R: Reconciler> PollLoop<R> {
    pub fn new(reconciler: Arc<R>, projects: Arc<dyn ProjectStore>, interval: Duration) -> Self {
        Self {
            reconciler,
            projects,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn reconciler(&self) -> &Arc<R> {
        &self.reconciler
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawns the loop. Returns false when it is already running.
    pub fn start(&self) -> bool {
        let mut running = self.running();
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return false;
        }

        let token = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.reconciler.clone(),
            self.projects.clone(),
            self.interval,
            token.clone(),
        ));
        *running = Some(Running { token, task });
        true
    }

    /// Cancels the next wake-up. A cycle already in progress runs to completion.
    pub fn stop(&self) {
        if let Some(running) = self.running().take() {
            running.token.cancel();
        }
    }

    /// Like [`stop`](Self::stop) but waits for the loop task to exit.
    pub async fn shutdown(&self) {
        let running = self.running().take();
        if let Some(running) = running {
            running.token.cancel();
            if let Err(e) = running.task.await {
                warn!("{} loop ended abnormally: {}", self.reconciler.name(), e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running()
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    /// Runs one reconcile for `project` right now, outside the schedule.
    pub async fn force_check(&self, project: &Project) -> Result<R::Outcome> {
        self.reconciler.reconcile(project).await
    }
}

impl<R: Reconciler> Drop for PollLoop<R> {
    fn drop(&mut self) {
        if let Some(running) = self.running().take() {
            running.token.cancel();
        }
    }
}

async fn run_loop<R: Reconciler>(
    reconciler: Arc<R>,
    projects: Arc<dyn ProjectStore>,
    interval: Duration,
    token: CancellationToken,
) {
    info!("{} loop started (every {:?})", reconciler.name(), interval);
    loop {
        run_cycle(reconciler.as_ref(), projects.as_ref()).await;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("{} loop stopped", reconciler.name());
}

async fn run_cycle<R: Reconciler>(reconciler: &R, projects: &dyn ProjectStore) {
    let projects = match projects.list_projects().await {
        Ok(projects) => projects,
        Err(e) => {
            warn!("{}: cannot list projects: {}", reconciler.name(), e);
            return;
        }
    };

    debug!("{}: polling {} projects", reconciler.name(), projects.len());
    for project in &projects {
        if let Err(e) = reconciler.reconcile(project).await {
            warn!("{}: {} failed: {:#}", reconciler.name(), project.name, e);
        }
    }
}

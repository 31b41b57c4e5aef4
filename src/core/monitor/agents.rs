use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio_stream::Stream;
use tracing::{debug, info};

use super::Reconciler;
use crate::core::cache::{Cached, RemoteStateCache};
use crate::core::notify::Notifier;
use crate::core::remote::{MonitoredAgent, Project, RemoteApi};

pub const AGENT_ONLINE: &str = "Agent back online";

/// Agents in `fresh` that are online now and were offline or unknown in
/// `prior`. Each agent appears at most once.
pub fn came_online(prior: &[MonitoredAgent], fresh: &[MonitoredAgent]) -> Vec<MonitoredAgent> {
    let was_online: BTreeMap<_, bool> = prior.iter().map(|a| (a.key(), a.is_online())).collect();
    let fresh: BTreeMap<_, &MonitoredAgent> = fresh.iter().map(|a| (a.key(), a)).collect();

    fresh
        .into_iter()
        .filter(|(key, agent)| agent.is_online() && !was_online.get(key).copied().unwrap_or(false))
        .map(|(_, agent)| agent.clone())
        .collect()
}

pub struct AgentMonitor {
    api: Arc<dyn RemoteApi>,
    notifier: Arc<dyn Notifier>,
    cache: RemoteStateCache<MonitoredAgent>,
}

impl AgentMonitor {
    pub fn new(api: Arc<dyn RemoteApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            notifier,
            cache: RemoteStateCache::new(),
        }
    }

    pub fn agents(&self) -> impl Stream<Item = Vec<MonitoredAgent>> + Send + 'static {
        self.cache.subscribe()
    }

    pub fn cached(&self, project_id: Option<&str>) -> Vec<MonitoredAgent> {
        self.cache.list(project_id)
    }

    /// Drops every cached agent of `project_id`.
    pub fn remove_project(&self, project_id: &str) -> usize {
        self.cache.remove_by_scope(project_id)
    }
}

#[async_trait]
impl Reconciler for AgentMonitor {
    type Outcome = Vec<MonitoredAgent>;

    fn name(&self) -> &'static str {
        "agent monitor"
    }

    async fn reconcile(&self, project: &Project) -> Result<Vec<MonitoredAgent>> {
        let fresh = self.api.fetch_build_agents(project).await?;
        debug!("{}: {} agents", project.name, fresh.len());

        let prior = self.cache.replace_scope(&project.id, fresh.iter().cloned());

        let online = came_online(&prior, &fresh);
        for agent in &online {
            info!("Agent {} in {} is back online", agent.name, project.name);
            self.notifier.add_notification(
                AGENT_ONLINE,
                &format!("{} ({}) is online", agent.name, project.name),
            );
        }
        Ok(online)
    }
}

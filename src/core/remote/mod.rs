mod azure;

pub use azure::{AzureDevOpsClient, PAT_USERNAME};

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::cache::Cached;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    /// Azure DevOps Services (dev.azure.com).
    #[default]
    Service,
    /// On-premises Azure DevOps Server / TFS collection.
    Server,
}

impl ServiceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceMode::Service => "service",
            ServiceMode::Server => "server",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "service" => Some(ServiceMode::Service),
            "server" => Some(ServiceMode::Server),
            _ => None,
        }
    }

    pub fn api_version(self) -> &'static str {
        match self {
            ServiceMode::Service => "7.1",
            ServiceMode::Server => "6.0",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub mode: ServiceMode,
    /// Personal access token; `None` or blank means anonymous access.
    pub token: Option<String>,
}

impl Project {
    pub fn credential(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredAgent {
    pub project_id: String,
    pub id: i64,
    pub name: String,
    pub status: String,
    pub enabled: bool,
    pub capabilities: BTreeMap<String, String>,
    pub version: String,
    pub os_description: String,
}

impl MonitoredAgent {
    pub fn is_online(&self) -> bool {
        self.status.eq_ignore_ascii_case("online")
    }
}

impl Cached for MonitoredAgent {
    type Key = (String, i64);

    fn key(&self) -> Self::Key {
        (self.project_id.clone(), self.id)
    }

    fn scope(&self) -> &str {
        &self.project_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemSummary {
    pub project_id: String,
    pub id: i64,
    pub title: String,
    pub state: String,
    pub work_item_type: String,
    pub assigned_to: Option<String>,
    pub changed_date: Option<String>,
}

impl Cached for WorkItemSummary {
    type Key = (String, i64);

    fn key(&self) -> Self::Key {
        (self.project_id.clone(), self.id)
    }

    fn scope(&self) -> &str {
        &self.project_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRepoInfo {
    pub id: String,
    pub name: String,
    pub remote_url: String,
    pub default_branch: Option<String>,
}

/// The slice of the Azure DevOps REST surface the sync core depends on.
/// Every call authenticates with the project's own credential.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch_build_agents(&self, project: &Project) -> Result<Vec<MonitoredAgent>>;

    async fn fetch_work_items(&self, project: &Project) -> Result<Vec<WorkItemSummary>>;

    async fn fetch_project_repositories(&self, project: &Project) -> Result<Vec<RemoteRepoInfo>>;

    /// `Ok(false)` when the service refused the transition.
    async fn update_work_item_state(
        &self,
        project: &Project,
        work_item_id: i64,
        new_state: &str,
    ) -> Result<bool>;
}

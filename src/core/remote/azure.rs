use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use super::{MonitoredAgent, Project, RemoteApi, RemoteRepoInfo, WorkItemSummary};

/// Username sent alongside a personal access token. Azure DevOps ignores it,
/// but basic auth and git both need a non-empty value.
pub const PAT_USERNAME: &str = "pat";

/// The work item batch endpoint rejects more ids than this per request.
const MAX_WORK_ITEMS: usize = 200;

const WORK_ITEM_FIELDS: &str =
    "System.Id,System.Title,System.State,System.WorkItemType,System.AssignedTo,System.ChangedDate";

const WIQL_RECENT: &str = "SELECT [System.Id] FROM WorkItems \
     WHERE [System.TeamProject] = @project ORDER BY [System.ChangedDate] DESC";

// ── Response shapes ──

#[derive(Deserialize)]
struct ValueList<T> {
    value: Vec<T>,
}

#[derive(Deserialize)]
struct AgentPool {
    id: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentDto {
    id: i64,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    version: String,
    #[serde(default)]
    os_description: String,
    #[serde(default)]
    system_capabilities: BTreeMap<String, String>,
    #[serde(default)]
    user_capabilities: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryDto {
    id: String,
    name: String,
    #[serde(default)]
    remote_url: String,
    default_branch: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResult {
    #[serde(default)]
    work_items: Vec<WorkItemRef>,
}

#[derive(Deserialize)]
struct WorkItemRef {
    id: i64,
}

#[derive(Deserialize)]
struct WorkItemDto {
    id: i64,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
}

fn text_field(fields: &serde_json::Map<String, serde_json::Value>, name: &str) -> Option<String> {
    fields.get(name).and_then(|v| v.as_str()).map(str::to_string)
}

/// `System.AssignedTo` is an identity object on current API versions and a
/// plain "Name <mail>" string on old servers.
fn assignee(fields: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    match fields.get("System.AssignedTo")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(identity) => identity
            .get("displayName")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

impl WorkItemDto {
    fn into_summary(self, project_id: &str) -> WorkItemSummary {
        WorkItemSummary {
            project_id: project_id.to_string(),
            id: self.id,
            title: text_field(&self.fields, "System.Title").unwrap_or_default(),
            state: text_field(&self.fields, "System.State").unwrap_or_default(),
            work_item_type: text_field(&self.fields, "System.WorkItemType").unwrap_or_default(),
            assigned_to: assignee(&self.fields),
            changed_date: text_field(&self.fields, "System.ChangedDate"),
        }
    }
}

// ── Client ──

pub struct AzureDevOpsClient {
    client: Client,
}

impl AzureDevOpsClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }

    /// Organization/collection level URL, e.g. `https://dev.azure.com/org/_apis/...`.
    fn org_url(project: &Project, path: &str) -> Result<String> {
        let base = project.base_url.trim_end_matches('/');
        url::Url::parse(base)
            .with_context(|| format!("invalid service URL for project {}", project.name))?;
        Ok(format!("{}/{}", base, path))
    }

    /// Project level URL: the project name is a path segment and gets encoded.
    fn project_url(project: &Project, path: &str) -> Result<String> {
        let scoped = format!("{}/{}", urlencoding::encode(&project.name), path);
        Self::org_url(project, &scoped)
    }

    fn authorize(&self, request: RequestBuilder, project: &Project) -> RequestBuilder {
        let request = request.query(&[("api-version", project.mode.api_version())]);
        match project.credential() {
            Some(token) => request.basic_auth(PAT_USERNAME, Some(token)),
            None => request,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let res = request.send().await?;
        let status = res.status();
        if !status.is_success() {
            let detail = res.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Azure DevOps {} request failed ({}): {}",
                what,
                status,
                detail
            ));
        }
        Ok(res.json().await?)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        project: &Project,
        url: &str,
        what: &str,
    ) -> Result<T> {
        debug!("GET {}", url);
        let request = self.authorize(self.client.get(url), project);
        self.send_json(request, what).await
    }
}

#[async_trait]
impl RemoteApi for AzureDevOpsClient {
    async fn fetch_build_agents(&self, project: &Project) -> Result<Vec<MonitoredAgent>> {
        let pools_url = Self::org_url(project, "_apis/distributedtask/pools")?;
        let pools: ValueList<AgentPool> = self.get_json(project, &pools_url, "agent pools").await?;

        let mut agents = Vec::new();
        for pool in pools.value {
            let url = Self::org_url(
                project,
                &format!("_apis/distributedtask/pools/{}/agents", pool.id),
            )?;
            let request = self
                .authorize(self.client.get(&url), project)
                .query(&[("includeCapabilities", "true")]);
            let list: ValueList<AgentDto> = self.send_json(request, "agents").await?;
            agents.extend(list.value.into_iter().map(|dto| {
                let mut capabilities = dto.system_capabilities;
                capabilities.extend(dto.user_capabilities);
                MonitoredAgent {
                    project_id: project.id.clone(),
                    id: dto.id,
                    name: dto.name,
                    status: dto.status,
                    enabled: dto.enabled,
                    capabilities,
                    version: dto.version,
                    os_description: dto.os_description,
                }
            }));
        }
        Ok(agents)
    }

    async fn fetch_work_items(&self, project: &Project) -> Result<Vec<WorkItemSummary>> {
        let wiql_url = Self::project_url(project, "_apis/wit/wiql")?;
        debug!("POST {}", wiql_url);
        let request = self
            .authorize(self.client.post(&wiql_url), project)
            .json(&json!({ "query": WIQL_RECENT }));
        let result: WiqlResult = self.send_json(request, "WIQL").await?;

        let ids: Vec<String> = result
            .work_items
            .iter()
            .take(MAX_WORK_ITEMS)
            .map(|w| w.id.to_string())
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let url = Self::org_url(project, "_apis/wit/workitems")?;
        let request = self
            .authorize(self.client.get(&url), project)
            .query(&[("ids", ids.join(",")), ("fields", WORK_ITEM_FIELDS.to_string())]);
        let items: ValueList<WorkItemDto> = self.send_json(request, "work items").await?;
        Ok(items
            .value
            .into_iter()
            .map(|dto| dto.into_summary(&project.id))
            .collect())
    }

    async fn fetch_project_repositories(&self, project: &Project) -> Result<Vec<RemoteRepoInfo>> {
        let url = Self::project_url(project, "_apis/git/repositories")?;
        let repos: ValueList<RepositoryDto> = self.get_json(project, &url, "repositories").await?;
        Ok(repos
            .value
            .into_iter()
            .map(|dto| RemoteRepoInfo {
                id: dto.id,
                name: dto.name,
                remote_url: dto.remote_url,
                default_branch: dto.default_branch,
            })
            .collect())
    }

    async fn update_work_item_state(
        &self,
        project: &Project,
        work_item_id: i64,
        new_state: &str,
    ) -> Result<bool> {
        let url = Self::org_url(project, &format!("_apis/wit/workitems/{}", work_item_id))?;
        let patch = json!([{ "op": "add", "path": "/fields/System.State", "value": new_state }]);
        let body = serde_json::to_vec(&patch)?;
        debug!("PATCH {}", url);
        let res = self
            .authorize(self.client.patch(&url), project)
            .header(reqwest::header::CONTENT_TYPE, "application/json-patch+json")
            .body(body)
            .send()
            .await?;

        let status = res.status();
        if status.is_success() {
            return Ok(true);
        }

        let detail = res.text().await.unwrap_or_default();
        if status.is_client_error() && status != StatusCode::UNAUTHORIZED {
            debug!(
                "work item {} state change refused ({}): {}",
                work_item_id, status, detail
            );
            Ok(false)
        } else {
            Err(anyhow!(
                "Azure DevOps work item update failed ({}): {}",
                status,
                detail
            ))
        }
    }
}

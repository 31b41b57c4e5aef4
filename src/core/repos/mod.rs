//! Clone, link and branch orchestration for mirrored repositories.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::core::error::SyncError;
use crate::core::git;
use crate::core::notify::Notifier;
use crate::core::store::{CredentialResolver, GitRepository, RepoStore};
use crate::core::tracker::{DownloadSlot, DownloadTracker};

pub const ALREADY_IN_PROGRESS: &str = "Download already in progress";
pub const REPOSITORY_CLONED: &str = "Repository cloned";
pub const CLONE_FAILED: &str = "Clone failed";
pub const REPOSITORY_LINKED: &str = "Repository linked";
pub const LINK_FAILED: &str = "Link failed";
pub const BRANCH_CREATED: &str = "Branch created";
pub const BRANCH_INCOMPLETE: &str = "Branch creation incomplete";
pub const REPOSITORY_UNLINKED: &str = "Repository unlinked";

#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub repo: GitRepository,
    pub target_dir: PathBuf,
    pub custom_name: Option<String>,
    /// Project whose token authenticates the transfer.
    pub project_id: Option<String>,
}

impl CloneRequest {
    pub fn new(repo: GitRepository, target_dir: impl Into<PathBuf>) -> Self {
        let project_id = repo.project_id.clone();
        Self {
            repo,
            target_dir: target_dir.into(),
            custom_name: None,
            project_id,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());
        self
    }

    pub fn destination(&self) -> PathBuf {
        let name = self
            .custom_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.repo.name);
        self.target_dir.join(name)
    }
}

#[derive(Debug)]
pub enum CloneOutcome {
    Started(CloneHandle),
    /// Another clone or link of the same repository holds the slot.
    AlreadyInProgress,
}

impl CloneOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, CloneOutcome::Started(_))
    }

    pub fn into_handle(self) -> Option<CloneHandle> {
        match self {
            CloneOutcome::Started(handle) => Some(handle),
            CloneOutcome::AlreadyInProgress => None,
        }
    }
}

/// Handle on a detached clone task. Dropping it lets the clone run on.
#[derive(Debug)]
pub struct CloneHandle {
    repo_id: String,
    task: JoinHandle<Result<PathBuf, SyncError>>,
}

impl CloneHandle {
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the clone and returns the path it landed in.
    pub async fn wait(self) -> Result<PathBuf, SyncError> {
        self.task.await?
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked(PathBuf),
    AlreadyInProgress,
}

struct Inner {
    repos: Arc<dyn RepoStore>,
    credentials: Arc<dyn CredentialResolver>,
    notifier: Arc<dyn Notifier>,
    tracker: DownloadTracker,
    branches: watch::Sender<BTreeMap<String, String>>,
}

#[derive(Clone)]
pub struct RepoManager {
    inner: Arc<Inner>,
}

impl RepoManager {
    pub fn new(
        repos: Arc<dyn RepoStore>,
        credentials: Arc<dyn CredentialResolver>,
        notifier: Arc<dyn Notifier>,
        tracker: DownloadTracker,
    ) -> Self {
        let (branches, _) = watch::channel(BTreeMap::new());
        Self {
            inner: Arc::new(Inner {
                repos,
                credentials,
                notifier,
                tracker,
                branches,
            }),
        }
    }

    pub fn tracker(&self) -> &DownloadTracker {
        &self.inner.tracker
    }

    pub fn is_downloading(&self, repo_id: &str) -> bool {
        self.inner.tracker.is_active(repo_id)
    }

    pub fn downloading_ids(&self) -> impl Stream<Item = BTreeSet<String>> + Send + 'static {
        self.inner.tracker.active_ids()
    }

    // ── Clone ──

    /// Starts a background clone unless one is already running for the same
    /// repository. Must be called from within a tokio runtime.
    pub fn clone_repository(&self, request: CloneRequest) -> CloneOutcome {
        let Some(slot) = self.inner.tracker.acquire(&request.repo.id) else {
            self.notify_busy(&request.repo);
            return CloneOutcome::AlreadyInProgress;
        };

        let repo_id = request.repo.id.clone();
        let manager = self.clone();
        let task = tokio::spawn(async move { manager.run_clone(request, slot).await });
        CloneOutcome::Started(CloneHandle { repo_id, task })
    }

    async fn run_clone(
        self,
        request: CloneRequest,
        _slot: DownloadSlot,
    ) -> Result<PathBuf, SyncError> {
        let repo = &request.repo;
        match self.perform_clone(&request).await {
            Ok(path) => {
                info!("Cloned {} into {}", repo.name, path.display());
                self.inner.notifier.add_notification(
                    REPOSITORY_CLONED,
                    &format!("{} cloned to {}", repo.name, path.display()),
                );
                Ok(path)
            }
            Err(e) => {
                warn!("Clone of {} failed: {}", repo.name, e);
                self.inner
                    .notifier
                    .add_notification(CLONE_FAILED, &format!("{}: {}", repo.name, e));
                Err(e)
            }
        }
    }

    async fn perform_clone(&self, request: &CloneRequest) -> Result<PathBuf, SyncError> {
        let dest = request.destination();
        tokio::fs::create_dir_all(&request.target_dir).await?;

        let token = self.token_for(request.project_id.as_deref()).await?;
        let url = request.repo.url.clone();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || {
            git::clone_repository(&url, &target, token.as_deref())
        })
        .await??;

        let dest = tokio::fs::canonicalize(&dest).await?;
        self.persist_clone_path(&request.repo, &dest).await?;
        self.refresh_branches(std::slice::from_ref(&GitRepository {
            clone_path: Some(dest.clone()),
            ..request.repo.clone()
        }))
        .await;
        Ok(dest)
    }

    // ── Link ──

    /// Records an existing working copy as the clone of `repo`.
    pub async fn link_existing(
        &self,
        repo: &GitRepository,
        local_path: &Path,
    ) -> Result<LinkOutcome, SyncError> {
        let Some(_slot) = self.inner.tracker.acquire(&repo.id) else {
            self.notify_busy(repo);
            return Ok(LinkOutcome::AlreadyInProgress);
        };

        match self.perform_link(repo, local_path).await {
            Ok(path) => {
                info!("Linked {} to {}", repo.name, path.display());
                self.inner.notifier.add_notification(
                    REPOSITORY_LINKED,
                    &format!("{} linked to {}", repo.name, path.display()),
                );
                Ok(LinkOutcome::Linked(path))
            }
            Err(e) => {
                warn!("Link of {} failed: {}", repo.name, e);
                self.inner
                    .notifier
                    .add_notification(LINK_FAILED, &format!("{}: {}", repo.name, e));
                Err(e)
            }
        }
    }

    async fn perform_link(
        &self,
        repo: &GitRepository,
        local_path: &Path,
    ) -> Result<PathBuf, SyncError> {
        let is_dir = tokio::fs::metadata(local_path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(SyncError::InvalidPath(local_path.to_path_buf()));
        }

        let path = tokio::fs::canonicalize(local_path).await?;
        let repo_path = path.clone();
        let remotes = tokio::task::spawn_blocking(move || git::remote_names(&repo_path)).await??;
        if remotes.is_empty() {
            return Err(SyncError::NotARepository(path));
        }

        self.persist_clone_path(repo, &path).await?;
        self.refresh_branches(std::slice::from_ref(&GitRepository {
            clone_path: Some(path.clone()),
            ..repo.clone()
        }))
        .await;
        Ok(path)
    }

    // ── Branches ──

    /// Creates `name` in every repository. Returns whether all of them
    /// succeeded; individual failures do not stop the batch.
    pub async fn create_branch(
        &self,
        name: &str,
        repos: &[GitRepository],
        push_to_remote: bool,
        auto_checkout: bool,
    ) -> Result<bool, SyncError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SyncError::Blank("branch name"));
        }

        let mut failed = Vec::new();
        for repo in repos {
            match self
                .branch_in(repo, name, push_to_remote, auto_checkout)
                .await
            {
                Ok(()) => info!("Created branch {} in {}", name, repo.name),
                Err(e) => {
                    warn!("Branch {} failed in {}: {}", name, repo.name, e);
                    failed.push(repo.name.as_str());
                }
            }
        }

        if failed.is_empty() {
            self.inner.notifier.add_notification(
                BRANCH_CREATED,
                &format!("Created '{}' in {} repositories", name, repos.len()),
            );
        } else {
            self.inner.notifier.add_notification(
                BRANCH_INCOMPLETE,
                &format!("'{}' could not be created in: {}", name, failed.join(", ")),
            );
        }
        Ok(failed.is_empty())
    }

    async fn branch_in(
        &self,
        repo: &GitRepository,
        name: &str,
        push: bool,
        checkout: bool,
    ) -> Result<(), SyncError> {
        let path = repo
            .clone_path()
            .ok_or_else(|| anyhow!("{} has not been cloned", repo.name))?
            .to_path_buf();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(SyncError::InvalidPath(path));
        }

        let token = if push {
            self.token_for(repo.project_id.as_deref()).await?
        } else {
            None
        };
        let branch = name.to_string();
        let workdir = path.clone();
        tokio::task::spawn_blocking(move || {
            git::create_branch(&workdir, &branch, checkout)?;
            if push {
                git::push_branch(&workdir, &branch, token.as_deref())?;
            }
            Ok::<_, SyncError>(())
        })
        .await??;

        if checkout {
            let repo_id = repo.id.clone();
            let branch = name.to_string();
            self.inner.branches.send_modify(|map| {
                map.insert(repo_id, branch);
            });
        }
        Ok(())
    }

    /// Reads the checked-out branch of every cloned repository in `repos`
    /// and publishes the result. Repositories that are not cloned or cannot
    /// be read drop out of the map.
    pub async fn refresh_branches(&self, repos: &[GitRepository]) {
        let targets: Vec<(String, Option<PathBuf>)> = repos
            .iter()
            .map(|r| (r.id.clone(), r.clone_path.clone()))
            .collect();

        let read = tokio::task::spawn_blocking(move || {
            targets
                .into_iter()
                .map(|(id, path)| {
                    let branch = path.and_then(|p| match git::current_branch(&p) {
                        Ok(branch) => branch,
                        Err(e) => {
                            warn!("Cannot read branch of {}: {}", p.display(), e);
                            None
                        }
                    });
                    (id, branch)
                })
                .collect::<Vec<_>>()
        })
        .await;

        let read = match read {
            Ok(read) => read,
            Err(e) => {
                warn!("Branch refresh task failed: {}", e);
                return;
            }
        };

        self.inner.branches.send_if_modified(|map| {
            let mut changed = false;
            for (id, branch) in read {
                changed |= match branch {
                    Some(branch) => map.insert(id, branch.clone()).as_ref() != Some(&branch),
                    None => map.remove(&id).is_some(),
                };
            }
            changed
        });
    }

    pub fn branches(&self) -> impl Stream<Item = BTreeMap<String, String>> + Send + 'static {
        WatchStream::new(self.inner.branches.subscribe())
    }

    pub fn branch_map(&self) -> BTreeMap<String, String> {
        self.inner.branches.borrow().clone()
    }

    pub fn current_branch(&self, repo_id: &str) -> Option<String> {
        self.inner.branches.borrow().get(repo_id).cloned()
    }

    // ── Unlink ──

    /// Forgets the local copy of `repo_id`. Files on disk are left alone.
    pub async fn unlink(&self, repo_id: &str) -> Result<bool, SyncError> {
        let repo = self.inner.repos.get_repo(repo_id).await?;
        let updated = self.inner.repos.update_clone_status(repo_id, None).await?;
        self.inner
            .branches
            .send_if_modified(|map| map.remove(repo_id).is_some());

        if let Some(repo) = repo.filter(|_| updated) {
            info!("Unlinked {}", repo.name);
            self.inner.notifier.add_notification(
                REPOSITORY_UNLINKED,
                &format!("{} is no longer linked to a local copy", repo.name),
            );
        }
        Ok(updated)
    }

    // ── Helpers ──

    async fn token_for(&self, project_id: Option<&str>) -> Result<Option<String>, SyncError> {
        let Some(project_id) = project_id else {
            return Ok(None);
        };
        let token = self
            .inner
            .credentials
            .personal_access_token(project_id)
            .await?;
        Ok(token.filter(|t| !t.trim().is_empty()))
    }

    async fn persist_clone_path(&self, repo: &GitRepository, path: &Path) -> Result<(), SyncError> {
        if self
            .inner
            .repos
            .update_clone_status(&repo.id, Some(path))
            .await?
        {
            return Ok(());
        }
        let row = GitRepository {
            clone_path: Some(path.to_path_buf()),
            ..repo.clone()
        };
        if !self.inner.repos.store_repo(&row).await? {
            return Err(anyhow!(
                "{} could not be recorded: its URL is already registered",
                repo.name
            )
            .into());
        }
        Ok(())
    }

    fn notify_busy(&self, repo: &GitRepository) {
        info!("{} is already being downloaded", repo.name);
        self.inner.notifier.add_notification(
            ALREADY_IN_PROGRESS,
            &format!("{} is already being downloaded", repo.name),
        );
    }
}

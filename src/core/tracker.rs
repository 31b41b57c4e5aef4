//! Active-set of repositories with a clone or link in flight.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::Stream;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

/// Cheap cloneable handle; all clones share one active set.
#[derive(Clone)]
pub struct DownloadTracker {
    active: Arc<watch::Sender<BTreeSet<String>>>,
}

impl Default for DownloadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadTracker {
    pub fn new() -> Self {
        let (active, _) = watch::channel(BTreeSet::new());
        Self {
            active: Arc::new(active),
        }
    }

    /// Mark `repo_id` active. Returns false, changing nothing, when it already is.
    pub fn try_start(&self, repo_id: &str) -> bool {
        let started = self
            .active
            .send_if_modified(|active| active.insert(repo_id.to_string()));
        debug!(repo_id, started, "download slot requested");
        started
    }

    pub fn finish(&self, repo_id: &str) {
        if self.active.send_if_modified(|active| active.remove(repo_id)) {
            debug!(repo_id, "download slot released");
        }
    }

    /// Scoped form of [`try_start`](Self::try_start): the slot is released
    /// when the returned guard is dropped, whatever the exit path.
    pub fn acquire(&self, repo_id: &str) -> Option<DownloadSlot> {
        self.try_start(repo_id).then(|| DownloadSlot {
            tracker: self.clone(),
            repo_id: repo_id.to_string(),
        })
    }

    pub fn is_active(&self, repo_id: &str) -> bool {
        self.active.borrow().contains(repo_id)
    }

    pub fn snapshot(&self) -> BTreeSet<String> {
        self.active.borrow().clone()
    }

    pub fn active_ids(&self) -> impl Stream<Item = BTreeSet<String>> + Send + 'static {
        WatchStream::new(self.active.subscribe())
    }
}

#[must_use = "dropping the slot releases the repository immediately"]
pub struct DownloadSlot {
    tracker: DownloadTracker,
    repo_id: String,
}

impl DownloadSlot {
    pub fn repo_id(&self) -> &str {
        &self.repo_id
    }
}

impl Drop for DownloadSlot {
    fn drop(&mut self) {
        self.tracker.finish(&self.repo_id);
    }
}

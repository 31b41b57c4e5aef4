use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::SystemTime;

use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Sink for user-facing outcomes. Fire-and-forget: implementations must not
/// block and cannot fail.
pub trait Notifier: Send + Sync {
    fn add_notification(&self, title: &str, message: &str);
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub created_at: SystemTime,
}

const DEFAULT_HISTORY: usize = 200;

/// In-process notification feed: keeps a bounded history and fans every new
/// entry out to live subscribers.
pub struct NotificationCenter {
    tx: broadcast::Sender<Notification>,
    history: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl Default for NotificationCenter {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Oldest first.
    pub fn recent(&self) -> Vec<Notification> {
        match self.history.lock() {
            Ok(history) => history.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn count_titled(&self, title: &str) -> usize {
        self.recent().iter().filter(|n| n.title == title).count()
    }
}

impl Notifier for NotificationCenter {
    fn add_notification(&self, title: &str, message: &str) {
        let notification = Notification {
            id: Uuid::new_v4(),
            title: title.to_string(),
            message: message.to_string(),
            created_at: SystemTime::now(),
        };
        info!("[notify] {}: {}", title, message);

        {
            let mut history = match self.history.lock() {
                Ok(h) => h,
                Err(poisoned) => poisoned.into_inner(),
            };
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }

        let _ = self.tx.send(notification); // Ignored if no receivers
    }
}

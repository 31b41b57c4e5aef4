use anyhow::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::monitor::{PollLoop, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Init,
    Ready,
    Shutdown,
}

#[async_trait::async_trait]
pub trait LifecycleComponent {
    fn name(&self) -> &str;

    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_start(&mut self) -> Result<()> {
        Ok(())
    }
    async fn on_shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type SharedComponent = Arc<Mutex<dyn LifecycleComponent + Send + Sync>>;

pub struct LifecycleManager {
    state: LifecycleState,
    components: Vec<SharedComponent>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Init,
            components: Vec::new(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn attach(&mut self, component: SharedComponent) {
        self.components.push(component);
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Init");
        self.state = LifecycleState::Init;
        for comp in &self.components {
            comp.lock().await.on_init().await?;
        }

        for comp in &self.components {
            let mut comp = comp.lock().await;
            comp.on_start().await?;
            info!("Started {}", comp.name());
        }

        info!("Lifecycle Phase: Ready");
        self.state = LifecycleState::Ready;
        Ok(())
    }

    /// Stops components in reverse start order. Individual failures are logged
    /// and do not prevent the remaining components from stopping.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Lifecycle Phase: Shutdown");
        self.state = LifecycleState::Shutdown;

        for comp in self.components.iter().rev() {
            let mut comp = comp.lock().await;
            if let Err(e) = comp.on_shutdown().await {
                warn!("Component {} shutdown error: {}", comp.name(), e);
            }
        }

        Ok(())
    }
}

/// Runs a poll loop for as long as the lifecycle is up.
pub struct MonitorComponent<R: Reconciler> {
    poll: Arc<PollLoop<R>>,
}

impl<R: Reconciler> MonitorComponent<R> {
    pub fn new(poll: Arc<PollLoop<R>>) -> Self {
        Self { poll }
    }
}

#[async_trait::async_trait]
impl<R: Reconciler> LifecycleComponent for MonitorComponent<R> {
    fn name(&self) -> &str {
        self.poll.reconciler().name()
    }

    async fn on_start(&mut self) -> Result<()> {
        if !self.poll.start() {
            warn!("{} was already running", self.name());
        }
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        self.poll.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex as StdMutex;

    struct Recorder {
        name: &'static str,
        log: Arc<StdMutex<Vec<String>>>,
        fail_shutdown: bool,
    }

    #[async_trait::async_trait]
    impl LifecycleComponent for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn on_init(&mut self) -> Result<()> {
            self.log.lock().unwrap().push(format!("init {}", self.name));
            Ok(())
        }

        async fn on_start(&mut self) -> Result<()> {
            self.log.lock().unwrap().push(format!("start {}", self.name));
            Ok(())
        }

        async fn on_shutdown(&mut self) -> Result<()> {
            self.log.lock().unwrap().push(format!("stop {}", self.name));
            if self.fail_shutdown {
                return Err(anyhow!("boom"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn components_start_in_order_and_stop_in_reverse() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let mut manager = LifecycleManager::new();
        for (name, fail_shutdown) in [("a", true), ("b", false)] {
            manager.attach(Arc::new(Mutex::new(Recorder {
                name,
                log: log.clone(),
                fail_shutdown,
            })));
        }

        manager.start().await.unwrap();
        assert_eq!(manager.state(), LifecycleState::Ready);
        manager.shutdown().await.unwrap();
        assert_eq!(manager.state(), LifecycleState::Shutdown);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["init a", "init b", "start a", "start b", "stop b", "stop a"]
        );
    }
}

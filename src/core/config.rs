use anyhow::{Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_agent_interval")]
    pub agent_interval_secs: u64,

    #[serde(default = "default_project_interval")]
    pub project_interval_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    /// Defaults to `<data_dir>/mirror.db`.
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Default parent directory for clones, `<data_dir>/repos` when unset.
    #[serde(default)]
    pub clone_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_agent_interval() -> u64 {
    300
}
fn default_project_interval() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            agent_interval_secs: default_agent_interval(),
            project_interval_secs: default_project_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl MonitorConfig {
    pub fn agent_interval(&self) -> Duration {
        Duration::from_secs(self.agent_interval_secs)
    }

    pub fn project_interval(&self) -> Duration {
        Duration::from_secs(self.project_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl SyncConfig {
    pub async fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join(CONFIG_FILE);
        if !config_path.exists() {
            info!("No {} found, using defaults.", CONFIG_FILE);
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(&config_path).await?;
        let config: SyncConfig = toml::from_str(&content)?;
        config.validate()?;

        info!(
            "Loaded config: agents every {}s, projects every {}s, log level {}",
            config.monitor.agent_interval_secs,
            config.monitor.project_interval_secs,
            config.logging.level
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.monitor.agent_interval_secs == 0 {
            bail!("monitor.agent_interval_secs must be greater than zero");
        }
        if self.monitor.project_interval_secs == 0 {
            bail!("monitor.project_interval_secs must be greater than zero");
        }
        if self.monitor.request_timeout_secs == 0 {
            bail!("monitor.request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.storage
            .database
            .clone()
            .unwrap_or_else(|| data_dir.join("mirror.db"))
    }

    pub fn clone_root(&self, data_dir: &Path) -> PathBuf {
        self.storage
            .clone_root
            .clone()
            .unwrap_or_else(|| data_dir.join("repos"))
    }
}

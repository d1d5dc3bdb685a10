//! vbotd - chat-driven test machine daemon
//!
//! Library components for the daemon process.

pub mod commander;
pub mod git;
pub mod handlers;
pub mod machine;
pub mod router;
pub mod server;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use commander::{Commander, CommanderConfig, CommanderError};
use git::GitError;
use server::AppState;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vbot_core::Config;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Commander(#[from] CommanderError),
    #[error("failed to prepare repository: {0}")]
    Git(#[from] GitError),
    #[error("invalid listen address {0}")]
    InvalidAddress(String),
    #[error("HTTP server error: {0}")]
    Server(#[from] std::io::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub address: String,
    pub port: u16,
    pub token: Option<String>,
    pub max_payload_bytes: usize,
    /// Cloned into the repository root when that is not a checkout.
    pub repository_url: Option<String>,
    /// How long shutdown waits for running machines.
    pub shutdown_grace: Duration,
    pub commander: CommanderConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl DaemonConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            address: config.address.clone(),
            port: config.port,
            token: config.token.clone(),
            max_payload_bytes: config.max_payload_bytes,
            repository_url: config.repository_url.clone(),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_sec),
            commander: CommanderConfig::from_config(config),
        }
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, DaemonError> {
        let addr = format!("{}:{}", self.address, self.port);
        addr.parse().map_err(|_| DaemonError::InvalidAddress(addr))
    }
}

/// Daemon state.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    commander: Arc<Commander>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Create a daemon, discovering machines up front.
    ///
    /// Clones the repository first if a url is configured and the
    /// repository root is not a checkout yet.
    pub fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        if let Some(url) = &config.repository_url {
            let root = &config.commander.repository_root;
            if git::ensure_checkout(root, url)? {
                info!(repo = %root.display(), "repository cloned");
            }
        }

        let commander = Commander::new(config.commander.clone())?;
        info!(
            machines = commander.machines().len(),
            root = %config.commander.machines_root.display(),
            "machine discovery complete"
        );

        Ok(Self {
            config,
            commander: Arc::new(commander),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn commander(&self) -> &Arc<Commander> {
        &self.commander
    }

    /// Serve webhooks until shutdown, then wait for running machines.
    pub async fn run(&self) -> Result<(), DaemonError> {
        let addr = self.config.listen_addr()?;
        info!("vbotd starting on {}", addr);
        info!("repository: {}", self.config.commander.repository_root.display());
        if self.config.token.is_some() {
            info!("token verification: enabled");
        }

        let state = Arc::new(AppState {
            commander: Arc::clone(&self.commander),
            token: self.config.token.clone(),
            max_payload_bytes: self.config.max_payload_bytes,
        });
        server::start_server(state, addr, self.shutdown.clone()).await?;

        self.drain().await;
        Ok(())
    }

    /// Signal the daemon to shut down.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.cancel();
    }

    async fn drain(&self) {
        let running = self.commander.running();
        if running.is_empty() {
            return;
        }
        info!(machines = ?running, "waiting for running machines");
        if tokio::time::timeout(self.config.shutdown_grace, self.commander.stop_all())
            .await
            .is_err()
        {
            warn!(
                machines = ?self.commander.running(),
                "shutdown grace period elapsed, leaving runs in progress"
            );
        }
    }
}

//! vbotd - chat-driven test machine daemon
//!
//! Main entry point for the daemon binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;

use clap::Parser;
use eyre::WrapErr;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};
use vbot_core::Config;
use vbotd::{Daemon, DaemonConfig};

#[derive(Parser)]
#[command(name = "vbotd", about = "Chat-driven test machine daemon", version)]
struct Cli {
    /// Config file (key=value); defaults apply when omitted
    #[arg(short, long, env = "VBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    address: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Repository containing maintenance/vagrant
    #[arg(short, long)]
    repository: Option<PathBuf>,

    /// Do not checkout and pull branches before runs
    #[arg(long)]
    no_git_sync: bool,
}

impl Cli {
    fn load_config(&self) -> eyre::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .wrap_err_with(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };
        config.apply_env();

        if let Some(address) = &self.address {
            config.address.clone_from(address);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(repository) = &self.repository {
            config.repository_path.clone_from(repository);
        }
        if self.no_git_sync {
            config.git_sync = false;
        }
        Ok(config)
    }
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = cli.load_config()?;
    let daemon = Daemon::new(DaemonConfig::from_config(&config))
        .wrap_err("failed to initialize daemon")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create tokio runtime")?;

    runtime.block_on(async {
        let run = daemon.run();
        tokio::pin!(run);

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).wrap_err("failed to register SIGTERM handler")?;
            let mut sigint =
                signal(SignalKind::interrupt()).wrap_err("failed to register SIGINT handler")?;

            tokio::select! {
                result = &mut run => return report(result),
                _ = sigint.recv() => tracing::info!("received SIGINT, initiating graceful shutdown"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, initiating graceful shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::select! {
                result = &mut run => return report(result),
                _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT, initiating graceful shutdown"),
            }
        }

        daemon.shutdown();
        report(run.await)
    })
}

fn report(result: Result<(), vbotd::DaemonError>) -> eyre::Result<()> {
    if let Err(e) = &result {
        error!("daemon error: {}", e);
    }
    result.wrap_err("daemon exited with an error")
}

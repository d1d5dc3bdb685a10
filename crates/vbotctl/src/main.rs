//! vbotctl - CLI client for vbotd
//!
//! Writes config files and sends slash commands to a running daemon.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod client;

use clap::{Parser, Subcommand};
use client::{Client, ClientError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vbot_core::{CommandPayload, Config};

/// How long `request` waits for the daemon to come up.
const READY_TIMEOUT_MS: u64 = 5000;

/// CLI client for the vbotd webhook daemon.
#[derive(Parser)]
#[command(name = "vbotctl")]
#[command(about = "Send slash commands to vbotd and manage its config")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a config file with default values
    Init {
        /// Config file to create
        file: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Send a command as the chat platform would, e.g. `request run all #master`
    Request {
        /// Command text
        #[arg(required = true, num_args = 1.., allow_hyphen_values = true)]
        text: Vec<String>,

        /// Daemon address
        #[arg(long, env = "VBOT_ADDR", default_value = "http://127.0.0.1:8085")]
        addr: String,

        /// Slash-command token
        #[arg(long, env = "VBOT_TOKEN")]
        token: Option<String>,

        /// User name reported to the daemon
        #[arg(long, default_value = "vbotctl")]
        user: String,

        /// Channel name reported to the daemon
        #[arg(long, default_value = "cli")]
        channel: String,

        /// Repeat the command every N seconds until interrupted
        #[arg(long)]
        watch: Option<u64>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("{0} already exists, not overwriting (use --force)")]
    Exists(PathBuf),
    #[error("failed to write {path}: {source}", path = .0.display(), source = .1)]
    Write(PathBuf, std::io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Init { file, force } => run_init(&file, force),
        Command::Request {
            text,
            addr,
            token,
            user,
            channel,
            watch,
        } => {
            let payload = build_payload(&text, token, user, channel);
            run_request(&Client::new(&addr), &payload, watch).await
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run_init(file: &Path, force: bool) -> Result<(), CliError> {
    if file.exists() && !force {
        return Err(CliError::Exists(file.to_path_buf()));
    }
    std::fs::write(file, Config::default().to_file_content())
        .map_err(|e| CliError::Write(file.to_path_buf(), e))?;
    println!("Wrote {}", file.display());
    Ok(())
}

fn build_payload(
    text: &[String],
    token: Option<String>,
    user: String,
    channel: String,
) -> CommandPayload {
    CommandPayload {
        token,
        command: Some("/vagrant".to_string()),
        user_name: Some(user),
        channel_name: Some(channel),
        ..CommandPayload::with_text(text.join(" "))
    }
}

async fn run_request(
    client: &Client,
    payload: &CommandPayload,
    watch: Option<u64>,
) -> Result<(), CliError> {
    client.wait_for_ready(READY_TIMEOUT_MS).await?;

    loop {
        let response = client.send_command(payload).await?;
        println!("{}", response.text.trim_end());

        let Some(interval) = watch else {
            return Ok(());
        };
        println!("---");
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn payload_joins_text() {
        let text = vec!["run".to_string(), "all".to_string(), "#dev".to_string()];
        let payload = build_payload(&text, Some("t".into()), "me".into(), "ops".into());
        assert_eq!(payload.text, "run all #dev");
        assert_eq!(payload.token.as_deref(), Some("t"));
        assert_eq!(payload.user_name.as_deref(), Some("me"));
        assert_eq!(payload.channel_name.as_deref(), Some("ops"));
    }

    #[test]
    fn init_writes_loadable_config_and_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vbot.conf");

        run_init(&path, false).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), Config::default());

        assert!(matches!(run_init(&path, false), Err(CliError::Exists(_))));
        run_init(&path, true).unwrap();
    }

    #[test]
    fn cli_parses_request() {
        let cli = Cli::try_parse_from(["vbotctl", "request", "log", "ubuntu-14.4"]).unwrap();
        match cli.command {
            Command::Request { text, watch, .. } => {
                assert_eq!(text, vec!["log", "ubuntu-14.4"]);
                assert!(watch.is_none());
            }
            Command::Init { .. } => panic!("expected request"),
        }
    }
}

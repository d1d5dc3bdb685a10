//! Machine registry and command entry point.
//!
//! The commander discovers machines once at startup, resolves command
//! arguments to machines, and hands commands to its router.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{info, warn};
use vbot_core::{Command, CommandPayload, Config, Response};

use crate::git::{self, GitError};
use crate::machine::Machine;
use crate::router::{CommandRouter, RouterError};

#[derive(Debug, Error)]
pub enum CommanderError {
    #[error("machine directory does not exist: {}", .0.display())]
    ScanRootMissing(PathBuf),
    #[error("failed to scan {}: {source}", path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Router(#[from] RouterError),
}

pub type Result<T> = std::result::Result<T, CommanderError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{} still running on `{current}`", running.join(", "))]
    Busy {
        current: String,
        running: Vec<String>,
    },
    #[error(transparent)]
    Git(#[from] GitError),
}

/// Settings the commander and its handlers need.
#[derive(Debug, Clone)]
pub struct CommanderConfig {
    /// Repository that machines test; synced before runs.
    pub repository_root: PathBuf,
    /// Directory holding one subdirectory per machine.
    pub machines_root: PathBuf,
    pub default_branch: String,
    pub git_sync: bool,
    pub show_skips: bool,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl CommanderConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            repository_root: config.repository_root(),
            machines_root: config.machines_root(),
            default_branch: config.default_branch.clone(),
            git_sync: config.git_sync,
            show_skips: config.show_skips,
        }
    }
}

/// Machines selected by command arguments.
#[derive(Debug, Default)]
pub struct Targets {
    pub machines: Vec<Arc<Machine>>,
    /// Requested names that matched no machine.
    pub unknown: Vec<String>,
}

impl Targets {
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

#[derive(Debug)]
pub struct Commander {
    config: CommanderConfig,
    router: CommandRouter,
    machines: Vec<Arc<Machine>>,
    /// Held while the repository is synced and machines are started.
    sync_lock: Mutex<()>,
}

impl Commander {
    /// Build a commander with the built-in routes and scan for machines.
    ///
    /// Fails if the machine directory does not exist.
    pub fn new(config: CommanderConfig) -> Result<Self> {
        let router = CommandRouter::with_defaults()?;
        let mut commander = Self::from_parts(config, router, Vec::new());
        commander.scan_machines()?;
        Ok(commander)
    }

    /// Assemble a commander without scanning.
    pub fn from_parts(
        config: CommanderConfig,
        router: CommandRouter,
        machines: Vec<Arc<Machine>>,
    ) -> Self {
        Self {
            config,
            router,
            machines,
            sync_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &CommanderConfig {
        &self.config
    }

    pub fn router(&self) -> &CommandRouter {
        &self.router
    }

    pub fn machines(&self) -> &[Arc<Machine>] {
        &self.machines
    }

    pub fn machine(&self, name: &str) -> Option<&Arc<Machine>> {
        self.machines
            .iter()
            .find(|m| m.name().eq_ignore_ascii_case(name))
    }

    /// Register machines found under the machine directory.
    ///
    /// Directories already registered are left alone; candidates that fail
    /// verification are skipped. Returns the number of machines added.
    pub fn scan_machines(&mut self) -> Result<usize> {
        let root = self.config.machines_root.clone();
        if !root.is_dir() {
            return Err(CommanderError::ScanRootMissing(root));
        }

        let scan_err = |source| CommanderError::Scan {
            path: root.clone(),
            source,
        };
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&root)
            .map_err(scan_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        candidates.sort();

        let mut added = 0;
        for path in candidates {
            if self.is_registered(&path) {
                continue;
            }
            match Machine::new(&path) {
                Ok(machine) => {
                    info!(machine = %machine.name(), path = %path.display(), "added machine");
                    self.machines.push(Arc::new(machine));
                    added += 1;
                }
                Err(e) => warn!(error = %e, "skipping directory"),
            }
        }
        Ok(added)
    }

    fn is_registered(&self, path: &Path) -> bool {
        self.machines.iter().any(|m| m.path() == path)
    }

    /// Resolve argument tokens to machines.
    ///
    /// Names match case-insensitively; `all` selects every machine. No
    /// arguments select nothing.
    pub fn resolve_targets<S: AsRef<str>>(&self, args: &[S]) -> Targets {
        let wanted: Vec<String> = args.iter().map(|a| a.as_ref().to_lowercase()).collect();
        if wanted.is_empty() {
            return Targets::default();
        }
        let all = wanted.iter().any(|w| w == "all");

        let machines = self
            .machines
            .iter()
            .filter(|m| all || wanted.contains(&m.name().to_lowercase()))
            .cloned()
            .collect();

        let unknown = wanted
            .iter()
            .filter(|w| *w != "all" && self.machine(w).is_none())
            .cloned()
            .collect();

        Targets { machines, unknown }
    }

    /// Bring the repository to `branch` if syncing is enabled.
    ///
    /// The returned guard serializes syncs; hold it until the machines for
    /// this branch are started. While any machine is running the checkout
    /// is left untouched: the same branch is accepted as is, another branch
    /// is refused.
    pub fn sync_branch(
        &self,
        branch: &str,
    ) -> std::result::Result<MutexGuard<'_, ()>, SyncError> {
        let guard = self
            .sync_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.config.git_sync {
            return Ok(guard);
        }

        let repo = &self.config.repository_root;
        let running = self.running();
        if running.is_empty() {
            git::checkout_pull_branch(repo, branch)?;
            return Ok(guard);
        }

        let current = git::current_branch(repo)?;
        if current != branch {
            return Err(SyncError::Busy { current, running });
        }
        info!(branch = %branch, machines = ?running, "machines running, skipping pull");
        Ok(guard)
    }

    /// Route raw command text to its handler.
    pub fn dispatch(&self, text: &str) -> Response {
        self.router.dispatch(self, &Command::new(text))
    }

    /// Handle a decoded slash-command payload.
    pub fn handle(&self, payload: &CommandPayload) -> Response {
        info!(
            user = payload.user_name.as_deref().unwrap_or("-"),
            channel = payload.channel_name.as_deref().unwrap_or("-"),
            text = %payload.text,
            "received command"
        );
        self.router.dispatch(self, &Command::from(payload))
    }

    /// Wait for every machine's watcher to publish its result.
    pub async fn stop_all(&self) {
        for machine in &self.machines {
            machine.stop().await;
        }
    }

    /// Names of machines with a run in progress.
    pub fn running(&self) -> Vec<String> {
        self.machines
            .iter()
            .filter(|m| m.is_running())
            .map(|m| m.name().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::make_machine_dir;
    use tempfile::TempDir;

    fn config_for(repo: &Path) -> CommanderConfig {
        CommanderConfig {
            repository_root: repo.to_path_buf(),
            machines_root: repo.join("maintenance/vagrant"),
            default_branch: "master".to_string(),
            git_sync: false,
            show_skips: false,
        }
    }

    fn setup_repo(names: &[&str]) -> TempDir {
        let repo = TempDir::new().unwrap();
        let root = repo.path().join("maintenance/vagrant");
        std::fs::create_dir_all(&root).unwrap();
        for name in names {
            make_machine_dir(&root, name, "exit 0");
        }
        repo
    }

    fn names(machines: &[Arc<Machine>]) -> Vec<&str> {
        machines.iter().map(|m| m.name()).collect()
    }

    #[test]
    fn missing_scan_root_is_fatal() {
        let repo = TempDir::new().unwrap();
        let err = Commander::new(config_for(repo.path())).unwrap_err();
        assert!(matches!(err, CommanderError::ScanRootMissing(_)));
    }

    #[test]
    fn scan_skips_invalid_directories_and_continues() {
        let repo = setup_repo(&["debian-8", "ubuntu-14.4"]);
        let root = repo.path().join("maintenance/vagrant");
        // Sorts between the two valid machines.
        std::fs::create_dir_all(root.join("empty-dir")).unwrap();
        std::fs::write(root.join("README"), "not a machine").unwrap();

        let commander = Commander::new(config_for(repo.path())).unwrap();
        assert_eq!(names(commander.machines()), vec!["debian-8", "ubuntu-14.4"]);
    }

    #[test]
    fn rescan_is_idempotent() {
        let repo = setup_repo(&["a", "b"]);
        let mut commander = Commander::new(config_for(repo.path())).unwrap();
        let first = Arc::clone(&commander.machines()[0]);

        assert_eq!(commander.scan_machines().unwrap(), 0);
        assert_eq!(commander.machines().len(), 2);
        assert!(Arc::ptr_eq(&first, &commander.machines()[0]));

        make_machine_dir(&repo.path().join("maintenance/vagrant"), "c", "exit 0");
        assert_eq!(commander.scan_machines().unwrap(), 1);
        assert_eq!(names(commander.machines()), vec!["a", "b", "c"]);
    }

    #[test]
    fn resolve_all_selects_every_machine() {
        let repo = setup_repo(&["debian-8", "ubuntu-14.4"]);
        let commander = Commander::new(config_for(repo.path())).unwrap();

        let targets = commander.resolve_targets(&["all"]);
        assert_eq!(names(&targets.machines), vec!["debian-8", "ubuntu-14.4"]);
        assert!(targets.unknown.is_empty());
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let repo = setup_repo(&["debian-8", "ubuntu-14.4"]);
        let commander = Commander::new(config_for(repo.path())).unwrap();

        let targets = commander.resolve_targets(&["Ubuntu-14.4"]);
        assert_eq!(names(&targets.machines), vec!["ubuntu-14.4"]);
    }

    #[test]
    fn resolve_without_args_is_empty() {
        let repo = setup_repo(&["debian-8"]);
        let commander = Commander::new(config_for(repo.path())).unwrap();

        let targets = commander.resolve_targets::<&str>(&[]);
        assert!(targets.is_empty());
        assert!(targets.unknown.is_empty());
    }

    #[test]
    fn resolve_reports_unknown_names() {
        let repo = setup_repo(&["debian-8"]);
        let commander = Commander::new(config_for(repo.path())).unwrap();

        let targets = commander.resolve_targets(&["debian-8", "Windows"]);
        assert_eq!(names(&targets.machines), vec!["debian-8"]);
        assert_eq!(targets.unknown, vec!["windows"]);
    }

    #[test]
    fn sync_is_skipped_when_disabled() {
        let repo = setup_repo(&[]);
        let commander = Commander::new(config_for(repo.path())).unwrap();
        // Not a git repository; would fail if git were invoked.
        assert!(commander.sync_branch("master").is_ok());
    }
}

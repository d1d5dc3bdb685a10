//! Test machine supervision.
//!
//! A machine is a directory under `maintenance/vagrant` holding an
//! `outside.sh` runner (which boots the VM and runs the suite through
//! `inside.sh`). Each machine owns at most one run process at a time; a
//! watcher task waits for it, captures its output and publishes `Finished`.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vbot_core::report::{self, Report, NO_LOG_AVAILABLE};

/// Script run inside the VM.
pub const INSIDE_SCRIPT: &str = "inside.sh";
/// Script launched by `run`; receives the branch as its only argument.
pub const OUTSIDE_SCRIPT: &str = "outside.sh";

/// Maximum bytes kept from each of stdout and stderr.
const MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum MachineError {
    #[error("not a machine directory: {} (missing {missing})", path.display())]
    NotAMachineDirectory { path: PathBuf, missing: &'static str },
    #[error("machine {0} is already running")]
    AlreadyRunning(String),
    #[error("failed to start {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MachineError>;

/// Lifecycle of a machine's run process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    NotStarted,
    Running,
    Finished,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Finished => "finished",
        }
    }
}

/// Point-in-time view of a machine's run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    pub state: RunState,
    pub branch: Option<String>,
    /// Exit code of the last finished run; `None` if killed by a signal.
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct RunRecord {
    snapshot: RunSnapshot,
    stdout: String,
    stderr: String,
}

#[derive(Debug)]
pub struct Machine {
    name: String,
    path: PathBuf,
    record: Arc<Mutex<RunRecord>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Machine {
    /// Check that `path` is a machine directory.
    ///
    /// Both runner scripts must be present.
    pub fn verify(path: &Path) -> Result<()> {
        for script in [INSIDE_SCRIPT, OUTSIDE_SCRIPT] {
            if !path.join(script).is_file() {
                return Err(MachineError::NotAMachineDirectory {
                    path: path.to_path_buf(),
                    missing: script,
                });
            }
        }
        Ok(())
    }

    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Self::verify(&path)?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        Ok(Self {
            name,
            path,
            record: Arc::new(Mutex::new(RunRecord::default())),
            watcher: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start `outside.sh <branch>` in the machine directory.
    ///
    /// Returns as soon as the process is spawned. Output is captured by a
    /// watcher task when the process exits.
    pub fn run(&self, branch: &str) -> Result<()> {
        let mut record = lock(&self.record);
        if record.snapshot.state == RunState::Running {
            return Err(MachineError::AlreadyRunning(self.name.clone()));
        }

        let spawn_err = |source| MachineError::Spawn {
            name: self.name.clone(),
            source,
        };
        let runtime = Handle::try_current().map_err(|e| spawn_err(std::io::Error::other(e)))?;
        let _guard = runtime.enter();

        let child = Command::new(self.path.join(OUTSIDE_SCRIPT))
            .arg(branch)
            .current_dir(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        info!(
            machine = %self.name,
            branch = %branch,
            pid = child.id(),
            "started run"
        );

        record.stdout.clear();
        record.stderr.clear();
        record.snapshot = RunSnapshot {
            state: RunState::Running,
            branch: Some(branch.to_string()),
            exit_code: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        };

        let handle = runtime.spawn(watch(
            self.name.clone(),
            Arc::clone(&self.record),
            child,
        ));
        *lock(&self.watcher) = Some(handle);

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    pub fn state(&self) -> RunState {
        lock(&self.record).snapshot.state
    }

    pub fn snapshot(&self) -> RunSnapshot {
        lock(&self.record).snapshot.clone()
    }

    pub fn status_label(&self) -> &'static str {
        if self.is_running() {
            "running"
        } else {
            "stopped"
        }
    }

    /// Captured stdout of the last finished run.
    pub fn stdout(&self) -> String {
        lock(&self.record).stdout.clone()
    }

    /// Captured stderr of the last finished run.
    pub fn stderr(&self) -> String {
        lock(&self.record).stderr.clone()
    }

    /// Wait for the current watcher, if any, to publish its result.
    ///
    /// Does not terminate the run process.
    pub async fn stop(&self) {
        let handle = lock(&self.watcher).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(machine = %self.name, error = %e, "run watcher failed");
            }
        }
    }

    /// Test output files in the machine directory, sorted by name.
    pub fn output_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&self.path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && report::is_output_file(path))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Render all test reports as a chat code block.
    pub fn render_log(&self, include_skips: bool) -> String {
        let files = match self.output_files() {
            Ok(files) => files,
            Err(e) => {
                warn!(machine = %self.name, error = %e, "failed to list output files");
                return format!("*Could not read logs: {e}*");
            }
        };
        if files.is_empty() {
            return NO_LOG_AVAILABLE.to_string();
        }

        let mut out = String::from("```\n");
        for file in &files {
            match Report::parse(file, include_skips) {
                Ok(report) => out.push_str(&report.render()),
                Err(e) => {
                    debug!(machine = %self.name, error = %e, "unparseable output file");
                    out.push_str(&format!("error: {e}\n"));
                }
            }
        }
        out.push_str("```");
        out
    }
}

/// Wait for the run process and publish its output.
async fn watch(name: String, record: Arc<Mutex<RunRecord>>, mut child: Child) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (stdout, stderr, status) = tokio::join!(
        read_pipe(stdout),
        read_pipe(stderr),
        child.wait()
    );

    let mut record = lock(&record);
    record.stdout = stdout;
    record.stderr = stderr;
    match status {
        Ok(status) => {
            record.snapshot.exit_code = status.code();
            info!(machine = %name, exit_code = ?status.code(), "run finished");
        }
        Err(e) => {
            warn!(machine = %name, error = %e, "failed to wait for run process");
            record.stderr.push_str(&format!("\nfailed to wait for run process: {e}\n"));
        }
    }
    record.snapshot.finished_at = Some(Utc::now());
    record.snapshot.state = RunState::Finished;
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let Some(pipe) = pipe else {
        return String::new();
    };
    match read_bounded(pipe, MAX_OUTPUT_BYTES).await {
        Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
        Err(e) => format!("failed to read output: {e}"),
    }
}

/// Read to EOF, keeping at most `max_bytes`. The rest is drained.
async fn read_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }

        let remaining = max_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            warn!(max_bytes, "output exceeded limit, truncating");
            while reader.read(&mut chunk).await? > 0 {}
            break;
        }

        let to_take = n.min(remaining);
        buf.extend_from_slice(&chunk[..to_take]);
    }

    Ok(buf)
}

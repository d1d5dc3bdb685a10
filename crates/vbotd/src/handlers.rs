//! Chat command handlers.
//!
//! Each handler renders into the response using the chat markup: backticked
//! names, fenced blocks for logs and process output.

use regex::Regex;
use std::sync::LazyLock;
use tracing::warn;
use vbot_core::{Command, Response};

use crate::commander::{Commander, Targets};
use crate::machine::MachineError;

pub const NO_MACHINES_GIVEN: &str = "No machines given!";
pub const NO_MACHINES_FOUND: &str = "Could not get machines!";

static BRANCH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#([A-Za-z0-9_][A-Za-z0-9_./-]*)$").expect("valid regex")
});

/// Branch selected by a `#<branch>` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchArg {
    /// No usable tag; the configured default branch applies.
    Default,
    Named(String),
    /// A single tag that is not an acceptable branch name.
    Invalid(String),
}

/// Show this help.
pub fn show_help(commander: &Commander, _command: &Command, resp: &mut Response) {
    resp.push_line("Vagrant Bot commands:");
    for route in commander.router().routes() {
        resp.push_line(format!("* `{}` {}", route.name(), route.description()));
    }
}

/// List machines with their status.
pub fn show_machines(commander: &Commander, _command: &Command, resp: &mut Response) {
    if commander.machines().is_empty() {
        resp.push_line(NO_MACHINES_FOUND);
        return;
    }
    resp.push_line("Available Machines:");
    for machine in commander.machines() {
        resp.push_line(format!(
            "* `{}` {}",
            machine.name(),
            machine.status_label()
        ));
    }
}

/// Start the selected machines on the requested branch.
pub fn run_machines(commander: &Commander, command: &Command, resp: &mut Response) {
    let (branch, args) = split_branch(command.args());
    let branch = match branch {
        BranchArg::Named(branch) => branch,
        BranchArg::Default => commander.config().default_branch.clone(),
        BranchArg::Invalid(token) => {
            resp.push_line(format!("Invalid branch `{token}`, nothing started"));
            return;
        }
    };

    let targets = commander.resolve_targets(args.as_slice());
    if targets.is_empty() {
        no_machines(&targets, resp);
        return;
    }

    resp.push_line(format!(":running_man: Running tests on branch `{branch}`"));
    let _synced = match commander.sync_branch(&branch) {
        Ok(guard) => guard,
        Err(e) => {
            warn!(branch = %branch, error = %e, "repository sync failed");
            resp.push_line(format!("Could not update repository to `{branch}`: {e}"));
            return;
        }
    };

    for machine in &targets.machines {
        match machine.run(&branch) {
            Ok(()) => resp.push_line(format!("* `{}` started!", machine.name())),
            Err(MachineError::AlreadyRunning(name)) => {
                resp.push_line(format!("* `{name}` is already running"));
            }
            Err(e) => {
                warn!(machine = %machine.name(), error = %e, "failed to start machine");
                resp.push_line(format!("* `{}` failed to start: {e}", machine.name()));
            }
        }
    }
    unknown_machines(&targets, resp);
}

/// Show the captured stdout and stderr of the selected machines.
pub fn inspect_machines(commander: &Commander, command: &Command, resp: &mut Response) {
    let targets = commander.resolve_targets(command.args());
    if targets.is_empty() {
        no_machines(&targets, resp);
        return;
    }

    for machine in &targets.machines {
        let snapshot = machine.snapshot();
        match snapshot.exit_code {
            Some(code) => resp.push_line(format!(
                "Inspection of `{}` ({}, exit code {code})",
                machine.name(),
                snapshot.state.as_str()
            )),
            None => resp.push_line(format!(
                "Inspection of `{}` ({})",
                machine.name(),
                snapshot.state.as_str()
            )),
        }
        resp.push_line(format!("*STDOUT*\n```\n{}\n```", machine.stdout()));
        resp.push_line(format!("*STDERR*\n```\n{}\n```", machine.stderr()));
    }
    unknown_machines(&targets, resp);
}

/// Show parsed test logs of the selected machines.
pub fn show_log(commander: &Commander, command: &Command, resp: &mut Response) {
    let targets = commander.resolve_targets(command.args());
    if targets.is_empty() {
        no_machines(&targets, resp);
        return;
    }

    let show_skips = commander.config().show_skips;
    for machine in &targets.machines {
        resp.push_line(format!("## Machine `{}`:", machine.name()));
        resp.push_line(machine.render_log(show_skips));
    }
    unknown_machines(&targets, resp);
}

/// Separate a `#<branch>` token from machine arguments.
///
/// The branch is only taken when exactly one such token is present; every
/// `#` token is removed from the arguments either way. Names starting with
/// `-` or containing `..` are invalid.
pub fn split_branch(args: &[String]) -> (BranchArg, Vec<&str>) {
    let (tagged, rest): (Vec<&str>, Vec<&str>) = args
        .iter()
        .map(String::as_str)
        .partition(|a| a.starts_with('#'));

    let branch = match tagged.as_slice() {
        [single] => match BRANCH_TOKEN.captures(single) {
            Some(c) if !c[1].contains("..") => BranchArg::Named(c[1].to_string()),
            _ => BranchArg::Invalid((*single).to_string()),
        },
        _ => BranchArg::Default,
    };
    (branch, rest)
}

fn no_machines(targets: &Targets, resp: &mut Response) {
    resp.push_line(NO_MACHINES_GIVEN);
    unknown_machines(targets, resp);
}

fn unknown_machines(targets: &Targets, resp: &mut Response) {
    for name in &targets.unknown {
        resp.push_line(format!("* `{name}` unknown machine"));
    }
}

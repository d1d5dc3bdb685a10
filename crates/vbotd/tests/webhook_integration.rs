//! Integration tests for the slash-command webhook.
//!
//! Drives a repository with real machine directories through the HTTP router:
//! discovery, runs, inspection and log reports.

#![cfg(unix)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::Value;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;
use vbotd::commander::{Commander, CommanderConfig};
use vbotd::server::{create_router, AppState};

/// Writes a coverage report named after the branch, like a real test run.
const PASSING_RUN: &str = r#"echo "testing $1"
printf 'test_a ... ok\n----------\nTOTAL   1200   96   92%%\n----------\nOK (12 tests)\n' > "test-$1.py3.out""#;

const FAILING_RUN: &str = r#"echo "testing $1"
echo "boom" >&2
printf 'ERROR: test_io (tests.Io)\nFAIL: test_math (tests.Math)\nFAILED (errors=1, failures=1)\n' > "test-$1.py2.out"
exit 3"#;

fn make_machine(root: &Path, name: &str, outside: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("inside.sh"), "#!/bin/sh\nexit 0\n").unwrap();
    let script = dir.join("outside.sh");
    std::fs::write(&script, format!("#!/bin/sh\n{outside}\n")).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn create_test_app() -> (axum::Router, Arc<Commander>, TempDir) {
    let repo = TempDir::new().unwrap();
    let root = repo.path().join("maintenance/vagrant");
    make_machine(&root, "debian-8", PASSING_RUN);
    make_machine(&root, "ubuntu-14.4", FAILING_RUN);
    // Missing inside.sh; must not be registered.
    std::fs::create_dir_all(root.join("broken")).unwrap();

    let config = CommanderConfig {
        repository_root: repo.path().to_path_buf(),
        machines_root: root,
        default_branch: "master".to_string(),
        git_sync: false,
        show_skips: false,
    };
    let commander = Arc::new(Commander::new(config).unwrap());
    let router = create_router(Arc::new(AppState {
        commander: Arc::clone(&commander),
        token: None,
        max_payload_bytes: 512,
    }));
    (router, commander, repo)
}

async fn send(app: &axum::Router, text: &str) -> Value {
    let body = format!("text={}&user_name=tester", text.replace(' ', "+").replace('#', "%23"));
    let response: Response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["response_type"], "in_channel");
    json
}

fn text(json: &Value) -> &str {
    json["text"].as_str().unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn discovery_lists_valid_machines_only() {
    let (app, _, _repo) = create_test_app();

    let json = send(&app, "list").await;
    assert_eq!(
        text(&json),
        "Available Machines:\n* `debian-8` stopped\n* `ubuntu-14.4` stopped\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn run_then_log_reports_results() {
    let (app, commander, _repo) = create_test_app();

    let json = send(&app, "log all").await;
    assert_eq!(
        text(&json),
        "## Machine `debian-8`:\n*No log available*\n\
         ## Machine `ubuntu-14.4`:\n*No log available*\n"
    );

    let json = send(&app, "run all #release").await;
    assert_eq!(
        text(&json),
        ":running_man: Running tests on branch `release`\n\
         * `debian-8` started!\n\
         * `ubuntu-14.4` started!\n"
    );

    tokio::time::timeout(Duration::from_secs(10), commander.stop_all())
        .await
        .unwrap();

    let json = send(&app, "log debian-8").await;
    assert_eq!(
        text(&json),
        "## Machine `debian-8`:\n\
         ```\npython: 3\nbranch: release\ncoverage: 1200   96   92%\ntests: OK (12 tests)\n```\n"
    );

    let json = send(&app, "status ubuntu-14.4").await;
    assert_eq!(
        text(&json),
        "## Machine `ubuntu-14.4`:\n\
         ```\npython: 2\nbranch: release\ntests: FAILED (errors=1, failures=1)\n   \
         ERROR: test_io (tests.Io)\n   FAIL: test_math (tests.Math)\n```\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn inspect_reports_exit_code_and_streams() {
    let (app, commander, _repo) = create_test_app();

    send(&app, "start ubuntu-14.4").await;
    tokio::time::timeout(Duration::from_secs(10), commander.stop_all())
        .await
        .unwrap();

    let json = send(&app, "inspect ubuntu-14.4 windows").await;
    assert_eq!(
        text(&json),
        "Inspection of `ubuntu-14.4` (finished, exit code 3)\n\
         *STDOUT*\n```\ntesting master\n\n```\n\
         *STDERR*\n```\nboom\n\n```\n\
         * `windows` unknown machine\n"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn help_and_unknown_commands() {
    let (app, _, _repo) = create_test_app();

    let json = send(&app, "help").await;
    assert!(text(&json).starts_with("Vagrant Bot commands:\n* `help` Show this help\n"));

    let json = send(&app, "reboot everything").await;
    assert_eq!(text(&json), "Unknown command _reboot everything_");
}

#[tokio::test(flavor = "multi_thread")]
async fn option_like_branch_is_refused() {
    let (app, commander, _repo) = create_test_app();

    let json = send(&app, "run all #-f").await;
    assert_eq!(text(&json), "Invalid branch `#-f`, nothing started\n");
    assert!(commander.running().is_empty());
}

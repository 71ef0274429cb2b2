// `storefront-e2e run` failure paths that must leave the datastore untouched

mod test_server;

use serde_json::json;
use std::path::{Path, PathBuf};
use test_server::MockPostgrest;
use tokio::process::Command;

fn write_flow(dir: &Path, name: &str, platform: &str) -> PathBuf {
    let path = dir.join(format!("{}.json", name));
    let flow = json!({
        "name": name,
        "platform": platform,
        "steps": [
            {"name": "Open home", "action": {"type": "navigate", "url": "https://shop.test/"}}
        ]
    });
    std::fs::write(&path, flow.to_string()).unwrap();
    path
}

/// A port nothing listens on
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn run_cli(args: &[String]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_storefront-e2e"))
        .args(args)
        .env_remove("SUPABASE_URL")
        .env_remove("SUPABASE_ANON_KEY")
        .output()
        .await
        .expect("failed to start storefront-e2e")
}

#[tokio::test]
async fn test_browser_failure_records_no_run() {
    let mock = MockPostgrest::start().await;
    let dir = tempfile::tempdir().unwrap();
    let flow = write_flow(dir.path(), "checkout", "desktop");

    let output = run_cli(&[
        "run".to_string(),
        flow.display().to_string(),
        "--debug-port".to_string(),
        closed_port().to_string(),
        "--record".to_string(),
        "--supabase-url".to_string(),
        mock.url(),
        "--supabase-key".to_string(),
        "anon-key".to_string(),
        "--artifacts".to_string(),
        dir.path().join("artifacts").display().to_string(),
    ])
    .await;

    assert!(!output.status.success());
    assert_eq!(mock.request_count("POST test_runs"), 0);
    assert!(mock.rows("test_runs").is_empty());
}

#[tokio::test]
async fn test_mixed_platforms_are_rejected() {
    let mock = MockPostgrest::start().await;
    let dir = tempfile::tempdir().unwrap();
    let desktop = write_flow(dir.path(), "checkout", "desktop");
    let mobile = write_flow(dir.path(), "coupons", "mobile");

    let output = run_cli(&[
        "run".to_string(),
        desktop.display().to_string(),
        mobile.display().to_string(),
        "--debug-port".to_string(),
        closed_port().to_string(),
        "--record".to_string(),
        "--supabase-url".to_string(),
        mock.url(),
        "--supabase-key".to_string(),
        "anon-key".to_string(),
    ])
    .await;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("different platforms"), "{}", stderr);
    assert!(mock.requests().is_empty());
}

//! Standalone daemon tests.
//!
//! Assembles the daemon from TOML and checks the signals it publishes.

use std::time::Duration;

use pulsed::{Daemon, PulseConfig};

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn standalone_node_publishes_both_signals() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().display();
    let toml_str = format!(
        r#"
[node]
id = "node-a"

[liveness]
provider = "persistence"
transport = {{ kind = "file", path = "{root}/signals/alive" }}

[readiness]
provider = "cluster"
transport = {{ kind = "file", path = "{root}/signals/ready" }}
include_liveness = true

[persistence]
path = "{root}/data/journal.redb"
timeout = "2s"
interval = "100ms"
"#
    );
    let config: PulseConfig = toml::from_str(&toml_str).unwrap();
    let daemon = Daemon::start(&config).unwrap();

    let alive = dir.path().join("signals/alive");
    let ready = dir.path().join("signals/ready");
    eventually("alive file", || alive.exists()).await;
    eventually("ready file", || ready.exists()).await;

    let ready_message = std::fs::read_to_string(&ready).unwrap();
    assert!(ready_message.contains("liveness: persistence round trip succeeded"));
    assert!(ready_message.contains("readiness: node node-a"));

    daemon.shutdown().await;
    assert!(!alive.exists());
    assert!(!ready.exists());
}

#[tokio::test]
async fn unknown_provider_is_served_as_down() {
    let config: PulseConfig = toml::from_str(
        r#"
[liveness]
provider = "default"

[readiness]
provider = "gossip"
"#,
    )
    .unwrap();
    let daemon = Daemon::start(&config).unwrap();

    let status = daemon.readiness.current(Duration::from_secs(1)).await.unwrap();
    assert!(!status.up);
    assert!(status.message.contains("gossip"));
    assert!(daemon.liveness.current(Duration::from_secs(1)).await.unwrap().up);

    daemon.shutdown().await;
}

#[tokio::test]
async fn invalid_duration_fails_startup() {
    let config: PulseConfig = toml::from_str("[transport]\ndeadline = \"whenever\"").unwrap();
    assert!(Daemon::start(&config).is_err());
}

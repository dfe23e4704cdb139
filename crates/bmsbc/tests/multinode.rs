//! End-to-end scenarios: spawned node processes observed via stdout.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

fn unique_socket_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/bmsbc-e2e-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spawn_node(dir: &Path, node_id: &str, peers: &[&str]) -> Child {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_bmsbc"));
    cmd.arg("--node-id")
        .arg(node_id)
        .arg("--socket-dir")
        .arg(dir)
        .arg("--log-level")
        .arg("error")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    for peer in peers {
        cmd.arg("--peer").arg(peer);
    }
    cmd.spawn().expect("node should start")
}

fn stop_and_collect(mut child: Child) -> String {
    let _ = child.kill();
    let output = child.wait_with_output().expect("node should be reapable");
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn two_peer_discovery_pubsub_and_ping() {
    let dir = unique_socket_dir("pair");
    let a = spawn_node(&dir, "1", &["2"]);
    let b = spawn_node(&dir, "2", &["1"]);

    // Discovery needs ~1 s; the app fires its ping and publication at
    // ~3 s. Give the pair comfortable headroom.
    std::thread::sleep(Duration::from_secs(8));

    let out_a = stop_and_collect(a);
    let out_b = stop_and_collect(b);

    assert!(
        out_a.contains("stack initialized"),
        "node 1 should report startup, got:\n{out_a}"
    );
    assert!(
        out_a.contains("NEIGHBOR_UP node=0000000000000002"),
        "node 1 should discover node 2, got:\n{out_a}"
    );
    assert!(
        out_b.contains("NEIGHBOR_UP node=0000000000000001"),
        "node 2 should discover node 1, got:\n{out_b}"
    );
    assert!(
        out_b.contains("PUBSUB_RX from=0000000000000001 topic=bm_sbc/test data=hello_from_multinode"),
        "node 2 should receive node 1's publication, got:\n{out_b}"
    );
    assert!(
        out_a.contains("🏓") && out_b.contains("🏓"),
        "both nodes should log a ping reply, got:\n{out_a}\n---\n{out_b}"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn stale_socket_artifact_is_recovered() {
    let dir = unique_socket_dir("stale");
    std::fs::write(dir.join("bm_sbc_0000000000000001.sock"), b"stale")
        .expect("stale file should be writable");

    let node = spawn_node(&dir, "1", &["2"]);
    std::thread::sleep(Duration::from_secs(2));
    let out = stop_and_collect(node);

    assert!(
        out.contains("stack initialized"),
        "node should bind over the stale artifact, got:\n{out}"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_node_id_exits_with_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_bmsbc"))
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .expect("command should run");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("--node-id"),
        "usage should mention the missing flag, got:\n{stderr}"
    );
}

#[test]
fn invalid_baud_exits_with_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_bmsbc"))
        .args(["--node-id", "1", "--uart", "/dev/ttyUSB0", "--baud", "1200"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .expect("command should run");
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn malformed_node_id_exits_with_usage() {
    let output = Command::new(env!("CARGO_BIN_EXE_bmsbc"))
        .args(["--node-id", "not-hex"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .expect("command should run");
    assert_eq!(output.status.code(), Some(1));
}

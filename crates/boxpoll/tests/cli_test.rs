//! Integration tests for the `boxpoll` binary.
//!
//! Every test points `--config` at a temp file so the user's real
//! configuration is never read.
#![allow(clippy::unwrap_used)]

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

fn boxpoll_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("boxpoll");
    cmd.env("HOME", "/tmp/boxpoll-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/boxpoll-cli-test-nonexistent")
        .env_remove("BOXPOLL_CONFIG")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_help() {
    let output = boxpoll_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "expected usage in:\n{stderr}");
}

#[test]
fn watch_help_lists_console_commands() {
    boxpoll_cmd()
        .args(["watch", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("fast <stream> [duration]")
                .and(predicate::str::contains("--select")),
        );
}

// ── check ───────────────────────────────────────────────────────────

#[test]
fn check_prints_effective_timings() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(
        dir.path(),
        r#"
[streams.devices]
path = "lan/browser/pub/"

[streams.home-nodes]
path = "home/tileset/all"
normal_period_secs = 60
"#,
    );

    boxpoll_cmd()
        .arg("--config")
        .arg(&cfg)
        .arg("check")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("devices  normal 30s  fast 2s for 2m  ttl 2m")
                .and(predicate::str::contains("home-nodes  normal 1m")),
        );
}

#[test]
fn check_rejects_out_of_range_timings() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(
        dir.path(),
        r#"
[streams.devices]
path = "lan/browser/pub/"
fast_window_secs = 200
"#,
    );

    boxpoll_cmd()
        .arg("--config")
        .arg(&cfg)
        .arg("check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("fast_window"));
}

#[test]
fn check_without_streams_explains_how_to_add_one() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "[router]\ntimeout_secs = 5\n");

    boxpoll_cmd()
        .arg("--config")
        .arg(&cfg)
        .arg("check")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("[streams.devices]"));
}

#[test]
fn watch_unknown_stream_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(dir.path(), "[streams.devices]\npath = \"lan/browser/pub/\"\n");

    boxpoll_cmd()
        .arg("--config")
        .arg(&cfg)
        .args(["watch", "--stream", "wifi"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("wifi"));
}

// ── watch ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn watch_prints_updates_and_quits_on_command() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v6/lan/browser/pub/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": [{ "primary_name": "laptop", "active": true }]
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let cfg = write_config(
        dir.path(),
        &format!(
            "[router]\nurl = \"{}/api/v6/\"\n\n[streams.devices]\npath = \"lan/browser/pub/\"\n",
            server.uri()
        ),
    );

    let (first, rest, success) = tokio::task::spawn_blocking(move || {
        let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_boxpoll"))
            .arg("--config")
            .arg(&cfg)
            .args(["watch", "--select", "0.primary_name"])
            .env_remove("RUST_LOG")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let mut stdout = BufReader::new(child.stdout.take().unwrap());
        let mut first = String::new();
        stdout.read_line(&mut first).unwrap();

        let mut stdin = child.stdin.take().unwrap();
        stdin.write_all(b"stats\nquit\n").unwrap();
        drop(stdin);

        let mut rest = String::new();
        stdout.read_to_string(&mut rest).unwrap();
        let status = child.wait().unwrap();
        (first, rest, status.success())
    })
    .await
    .unwrap();

    let update: Value = serde_json::from_str(&first).unwrap();
    assert_eq!(update["stream"], "devices");
    assert_eq!(update["cache_hit"], false);
    assert_eq!(update["value"], "laptop");

    let stats: Value = serde_json::from_str(rest.lines().next().unwrap()).unwrap();
    assert_eq!(stats["stats"][0]["id"], "devices");
    assert_eq!(stats["stats"][0]["fetches"], 1);
    assert!(success);
}

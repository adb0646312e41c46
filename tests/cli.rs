use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

/// Points config and state at `dir` so runs never touch the real user files.
fn forum_thread(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("forum-thread").unwrap();
    cmd.arg("--config")
        .arg(dir.join("config.yaml"))
        .arg("--state")
        .arg(dir.join("state.db"))
        .arg("--base-url")
        .arg("http://127.0.0.1:9")
        .env_remove("RUST_LOG");
    cmd
}

const TOPIC: &str = r#"{
  "forumId": "f-1",
  "title": "Boss tips",
  "gameTitle": "Celeste",
  "createdBy": "amy",
  "metadata": { "status": "archived", "viewCount": 4 },
  "posts": [
    { "_id": "3", "createdBy": "cat", "message": "@bob agreed", "timestamp": "2024-03-01T10:03:00Z" },
    { "_id": "1", "createdBy": "amy", "message": "Use the dash early", "timestamp": "2024-03-01T10:00:00Z" },
    { "_id": "2", "createdBy": "bob", "message": "@amy works for me", "timestamp": "2024-03-01T10:02:00Z", "replyTo": "1" },
    { "_id": "4", "createdBy": "dan", "message": "   ", "timestamp": "2024-03-01T10:04:00Z" }
  ]
}"#;

#[test]
fn prints_version() {
    let dir = tempdir().unwrap();
    forum_thread(dir.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "forum-thread {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn render_prints_thread_in_reply_order() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("topic.json");
    fs::write(&file, TOPIC).unwrap();

    let output = forum_thread(dir.path())
        .arg("render")
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();

    assert!(stdout.starts_with("Boss tips\n"));
    assert!(stdout.contains("This forum is archived."));
    let first = stdout.find("[1] amy").unwrap();
    let second = stdout.find("[2] bob").unwrap();
    let third = stdout.find("[3] cat").unwrap();
    assert!(first < second && second < third);
    assert!(stdout.contains("↳ Replying to amy: Use the dash early"));
    assert!(!stdout.contains("[4]"));
}

#[test]
fn render_json_reports_depth_and_parent() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("topic.json");
    fs::write(&file, TOPIC).unwrap();

    let output = forum_thread(dir.path())
        .args(["render", "--json"])
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());
    let entries: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows: Vec<(String, u64, Option<String>)> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| {
            (
                entry["id"].as_str().unwrap().to_string(),
                entry["depth"].as_u64().unwrap(),
                entry["parentId"].as_str().map(str::to_string),
            )
        })
        .collect();
    assert_eq!(
        rows,
        vec![
            ("1".to_string(), 0, None),
            ("2".to_string(), 1, Some("1".to_string())),
            ("3".to_string(), 0, Some("2".to_string())),
        ]
    );
}

#[test]
fn render_accepts_bare_post_array() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("posts.json");
    fs::write(
        &file,
        r#"[{ "_id": 1, "username": "amy", "message": "hello", "timestamp": 100 }]"#,
    )
    .unwrap();
    forum_thread(dir.path())
        .arg("render")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("[1] amy"));
}

#[test]
fn render_reports_missing_file() {
    let dir = tempdir().unwrap();
    forum_thread(dir.path())
        .arg("render")
        .arg(dir.path().join("nope.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn headers_for_production_api_route() {
    let dir = tempdir().unwrap();
    forum_thread(dir.path())
        .args([
            "headers",
            "--production",
            "--path",
            "/api/getForumTopic",
            "--origin",
            "https://assistant.videogamewingman.com/",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "strict-transport-security: max-age=31536000; includeSubDomains; preload",
        ))
        .stdout(predicate::str::contains(
            "access-control-allow-origin: https://assistant.videogamewingman.com/",
        ))
        .stdout(predicate::str::contains("x-frame-options: DENY"));
}

#[test]
fn headers_skip_cors_outside_api() {
    let dir = tempdir().unwrap();
    forum_thread(dir.path())
        .args(["headers", "--path", "/forum/f-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("content-security-policy: default-src 'self'"))
        .stdout(predicate::str::contains("access-control").not())
        .stdout(predicate::str::contains("strict-transport-security").not());
}

#[test]
fn login_is_remembered_until_logout() {
    let dir = tempdir().unwrap();
    forum_thread(dir.path())
        .args(["login", "amy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Signed in as amy."));
    forum_thread(dir.path())
        .arg("whoami")
        .assert()
        .success()
        .stdout("amy\n");
    assert!(fs::read_to_string(dir.path().join("config.yaml"))
        .unwrap()
        .contains("username: amy"));

    forum_thread(dir.path()).arg("logout").assert().success();
    forum_thread(dir.path())
        .arg("whoami")
        .assert()
        .success()
        .stdout("not signed in\n");
}

#[test]
fn offline_show_without_snapshot_fails() {
    let dir = tempdir().unwrap();
    forum_thread(dir.path())
        .args(["show", "f-1", "--offline"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no saved snapshot for forum f-1"));
}

#[test]
fn offline_show_lists_saved_snapshots() {
    let dir = tempdir().unwrap();
    {
        let store = forum_thread::storage::Store::open(forum_thread::storage::Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        store
            .save_snapshot(&forum_thread::forum::Forum {
                forum_id: "f-2".into(),
                title: "Speedrun routes".into(),
                ..Default::default()
            })
            .unwrap();
    }

    forum_thread(dir.path())
        .args(["show", "f-1", "--offline"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "no saved snapshot for forum f-1 (saved: f-2)",
        ));
    forum_thread(dir.path())
        .args(["show", "f-2", "--offline"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Speedrun routes"))
        .stderr(predicate::str::contains("offline copy fetched"));
}

use assert_cmd::Command;
use predicates::prelude::*;

use angler::model::maillog::MailLogEntry;

use crate::common::{recipient, sample_campaign};

fn angler(dir: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("angler").unwrap();
    cmd.arg("--env").arg(dir.join(".env"));
    cmd
}

fn write_campaign_yaml(dir: &std::path::Path) -> std::path::PathBuf {
    let campaign = sample_campaign(vec![recipient("bob@example.org", "Bob")]);
    let path = dir.join("campaign.yml");
    std::fs::write(&path, serde_yaml::to_string(&campaign).unwrap()).unwrap();
    path
}

#[test]
fn install_create_and_queue_flow() {
    let temp = tempfile::tempdir().unwrap();

    angler(temp.path())
        .arg("install")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("installed"));
    assert!(temp.path().join(".env").exists());

    let campaign_path = write_campaign_yaml(temp.path());
    angler(temp.path())
        .args(["create", campaign_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("created campaign 1"));

    let output = angler(temp.path())
        .args(["--json", "queue"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let entries: Vec<MailLogEntry> = serde_json::from_slice(&output).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].campaign_id, 1);
    assert!(!entries[0].processing);

    angler(temp.path())
        .args(["status", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("bob@example.org Scheduled"));

    angler(temp.path())
        .arg("unlock")
        .assert()
        .success()
        .stdout(predicate::str::contains("unlocked 0 entries"));
}

#[test]
fn default_command_lists_the_queue() {
    let temp = tempfile::tempdir().unwrap();
    angler(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("queue is empty"));
}

#[test]
fn cookie_commands_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(
        temp.path().join(".env"),
        "logging=off\nbakery_key=0123456789abcdef0123456789abcdef\n",
    )
    .unwrap();

    let cookie = angler(temp.path())
        .args([
            "cookie",
            "sso",
            "alice",
            "alice@example.org",
            "administrator",
            "--id",
            "7",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let cookie = String::from_utf8(cookie).unwrap().trim().to_string();

    angler(temp.path())
        .args(["cookie", "decode", &cookie])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "sso cookie: user=alice email=alice@example.org role=administrator id=7",
        ));
}

#[test]
fn cookie_decode_without_key_fails() {
    let temp = tempfile::tempdir().unwrap();
    angler(temp.path())
        .args(["cookie", "decode", "not-a-cookie"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bakery_key"));
}

#[test]
fn daemon_bin_runs_a_single_cycle() {
    let temp = tempfile::tempdir().unwrap();
    let env_path = temp.path().join(".env");
    std::fs::write(&env_path, "logging=minimal\ndisable_mailer=true\n").unwrap();

    Command::cargo_bin("angler-daemon")
        .unwrap()
        .args(["--env", env_path.to_str().unwrap(), "--once"])
        .assert()
        .success();

    let log = std::fs::read_to_string(temp.path().join("logs/angler.log")).unwrap();
    assert!(log.contains("daemon.launch"));
    assert!(log.contains("daemon.exit"));
}

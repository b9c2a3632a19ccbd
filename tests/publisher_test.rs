//! Tests for the git-backed publisher against throwaway repositories.

use std::path::Path;
use std::process::Command;

use autoheal::config::PublishConfig;
use autoheal::publisher::{GitPublisher, PublishError, PublishOutcome, PublishScope, Publisher};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .env_remove("GIT_INDEX_FILE")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_owned()
}

fn init_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    git(dir.path(), &["init", "-q"]);
    dir
}

fn commit_count(dir: &Path) -> usize {
    git(dir, &["rev-list", "--count", "HEAD"])
        .parse()
        .expect("count")
}

fn local_config() -> PublishConfig {
    PublishConfig {
        push: false,
        ..PublishConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn commits_all_changes_with_bot_identity() {
    let repo = init_repo();
    std::fs::write(repo.path().join("conf.yaml"), "heap=1024m\n").expect("write");
    let publisher = GitPublisher::new(repo.path(), &local_config());

    let outcome = publisher
        .publish("Auto-heal: applied fix", &PublishScope::AllChanges)
        .await
        .expect("publish");

    assert_eq!(outcome, PublishOutcome::Committed);
    assert_eq!(commit_count(repo.path()), 1);
    assert_eq!(
        git(repo.path(), &["log", "-1", "--format=%an <%ae>|%s"]),
        "auto-heal-bot <auto-heal@example.com>|Auto-heal: applied fix"
    );
}

#[tokio::test]
async fn clean_tree_is_nothing_to_commit() {
    let repo = init_repo();
    std::fs::write(repo.path().join("a.txt"), "a").expect("write");
    let publisher = GitPublisher::new(repo.path(), &local_config());
    publisher
        .publish("first", &PublishScope::AllChanges)
        .await
        .expect("first publish");

    let outcome = publisher
        .publish("second", &PublishScope::AllChanges)
        .await
        .expect("second publish");

    assert_eq!(outcome, PublishOutcome::NothingToCommit);
    assert_eq!(commit_count(repo.path()), 1);
}

#[tokio::test]
async fn path_scope_commits_only_listed_files() {
    let repo = init_repo();
    std::fs::create_dir_all(repo.path().join("healer")).expect("mkdir");
    std::fs::write(repo.path().join("healer").join("db.sqlite"), "db").expect("write db");
    std::fs::write(repo.path().join("scratch.txt"), "wip").expect("write scratch");
    let publisher = GitPublisher::new(repo.path(), &local_config());

    let scope = PublishScope::Paths(vec![repo.path().join("healer").join("db.sqlite")]);
    let outcome = publisher
        .publish("Add healer mapping id 1", &scope)
        .await
        .expect("publish");

    assert_eq!(outcome, PublishOutcome::Committed);
    assert_eq!(
        git(repo.path(), &["show", "--name-only", "--format=", "HEAD"]),
        "healer/db.sqlite"
    );
    assert!(git(repo.path(), &["status", "--porcelain"]).contains("scratch.txt"));
}

#[tokio::test]
async fn pushes_to_configured_remote() {
    let remote = tempfile::tempdir().expect("remote dir");
    git(remote.path(), &["init", "-q", "--bare"]);

    let repo = init_repo();
    std::fs::write(repo.path().join("seed.txt"), "seed").expect("write seed");
    git(repo.path(), &["add", "-A"]);
    git(
        repo.path(),
        &["-c", "user.name=t", "-c", "user.email=t@t", "commit", "-q", "-m", "seed"],
    );
    let branch = git(repo.path(), &["rev-parse", "--abbrev-ref", "HEAD"]);
    let remote_url = remote.path().to_string_lossy().into_owned();
    git(repo.path(), &["remote", "add", "origin", &remote_url]);

    let config = PublishConfig {
        push: true,
        remote: Some("origin".to_owned()),
        branch: Some(branch.clone()),
        ..PublishConfig::default()
    };
    std::fs::write(repo.path().join("conf.yaml"), "fixed").expect("write");
    let publisher = GitPublisher::new(repo.path(), &config);

    let outcome = publisher
        .publish("Auto-heal: applied fix", &PublishScope::AllChanges)
        .await
        .expect("publish");

    assert_eq!(outcome, PublishOutcome::Pushed);
    assert_eq!(
        git(remote.path(), &["log", "-1", "--format=%s", &branch]),
        "Auto-heal: applied fix"
    );
}

#[tokio::test]
async fn push_failure_is_a_git_error_but_commit_stays() {
    let repo = init_repo();
    std::fs::write(repo.path().join("conf.yaml"), "fixed").expect("write");
    let config = PublishConfig {
        push: true,
        remote: Some("nowhere".to_owned()),
        ..PublishConfig::default()
    };
    let publisher = GitPublisher::new(repo.path(), &config);

    let err = publisher
        .publish("Auto-heal: applied fix", &PublishScope::AllChanges)
        .await
        .expect_err("push must fail");

    assert!(matches!(err, PublishError::Git { ref command, .. } if command == "push"));
    assert_eq!(commit_count(repo.path()), 1);
}

#[tokio::test]
async fn with_push_false_overrides_config() {
    let repo = init_repo();
    std::fs::write(repo.path().join("conf.yaml"), "fixed").expect("write");
    let config = PublishConfig {
        push: true,
        remote: Some("nowhere".to_owned()),
        ..PublishConfig::default()
    };
    let publisher = GitPublisher::new(repo.path(), &config).with_push(false);

    let outcome = publisher
        .publish("msg", &PublishScope::AllChanges)
        .await
        .expect("publish");
    assert_eq!(outcome, PublishOutcome::Committed);
}

#[tokio::test]
async fn not_a_repository_is_a_git_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let publisher = GitPublisher::new(dir.path(), &local_config());

    let err = publisher
        .publish("msg", &PublishScope::AllChanges)
        .await
        .expect_err("must fail outside a repository");
    assert!(matches!(err, PublishError::Git { .. }));
}

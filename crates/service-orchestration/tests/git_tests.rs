//! Delivery workspace handling against a scripted git

use service_orchestration::config::GitSettings;
use service_orchestration::testing::ScriptedRunner;
use service_orchestration::{GitSyncManager, Reachability, WorkspaceMode};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::sync::Arc;
use tempfile::TempDir;

const REMOTE: &str = "git@github.com:acme/delivery.git";

fn manager(dir: &TempDir, runner: &Arc<ScriptedRunner>) -> GitSyncManager {
    let settings = GitSettings {
        ssh_command: Some("ssh -i /keys/deploy -o StrictHostKeyChecking=no".to_string()),
        ..GitSettings::default()
    };
    GitSyncManager::new(
        runner.clone(),
        settings,
        dir.path().join("delivery"),
        dir.path().join("delivery-local"),
    )
}

#[smol_potat::test]
async fn test_no_repository_uses_local_tree() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());

    let git = manager(&dir, &runner);
    let ws = git.ensure(None).await.unwrap();
    assert_eq!(ws.mode, WorkspaceMode::Local);
    assert_eq!(ws.path, dir.path().join("delivery-local"));
    assert!(ws.path.is_dir());
    assert!(ws.remote.is_none());
    assert_eq!(ws.warnings, vec!["No delivery repository configured".to_string()]);
    assert!(runner.calls().is_empty());

    drop(ws);
    let blank = git.ensure(Some("  ")).await.unwrap();
    assert_eq!(blank.mode, WorkspaceMode::Local);
}

#[smol_potat::test]
async fn test_failed_clone_initializes_repository() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail("git clone", "warning: You appear to have cloned an empty repository.\nfatal: could not read from remote");

    let git = manager(&dir, &runner);
    let ws = git
        .ensure(Some("https://github.com/acme/delivery"))
        .await
        .unwrap();
    assert_eq!(ws.mode, WorkspaceMode::Synced);
    assert_eq!(ws.remote.as_deref(), Some(REMOTE));
    assert_eq!(ws.warnings.len(), 1);
    assert!(ws.warnings[0].contains("fatal: could not read from remote"));

    assert_eq!(
        runner.calls(),
        vec![
            vec!["git".to_string(), "clone".into(), REMOTE.into(), dir.path().join("delivery").to_string_lossy().into_owned()],
            vec!["git".to_string(), "init".into()],
            vec!["git".to_string(), "remote".into(), "add".into(), "origin".into(), REMOTE.into()],
            vec!["git".to_string(), "checkout".into(), "-b".into(), "main".into()],
        ]
    );

    // Authentication and prompting are controlled for every invocation
    for command in runner.commands() {
        let envs = command.get_envs();
        assert_eq!(envs.get(&OsString::from("GIT_TERMINAL_PROMPT")), Some(&OsString::from("0")));
        assert!(envs.contains_key(&OsString::from("GIT_SSH_COMMAND")));
    }
}

#[smol_potat::test]
async fn test_failed_init_falls_back_to_local_tree() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail("git clone", "fatal: repository not found");
    runner.spawn_failure("git init", "git: command not found");

    let git = manager(&dir, &runner);
    let ws = git.ensure(Some(REMOTE)).await.unwrap();
    assert_eq!(ws.mode, WorkspaceMode::Local);
    assert_eq!(ws.path, dir.path().join("delivery-local"));
    assert_eq!(ws.warnings.len(), 2);
}

#[smol_potat::test]
async fn test_existing_checkout_tolerates_failed_pull() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("delivery/.git")).unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.fail("git pull", "ssh: connect to host github.com port 22: Connection timed out");

    let git = manager(&dir, &runner);
    let ws = git.ensure(Some(REMOTE)).await.unwrap();
    assert_eq!(ws.mode, WorkspaceMode::Synced);
    assert!(ws.warnings[0].starts_with("Pull failed, using existing workspace"));
    assert_eq!(runner.calls(), vec![vec!["git", "pull", "--rebase"]]);
    assert_eq!(
        runner.commands()[0].get_current_dir(),
        Some(dir.path().join("delivery").as_path())
    );
}

#[smol_potat::test]
async fn test_commit_only_when_tree_is_dirty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("delivery/.git")).unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let git = manager(&dir, &runner);
    let ws = git.ensure(Some(REMOTE)).await.unwrap();

    ws.commit_and_push("Add service demo").await.unwrap();
    assert!(runner.calls_matching("git -c").is_empty());
    assert_eq!(runner.calls_matching("git push -u origin main").len(), 1);

    runner.ok("git status --porcelain", "?? delivery/manifests/demo/\n");
    ws.commit_and_push("Add service demo").await.unwrap();
    assert_eq!(
        runner.calls_matching("git -c")[0],
        vec![
            "git",
            "-c",
            "user.name=Launchpad Bot",
            "-c",
            "user.email=bot@launchpad.local",
            "commit",
            "-m",
            "Add service demo"
        ]
    );

    runner.fail("git push", "error: failed to push some refs");
    assert!(ws.commit_and_push("Add service demo").await.is_err());
}

#[smol_potat::test]
async fn test_write_and_remove_files() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let git = manager(&dir, &runner);
    let ws = git.ensure(None).await.unwrap();

    let mut files = BTreeMap::new();
    files.insert("delivery/manifests/demo/service.yaml".to_string(), "kind: Service\n".to_string());
    files.insert("delivery/applications/demo.yaml".to_string(), "kind: Application\n".to_string());
    ws.write_files(&files).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(ws.manifests_dir("demo").join("service.yaml")).unwrap(),
        "kind: Service\n"
    );

    let removed = ws
        .remove_paths(&[
            ws.application_file("demo"),
            ws.manifests_dir("demo"),
            ws.manifests_dir("missing"),
        ])
        .await
        .unwrap();
    assert_eq!(removed.len(), 2);
    assert!(!ws.manifests_dir("demo").exists());
    assert!(!ws.application_file("demo").exists());
}

#[smol_potat::test]
async fn test_sessions_hold_the_workspace_until_dropped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("delivery/.git")).unwrap();
    let runner = Arc::new(ScriptedRunner::new().yielding());
    let git = Arc::new(manager(&dir, &runner));

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let git = git.clone();
            smol::spawn(async move {
                let session = git.ensure(Some(REMOTE)).await.unwrap();
                let mut files = BTreeMap::new();
                files.insert(
                    format!("delivery/manifests/svc-{i}/deployment.yaml"),
                    format!("replicas: {i}\n"),
                );
                session.write_files(&files).await.unwrap();
                session
                    .commit_and_push(&format!("Add service svc-{i}"))
                    .await
                    .unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await;
    }

    // Every pull is followed by its own add, status and push
    let git_calls: Vec<String> = runner
        .calls()
        .into_iter()
        .map(|argv| argv[1].clone())
        .collect();
    let one_run = ["pull", "add", "status", "push"];
    assert_eq!(git_calls.len(), 4 * one_run.len());
    for run in git_calls.chunks(one_run.len()) {
        assert_eq!(run, one_run);
    }

    let ws = git.ensure(Some(REMOTE)).await.unwrap();
    for i in 0..4 {
        let text = std::fs::read_to_string(ws.manifests_dir(&format!("svc-{i}")).join("deployment.yaml")).unwrap();
        assert_eq!(text, format!("replicas: {i}\n"));
    }
}

#[smol_potat::test]
async fn test_remote_status() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let git = manager(&dir, &runner);

    assert_eq!(git.remote_status(REMOTE).await, Reachability::Reachable);
    assert_eq!(
        runner.calls()[0],
        vec!["git", "ls-remote", "--heads", REMOTE]
    );

    runner.fail("git ls-remote", "fatal: Could not read from remote repository.");
    match git.remote_status("https://github.com/acme/delivery").await {
        Reachability::Unreachable(reason) => assert!(reason.contains("Could not read")),
        other => panic!("unexpected {other:?}"),
    }
}

//! Tests for local command execution

use command_executor::{Command, Error, Executor, LogSource, ProcessEventType, ProcessHandle};
use futures::StreamExt;
use std::time::{Duration, Instant};

#[test]
fn test_execute_collects_both_streams() {
    futures::executor::block_on(async {
        let executor = Executor::local("test-streams");
        let cmd = Command::builder("sh")
            .arg("-c")
            .arg("echo out-1; echo err-1 1>&2; echo out-2")
            .build();

        let result = executor.execute(cmd).await.unwrap();

        assert!(result.success());
        assert_eq!(result.stdout, "out-1\nout-2\n");
        assert_eq!(result.stderr, "err-1\n");
    });
}

#[test]
fn test_nonzero_exit_code_is_reported() {
    futures::executor::block_on(async {
        let executor = Executor::local("test-exit");
        let cmd = Command::builder("sh").arg("-c").arg("exit 7").build();

        let result = executor.execute(cmd).await.unwrap();

        assert_eq!(result.status.code, Some(7));
        assert!(!result.success());
    });
}

#[test]
fn test_env_overlay_and_working_directory() {
    futures::executor::block_on(async {
        let dir = tempfile::tempdir().unwrap();
        let executor = Executor::local("test-env");
        let cmd = Command::builder("sh")
            .arg("-c")
            .arg("echo $LAUNCHPAD_TEST_VALUE; pwd")
            .env("LAUNCHPAD_TEST_VALUE", "overlay")
            .current_dir(dir.path())
            .build();

        let result = executor.execute(cmd).await.unwrap();
        let lines: Vec<&str> = result.stdout.lines().collect();

        assert_eq!(lines[0], "overlay");
        let reported = std::fs::canonicalize(lines[1]).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    });
}

#[test]
fn test_missing_program_is_command_not_found() {
    futures::executor::block_on(async {
        let executor = Executor::local("test-missing");
        let cmd = Command::new("launchpad-definitely-not-installed");

        match executor.execute(cmd).await {
            Err(Error::CommandNotFound { command }) => {
                assert_eq!(command, "launchpad-definitely-not-installed")
            }
            other => panic!("expected CommandNotFound, got {other:?}"),
        }
    });
}

#[test]
fn test_event_stream_starts_with_started_and_tags_sources() {
    futures::executor::block_on(async {
        let executor = Executor::local("test-events");
        let cmd = Command::builder("sh")
            .arg("-c")
            .arg("echo hello; echo oops 1>&2")
            .build();

        let (events, mut handle) = executor.launch(cmd).await.unwrap();
        let events: Vec<_> = events.collect().await;
        let status = handle.wait().await.unwrap();

        assert!(status.success());
        assert!(matches!(events[0].event_type, ProcessEventType::Started { .. }));

        let stdout: Vec<_> = events
            .iter()
            .filter(|e| e.source() == Some(LogSource::Stdout))
            .filter_map(|e| e.data.clone())
            .collect();
        let stderr: Vec<_> = events
            .iter()
            .filter(|e| e.source() == Some(LogSource::Stderr))
            .filter_map(|e| e.data.clone())
            .collect();
        assert_eq!(stdout, vec!["hello".to_string()]);
        assert_eq!(stderr, vec!["oops".to_string()]);
    });
}

#[test]
fn test_large_stderr_does_not_block_stdout() {
    futures::executor::block_on(async {
        let executor = Executor::local("test-pipes");
        // Well past a pipe buffer on stderr before anything reaches stdout
        let cmd = Command::builder("sh")
            .arg("-c")
            .arg("i=0; while [ $i -lt 5000 ]; do echo line-$i 1>&2; i=$((i+1)); done; echo done")
            .build();

        let result = executor.execute(cmd).await.unwrap();

        assert!(result.success());
        assert_eq!(result.stderr.lines().count(), 5000);
        assert_eq!(result.stdout_trimmed(), "done");
    });
}

#[test]
#[cfg(unix)]
fn test_kill_stops_long_running_process() {
    futures::executor::block_on(async {
        let executor = Executor::local("test-kill");
        let cmd = Command::builder("sleep").arg("30").build();

        let started = Instant::now();
        let (_events, mut handle) = executor.launch(cmd).await.unwrap();
        assert!(handle.pid().is_some());

        handle.kill().await.unwrap();
        let status = handle.wait().await.unwrap();

        assert!(!status.success());
        assert!(status.terminated_by_signal());
        assert!(started.elapsed() < Duration::from_secs(10));
    });
}

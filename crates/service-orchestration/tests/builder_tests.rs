//! Image builder backends against scripted tools

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use service_orchestration::config::BuilderSettings;
use service_orchestration::testing::{RecordingSink, ScriptedRunner};
use service_orchestration::{
    BuildRequest, ClusterJobBuilder, Error, ImageBuilder, Kubectl, LocalDaemonBuilder,
    PipelineLog, ProcessExecutor,
};
use service_store::LogLevel;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const REGISTRY: &str = "registry.local:5000";

fn job_builder(runner: &Arc<ScriptedRunner>, root: &TempDir, registry: Option<&str>) -> ClusterJobBuilder {
    let settings = BuilderSettings {
        pod_discovery_attempts: 2,
        pod_running_attempts: 2,
        ..BuilderSettings::default()
    };
    ClusterJobBuilder::new(
        Kubectl::new(runner.clone(), "kubectl", "argocd"),
        Arc::new(ProcessExecutor::new(runner.clone())),
        settings,
        registry.map(str::to_string),
        true,
        root.path(),
    )
    .with_timing(
        Duration::from_millis(20),
        Duration::from_millis(300),
        Duration::from_millis(5),
    )
}

fn request(root: &TempDir) -> BuildRequest {
    BuildRequest::new("demo", root.path().join("demo"), format!("{REGISTRY}/demo:v1.0"))
}

#[smol_potat::test]
async fn test_job_build_streams_pod_logs() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.ok("kubectl get job", r#"{"status": {"succeeded": 1}}"#);
    runner.ok(
        "kubectl get pods -n launchpad",
        r#"{"items": [{"metadata": {"name": "build-pod-1"}}]}"#,
    );
    runner.ok("kubectl get pod build-pod-1", r#"{"status": {"phase": "Running"}}"#);
    runner.ok(
        "kubectl logs -f build-pod-1",
        "INFO[0001] Retrieving image manifest golang:1.21-alpine\n\n✅ Pushed registry.local:5000/demo:v1.0",
    );

    let builder = job_builder(&runner, &root, Some(REGISTRY));
    let sink = RecordingSink::new();
    let log = PipelineLog::new(&sink).for_step("Building image");

    let image = builder.build(&request(&root), &log).await.unwrap();
    assert_eq!(image, "registry.local:5000/demo:v1.0");

    let create = &runner.calls_matching("kubectl create -f")[0];
    assert!(create[3].ends_with(".json"));

    let entries = sink.entries();
    let pulled = entries
        .iter()
        .find(|e| e.message.starts_with("INFO[0001]"))
        .unwrap();
    assert_eq!(pulled.level, LogLevel::Info);
    assert_eq!(pulled.step.as_deref(), Some("Building image"));
    assert!(sink
        .messages(LogLevel::Success)
        .contains(&"✅ Pushed registry.local:5000/demo:v1.0".to_string()));
    assert!(entries.iter().all(|e| !e.message.is_empty()));
}

#[smol_potat::test]
async fn test_job_build_times_out() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.ok("kubectl get job", r#"{"status": {"active": 1}}"#);
    runner.ok("kubectl get pods", r#"{"items": []}"#);

    let builder = job_builder(&runner, &root, Some(REGISTRY));
    let sink = RecordingSink::new();
    let log = PipelineLog::new(&sink);

    let started = Instant::now();
    let err = builder.build(&request(&root), &log).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Timeout { after, .. } if after == Duration::from_millis(300)));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(5));

    let delete = &runner.calls_matching("kubectl delete job")[0];
    assert!(delete[3].starts_with("kaniko-demo-"));
    assert!(delete.contains(&"--cascade=background".to_string()));
    assert!(sink.contains("Could not find build pod"));
    assert!(runner.calls_matching("kubectl get job").len() > 1);
}

#[smol_potat::test]
async fn test_job_timeout_does_not_wait_for_slow_logs() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.ok("kubectl get job", r#"{"status": {"active": 1}}"#);
    runner.ok("kubectl get pods", r#"{"items": []}"#);

    // Pod discovery alone outlasts the build timeout by seconds
    let settings = BuilderSettings {
        pod_discovery_attempts: 100,
        ..BuilderSettings::default()
    };
    let builder = ClusterJobBuilder::new(
        Kubectl::new(runner.clone(), "kubectl", "argocd"),
        Arc::new(ProcessExecutor::new(runner.clone())),
        settings,
        Some(REGISTRY.to_string()),
        true,
        root.path(),
    )
    .with_timing(
        Duration::from_millis(20),
        Duration::from_millis(300),
        Duration::from_millis(100),
    );
    let sink = RecordingSink::new();

    let started = Instant::now();
    let err = builder
        .build(&request(&root), &PipelineLog::new(&sink))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::Timeout { .. }));
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    assert!(!sink.contains("Could not find build pod"));
}

#[smol_potat::test]
async fn test_failed_job_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.ok("kubectl get job", r#"{"status": {"failed": 1}}"#);
    runner.ok("kubectl get pods", r#"{"items": []}"#);

    let builder = job_builder(&runner, &root, Some(REGISTRY));
    let sink = RecordingSink::new();
    let err = builder
        .build(&request(&root), &PipelineLog::new(&sink))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExternalTool { .. }));
}

#[smol_potat::test]
async fn test_job_build_needs_registry_and_shared_context() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let sink = RecordingSink::new();
    let log = PipelineLog::new(&sink);

    let no_registry = job_builder(&runner, &root, None);
    let err = no_registry.build(&request(&root), &log).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    let builder = job_builder(&runner, &root, Some(REGISTRY));
    let outside = BuildRequest::new("demo", "/somewhere/else", "demo:v1.0");
    let err = builder.build(&outside, &log).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));

    assert!(runner.calls().is_empty());
}

#[test]
fn test_job_manifest_shape() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let builder = job_builder(&runner, &root, Some(REGISTRY));

    let context = builder.context_path(&root.path().join("demo")).unwrap();
    assert_eq!(context, "demo");

    let job = builder.job_manifest("kaniko-demo-1234abcd", &context, "Dockerfile", "registry.local:5000/demo:v1.0");
    assert_eq!(job["metadata"]["namespace"], "launchpad");
    assert_eq!(job["metadata"]["labels"]["app"], "image-builder");
    assert_eq!(job["spec"]["backoffLimit"], 0);
    assert_eq!(job["spec"]["ttlSecondsAfterFinished"], 300);

    let pod = &job["spec"]["template"]["spec"];
    assert_eq!(pod["restartPolicy"], "Never");
    assert_eq!(pod["volumes"][0]["persistentVolumeClaim"]["claimName"], "launchpad-build-context");

    let args: Vec<&str> = pod["containers"][0]["args"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a.as_str().unwrap())
        .collect();
    assert!(args.contains(&"--context=dir:///workspace/demo"));
    assert!(args.contains(&"--dockerfile=/workspace/demo/Dockerfile"));
    assert!(args.contains(&"--destination=registry.local:5000/demo:v1.0"));
    assert!(args.contains(&"--insecure"));
    assert!(args.contains(&"--insecure-registry=registry.local:5000"));
}

#[smol_potat::test]
async fn test_cleanup_deletes_only_old_completed_jobs() {
    let root = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let now = Utc::now();
    let jobs = json!({
        "items": [
            {
                "metadata": {"name": "kaniko-old-1"},
                "status": {"completionTime": (now - ChronoDuration::hours(48)).to_rfc3339()}
            },
            {
                "metadata": {"name": "kaniko-recent-2"},
                "status": {"completionTime": (now - ChronoDuration::hours(1)).to_rfc3339()}
            },
            {
                "metadata": {"name": "kaniko-running-3"},
                "status": {"active": 1}
            }
        ]
    });
    runner.ok("kubectl get jobs -n launchpad -l app=image-builder", &jobs.to_string());

    let builder = job_builder(&runner, &root, Some(REGISTRY));
    let deleted = builder
        .cleanup_old_jobs(Duration::from_secs(24 * 3600))
        .await
        .unwrap();
    assert_eq!(deleted, 1);

    let deletes = runner.calls_matching("kubectl delete");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0][3], "kaniko-old-1");
}

#[smol_potat::test]
async fn test_local_daemon_build_and_import() {
    let runner = Arc::new(ScriptedRunner::new());
    runner.ok("docker build", "Step 1/6 : FROM golang:1.21-alpine AS builder\nSuccessfully tagged demo:v1.0");
    let process = Arc::new(ProcessExecutor::new(runner.clone()));
    let sink = RecordingSink::new();
    let log = PipelineLog::new(&sink).for_step("Building image");

    let request = BuildRequest::new("demo", "/data/apps/demo", "demo:v1.0");

    let builder = LocalDaemonBuilder::new(process.clone(), None);
    assert_eq!(builder.build(&request, &log).await.unwrap(), "demo:v1.0");
    builder.publish("demo:v1.0", &log).await.unwrap();
    assert_eq!(
        runner.calls(),
        vec![vec![
            "docker",
            "build",
            "-t",
            "demo:v1.0",
            "-f",
            "/data/apps/demo/Dockerfile",
            "/data/apps/demo"
        ]]
    );
    assert!(sink.contains("No local cluster configured"));
    // Docker's own step lines do not use the pipeline marker format
    assert!(sink.entries().iter().all(|e| e.step.as_deref() == Some("Building image")));

    let importing = LocalDaemonBuilder::new(process, Some("dev".to_string()));
    importing.publish("demo:v1.0", &log).await.unwrap();
    assert_eq!(runner.calls_matching("k3d image import demo:v1.0 -c dev").len(), 1);
}

//! Deployment manifest builders shared by the variants

use crate::Result;
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Label marking resources created by this tool
pub const MANAGED_BY: &str = "launchpad";

/// Resource requests and limits of the workload container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    /// CPU request
    pub cpu_request: String,
    /// Memory request
    pub memory_request: String,
    /// CPU limit
    pub cpu_limit: String,
    /// Memory limit
    pub memory_limit: String,
}

/// Inputs of a workload deployment
#[derive(Debug, Clone)]
pub struct WorkloadSpec {
    /// Deployment, container and `app` label name
    pub name: String,
    /// Namespace
    pub namespace: String,
    /// Container image
    pub image: String,
    /// Container port
    pub port: u64,
    /// Replica count
    pub replicas: u64,
    /// Requests and limits
    pub resources: Resources,
    /// Literal environment variables
    pub env: Vec<(String, String)>,
    /// Config map whose keys become environment variables
    pub env_from_config_map: Option<String>,
    /// Add `/health` liveness and `/ready` readiness probes
    pub probes: bool,
}

/// Serialize a manifest object as YAML
pub fn to_yaml(manifest: &Value) -> Result<String> {
    Ok(serde_yaml::to_string(manifest)?)
}

/// Namespace for a service
pub fn namespace(namespace: &str, app: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": namespace,
            "labels": { "app": app, "managed-by": MANAGED_BY }
        }
    })
}

/// Deployment of the workload container
pub fn deployment(spec: &WorkloadSpec) -> Value {
    let env: Vec<Value> = spec
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    let mut container = json!({
        "name": spec.name,
        "image": spec.image,
        "ports": [{ "containerPort": spec.port }],
        "resources": {
            "limits": { "cpu": spec.resources.cpu_limit, "memory": spec.resources.memory_limit },
            "requests": { "cpu": spec.resources.cpu_request, "memory": spec.resources.memory_request }
        },
        "env": env
    });

    if let Some(config_map) = &spec.env_from_config_map {
        container["envFrom"] = json!([{ "configMapRef": { "name": config_map } }]);
    }
    if spec.probes {
        container["livenessProbe"] = json!({
            "httpGet": { "path": "/health", "port": spec.port },
            "initialDelaySeconds": 5,
            "periodSeconds": 30
        });
        container["readinessProbe"] = json!({
            "httpGet": { "path": "/ready", "port": spec.port },
            "initialDelaySeconds": 3,
            "periodSeconds": 10
        });
    }

    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": { "app": spec.name }
        },
        "spec": {
            "replicas": spec.replicas,
            "selector": { "matchLabels": { "app": spec.name } },
            "template": {
                "metadata": { "labels": { "app": spec.name } },
                "spec": { "containers": [container] }
            }
        }
    })
}

/// ClusterIP service in front of the workload
pub fn service(name: &str, namespace: &str, port: u64) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app": name }
        },
        "spec": {
            "selector": { "app": name },
            "ports": [{ "port": port, "targetPort": port, "protocol": "TCP" }]
        }
    })
}

/// Config map holding string settings
pub fn config_map(name: &str, namespace: &str, data: &BTreeMap<String, String>) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": { "app": name.trim_end_matches("-config") }
        },
        "data": data
    })
}

/// Standard manifest set: namespace, deployment and service
pub fn workload_set(spec: &WorkloadSpec) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    files.insert("namespace.yaml".to_string(), to_yaml(&namespace(&spec.namespace, &spec.name))?);
    files.insert("deployment.yaml".to_string(), to_yaml(&deployment(spec))?);
    files.insert("service.yaml".to_string(), to_yaml(&service(&spec.name, &spec.namespace, spec.port))?);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(probes: bool) -> WorkloadSpec {
        WorkloadSpec {
            name: "demo".into(),
            namespace: "demo".into(),
            image: "demo:v1.0".into(),
            port: 9090,
            replicas: 2,
            resources: Resources {
                cpu_request: "100m".into(),
                memory_request: "128Mi".into(),
                cpu_limit: "250m".into(),
                memory_limit: "256Mi".into(),
            },
            env: vec![("PORT".into(), "9090".into())],
            env_from_config_map: None,
            probes,
        }
    }

    #[test]
    fn test_deployment_probes_follow_flag() {
        let with = deployment(&spec(true));
        let container = &with["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["livenessProbe"]["httpGet"]["port"], 9090);
        assert_eq!(container["readinessProbe"]["httpGet"]["path"], "/ready");
        assert_eq!(container["env"][0]["value"], "9090");

        let without = deployment(&spec(false));
        assert!(without["spec"]["template"]["spec"]["containers"][0]
            .get("livenessProbe")
            .is_none());
    }

    #[test]
    fn test_workload_set_files() {
        let files = workload_set(&spec(true)).unwrap();
        let names: Vec<_> = files.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["deployment.yaml", "namespace.yaml", "service.yaml"]);

        let svc: serde_yaml::Value = serde_yaml::from_str(&files["service.yaml"]).unwrap();
        assert_eq!(svc["spec"]["ports"][0]["targetPort"], 9090);
    }
}

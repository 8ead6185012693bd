//! Go HTTP service variant

use super::manifests::{self, Resources, WorkloadSpec};
use super::{ServiceConfig, TemplateHandler, TemplateKind, Validation};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Port used when the config does not name one
pub const DEFAULT_PORT: u64 = 8080;

/// Go HTTP server with `/`, `/health` and `/ready`
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkServiceTemplate;

/// Workload settings common to the HTTP service variants
pub(crate) fn http_workload(config: &ServiceConfig, default_port: u64) -> WorkloadSpec {
    let port = config.u64_param("port", default_port).unwrap_or(default_port);
    WorkloadSpec {
        name: config.name.clone(),
        namespace: config.namespace.clone(),
        image: config.image.clone(),
        port,
        replicas: config.u64_param("replicas", 2).unwrap_or(2),
        resources: Resources {
            cpu_request: config.str_param("request_cpu", "100m"),
            memory_request: config.str_param("request_memory", "128Mi"),
            cpu_limit: config.str_param("cpu_limit", "250m"),
            memory_limit: config.str_param("memory_limit", "256Mi"),
        },
        env: vec![
            ("PORT".to_string(), port.to_string()),
            ("ENVIRONMENT".to_string(), config.str_param("environment", "dev")),
            ("LOG_LEVEL".to_string(), config.str_param("log_level", "INFO")),
        ],
        env_from_config_map: None,
        probes: config.bool_param("enable_health_check", true),
    }
}

/// Validation shared by the HTTP service variants
pub(crate) fn validate_http(config: &ServiceConfig, default_port: u64) -> Validation {
    let mut validation = Validation::default();
    validation.check_name(&config.name);
    validation.check_namespace(&config.namespace);
    validation.check_port(config, default_port);
    if config.u64_param("replicas", 2).is_none() {
        validation.push("replicas must be a non-negative integer");
    }
    validation
}

fn main_go(name: &str, port: u64) -> String {
    format!(
        r#"package main

import (
	"encoding/json"
	"log"
	"net/http"
	"os"
	"time"
)

type Response struct {{
	Service string `json:"service,omitempty"`
	Status  string `json:"status"`
	Time    string `json:"time,omitempty"`
}}

func main() {{
	log.SetFlags(log.LstdFlags | log.Lshortfile)
	log.Printf("Starting {name} service...")

	http.HandleFunc("/", handleRoot)
	http.HandleFunc("/health", handleHealth)
	http.HandleFunc("/ready", handleReady)

	port := os.Getenv("PORT")
	if port == "" {{
		port = "{port}"
	}}

	log.Printf("Listening on :%s", port)
	if err := http.ListenAndServe(":"+port, nil); err != nil {{
		log.Fatalf("Server failed: %v", err)
	}}
}}

func writeJSON(w http.ResponseWriter, body Response) {{
	w.Header().Set("Content-Type", "application/json")
	json.NewEncoder(w).Encode(body)
}}

func handleRoot(w http.ResponseWriter, r *http.Request) {{
	writeJSON(w, Response{{Service: "{name}", Status: "running", Time: time.Now().Format(time.RFC3339)}})
}}

func handleHealth(w http.ResponseWriter, r *http.Request) {{
	writeJSON(w, Response{{Status: "healthy"}})
}}

func handleReady(w http.ResponseWriter, r *http.Request) {{
	writeJSON(w, Response{{Status: "ready"}})
}}
"#
    )
}

fn dockerfile(go_version: &str, port: u64) -> String {
    format!(
        r#"# Build stage
FROM golang:{go_version}-alpine AS builder

WORKDIR /app
COPY go.mod ./
COPY . .
RUN CGO_ENABLED=0 GOOS=linux go build -o main .

# Runtime stage
FROM alpine:3.19

RUN apk --no-cache add ca-certificates
WORKDIR /root/

COPY --from=builder /app/main .

EXPOSE {port}
CMD ["./main"]
"#
    )
}

#[async_trait]
impl TemplateHandler for NetworkServiceTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::NetworkService
    }

    fn validate(&self, config: &ServiceConfig) -> Validation {
        validate_http(config, DEFAULT_PORT)
    }

    fn render_code(&self, config: &ServiceConfig) -> Result<BTreeMap<String, String>> {
        let port = config.u64_param("port", DEFAULT_PORT).unwrap_or(DEFAULT_PORT);
        let go_version = config.str_param("go_version", "1.21");

        let mut files = BTreeMap::new();
        files.insert("main.go".to_string(), main_go(&config.name, port));
        files.insert(
            "go.mod".to_string(),
            format!("module {}\n\ngo {}\n", config.name, go_version),
        );
        files.insert("Dockerfile".to_string(), dockerfile(&go_version, port));
        Ok(files)
    }

    fn render_manifests(&self, config: &ServiceConfig) -> Result<BTreeMap<String, String>> {
        manifests::workload_set(&http_workload(config, DEFAULT_PORT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn config(params: Value) -> ServiceConfig {
        let Value::Object(params) = params else { unreachable!() };
        ServiceConfig::new("demo", "demo", "demo:v1.0", params)
    }

    #[test]
    fn test_code_uses_configured_port() {
        let files = NetworkServiceTemplate
            .render_code(&config(json!({"port": 9090, "go_version": "1.22"})))
            .unwrap();
        assert!(files["main.go"].contains(r#"port = "9090""#));
        assert!(files["main.go"].contains(r#"http.HandleFunc("/ready", handleReady)"#));
        assert_eq!(files["go.mod"], "module demo\n\ngo 1.22\n");
        assert!(files["Dockerfile"].starts_with("# Build stage\nFROM golang:1.22-alpine AS builder"));
        assert!(files["Dockerfile"].contains("EXPOSE 9090"));
    }

    #[test]
    fn test_validation_rejects_bad_port_and_name() {
        let mut cfg = config(json!({"port": 0}));
        cfg.name = "bad name".into();
        let validation = NetworkServiceTemplate.validate(&cfg);
        assert_eq!(validation.errors.len(), 2);

        assert!(NetworkServiceTemplate.validate(&config(json!({"port": 65535}))).is_ok());
        assert!(!NetworkServiceTemplate.validate(&config(json!({"port": "http"}))).is_ok());
    }

    #[test]
    fn test_defaults_fill_manifests() {
        let files = NetworkServiceTemplate.render_manifests(&config(json!({}))).unwrap();
        let deployment: serde_yaml::Value = serde_yaml::from_str(&files["deployment.yaml"]).unwrap();
        assert_eq!(deployment["spec"]["replicas"], 2);
        let container = &deployment["spec"]["template"]["spec"]["containers"][0];
        assert_eq!(container["ports"][0]["containerPort"], 8080);
        assert_eq!(container["resources"]["limits"]["memory"], "256Mi");
    }
}

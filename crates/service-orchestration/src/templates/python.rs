//! Python HTTP service variant

use super::manifests;
use super::network::{http_workload, validate_http};
use super::{ServiceConfig, TemplateHandler, TemplateKind, Validation};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Port used when the config does not name one
pub const DEFAULT_PORT: u64 = 8000;

/// Standard-library Python HTTP server with `/`, `/health` and `/ready`
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonServiceTemplate;

fn main_py(name: &str, port: u64) -> String {
    format!(
        r#"import json
import logging
import os
from datetime import datetime, timezone
from http.server import BaseHTTPRequestHandler, HTTPServer

logging.basicConfig(level=os.environ.get("LOG_LEVEL", "INFO"))
log = logging.getLogger("{name}")


class Handler(BaseHTTPRequestHandler):
    def _send(self, body, status=200):
        payload = json.dumps(body).encode()
        self.send_response(status)
        self.send_header("Content-Type", "application/json")
        self.send_header("Content-Length", str(len(payload)))
        self.end_headers()
        self.wfile.write(payload)

    def do_GET(self):
        if self.path == "/health":
            self._send({{"status": "healthy"}})
        elif self.path == "/ready":
            self._send({{"status": "ready"}})
        elif self.path == "/":
            self._send({{
                "service": "{name}",
                "status": "running",
                "time": datetime.now(timezone.utc).isoformat(),
            }})
        else:
            self._send({{"error": "not found"}}, status=404)

    def log_message(self, fmt, *args):
        log.info(fmt, *args)


if __name__ == "__main__":
    port = int(os.environ.get("PORT", "{port}"))
    log.info("Starting {name} on :%d", port)
    HTTPServer(("0.0.0.0", port), Handler).serve_forever()
"#
    )
}

fn dockerfile(python_version: &str, port: u64) -> String {
    format!(
        r#"FROM python:{python_version}-slim

WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY . .

EXPOSE {port}
CMD ["python", "main.py"]
"#
    )
}

#[async_trait]
impl TemplateHandler for PythonServiceTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::PythonService
    }

    fn validate(&self, config: &ServiceConfig) -> Validation {
        validate_http(config, DEFAULT_PORT)
    }

    fn render_code(&self, config: &ServiceConfig) -> Result<BTreeMap<String, String>> {
        let port = config.u64_param("port", DEFAULT_PORT).unwrap_or(DEFAULT_PORT);
        let python_version = config.str_param("python_version", "3.11");

        let mut files = BTreeMap::new();
        files.insert("main.py".to_string(), main_py(&config.name, port));
        files.insert(
            "requirements.txt".to_string(),
            "# Standard library only; add dependencies here\n".to_string(),
        );
        files.insert("Dockerfile".to_string(), dockerfile(&python_version, port));
        Ok(files)
    }

    fn render_manifests(&self, config: &ServiceConfig) -> Result<BTreeMap<String, String>> {
        manifests::workload_set(&http_workload(config, DEFAULT_PORT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_defaults() {
        let cfg = ServiceConfig::new("worker", "worker", "worker:v1.0", Map::new());
        let code = PythonServiceTemplate.render_code(&cfg).unwrap();
        assert!(code["main.py"].contains(r#"os.environ.get("PORT", "8000")"#));
        assert!(code["Dockerfile"].starts_with("FROM python:3.11-slim"));

        let manifests = PythonServiceTemplate.render_manifests(&cfg).unwrap();
        let svc: serde_yaml::Value = serde_yaml::from_str(&manifests["service.yaml"]).unwrap();
        assert_eq!(svc["spec"]["ports"][0]["port"], 8000);
    }
}

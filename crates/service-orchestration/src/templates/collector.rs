//! Legacy coin collector variant
//!
//! Created from positional name/coin/type arguments. Its namespace carries
//! a creation timestamp and its deploy stage waits for the rollout.

use super::manifests::{self, Resources, WorkloadSpec};
use super::{ServiceConfig, TemplateHandler, TemplateKind, Validation};
use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Coin used when an unknown template falls back to the collector
pub const DEFAULT_COIN: &str = "btc";

const PORT: u64 = 8080;

/// Periodically samples one coin and exposes the latest value over HTTP
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectorTemplate;

fn coin(config: &ServiceConfig) -> String {
    config.str_param("coin", "").to_uppercase()
}

fn collector_type(config: &ServiceConfig) -> String {
    config.str_param("type", "collector")
}

/// Name of the config map holding the collector settings
pub fn config_map_name(name: &str) -> String {
    format!("{name}-config")
}

fn main_go(name: &str) -> String {
    format!(
        r#"package main

import (
	"encoding/json"
	"log"
	"net/http"
	"os"
	"strconv"
	"sync"
	"time"
)

type Sample struct {{
	Coin      string    `json:"coin"`
	Type      string    `json:"type"`
	Count     int       `json:"count"`
	UpdatedAt time.Time `json:"updated_at"`
}}

var (
	mu     sync.RWMutex
	latest Sample
)

func collect(coin, kind string, interval time.Duration) {{
	for {{
		mu.Lock()
		latest.Coin = coin
		latest.Type = kind
		latest.Count++
		latest.UpdatedAt = time.Now().UTC()
		mu.Unlock()
		log.Printf("collected %s sample for %s", kind, coin)
		time.Sleep(interval)
	}}
}}

func main() {{
	coin := os.Getenv("COIN")
	kind := os.Getenv("TYPE")
	seconds, err := strconv.Atoi(os.Getenv("INTERVAL_SECONDS"))
	if err != nil || seconds <= 0 {{
		seconds = 30
	}}

	log.Printf("Starting {name} collector for %s (%s)", coin, kind)
	go collect(coin, kind, time.Duration(seconds)*time.Second)

	http.HandleFunc("/", func(w http.ResponseWriter, r *http.Request) {{
		mu.RLock()
		defer mu.RUnlock()
		w.Header().Set("Content-Type", "application/json")
		json.NewEncoder(w).Encode(latest)
	}})
	http.HandleFunc("/health", func(w http.ResponseWriter, r *http.Request) {{
		w.Write([]byte("ok"))
	}})
	http.HandleFunc("/ready", func(w http.ResponseWriter, r *http.Request) {{
		w.Write([]byte("ok"))
	}})

	log.Fatal(http.ListenAndServe(":{PORT}", nil))
}}
"#
    )
}

const DOCKERFILE: &str = r#"FROM golang:1.21-alpine AS builder

WORKDIR /app
COPY go.mod ./
COPY . .
RUN CGO_ENABLED=0 GOOS=linux go build -o collector .

FROM alpine:3.19

RUN apk --no-cache add ca-certificates
WORKDIR /root/
COPY --from=builder /app/collector .

EXPOSE 8080
CMD ["./collector"]
"#;

#[async_trait]
impl TemplateHandler for CollectorTemplate {
    fn kind(&self) -> TemplateKind {
        TemplateKind::Collector
    }

    fn validate(&self, config: &ServiceConfig) -> Validation {
        let mut validation = Validation::default();
        validation.check_name(&config.name);
        validation.check_namespace(&config.namespace);

        let coin = coin(config);
        if coin.is_empty() {
            validation.push("coin is required");
        } else if !coin.chars().all(|c| c.is_ascii_alphanumeric()) {
            validation.push("coin must be alphanumeric");
        }
        if collector_type(config).trim().is_empty() {
            validation.push("type must not be empty");
        }
        validation
    }

    fn render_code(&self, config: &ServiceConfig) -> Result<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        files.insert("main.go".to_string(), main_go(&config.name));
        files.insert("go.mod".to_string(), format!("module {}\n\ngo 1.21\n", config.name));
        files.insert("Dockerfile".to_string(), DOCKERFILE.to_string());
        Ok(files)
    }

    fn render_manifests(&self, config: &ServiceConfig) -> Result<BTreeMap<String, String>> {
        let config_map = config_map_name(&config.name);
        let spec = WorkloadSpec {
            name: config.name.clone(),
            namespace: config.namespace.clone(),
            image: config.image.clone(),
            port: PORT,
            replicas: 1,
            resources: Resources {
                cpu_request: "50m".to_string(),
                memory_request: "64Mi".to_string(),
                cpu_limit: "200m".to_string(),
                memory_limit: "128Mi".to_string(),
            },
            env: Vec::new(),
            env_from_config_map: Some(config_map.clone()),
            probes: true,
        };

        let mut data = BTreeMap::new();
        data.insert("COIN".to_string(), coin(config));
        data.insert("TYPE".to_string(), collector_type(config));
        data.insert(
            "INTERVAL_SECONDS".to_string(),
            config.str_param("interval_seconds", "30"),
        );

        let mut files = manifests::workload_set(&spec)?;
        files.insert(
            "configmap.yaml".to_string(),
            manifests::to_yaml(&manifests::config_map(&config_map, &config.namespace, &data))?,
        );
        Ok(files)
    }
}

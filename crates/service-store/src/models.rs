//! Data models for provisioned services and their logs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current on-disk layout of [`ServiceRecord`]
pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Longest namespace the cluster accepts (DNS label)
pub const MAX_NAMESPACE_LEN: usize = 63;

const LEGACY_SUFFIX_FORMAT: &str = "%Y%m%d%H%M%S";

/// Lifecycle status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Creation pipeline is running
    Creating,
    /// Deployed and scaled up
    Active,
    /// Scaled to zero with reconciliation suspended
    Inactive,
    /// Creation pipeline failed
    Failed,
    /// Soft-deleted
    Deleted,
}

impl ServiceStatus {
    /// Whether a record in this status may move to `next`
    ///
    /// Re-entering the current status is always allowed so lifecycle
    /// operations stay idempotent. `Deleted` is reachable from anywhere and
    /// never left.
    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;

        match (self, next) {
            (Deleted, next) => next == Deleted,
            (_, Deleted) => true,
            (current, next) if current == next => true,
            (Creating, Active | Failed) => true,
            (Failed, Creating) => true,
            (Active, Inactive) | (Inactive, Active) => true,
            _ => false,
        }
    }

    /// Lower-case name used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Creating => "creating",
            ServiceStatus::Active => "active",
            ServiceStatus::Inactive => "inactive",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Progress information
    Info,
    /// Non-fatal problem
    Warning,
    /// Failure
    Error,
    /// Completed successfully
    Success,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        };
        f.write_str(s)
    }
}

/// One line of a service log, in wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When the line was emitted
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// Message text
    pub message: String,
    /// Pipeline step the line belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

impl LogEntry {
    /// Create an entry stamped with the current time
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            step: None,
        }
    }

    /// Info entry
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    /// Warning entry
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    /// Error entry
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    /// Success entry
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }

    /// Attach a step label
    pub fn with_step(mut self, step: Option<String>) -> Self {
        self.step = step;
        self
    }
}

/// A provisioned service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Layout version of this record
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Unique id
    pub id: String,
    /// Workload name used for the deployment, application and manifests
    pub name: String,
    /// Name as requested
    pub display_name: String,
    /// Template variant id
    pub template: String,
    /// Lifecycle status
    pub status: ServiceStatus,
    /// Target namespace, fixed at creation
    pub namespace: String,
    /// Template-specific configuration document
    #[serde(default)]
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Soft-deletion time
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

fn default_schema_version() -> u32 {
    RECORD_SCHEMA_VERSION
}

impl ServiceRecord {
    /// Create a record in the `creating` status
    pub fn new(
        display_name: impl Into<String>,
        name: impl Into<String>,
        template: impl Into<String>,
        namespace: impl Into<String>,
        config: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            display_name: display_name.into(),
            template: template.into(),
            status: ServiceStatus::Creating,
            namespace: namespace.into(),
            config,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Whether the record has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.status == ServiceStatus::Deleted
    }
}

/// Workload name for a requested service name
///
/// Lower-cases and turns underscores and spaces into hyphens; other
/// characters are kept so validation can reject them.
pub fn workload_name(requested: &str) -> String {
    requested
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect()
}

/// Namespace for a requested service name
///
/// Lower-cases, collapses every run of non-alphanumeric characters into a
/// single hyphen, trims hyphens from both ends and caps the result at
/// [`MAX_NAMESPACE_LEN`].
pub fn derive_namespace(requested: &str) -> String {
    let mut out = String::with_capacity(requested.len());
    let mut pending_hyphen = false;

    for c in requested.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    truncate_label(out, MAX_NAMESPACE_LEN)
}

/// Namespace for the legacy variants: the derived namespace plus a
/// creation timestamp suffix
pub fn derive_legacy_namespace(requested: &str, created_at: DateTime<Utc>) -> String {
    let suffix = created_at.format(LEGACY_SUFFIX_FORMAT).to_string();
    let base = truncate_label(derive_namespace(requested), MAX_NAMESPACE_LEN - suffix.len() - 1);
    if base.is_empty() {
        suffix
    } else {
        format!("{base}-{suffix}")
    }
}

fn truncate_label(mut label: String, max: usize) -> String {
    // Only ASCII survives derivation so byte truncation is safe
    label.truncate(max);
    while label.ends_with('-') {
        label.pop();
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn namespace_collapses_punctuation_runs() {
        assert_eq!(derive_namespace("My Api!"), "my-api");
        assert_eq!(derive_namespace("  billing__service  v2 "), "billing-service-v2");
        assert_eq!(derive_namespace("--edge--"), "edge");
        assert_eq!(derive_namespace("!!!"), "");
    }

    #[test]
    fn namespace_is_capped_without_trailing_hyphen() {
        let long = format!("{}-{}", "a".repeat(62), "tail");
        let ns = derive_namespace(&long);
        assert!(ns.len() <= MAX_NAMESPACE_LEN);
        assert!(!ns.ends_with('-'));
    }

    #[test]
    fn legacy_namespace_has_timestamp_suffix() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(derive_legacy_namespace("ETH Collector", at), "eth-collector-20240309140507");

        let long = "x".repeat(80);
        let ns = derive_legacy_namespace(&long, at);
        assert_eq!(ns.len(), MAX_NAMESPACE_LEN);
        assert!(ns.ends_with("-20240309140507"));
    }

    #[test]
    fn workload_name_keeps_invalid_characters_for_validation() {
        assert_eq!(workload_name("Order_Service"), "order-service");
        assert_eq!(workload_name("My Api!"), "my-api!");
    }

    #[test]
    fn status_transitions() {
        use ServiceStatus::*;

        assert!(Creating.can_transition_to(Active));
        assert!(Creating.can_transition_to(Failed));
        assert!(Active.can_transition_to(Inactive));
        assert!(Inactive.can_transition_to(Active));
        assert!(Failed.can_transition_to(Deleted));
        assert!(Active.can_transition_to(Active));

        assert!(!Creating.can_transition_to(Inactive));
        assert!(!Failed.can_transition_to(Active));
        assert!(!Deleted.can_transition_to(Active));
        assert!(Deleted.can_transition_to(Deleted));
    }

    #[test]
    fn log_entry_wire_format() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let entry = LogEntry {
            timestamp: at,
            level: LogLevel::Warning,
            message: "registry is insecure".into(),
            step: Some("Building image".into()),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "warning");
        assert_eq!(json["timestamp"], "2024-01-02T03:04:05Z");
        assert_eq!(json["step"], "Building image");

        let bare = LogEntry { step: None, ..entry };
        let json = serde_json::to_value(&bare).unwrap();
        assert!(json.get("step").is_none());
    }

    #[test]
    fn records_without_schema_version_load_as_current() {
        let json = serde_json::json!({
            "id": "abc",
            "name": "demo",
            "display_name": "demo",
            "template": "go-service",
            "status": "active",
            "namespace": "demo",
            "created_at": "2024-01-02T03:04:05Z"
        });
        let record: ServiceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.schema_version, RECORD_SCHEMA_VERSION);
        assert_eq!(record.status, ServiceStatus::Active);
        assert!(record.deleted_at.is_none());
    }
}

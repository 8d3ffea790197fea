//! Domain records stored in the state database

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Placeholder used in canonical ids when a scope component is unknown
const UNSCOPED: &str = "-";

/// Subscription / resource group a resource lives in
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceScope {
    pub subscription: Option<String>,
    pub resource_group: Option<String>,
}

impl ResourceScope {
    pub fn new(subscription: Option<String>, resource_group: Option<String>) -> Self {
        Self {
            subscription,
            resource_group,
        }
    }

    pub fn resource_group(resource_group: impl Into<String>) -> Self {
        Self {
            subscription: None,
            resource_group: Some(resource_group.into()),
        }
    }
}

impl fmt::Display for ResourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.subscription.as_deref().unwrap_or(UNSCOPED),
            self.resource_group.as_deref().unwrap_or(UNSCOPED)
        )
    }
}

/// Canonical resource id
///
/// `/subscriptions/{sub}/resourceGroups/{rg}/providers/{type}/{name}`, with `-`
/// for unknown scope components. The same identity always yields the same id.
pub fn canonical_id(resource_type: &str, name: &str, scope: &ResourceScope) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
        scope.subscription.as_deref().unwrap_or(UNSCOPED),
        scope.resource_group.as_deref().unwrap_or(UNSCOPED),
        resource_type,
        name
    )
}

/// `secs` as a span, saturating at the largest span chrono can hold
pub fn span_from_secs(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// `at + span`, clamped to the representable range
pub fn saturating_add(at: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    at.checked_add_signed(span).unwrap_or(if span < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// `at - span`, clamped to the representable range
pub fn saturating_sub(at: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(span).unwrap_or(if span < Duration::zero() {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// Status of a resource as last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Succeeded,
    Provisioning,
    Failed,
    Deleted,
    Unknown,
}

impl ResourceStatus {
    /// Derive the status from a resource description
    ///
    /// Looks at `provisioningState` at the top level or under `properties`.
    pub fn from_properties(properties: &serde_json::Value) -> Self {
        let state = properties
            .get("provisioningState")
            .or_else(|| properties.get("properties")?.get("provisioningState"))
            .and_then(|v| v.as_str());

        match state.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("succeeded") => Self::Succeeded,
            Some("creating" | "updating" | "provisioning" | "accepted" | "running" | "deleting") => {
                Self::Provisioning
            }
            Some("failed" | "canceled" | "cancelled") => Self::Failed,
            Some("deleted") => Self::Deleted,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Provisioning => "provisioning",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "provisioning" => Ok(Self::Provisioning),
            "failed" => Ok(Self::Failed),
            "deleted" => Ok(Self::Deleted),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown resource status: {other}")),
        }
    }
}

/// A tracked cloud resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub id: String,
    pub name: String,
    pub resource_type: String,
    pub subscription: Option<String>,
    pub resource_group: Option<String>,
    pub location: Option<String>,

    /// Last known description, opaque to the store
    pub properties: serde_json::Value,

    pub status: ResourceStatus,

    pub last_validated_at: Option<DateTime<Utc>>,

    /// `None` means stale
    pub cache_expires_at: Option<DateTime<Utc>>,

    pub managed_by_toolkit: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>, scope: &ResourceScope) -> Self {
        let resource_type = resource_type.into();
        let name = name.into();
        let now = Utc::now();
        Self {
            id: canonical_id(&resource_type, &name, scope),
            name,
            resource_type,
            subscription: scope.subscription.clone(),
            resource_group: scope.resource_group.clone(),
            location: None,
            properties: serde_json::Value::Object(Default::default()),
            status: ResourceStatus::Unknown,
            last_validated_at: None,
            cache_expires_at: None,
            managed_by_toolkit: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a description; status and location are derived from it
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.status = ResourceStatus::from_properties(&properties);
        if let Some(location) = properties.get("location").and_then(|v| v.as_str()) {
            self.location = Some(location.to_string());
        }
        self.properties = properties;
        self
    }

    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn managed(mut self, managed: bool) -> Self {
        self.managed_by_toolkit = managed;
        self
    }

    pub fn scope(&self) -> ResourceScope {
        ResourceScope::new(self.subscription.clone(), self.resource_group.clone())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Fresh when live and `now` is before the cache expiry
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_deleted() && self.cache_expires_at.is_some_and(|expires| now < expires)
    }
}

/// Filter for listing resources
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    /// Glob pattern over `resource_type` (SQLite GLOB syntax)
    pub resource_type: Option<String>,
    pub subscription: Option<String>,
    pub resource_group: Option<String>,
    pub include_deleted: bool,
}

impl ResourceFilter {
    pub fn in_scope(scope: &ResourceScope) -> Self {
        Self {
            subscription: scope.subscription.clone(),
            resource_group: scope.resource_group.clone(),
            ..Default::default()
        }
    }
}

/// Strength of a dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    Required,
    Optional,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Optional => "optional",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(Self::Required),
            "optional" => Ok(Self::Optional),
            other => Err(format!("unknown dependency type: {other}")),
        }
    }
}

/// Directed edge: `dependent_id` depends on `dependency_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub dependent_id: String,
    pub dependency_id: String,
    pub dependency_type: DependencyType,
    pub relationship: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DependencyEdge {
    pub fn new(
        dependent_id: impl Into<String>,
        dependency_id: impl Into<String>,
        dependency_type: DependencyType,
    ) -> Self {
        Self {
            dependent_id: dependent_id.into(),
            dependency_id: dependency_id.into(),
            dependency_type,
            relationship: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_relationship(mut self, relationship: impl Into<String>) -> Self {
        self.relationship = Some(relationship.into());
        self
    }
}

/// Lifecycle status of an operation
///
/// `pending -> running -> {completed | failed}`, plus `pending -> failed` and
/// `pending -> completed`. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}

/// How an operation is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    #[default]
    Normal,
    DryRun,
    Force,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::DryRun => "dry_run",
            Self::Force => "force",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "dry_run" => Ok(Self::DryRun),
            "force" => Ok(Self::Force),
            other => Err(format!("unknown operation mode: {other}")),
        }
    }
}

/// Input for creating an operation row
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub definition_id: String,
    pub name: String,
    pub capability: Option<String>,
    pub action: Option<String>,
    pub target_resource: Option<String>,
    pub mode: OperationMode,
    pub total_steps: u32,
}

/// One execution of a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub definition_id: String,
    pub name: String,
    pub capability: Option<String>,
    pub action: Option<String>,
    pub target_resource: Option<String>,
    pub mode: OperationMode,
    pub status: OperationStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub current_step_label: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Severity of an operation log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub operation_id: String,
    pub level: LogLevel,
    pub message: String,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: i64,
    pub kind: String,
    pub subject: String,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

/// Cache freshness counts over live and deleted resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub fresh: u64,
    pub stale: u64,
    pub deleted: u64,
}

/// Operation counts, computed from the operations table on demand
///
/// Status counts exclude dry runs, which are counted on their own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationSummary {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub dry_runs: u64,
}

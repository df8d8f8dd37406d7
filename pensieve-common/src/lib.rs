//! Common types and utilities shared between pensieve-api and its clients

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved actor identity for internally generated backup runs
pub const SYSTEM_ACTOR: &str = "system";

/// Per-tenant backup settings (one row per tenant)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantBackupSettings {
    pub tenant_id: String,
    /// Master switch; scheduling is rejected while this is false
    pub is_enabled: bool,
    /// Default for jobs that do not specify their own flag
    pub include_extended_data: bool,
    /// Backups older than this are removed by the cleanup sweep
    pub retention_days: u32,
    /// Hard cap on retained backups per tenant
    pub max_backup_count: u32,
    pub auto_backup_enabled: bool,
    pub auto_backup_interval_hours: u32,
}

impl TenantBackupSettings {
    /// Settings for a tenant that never enabled backups
    pub fn disabled(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            is_enabled: false,
            include_extended_data: false,
            retention_days: 30,
            max_backup_count: 10,
            auto_backup_enabled: false,
            auto_backup_interval_hours: 24,
        }
    }
}

/// Backup record status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for BackupStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::System(format!("Unknown backup status: {}", other))),
        }
    }
}

/// A stored backup artifact's metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub status: BackupStatus,
    pub item_count: u64,
    pub size_bytes: u64,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
}

/// What initiated a backup run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Manual,
    Scheduled,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Result of a backup-creation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BackupOutcome {
    pub fn completed(backup_id: impl Into<String>) -> Self {
        Self {
            success: true,
            backup_id: Some(backup_id.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            backup_id: None,
            error: Some(error.into()),
        }
    }
}

/// API error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

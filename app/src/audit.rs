// ==============================================================================
// audit.rs - Audit Trail for Pipeline Stages
// ==============================================================================
// Description: Records stage starts, outcomes, exclusions and refreshes in a
//              pipeline_audit table kept next to the annotation table
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-15
// Version: 2.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::Result;

pub const AUDIT_TABLE_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS pipeline_audit (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    stage TEXT NOT NULL,
    resource TEXT,
    result TEXT NOT NULL,
    details TEXT NOT NULL,
    severity TEXT NOT NULL
)";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    StageStarted,
    StageCompleted,
    /// Token already applied or nothing stale
    StageSkipped,
    /// Upstream input not materialized; safe to retry
    StageIncomplete,
    StageFailed,
    FamiliesExcluded,
    DatasetsRefreshed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::StageStarted => "stage_started",
            AuditEventType::StageCompleted => "stage_completed",
            AuditEventType::StageSkipped => "stage_skipped",
            AuditEventType::StageIncomplete => "stage_incomplete",
            AuditEventType::StageFailed => "stage_failed",
            AuditEventType::FamiliesExcluded => "families_excluded",
            AuditEventType::DatasetsRefreshed => "datasets_refreshed",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

impl LogSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Info => "info",
            LogSeverity::Warning => "warning",
            LogSeverity::Error => "error",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub stage: String,
    pub resource: Option<String>,
    pub result: String,
    pub details: serde_json::Value,
    pub severity: LogSeverity,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        stage: &str,
        resource: Option<String>,
        details: serde_json::Value,
    ) -> Self {
        let (severity, result) = match event_type {
            AuditEventType::StageIncomplete => (LogSeverity::Warning, "incomplete"),
            AuditEventType::FamiliesExcluded => (LogSeverity::Warning, "success"),
            AuditEventType::StageFailed => (LogSeverity::Error, "failure"),
            AuditEventType::StageSkipped => (LogSeverity::Info, "skipped"),
            _ => (LogSeverity::Info, "success"),
        };

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            stage: stage.to_string(),
            resource,
            result: result.to_string(),
            details,
            severity,
        }
    }

    pub fn log(&self, conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO pipeline_audit (
                id, timestamp, event_type, stage, resource, result, details, severity
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                self.id.to_string(),
                self.timestamp.to_rfc3339(),
                self.event_type.as_str(),
                self.stage,
                self.resource,
                self.result,
                serde_json::to_string(&self.details)?,
                self.severity.as_str(),
            ],
        )?;
        Ok(())
    }
}

/// Audit trail stored in the annotation table's store file
///
/// Each call opens the file afresh: the store replaces it on every write.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let log = Self {
            path: path.as_ref().to_path_buf(),
        };
        log.connect()?;
        Ok(log)
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(AUDIT_TABLE_SCHEMA)?;
        Ok(conn)
    }

    /// Log an event
    pub fn log_event(
        &self,
        event_type: AuditEventType,
        stage: &str,
        resource: Option<String>,
        details: serde_json::Value,
    ) -> Result<()> {
        AuditEvent::new(event_type, stage, resource, details).log(&self.connect()?)
    }

    /// Event types recorded for `stage`, oldest first
    pub fn events(&self, stage: &str) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT event_type FROM pipeline_audit WHERE stage = ?1 ORDER BY timestamp, rowid",
        )?;
        let rows = stmt.query_map(params![stage], |row| row.get(0))?;
        let events = rows.collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_audit_event_creation() {
        let event = AuditEvent::new(
            AuditEventType::StageCompleted,
            "update_with_new_samples",
            Some("callsets/batch1.vcf.gz".to_string()),
            serde_json::json!({ "new_variants": 12 }),
        );

        assert_eq!(event.resource.as_deref(), Some("callsets/batch1.vcf.gz"));
        assert_eq!(event.result, "success");
        assert!(matches!(event.severity, LogSeverity::Info));
    }

    #[test]
    fn test_event_severity() {
        let incomplete = AuditEvent::new(
            AuditEventType::StageIncomplete,
            "update_reference_datasets",
            None,
            serde_json::json!({}),
        );
        assert!(matches!(incomplete.severity, LogSeverity::Warning));

        let failed = AuditEvent::new(AuditEventType::StageFailed, "init", None, serde_json::json!({}));
        assert!(matches!(failed.severity, LogSeverity::Error));
        assert_eq!(failed.result, "failure");
    }

    #[test]
    fn test_log_and_read_back() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("annotations.sqlite")).unwrap();
        log.log_event(AuditEventType::StageStarted, "s", None, serde_json::json!({}))
            .unwrap();
        log.log_event(AuditEventType::StageSkipped, "s", None, serde_json::json!({}))
            .unwrap();
        log.log_event(AuditEventType::StageStarted, "other", None, serde_json::json!({}))
            .unwrap();

        assert_eq!(log.events("s").unwrap(), vec!["stage_started", "stage_skipped"]);
    }
}

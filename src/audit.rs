/// Audit logging for operations that change kernel state
///
/// Counter resets and commits are recorded as JSON lines so operators can
/// tell when and by whom accounting data was cleared.
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

use crate::core::engine::Engine;
use crate::core::snapshot::CounterSnapshot;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ZeroCounters,
    Commit,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Type of event
    pub event_type: EventType,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    /// Creates a new audit event
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Creates an audit log writing to `log_path`
    pub fn at(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()
    }

    /// Reads the most recent events, newest first
    ///
    /// Lines that are not valid events are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = std::fs::read_to_string(&self.log_path)?;

        Ok(content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect())
    }
}

/// Records a counter reset of one chain
pub fn log_zero_counters(log: &AuditLog, table: &str, chain: &str, error: Option<String>) {
    let details = serde_json::json!({
        "table": table,
        "chain": chain,
    });
    let event = AuditEvent::new(EventType::ZeroCounters, error.is_none(), details, error);
    if let Err(e) = log.log(&event) {
        tracing::warn!("Failed to write audit event: {}", e);
    }
}

/// Records the commit that ends a session
pub fn log_commit(log: &AuditLog, table: &str, error: Option<String>) {
    let details = serde_json::json!({ "table": table });
    let event = AuditEvent::new(EventType::Commit, error.is_none(), details, error);
    if let Err(e) = log.log(&event) {
        tracing::warn!("Failed to write audit event: {}", e);
    }
}

/// Zeroes `chains` in `snapshot`, then commits and closes it.
///
/// Every reset and the final commit are recorded in `log`. The first chain
/// that fails to zero stops the run: the resets already made are still
/// committed, and that commit is audited, before the zero error is returned.
///
/// # Errors
///
/// The first zeroing error, otherwise the commit error.
///
/// # Panics
///
/// If the snapshot is already closed.
pub fn zero_chains<E: Engine>(
    snapshot: &mut CounterSnapshot<E>,
    chains: &[String],
    log: Option<&AuditLog>,
) -> crate::Result<()> {
    let table = snapshot.table().to_string();

    let mut zeroed = Ok(());
    for chain in chains {
        let result = snapshot.zero_counters(chain);
        if let Some(log) = log {
            let error = result.as_ref().err().map(ToString::to_string);
            log_zero_counters(log, &table, chain, error);
        }
        if result.is_err() {
            zeroed = result;
            break;
        }
    }

    let committed = snapshot.close();
    if let Some(log) = log {
        let error = committed.as_ref().err().map(ToString::to_string);
        log_commit(log, &table, error);
    }
    if zeroed.is_err() && committed.is_ok() {
        tracing::warn!(table = %table, "zeroing stopped early, earlier resets were committed");
    }
    zeroed.and(committed)
}

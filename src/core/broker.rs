use crate::core::db;
use crate::core::error;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub const AUDIT_LOG_NAME: &str = "broker.events.jsonl";

/// Every read and write of persisted pack state goes through the broker:
/// connections are serialized in-process and each operation is appended to
/// the audit log.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub project_id: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join(AUDIT_LOG_NAME),
        }
    }

    pub fn audit_log_path(&self) -> &Path {
        &self.audit_log_path
    }

    /// Execute a closure with a serialized connection to the specified DB.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        project_id: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::SpecPackError>
    where
        F: FnOnce(&Connection) -> Result<R, error::SpecPackError>,
    {
        static DB_LOCK: Mutex<()> = Mutex::new(());
        let _lock = DB_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(db_path)?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        debug!(op = op_name, db = %db_id, status, "broker op");
        self.log_event(actor, project_id, op_name, &db_id, status)?;

        result
    }

    fn log_event(
        &self,
        actor: &str,
        project_id: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), error::SpecPackError> {
        let ev = BrokerEvent {
            ts: time::now_utc(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            project_id: project_id.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }

    pub fn read_events(&self) -> Result<Vec<BrokerEvent>, error::SpecPackError> {
        if !self.audit_log_path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.audit_log_path)?;
        raw.lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(error::SpecPackError::from))
            .collect()
    }
}

//! On-disk store handle.
//!
//! A `Store` is the SQLite-backed home of everything mutable: base pack
//! pointers, governance locks and proposal records. The pure engine never
//! touches it; hosts hand it to the adoption workflow through the store traits
//! (`ProjectRepository`, `GovernanceStore`, `ProposalStore`).

use crate::core::broker::DbBroker;
use crate::core::error;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

/// Actor recorded in the audit log when the caller does not name one.
pub const DEFAULT_ACTOR: &str = "specpack";

#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store data directory
    pub root: PathBuf,
    /// Actor recorded for every brokered operation
    pub actor: String,
}

impl Store {
    /// Opens (creating if needed) the store under `root` and applies the schema.
    pub fn open(root: &Path) -> Result<Self, error::SpecPackError> {
        fs::create_dir_all(root)?;
        let store = Self {
            root: root.to_path_buf(),
            actor: DEFAULT_ACTOR.to_string(),
        };
        store.with_conn(None, "store.init", |conn| {
            for ddl in schemas::ALL_SCHEMAS {
                conn.execute(ddl, [])?;
            }
            Ok(())
        })?;
        Ok(store)
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join(schemas::PACK_DB_NAME)
    }

    pub fn broker(&self) -> DbBroker {
        DbBroker::new(&self.root)
    }

    pub fn with_conn<F, R>(
        &self,
        project_id: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, error::SpecPackError>
    where
        F: FnOnce(&Connection) -> Result<R, error::SpecPackError>,
    {
        self.broker()
            .with_conn(&self.db_path(), &self.actor, project_id, op_name, f)
    }
}

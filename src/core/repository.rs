//! Base pack pointer per project, owned by the caller.

use crate::core::error::SpecPackError;
use crate::core::pack::{self, SpecPack};
use crate::core::store::Store;
use crate::core::time;
use rusqlite::{OptionalExtension, Transaction, TransactionBehavior, params};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

pub trait ProjectRepository {
    fn get_base(&self, project_id: &str) -> Result<Option<SpecPack>, SpecPackError>;

    /// Compare-and-swap: replaces the base only if its current hash equals
    /// `expected_prior_sha256` (`None` meaning "no base yet").
    fn try_set_base(
        &self,
        project_id: &str,
        expected_prior_sha256: Option<&str>,
        new_pack: &SpecPack,
    ) -> Result<(), SpecPackError>;

    fn base_sha256(&self, project_id: &str) -> Result<Option<String>, SpecPackError> {
        Ok(self
            .get_base(project_id)?
            .map(|p| p.pack_sha256().to_string()))
    }
}

fn check_swap(
    project_id: &str,
    expected: Option<&str>,
    actual: Option<&str>,
    new_pack: &SpecPack,
) -> Result<(), SpecPackError> {
    if new_pack.project_id() != project_id {
        return Err(SpecPackError::ValidationError(format!(
            "pack belongs to project '{}', not '{project_id}'",
            new_pack.project_id()
        )));
    }
    if expected != actual {
        warn!(project_id, ?expected, ?actual, "base moved before swap");
        return Err(SpecPackError::BaseMoved {
            project_id: project_id.to_string(),
            expected: expected.map(str::to_string),
            actual: actual.map(str::to_string),
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryRepository {
    bases: Mutex<HashMap<String, SpecPack>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectRepository for MemoryRepository {
    fn get_base(&self, project_id: &str) -> Result<Option<SpecPack>, SpecPackError> {
        let bases = self.bases.lock().unwrap_or_else(|p| p.into_inner());
        Ok(bases.get(project_id).cloned())
    }

    fn try_set_base(
        &self,
        project_id: &str,
        expected_prior_sha256: Option<&str>,
        new_pack: &SpecPack,
    ) -> Result<(), SpecPackError> {
        let mut bases = self.bases.lock().unwrap_or_else(|p| p.into_inner());
        let actual = bases.get(project_id).map(|p| p.pack_sha256());
        check_swap(project_id, expected_prior_sha256, actual, new_pack)?;
        bases.insert(project_id.to_string(), new_pack.clone());
        info!(project_id, pack_sha256 = %new_pack.pack_sha256(), "base updated");
        Ok(())
    }
}

impl ProjectRepository for Store {
    fn get_base(&self, project_id: &str) -> Result<Option<SpecPack>, SpecPackError> {
        let row: Option<(String, Vec<u8>)> =
            self.with_conn(Some(project_id), "base.get", |conn| {
                Ok(conn
                    .query_row(
                        "SELECT pack_sha256, archive FROM base_packs WHERE project_id = ?1",
                        params![project_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?)
            })?;
        match row {
            None => Ok(None),
            Some((sha, archive)) => pack::verify_pack(&archive, &sha).map(Some),
        }
    }

    fn base_sha256(&self, project_id: &str) -> Result<Option<String>, SpecPackError> {
        self.with_conn(Some(project_id), "base.sha", |conn| {
            Ok(conn
                .query_row(
                    "SELECT pack_sha256 FROM base_packs WHERE project_id = ?1",
                    params![project_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }

    fn try_set_base(
        &self,
        project_id: &str,
        expected_prior_sha256: Option<&str>,
        new_pack: &SpecPack,
    ) -> Result<(), SpecPackError> {
        let archive = new_pack.to_archive_bytes()?;
        self.with_conn(Some(project_id), "base.swap", |conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            let actual: Option<String> = tx
                .query_row(
                    "SELECT pack_sha256 FROM base_packs WHERE project_id = ?1",
                    params![project_id],
                    |row| row.get(0),
                )
                .optional()?;
            check_swap(project_id, expected_prior_sha256, actual.as_deref(), new_pack)?;
            tx.execute(
                "INSERT INTO base_packs(project_id, pack_sha256, archive, updated_at) VALUES(?1, ?2, ?3, ?4)
                 ON CONFLICT(project_id) DO UPDATE SET pack_sha256 = excluded.pack_sha256,
                     archive = excluded.archive, updated_at = excluded.updated_at",
                params![project_id, new_pack.pack_sha256(), archive, time::now_utc()],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        info!(project_id, pack_sha256 = %new_pack.pack_sha256(), "base updated");
        Ok(())
    }
}

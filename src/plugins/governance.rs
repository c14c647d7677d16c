//! Per-project governance lock.
//!
//! `Unlocked → Locked → Unlocked → …`, and only explicit operator actions
//! move between states. Every adoption-bound mutation calls
//! [`ensure_unlocked`] first and fails fast with `LockedPack`.

use crate::core::error::SpecPackError;
use crate::core::hash;
use crate::core::output;
use crate::core::repository::ProjectRepository;
use crate::core::store::Store;
use crate::core::time;
use clap::{Parser, Subcommand};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[clap(name = "gov", about = "Lock or unlock a project's spec pack")]
pub struct GovernanceCli {
    #[clap(subcommand)]
    pub command: GovernanceCommand,
}

#[derive(Subcommand, Debug)]
pub enum GovernanceCommand {
    /// Show the lock state of a project.
    Status {
        #[clap(long)]
        project: String,
    },
    /// Lock a project at a pack hash (defaults to the current base).
    Lock {
        #[clap(long)]
        project: String,
        #[clap(long)]
        pack_sha256: Option<String>,
    },
    /// Unlock a project.
    Unlock {
        #[clap(long)]
        project: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceState {
    pub project_id: String,
    pub locked: bool,
    pub locked_at_utc: Option<String>,
    pub locked_pack_sha256: Option<String>,
}

impl GovernanceState {
    pub fn unlocked(project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            locked: false,
            locked_at_utc: None,
            locked_pack_sha256: None,
        }
    }
}

pub trait GovernanceStore {
    fn load_state(&self, project_id: &str) -> Result<Option<GovernanceState>, SpecPackError>;
    fn save_state(&self, state: &GovernanceState) -> Result<(), SpecPackError>;
}

pub fn state<S: GovernanceStore + ?Sized>(
    store: &S,
    project_id: &str,
) -> Result<GovernanceState, SpecPackError> {
    Ok(store
        .load_state(project_id)?
        .unwrap_or_else(|| GovernanceState::unlocked(project_id)))
}

pub fn is_locked<S: GovernanceStore + ?Sized>(
    store: &S,
    project_id: &str,
) -> Result<bool, SpecPackError> {
    Ok(state(store, project_id)?.locked)
}

pub fn ensure_unlocked<S: GovernanceStore + ?Sized>(
    store: &S,
    project_id: &str,
) -> Result<(), SpecPackError> {
    let current = state(store, project_id)?;
    if current.locked {
        let locked_pack_sha256 = current.locked_pack_sha256.unwrap_or_default();
        warn!(project_id, locked_pack_sha256 = %locked_pack_sha256, "refusing mutation of locked project");
        return Err(SpecPackError::LockedPack {
            project_id: project_id.to_string(),
            locked_pack_sha256,
        });
    }
    Ok(())
}

pub fn lock<S: GovernanceStore + ?Sized>(
    store: &S,
    project_id: &str,
    pack_sha256: &str,
) -> Result<GovernanceState, SpecPackError> {
    if !hash::is_sha256_hex(pack_sha256) {
        return Err(SpecPackError::ValidationError(format!(
            "'{pack_sha256}' is not a full lowercase sha256"
        )));
    }
    let current = state(store, project_id)?;
    if current.locked {
        return Err(SpecPackError::ValidationError(format!(
            "project '{project_id}' is already locked at {}",
            current.locked_pack_sha256.unwrap_or_default()
        )));
    }
    let next = GovernanceState {
        project_id: project_id.to_string(),
        locked: true,
        locked_at_utc: Some(time::now_utc()),
        locked_pack_sha256: Some(pack_sha256.to_string()),
    };
    store.save_state(&next)?;
    info!(project_id, pack_sha256, "project locked");
    Ok(next)
}

/// Unlocking an unlocked project is a no-op.
pub fn unlock<S: GovernanceStore + ?Sized>(
    store: &S,
    project_id: &str,
) -> Result<GovernanceState, SpecPackError> {
    let current = state(store, project_id)?;
    if !current.locked {
        return Ok(current);
    }
    let next = GovernanceState::unlocked(project_id);
    store.save_state(&next)?;
    info!(project_id, "project unlocked");
    Ok(next)
}

#[derive(Debug, Default)]
pub struct MemoryGovernance {
    states: Mutex<HashMap<String, GovernanceState>>,
}

impl MemoryGovernance {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GovernanceStore for MemoryGovernance {
    fn load_state(&self, project_id: &str) -> Result<Option<GovernanceState>, SpecPackError> {
        let states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        Ok(states.get(project_id).cloned())
    }

    fn save_state(&self, state: &GovernanceState) -> Result<(), SpecPackError> {
        let mut states = self.states.lock().unwrap_or_else(|p| p.into_inner());
        states.insert(state.project_id.clone(), state.clone());
        Ok(())
    }
}

impl GovernanceStore for Store {
    fn load_state(&self, project_id: &str) -> Result<Option<GovernanceState>, SpecPackError> {
        self.with_conn(Some(project_id), "governance.load", |conn| {
            Ok(conn
                .query_row(
                    "SELECT locked, locked_at_utc, locked_pack_sha256 FROM governance WHERE project_id = ?1",
                    params![project_id],
                    |row| {
                        Ok(GovernanceState {
                            project_id: project_id.to_string(),
                            locked: row.get::<_, i64>(0)? != 0,
                            locked_at_utc: row.get(1)?,
                            locked_pack_sha256: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    fn save_state(&self, state: &GovernanceState) -> Result<(), SpecPackError> {
        self.with_conn(Some(&state.project_id), "governance.save", |conn| {
            conn.execute(
                "INSERT INTO governance(project_id, locked, locked_at_utc, locked_pack_sha256, updated_at)
                 VALUES(?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(project_id) DO UPDATE SET locked = excluded.locked,
                     locked_at_utc = excluded.locked_at_utc,
                     locked_pack_sha256 = excluded.locked_pack_sha256,
                     updated_at = excluded.updated_at",
                params![
                    state.project_id,
                    state.locked as i64,
                    state.locked_at_utc,
                    state.locked_pack_sha256,
                    time::now_utc()
                ],
            )?;
            Ok(())
        })
    }
}

pub fn run_governance_cli(
    store: &Store,
    cli: GovernanceCli,
    format: &str,
) -> Result<(), SpecPackError> {
    let (cmd, next) = match cli.command {
        GovernanceCommand::Status { project } => ("gov.status", state(store, &project)?),
        GovernanceCommand::Lock {
            project,
            pack_sha256,
        } => {
            let sha = match pack_sha256 {
                Some(sha) => sha,
                None => store.base_sha256(&project)?.ok_or_else(|| {
                    SpecPackError::NotFound(format!(
                        "project '{project}' has no base; pass --pack-sha256"
                    ))
                })?,
            };
            ("gov.lock", lock(store, &project, &sha)?)
        }
        GovernanceCommand::Unlock { project } => ("gov.unlock", unlock(store, &project)?),
    };
    output::emit(format, cmd, serde_json::to_value(&next)?, || {
        match (next.locked, next.locked_pack_sha256.as_deref()) {
            (true, Some(sha)) => format!("{}: locked at {}", next.project_id, hash::short_hash(sha)),
            _ => format!("{}: unlocked", next.project_id),
        }
    })
}

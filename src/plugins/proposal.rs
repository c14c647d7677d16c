//! Content-addressed proposal records.
//!
//! A proposal's id is derived from the proposal pack hash, so regenerating
//! the same content yields the same id and the store keeps a single record.
//! Regenerating against the same base returns the first record unchanged.
//! Regenerating against a different base replaces the stored record, so a
//! stale proposal can be refreshed under its existing id.

use crate::core::canonical;
use crate::core::error::SpecPackError;
use crate::core::hash;
use crate::core::output;
use crate::core::pack::SpecPack;
use crate::core::patch::Patch;
use crate::core::store::Store;
use clap::{Parser, Subcommand};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

pub const PROPOSAL_SCHEMA_V1: &str = "specpack.proposal.v1";
pub const PROPOSAL_SCHEMA_V2: &str = "specpack.proposal.v2";
pub const PROPOSAL_ID_PREFIX: &str = "proposal-";
/// Hex characters of the proposal pack hash used in the id.
pub const PROPOSAL_ID_HASH_LEN: usize = 16;
pub const DEFAULT_KIND: &str = "spec_patch";
pub const DEFAULT_NEXT_STEP_LABEL: &str = "Review and apply";

#[derive(Parser, Debug)]
#[clap(name = "proposal", about = "Inspect and adopt proposals")]
pub struct ProposalCli {
    #[clap(subcommand)]
    pub command: ProposalCommand,
}

#[derive(Subcommand, Debug)]
pub enum ProposalCommand {
    /// List proposals for a project, oldest first.
    List {
        #[clap(long)]
        project: String,
    },
    /// Show one proposal record.
    Show {
        #[clap(long)]
        id: String,
    },
    /// Apply a proposal to the project's base and make the result the new base.
    Adopt {
        #[clap(long)]
        project: String,
        #[clap(long)]
        id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub base_pack_sha256: String,
    pub proposal_pack_sha256: String,
    pub spel_file_sha256: Option<String>,
}

impl Evidence {
    /// Evidence for a proposal computed from `base` to `proposal`.
    pub fn between(base: &SpecPack, proposal: &SpecPack) -> Result<Self, SpecPackError> {
        Ok(Self {
            base_pack_sha256: base.pack_sha256().to_string(),
            proposal_pack_sha256: proposal.pack_sha256().to_string(),
            spel_file_sha256: spel_evidence(proposal)?,
        })
    }
}

/// Hash of the pack's `.spel` content: the file hash when there is one spel
/// file, or the hash of the canonical path→hash map when there are several.
pub fn spel_evidence(pack: &SpecPack) -> Result<Option<String>, SpecPackError> {
    let spel: BTreeMap<&str, &str> = pack
        .files()
        .values()
        .filter(|f| f.path.ends_with(".spel"))
        .map(|f| (f.path.as_str(), f.sha256.as_str()))
        .collect();
    match spel.len() {
        0 => Ok(None),
        1 => Ok(spel.values().next().map(|s| s.to_string())),
        _ => Ok(Some(hash::sha256_hex(&canonical::to_canonical_bytes(&spel)?))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyLink {
    pub next_step_href: String,
    pub next_step_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub kind: String,
    pub created_at_utc: String,
    pub summary: String,
    pub rationale: Vec<String>,
    pub patch: Patch,
    pub evidence: Evidence,
    pub apply: ApplyLink,
}

impl Proposal {
    pub fn project_id(&self) -> &str {
        &self.patch.base_project_id
    }
}

/// First record shape, written before proposals carried an apply link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalV1 {
    pub id: String,
    pub kind: String,
    pub created_at_utc: String,
    pub summary: String,
    pub rationale: Vec<String>,
    pub patch: Patch,
    pub evidence: Evidence,
}

impl ProposalV1 {
    pub fn upgrade(self) -> Proposal {
        let apply = default_apply_link(&self.patch.base_project_id, &self.id, DEFAULT_NEXT_STEP_LABEL);
        Proposal {
            id: self.id,
            kind: self.kind,
            created_at_utc: self.created_at_utc,
            summary: self.summary,
            rationale: self.rationale,
            patch: self.patch,
            evidence: self.evidence,
            apply,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum ProposalRecord {
    #[serde(rename = "specpack.proposal.v1")]
    V1(ProposalV1),
    #[serde(rename = "specpack.proposal.v2")]
    V2(Proposal),
}

impl ProposalRecord {
    pub fn into_current(self) -> Proposal {
        match self {
            ProposalRecord::V1(v1) => v1.upgrade(),
            ProposalRecord::V2(v2) => v2,
        }
    }
}

pub fn parse_record(raw: &str) -> Result<Proposal, SpecPackError> {
    let value: JsonValue = serde_json::from_str(raw)?;
    match value.get("schema").and_then(JsonValue::as_str) {
        Some(PROPOSAL_SCHEMA_V1) | Some(PROPOSAL_SCHEMA_V2) => {}
        Some(other) => {
            return Err(SpecPackError::ValidationError(format!(
                "unknown proposal schema '{other}'"
            )));
        }
        None => {
            return Err(SpecPackError::ValidationError(
                "proposal record has no schema tag".to_string(),
            ));
        }
    }
    let record: ProposalRecord = serde_json::from_value(value)?;
    Ok(record.into_current())
}

pub fn record_json(proposal: &Proposal) -> Result<String, SpecPackError> {
    canonical::to_canonical_string(&ProposalRecord::V2(proposal.clone()))
}

pub fn proposal_id(proposal_pack_sha256: &str) -> Result<String, SpecPackError> {
    if !hash::is_sha256_hex(proposal_pack_sha256) {
        return Err(SpecPackError::ValidationError(format!(
            "'{proposal_pack_sha256}' is not a full lowercase sha256"
        )));
    }
    Ok(format!(
        "{PROPOSAL_ID_PREFIX}{}",
        &proposal_pack_sha256[..PROPOSAL_ID_HASH_LEN]
    ))
}

pub fn default_apply_link(project_id: &str, id: &str, label: &str) -> ApplyLink {
    ApplyLink {
        next_step_href: format!("/projects/{project_id}/proposals/{id}/apply"),
        next_step_label: label.to_string(),
    }
}

/// Caller-chosen fields of a new proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalMeta {
    pub kind: String,
    pub created_at_utc: String,
    pub rationale: Vec<String>,
    pub next_step_label: String,
}

impl ProposalMeta {
    pub fn new(created_at_utc: impl Into<String>) -> Self {
        Self {
            kind: DEFAULT_KIND.to_string(),
            created_at_utc: created_at_utc.into(),
            rationale: Vec::new(),
            next_step_label: DEFAULT_NEXT_STEP_LABEL.to_string(),
        }
    }
}

/// Builds a proposal value without storing it. The evidence must agree with
/// the pack hashes the patch was computed between.
pub fn build_proposal(
    patch: Patch,
    evidence: Evidence,
    meta: ProposalMeta,
) -> Result<Proposal, SpecPackError> {
    if patch.base_pack_sha256 != evidence.base_pack_sha256 {
        return Err(SpecPackError::HashMismatch {
            label: "evidence.base_pack_sha256".to_string(),
            expected: patch.base_pack_sha256,
            actual: evidence.base_pack_sha256,
        });
    }
    if patch.target_pack_sha256 != evidence.proposal_pack_sha256 {
        return Err(SpecPackError::HashMismatch {
            label: "evidence.proposal_pack_sha256".to_string(),
            expected: patch.target_pack_sha256,
            actual: evidence.proposal_pack_sha256,
        });
    }
    let id = proposal_id(&evidence.proposal_pack_sha256)?;
    let apply = default_apply_link(&patch.base_project_id, &id, &meta.next_step_label);
    Ok(Proposal {
        id,
        kind: meta.kind,
        created_at_utc: meta.created_at_utc,
        summary: patch.summary.clone(),
        rationale: meta.rationale,
        patch,
        evidence,
        apply,
    })
}

/// What [`ProposalStore::upsert`] did with an incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    /// A record with the same id and base already existed and was kept.
    Kept,
    /// The stored record was computed against another base and was replaced.
    Superseded,
}

/// Whether `incoming` should replace `existing` under the same id.
pub fn supersedes(existing: &Proposal, incoming: &Proposal) -> bool {
    existing.evidence.base_pack_sha256 != incoming.evidence.base_pack_sha256
}

pub trait ProposalStore {
    /// Stores `proposal` under its id. An existing record is kept when it
    /// was computed against the same base and replaced otherwise. Returns
    /// the record now stored.
    fn upsert(&self, proposal: &Proposal) -> Result<(Proposal, Upsert), SpecPackError>;
    fn get(&self, id: &str) -> Result<Option<Proposal>, SpecPackError>;
    /// Ordered by `(created_at_utc, id)`.
    fn list(&self, project_id: &str) -> Result<Vec<Proposal>, SpecPackError>;
}

pub fn create<S: ProposalStore + ?Sized>(
    store: &S,
    patch: Patch,
    evidence: Evidence,
    meta: ProposalMeta,
) -> Result<Proposal, SpecPackError> {
    let proposal = build_proposal(patch, evidence, meta)?;
    let (stored, outcome) = store.upsert(&proposal)?;
    match outcome {
        Upsert::Inserted => {
            info!(id = %stored.id, project_id = %stored.project_id(), "proposal recorded");
        }
        Upsert::Kept => {
            debug!(id = %stored.id, "proposal already recorded; keeping first record");
        }
        Upsert::Superseded => {
            info!(
                id = %stored.id,
                base = %hash::short_hash(&stored.evidence.base_pack_sha256),
                "proposal regenerated against a new base"
            );
        }
    }
    Ok(stored)
}

/// Why `proposal` cannot be applied to the project's current base, if anything.
pub fn staleness(
    proposal: &Proposal,
    project_id: &str,
    current_base_sha256: &str,
) -> Option<String> {
    if proposal.patch.base_project_id != project_id {
        return Some(format!(
            "proposal belongs to project '{}', not '{project_id}'",
            proposal.patch.base_project_id
        ));
    }
    if proposal.evidence.base_pack_sha256 != current_base_sha256 {
        return Some(format!(
            "computed against base {} but the current base is {}",
            hash::short_hash(&proposal.evidence.base_pack_sha256),
            hash::short_hash(current_base_sha256)
        ));
    }
    None
}

pub fn is_applyable(proposal: &Proposal, project_id: &str, current_base_sha256: &str) -> bool {
    staleness(proposal, project_id, current_base_sha256).is_none()
}

pub fn ensure_applyable(
    proposal: &Proposal,
    project_id: &str,
    current_base_sha256: &str,
) -> Result<(), SpecPackError> {
    match staleness(proposal, project_id, current_base_sha256) {
        None => Ok(()),
        Some(reason) => {
            warn!(id = %proposal.id, %reason, "stale proposal");
            Err(SpecPackError::StaleProposal {
                id: proposal.id.clone(),
                reason,
            })
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryProposalStore {
    records: Mutex<BTreeMap<String, Proposal>>,
}

impl MemoryProposalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProposalStore for MemoryProposalStore {
    fn upsert(&self, proposal: &Proposal) -> Result<(Proposal, Upsert), SpecPackError> {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let outcome = match records.get(&proposal.id) {
            None => Upsert::Inserted,
            Some(existing) if supersedes(existing, proposal) => Upsert::Superseded,
            Some(existing) => return Ok((existing.clone(), Upsert::Kept)),
        };
        records.insert(proposal.id.clone(), proposal.clone());
        Ok((proposal.clone(), outcome))
    }

    fn get(&self, id: &str) -> Result<Option<Proposal>, SpecPackError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records.get(id).cloned())
    }

    fn list(&self, project_id: &str) -> Result<Vec<Proposal>, SpecPackError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let mut out: Vec<Proposal> = records
            .values()
            .filter(|p| p.project_id() == project_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.created_at_utc
                .cmp(&b.created_at_utc)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }
}

impl ProposalStore for Store {
    fn upsert(&self, proposal: &Proposal) -> Result<(Proposal, Upsert), SpecPackError> {
        let record = record_json(proposal)?;
        self.with_conn(Some(proposal.project_id()), "proposal.upsert", |conn| {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT record FROM proposals WHERE id = ?1",
                    params![proposal.id],
                    |row| row.get(0),
                )
                .optional()?;
            let outcome = match existing.as_deref().map(parse_record).transpose()? {
                None => Upsert::Inserted,
                Some(existing) if supersedes(&existing, proposal) => Upsert::Superseded,
                Some(existing) => return Ok((existing, Upsert::Kept)),
            };
            conn.execute(
                "INSERT OR REPLACE INTO proposals(id, project_id, created_at_utc, record) VALUES(?1, ?2, ?3, ?4)",
                params![
                    proposal.id,
                    proposal.project_id(),
                    proposal.created_at_utc,
                    record
                ],
            )?;
            Ok((proposal.clone(), outcome))
        })
    }

    fn get(&self, id: &str) -> Result<Option<Proposal>, SpecPackError> {
        let raw: Option<String> = self.with_conn(None, "proposal.get", |conn| {
            Ok(conn
                .query_row(
                    "SELECT record FROM proposals WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        raw.as_deref().map(parse_record).transpose()
    }

    fn list(&self, project_id: &str) -> Result<Vec<Proposal>, SpecPackError> {
        let raws: Vec<String> = self.with_conn(Some(project_id), "proposal.list", |conn| {
            let mut stmt = conn.prepare(
                "SELECT record FROM proposals WHERE project_id = ?1 ORDER BY created_at_utc, id",
            )?;
            let rows = stmt.query_map(params![project_id], |row| row.get(0))?;
            let mut out = Vec::new();
            for r in rows {
                out.push(r?);
            }
            Ok(out)
        })?;
        raws.iter().map(|r| parse_record(r)).collect()
    }
}

fn proposal_line(p: &Proposal) -> String {
    format!(
        "{}  {}  {}  {}",
        p.id,
        p.created_at_utc,
        hash::short_hash(&p.evidence.base_pack_sha256),
        output::compact_line(&p.summary, 60)
    )
}

/// Adoption needs the repository and governance gate too, so `adopt` is
/// dispatched through [`crate::plugins::adopt::run_adopt`].
pub fn run_proposal_cli(
    store: &Store,
    cli: ProposalCli,
    format: &str,
) -> Result<(), SpecPackError> {
    match cli.command {
        ProposalCommand::List { project } => {
            let proposals = store.list(&project)?;
            output::emit(format, "proposal.list", serde_json::json!({ "proposals": proposals }), || {
                if proposals.is_empty() {
                    format!("no proposals for {project}")
                } else {
                    proposals.iter().map(proposal_line).collect::<Vec<_>>().join("\n")
                }
            })
        }
        ProposalCommand::Show { id } => {
            let proposal = store
                .get(&id)?
                .ok_or_else(|| SpecPackError::NotFound(format!("proposal '{id}'")))?;
            output::emit(format, "proposal.show", serde_json::json!({ "proposal": proposal }), || {
                format!(
                    "{}\n{}",
                    proposal_line(&proposal),
                    proposal.patch.patch_text
                )
            })
        }
        ProposalCommand::Adopt { project, id } => {
            crate::plugins::adopt::run_adopt(store, &project, &id, format)
        }
    }
}

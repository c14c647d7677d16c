//! Propose and adopt: the only path by which a project's base pack changes.
//!
//! Both sides check the governance lock before doing any work. Adoption
//! re-checks the lock and compare-and-swaps the base immediately before
//! committing, so two concurrent adoptions cannot both land.

use crate::core::config::SpecPackConfig;
use crate::core::diff::{self, DEFAULT_CONTEXT_LINES};
use crate::core::error::SpecPackError;
use crate::core::hash;
use crate::core::output;
use crate::core::pack::{self, SpecPack};
use crate::core::patch::{self, ApplyOutcome, Patch};
use crate::core::repository::ProjectRepository;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::governance::{self, GovernanceStore};
use crate::plugins::proposal::{self, Evidence, Proposal, ProposalMeta, ProposalStore};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(clap::Args, Debug)]
pub struct ProposeCli {
    #[clap(long)]
    pub project: String,
    /// Candidate pack archive.
    #[clap(long)]
    pub pack: PathBuf,
    #[clap(long)]
    pub summary: Option<String>,
    /// May be repeated.
    #[clap(long)]
    pub rationale: Vec<String>,
    /// Defaults to the current time.
    #[clap(long)]
    pub created_at: Option<String>,
}

/// Options for [`Adoption::propose`].
#[derive(Debug, Clone)]
pub struct ProposeRequest {
    /// Empty means "use the diff summary line".
    pub summary: String,
    pub meta: ProposalMeta,
    pub context_lines: usize,
}

impl ProposeRequest {
    pub fn new(created_at_utc: impl Into<String>) -> Self {
        Self {
            summary: String::new(),
            meta: ProposalMeta::new(created_at_utc),
            context_lines: DEFAULT_CONTEXT_LINES,
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn rationale(mut self, line: impl Into<String>) -> Self {
        self.meta.rationale.push(line.into());
        self
    }
}

pub struct Adoption<'a> {
    pub repository: &'a dyn ProjectRepository,
    pub governance: &'a dyn GovernanceStore,
    pub proposals: &'a dyn ProposalStore,
}

impl<'a> Adoption<'a> {
    pub fn new(
        repository: &'a dyn ProjectRepository,
        governance: &'a dyn GovernanceStore,
        proposals: &'a dyn ProposalStore,
    ) -> Self {
        Self {
            repository,
            governance,
            proposals,
        }
    }

    /// The adopted base, or an empty pack for a project that has none yet.
    pub fn current_base(&self, project_id: &str) -> Result<SpecPack, SpecPackError> {
        match self.repository.get_base(project_id)? {
            Some(base) => Ok(base),
            None => SpecPack::empty(project_id),
        }
    }

    /// Diffs `candidate` against the current base and records the result as
    /// a proposal. An unchanged candidate is refused.
    pub fn propose(
        &self,
        project_id: &str,
        candidate: &SpecPack,
        request: ProposeRequest,
    ) -> Result<Proposal, SpecPackError> {
        governance::ensure_unlocked(self.governance, project_id)?;
        if candidate.project_id() != project_id {
            return Err(SpecPackError::ValidationError(format!(
                "candidate pack belongs to project '{}', not '{project_id}'",
                candidate.project_id()
            )));
        }
        let base = self.current_base(project_id)?;
        let report = diff::diff_with_context(&base, candidate, request.context_lines);
        if report.is_empty() {
            return Err(SpecPackError::ValidationError(format!(
                "candidate has no changes against base {}",
                base.pack_sha256()
            )));
        }
        debug!(project_id, changes = %report.summary_line(), "diffed candidate");
        let summary = if request.summary.trim().is_empty() {
            report.summary_line()
        } else {
            request.summary
        };
        let patch = patch::build_patch(&base, candidate, &report, &summary, project_id)?;
        let evidence = Evidence::between(&base, candidate)?;
        proposal::create(self.proposals, patch, evidence, request.meta)
    }

    /// Applies a stored proposal to the current base and advances the base
    /// to the merged pack.
    pub fn adopt(&self, project_id: &str, proposal_id: &str) -> Result<SpecPack, SpecPackError> {
        governance::ensure_unlocked(self.governance, project_id)?;
        let proposal = self
            .proposals
            .get(proposal_id)?
            .ok_or_else(|| SpecPackError::NotFound(format!("proposal '{proposal_id}'")))?;
        let stored = self.repository.get_base(project_id)?;
        let base = match &stored {
            Some(base) => base.clone(),
            None => SpecPack::empty(project_id)?,
        };
        proposal::ensure_applyable(&proposal, project_id, base.pack_sha256())?;

        let merged = patch::apply_patch(&base, &proposal.patch)?.into_result()?;
        if merged.pack_sha256() != proposal.evidence.proposal_pack_sha256 {
            return Err(SpecPackError::HashMismatch {
                label: format!("{proposal_id} merged pack"),
                expected: proposal.evidence.proposal_pack_sha256.clone(),
                actual: merged.pack_sha256().to_string(),
            });
        }

        let expected_prior = stored.as_ref().map(|b| b.pack_sha256());
        governance::ensure_unlocked(self.governance, project_id)?;
        self.repository
            .try_set_base(project_id, expected_prior, &merged)?;
        info!(
            project_id,
            proposal_id,
            pack_sha256 = %merged.pack_sha256(),
            "proposal adopted"
        );
        Ok(merged)
    }

    /// Replaces the base outright, still subject to the lock and to the
    /// compare-and-swap on `expected_prior_sha256`.
    pub fn replace_base(
        &self,
        project_id: &str,
        expected_prior_sha256: Option<&str>,
        pack: &SpecPack,
    ) -> Result<(), SpecPackError> {
        governance::ensure_unlocked(self.governance, project_id)?;
        self.repository
            .try_set_base(project_id, expected_prior_sha256, pack)
    }
}

/// `build_patch` for a patch headed to adoption: refused while locked.
pub fn build_patch_for_adoption<G: GovernanceStore + ?Sized>(
    governance: &G,
    base: &SpecPack,
    proposal: &SpecPack,
    summary: &str,
    project_id: &str,
) -> Result<Patch, SpecPackError> {
    governance::ensure_unlocked(governance, project_id)?;
    let report = diff::diff(base, proposal);
    patch::build_patch(base, proposal, &report, summary, project_id)
}

/// `apply_patch` for a patch headed to adoption: refused while locked.
pub fn apply_for_adoption<G: GovernanceStore + ?Sized>(
    governance: &G,
    base: &SpecPack,
    patch: &Patch,
) -> Result<ApplyOutcome, SpecPackError> {
    governance::ensure_unlocked(governance, &patch.base_project_id)?;
    patch::apply_patch(base, patch)
}

pub fn run_propose(
    store: &Store,
    config: &SpecPackConfig,
    cli: ProposeCli,
    format: &str,
) -> Result<(), SpecPackError> {
    let candidate = pack::parse(&fs::read(&cli.pack)?)?;
    let mut request = ProposeRequest::new(cli.created_at.unwrap_or_else(time::now_utc));
    request.summary = cli.summary.unwrap_or_default();
    request.context_lines = config.diff_context_lines;
    request.meta.rationale = cli.rationale;
    request.meta.next_step_label = config.next_step_label.clone();

    let adoption = Adoption::new(store, store, store);
    let proposal = adoption.propose(&cli.project, &candidate, request)?;
    output::emit(format, "propose", serde_json::json!({ "proposal": proposal }), || {
        format!(
            "{}  {}\n{}",
            proposal.id, proposal.summary, proposal.apply.next_step_href
        )
    })
}

pub fn run_adopt(
    store: &Store,
    project_id: &str,
    proposal_id: &str,
    format: &str,
) -> Result<(), SpecPackError> {
    let adoption = Adoption::new(store, store, store);
    let merged = adoption.adopt(project_id, proposal_id)?;
    output::emit(
        format,
        "proposal.adopt",
        serde_json::json!({
            "project_id": project_id,
            "proposal_id": proposal_id,
            "pack_sha256": merged.pack_sha256(),
        }),
        || {
            format!(
                "{project_id}: adopted {proposal_id}, base is now {}",
                hash::short_hash(merged.pack_sha256())
            )
        },
    )
}

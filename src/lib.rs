//! specpack: a deterministic spec pack engine.
//!
//! A *pack* is a content-addressed ZIP of specification files plus a
//! canonical JSON manifest. Packs built from the same content hash the same
//! way regardless of construction order or wall-clock time, so they can be
//! diffed, patched, reviewed and merged without ever silently overwriting an
//! adopted base.
//!
//! # Architecture
//!
//! ## Pure engine
//!
//! - [`core::canonical`]: sorted-key, two-space JSON for every hashed record
//! - [`core::archive`]: deterministic ZIP encode/decode
//! - [`core::pack`]: manifest validation, pack identity, `PackBuilder`
//! - [`core::diff`] / [`core::unified`]: file-level diff and unified hunks
//! - [`core::patch`]: replayable patches with per-file conflict detection
//!
//! None of these touch disk or shared state.
//!
//! ## Caller-owned state
//!
//! All mutation routes through `DbBroker` (in-process serialization plus a
//! `broker.events.jsonl` audit log). The base pointer is a compare-and-swap
//! [`core::repository::ProjectRepository`]; the governance lock and the
//! proposal records are [`plugins::governance`] and [`plugins::proposal`].
//! [`plugins::adopt`] is the only path that advances a base.
//!
//! # Examples
//!
//! ```bash
//! specpack pack build --project shop --dir ./spec --out shop.zip
//! specpack propose --project shop --pack shop.zip
//! specpack proposal adopt --project shop --id proposal-3f2a9c01d4e5b6a7
//! specpack gov lock --project shop
//! ```

mod cli;
pub mod core;
pub mod plugins;

use cli::{BaseCommand, Cli, Command, DiffCli, PackCommand, PatchCommand};
use crate::core::{
    config::{self, SpecPackConfig},
    diff,
    error::SpecPackError,
    hash, output,
    pack::{self, PackBuilder, SpecPack},
    patch::{self, ApplyOutcome, Patch},
    repository::ProjectRepository,
    store::Store,
};
use crate::plugins::{adopt, governance, proposal};

use clap::Parser;
use std::fs;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter (`warn` when unset).
pub const LOG_ENV: &str = "SPECPACK_LOG";

pub fn init_logging() {
    let default_level = "warn";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV)
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_pack(path: &Path) -> Result<SpecPack, SpecPackError> {
    pack::parse(&fs::read(path)?)
}

fn write_pack(pack: &SpecPack, out: &Path) -> Result<(), SpecPackError> {
    fs::write(out, pack.to_archive_bytes()?)?;
    Ok(())
}

fn open_store(root: &Path, config: &SpecPackConfig) -> Result<Store, SpecPackError> {
    Store::open(&config.data_dir(root))
}

fn pack_summary(p: &SpecPack) -> serde_json::Value {
    serde_json::json!({
        "project_id": p.project_id(),
        "pack_sha256": p.pack_sha256(),
        "manifest": p.manifest(),
        "files": p.files().values().map(|f| serde_json::json!({
            "path": f.path,
            "sha256": f.sha256,
            "is_text": f.is_text,
            "size": f.bytes.len(),
        })).collect::<Vec<_>>(),
    })
}

fn pack_text(p: &SpecPack) -> String {
    let mut out = format!(
        "{} v{} {}\n",
        p.project_id(),
        p.manifest().pack_version,
        p.pack_sha256()
    );
    for f in p.files().values() {
        out.push_str(&format!("  {}  {}\n", hash::short_hash(&f.sha256), f.path));
    }
    out
}

fn run_pack(cmd: PackCommand, config: &SpecPackConfig, format: &str) -> Result<(), SpecPackError> {
    match cmd {
        PackCommand::Build {
            project,
            dir,
            out,
            pack_version,
            created_at,
        } => {
            let mut builder = PackBuilder::new(project).provenance(config.provenance());
            if let Some(v) = pack_version {
                builder = builder.pack_version(v);
            }
            if let Some(ts) = created_at {
                builder = builder.created_at(ts);
            }
            let built = builder.dir(&dir)?.build()?;
            write_pack(&built, &out)?;
            output::emit(format, "pack.build", pack_summary(&built), || pack_text(&built))
        }
        PackCommand::Inspect { pack: path } => {
            let parsed = read_pack(&path)?;
            output::emit(format, "pack.inspect", pack_summary(&parsed), || pack_text(&parsed))
        }
        PackCommand::Verify { pack: path, sha256 } => {
            let verified = pack::verify_pack(&fs::read(&path)?, &sha256)?;
            output::emit(format, "pack.verify", pack_summary(&verified), || {
                format!("ok {}", verified.pack_sha256())
            })
        }
    }
}

fn run_diff(args: DiffCli, config: &SpecPackConfig, format: &str) -> Result<(), SpecPackError> {
    let base = read_pack(&args.base)?;
    let proposal = read_pack(&args.proposal)?;
    let context = args.context.unwrap_or(config.diff_context_lines);
    let report = diff::diff_with_context(&base, &proposal, context);
    output::emit(format, "diff", serde_json::to_value(&report)?, || {
        if args.full {
            report.full_patch.clone()
        } else {
            output::render_diff_summary(&report)
        }
    })
}

fn run_patch(cmd: PatchCommand, format: &str) -> Result<(), SpecPackError> {
    match cmd {
        PatchCommand::Build {
            base,
            proposal,
            summary,
            project,
            out,
        } => {
            let base = read_pack(&base)?;
            let proposal = read_pack(&proposal)?;
            let report = diff::diff(&base, &proposal);
            let summary = summary.unwrap_or_else(|| report.summary_line());
            let project = project.unwrap_or_else(|| base.project_id().to_string());
            let built = patch::build_patch(&base, &proposal, &report, &summary, &project)?;
            fs::write(&out, crate::core::canonical::to_canonical_bytes(&built)?)?;
            output::emit(
                format,
                "patch.build",
                serde_json::json!({
                    "patch_sha256": built.canonical_hash_hex()?,
                    "summary": built.summary,
                    "base_pack_sha256": built.base_pack_sha256,
                    "target_pack_sha256": built.target_pack_sha256,
                }),
                || format!("{} -> {}", built.summary, out.display()),
            )
        }
        PatchCommand::Apply {
            base,
            patch: patch_path,
            out,
        } => {
            let base = read_pack(&base)?;
            let parsed: Patch = serde_json::from_slice(&fs::read(&patch_path)?)?;
            match patch::apply_patch(&base, &parsed)? {
                ApplyOutcome::Merged(merged) => {
                    write_pack(&merged, &out)?;
                    output::emit(format, "patch.apply", pack_summary(&merged), || {
                        format!("merged {}", merged.pack_sha256())
                    })
                }
                ApplyOutcome::Conflict(info) => {
                    eprintln!("{}", output::render_conflict(&info));
                    Err(SpecPackError::PatchConflict(Box::new(info)))
                }
            }
        }
    }
}

fn run_base(cmd: BaseCommand, store: &Store, format: &str) -> Result<(), SpecPackError> {
    match cmd {
        BaseCommand::Show { project, out } => {
            let base = store
                .get_base(&project)?
                .ok_or_else(|| SpecPackError::NotFound(format!("base for project '{project}'")))?;
            if let Some(out) = out {
                write_pack(&base, &out)?;
            }
            output::emit(format, "base.show", pack_summary(&base), || pack_text(&base))
        }
        BaseCommand::Set {
            project,
            pack: path,
            expect,
        } => {
            let next = read_pack(&path)?;
            let adoption = adopt::Adoption::new(store, store, store);
            adoption.replace_base(&project, expect.as_deref(), &next)?;
            output::emit(format, "base.set", pack_summary(&next), || {
                format!("{project}: base is now {}", hash::short_hash(next.pack_sha256()))
            })
        }
    }
}

pub fn run() -> Result<(), SpecPackError> {
    init_logging();
    let cli = Cli::parse();
    let config = config::load_config(&cli.root)?;
    debug!(root = %cli.root.display(), "loaded configuration");
    let format = cli.format.as_str();

    match cli.command {
        Command::Pack(pack_cli) => run_pack(pack_cli.command, &config, format),
        Command::Diff(diff_cli) => run_diff(diff_cli, &config, format),
        Command::Patch(patch_cli) => run_patch(patch_cli.command, format),
        Command::Base(base_cli) => {
            let store = open_store(&cli.root, &config)?;
            run_base(base_cli.command, &store, format)
        }
        Command::Propose(propose_cli) => {
            let store = open_store(&cli.root, &config)?;
            adopt::run_propose(&store, &config, propose_cli, format)
        }
        Command::Proposal(proposal_cli) => {
            let store = open_store(&cli.root, &config)?;
            proposal::run_proposal_cli(&store, proposal_cli, format)
        }
        Command::Gov(gov_cli) => {
            let store = open_store(&cli.root, &config)?;
            governance::run_governance_cli(&store, gov_cli, format)
        }
    }
}

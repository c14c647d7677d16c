//! CLI struct definitions for the `specpack` command-line interface.
//!
//! All clap-derived types for core commands live here. Plugin subcommands
//! (`gov`, `proposal`, `propose`) bring their own structs.

use crate::core::output::{FORMAT_JSON, FORMAT_TEXT};
use crate::plugins::{adopt::ProposeCli, governance::GovernanceCli, proposal::ProposalCli};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "specpack",
    version = env!("CARGO_PKG_VERSION"),
    about = "Deterministic spec packs: build, diff, patch, propose, adopt and lock"
)]
pub(crate) struct Cli {
    /// Project directory holding `.specpack/`.
    #[clap(long, global = true, default_value = ".")]
    pub root: PathBuf,
    /// Output format: 'text' or 'json'.
    #[clap(long, global = true, default_value = FORMAT_TEXT, value_parser = [FORMAT_TEXT, FORMAT_JSON])]
    pub format: String,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Build, inspect and verify pack archives.
    Pack(PackCli),
    /// Compare two pack archives.
    Diff(DiffCli),
    /// Build or apply patches between packs.
    Patch(PatchCli),
    /// Show or replace a project's adopted base pack.
    Base(BaseCli),
    /// Record a candidate pack as a proposal against the current base.
    Propose(ProposeCli),
    /// Inspect and adopt proposals.
    Proposal(ProposalCli),
    /// Governance lock.
    Gov(GovernanceCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct PackCli {
    #[clap(subcommand)]
    pub command: PackCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PackCommand {
    /// Pack a directory tree into a deterministic archive.
    Build {
        #[clap(long)]
        project: String,
        /// Directory whose files become the pack contents.
        #[clap(long)]
        dir: PathBuf,
        #[clap(long)]
        out: PathBuf,
        #[clap(long)]
        pack_version: Option<String>,
        /// Manifest timestamp; defaults to the fixed pack epoch.
        #[clap(long)]
        created_at: Option<String>,
    },
    /// Print the manifest and file list of an archive.
    Inspect {
        #[clap(long)]
        pack: PathBuf,
    },
    /// Check an archive parses and hashes to the expected value.
    Verify {
        #[clap(long)]
        pack: PathBuf,
        #[clap(long)]
        sha256: String,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct DiffCli {
    #[clap(long)]
    pub base: PathBuf,
    #[clap(long)]
    pub proposal: PathBuf,
    /// Lines of context; defaults to the configured value.
    #[clap(long)]
    pub context: Option<usize>,
    /// Print the full unified patch instead of the summary.
    #[clap(long)]
    pub full: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PatchCli {
    #[clap(subcommand)]
    pub command: PatchCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PatchCommand {
    /// Write the patch taking `base` to `proposal`.
    Build {
        #[clap(long)]
        base: PathBuf,
        #[clap(long)]
        proposal: PathBuf,
        #[clap(long)]
        summary: Option<String>,
        /// Defaults to the base pack's project.
        #[clap(long)]
        project: Option<String>,
        #[clap(long)]
        out: PathBuf,
    },
    /// Apply a patch file to a base archive.
    Apply {
        #[clap(long)]
        base: PathBuf,
        #[clap(long)]
        patch: PathBuf,
        #[clap(long)]
        out: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct BaseCli {
    #[clap(subcommand)]
    pub command: BaseCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum BaseCommand {
    /// Show the current base hash and contents.
    Show {
        #[clap(long)]
        project: String,
        /// Also write the base archive here.
        #[clap(long)]
        out: Option<PathBuf>,
    },
    /// Replace the base with an archive (compare-and-swap on `--expect`).
    Set {
        #[clap(long)]
        project: String,
        #[clap(long)]
        pack: PathBuf,
        /// Hash the current base must have; omit when the project has none.
        #[clap(long)]
        expect: Option<String>,
    },
}

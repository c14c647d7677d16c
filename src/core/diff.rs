//! Pack-to-pack comparison.

use crate::core::pack::{PackFile, SpecPack};
use crate::core::unified::{self, SectionKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CONTEXT_LINES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedFile {
    pub path: String,
    /// Absent when either side is binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unified_diff: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<ModifiedFile>,
    pub full_patch: String,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    /// `+added -removed ~modified`
    pub fn summary_line(&self) -> String {
        format!(
            "+{} -{} ~{}",
            self.added.len(),
            self.removed.len(),
            self.modified.len()
        )
    }

    pub fn modified_paths(&self) -> impl Iterator<Item = &str> {
        self.modified.iter().map(|m| m.path.as_str())
    }
}

pub fn diff(base: &SpecPack, proposal: &SpecPack) -> DiffReport {
    diff_with_context(base, proposal, DEFAULT_CONTEXT_LINES)
}

/// Compares two packs. All lists come out sorted by path because both file
/// maps are ordered.
pub fn diff_with_context(base: &SpecPack, proposal: &SpecPack, context: usize) -> DiffReport {
    let mut report = DiffReport::default();
    let mut sections: Vec<(String, String)> = Vec::new();

    for (path, file) in proposal.files() {
        match base.file(path) {
            None => {
                report.added.push(path.clone());
                sections.push((path.clone(), whole_file_section(file, SectionKind::Added, context)));
            }
            Some(prior) if prior.sha256 != file.sha256 => {
                let body = match (prior.text(), file.text()) {
                    (Some(old), Some(new)) => Some(unified::render_file_diff(
                        path,
                        SectionKind::Modified,
                        old,
                        new,
                        context,
                    )),
                    _ => None,
                };
                let section = match &body {
                    Some(body) => format!(
                        "{}{}",
                        unified::section_header(path, SectionKind::Modified),
                        body
                    ),
                    None => unified::render_binary_section(path, SectionKind::Modified),
                };
                sections.push((path.clone(), section));
                report.modified.push(ModifiedFile {
                    path: path.clone(),
                    unified_diff: body,
                });
            }
            Some(_) => {}
        }
    }

    for (path, file) in base.files() {
        if proposal.file(path).is_none() {
            report.removed.push(path.clone());
            sections.push((path.clone(), whole_file_section(file, SectionKind::Removed, context)));
        }
    }

    sections.sort_by(|a, b| a.0.cmp(&b.0));
    report.full_patch = sections.into_iter().map(|(_, s)| s).collect();

    debug!(
        base = %base.pack_sha256(),
        proposal = %proposal.pack_sha256(),
        summary = %report.summary_line(),
        "computed pack diff"
    );
    report
}

fn whole_file_section(file: &PackFile, kind: SectionKind, context: usize) -> String {
    let Some(text) = file.text() else {
        return unified::render_binary_section(&file.path, kind);
    };
    let (old, new) = match kind {
        SectionKind::Removed => (text, ""),
        _ => ("", text),
    };
    format!(
        "{}{}",
        unified::section_header(&file.path, kind),
        unified::render_file_diff(&file.path, kind, old, new, context)
    )
}

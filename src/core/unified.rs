//! Unified diff text: rendering per-file sections from a line diff, and
//! parsing/replaying those sections against a base text.
//!
//! A section looks like:
//!
//! ```text
//! diff --git a/spel/app.spel b/spel/app.spel
//! --- a/spel/app.spel
//! +++ b/spel/app.spel
//! @@ -1,2 +1,2 @@
//!  module app
//! -old
//! +new
//! ```
//!
//! Added files use `--- /dev/null`, removed files `+++ /dev/null`, binary
//! files carry a `Binary files differ` line and no hunks. Hunks are parsed by
//! their declared line counts, so content lines that look like headers are
//! never misread.

use crate::core::error::SpecPackError;
use similar::{ChangeTag, DiffOp, TextDiff};
use std::fmt::Write as _;

pub const SECTION_PREFIX: &str = "diff --git a/";
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";
pub const BINARY_MARKER: &str = "Binary files differ";
pub const DEV_NULL: &str = "/dev/null";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Delete(String),
    Insert(String),
}

impl HunkLine {
    fn value_mut(&mut self) -> &mut String {
        match self {
            HunkLine::Context(s) | HunkLine::Delete(s) | HunkLine::Insert(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSection {
    pub path: String,
    pub binary: bool,
    pub hunks: Vec<Hunk>,
}

fn format_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, len),
    }
}

fn render_group(diff: &TextDiff<'_, '_, '_, str>, group: &[DiffOp], out: &mut String) {
    let (Some(first), Some(last)) = (group.first(), group.last()) else {
        return;
    };
    let old_start = first.old_range().start;
    let new_start = first.new_range().start;
    let old_len = last.old_range().end - old_start;
    let new_len = last.new_range().end - new_start;
    let _ = writeln!(
        out,
        "@@ -{} +{} @@",
        format_range(old_start, old_len),
        format_range(new_start, new_len)
    );
    for op in group {
        for change in diff.iter_changes(op) {
            let sign = match change.tag() {
                ChangeTag::Equal => ' ',
                ChangeTag::Delete => '-',
                ChangeTag::Insert => '+',
            };
            out.push(sign);
            out.push_str(change.value());
            if !change.value().ends_with('\n') {
                out.push('\n');
                out.push_str(NO_NEWLINE_MARKER);
                out.push('\n');
            }
        }
    }
}

/// Hunks turning `old` into `new`, or an empty string when they are equal.
///
/// Lines end only at `\n`, matching how `apply_hunks` splits its input.
pub fn render_hunks(old: &str, new: &str, context: usize) -> String {
    let old_lines: Vec<&str> = old.split_inclusive('\n').collect();
    let new_lines: Vec<&str> = new.split_inclusive('\n').collect();
    let diff = TextDiff::configure().diff_slices(&old_lines[..], &new_lines[..]);
    let mut out = String::new();
    for group in diff.grouped_ops(context) {
        render_group(&diff, &group, &mut out);
    }
    out
}

/// `---`/`+++` header plus hunks for one text file.
pub fn render_file_diff(
    path: &str,
    kind: SectionKind,
    old: &str,
    new: &str,
    context: usize,
) -> String {
    let (from, to) = match kind {
        SectionKind::Added => (DEV_NULL.to_string(), format!("b/{path}")),
        SectionKind::Removed => (format!("a/{path}"), DEV_NULL.to_string()),
        SectionKind::Modified => (format!("a/{path}"), format!("b/{path}")),
    };
    let mut out = format!("--- {from}\n+++ {to}\n");
    out.push_str(&render_hunks(old, new, context));
    out
}

pub fn section_header(path: &str, kind: SectionKind) -> String {
    let mut out = format!("{SECTION_PREFIX}{path} b/{path}\n");
    match kind {
        SectionKind::Added => out.push_str("new file\n"),
        SectionKind::Removed => out.push_str("deleted file\n"),
        SectionKind::Modified => {}
    }
    out
}

pub fn render_binary_section(path: &str, kind: SectionKind) -> String {
    let mut out = section_header(path, kind);
    out.push_str(BINARY_MARKER);
    out.push('\n');
    out
}

fn malformed(reason: impl Into<String>) -> SpecPackError {
    SpecPackError::MalformedPatch(reason.into())
}

fn parse_section_path(line: &str) -> Result<String, SpecPackError> {
    let rest = line
        .strip_prefix(SECTION_PREFIX)
        .ok_or_else(|| malformed(format!("expected section header, found '{line}'")))?;
    if rest.len() < 3 || (rest.len() - 3) % 2 != 0 {
        return Err(malformed(format!("bad section header '{line}'")));
    }
    let half = (rest.len() - 3) / 2;
    let path = rest
        .get(..half)
        .ok_or_else(|| malformed(format!("bad section header '{line}'")))?;
    if rest != format!("{path} b/{path}") {
        return Err(malformed(format!("section header names two paths: '{line}'")));
    }
    Ok(path.to_string())
}

fn parse_range(raw: &str) -> Result<(usize, usize), SpecPackError> {
    let parse = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| malformed(format!("bad hunk range '{raw}'")))
    };
    match raw.split_once(',') {
        Some((start, len)) => Ok((parse(start)?, parse(len)?)),
        None => Ok((parse(raw)?, 1)),
    }
}

fn parse_hunk_header(line: &str) -> Result<(usize, usize, usize, usize), SpecPackError> {
    let inner = line
        .strip_prefix("@@ -")
        .and_then(|l| l.strip_suffix(" @@"))
        .ok_or_else(|| malformed(format!("bad hunk header '{line}'")))?;
    let (old, new) = inner
        .split_once(" +")
        .ok_or_else(|| malformed(format!("bad hunk header '{line}'")))?;
    let (old_start, old_len) = parse_range(old)?;
    let (new_start, new_len) = parse_range(new)?;
    Ok((old_start, old_len, new_start, new_len))
}

/// Splits patch text into per-file sections.
pub fn parse_patch_text(text: &str) -> Result<Vec<FileSection>, SpecPackError> {
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }

    let mut sections = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let path = parse_section_path(lines[i])?;
        i += 1;
        let mut section = FileSection {
            path,
            binary: false,
            hunks: Vec::new(),
        };

        while i < lines.len() && !lines[i].starts_with(SECTION_PREFIX) {
            let line = lines[i];
            if line == "new file" || line == "deleted file" {
                i += 1;
            } else if line == BINARY_MARKER {
                section.binary = true;
                i += 1;
            } else if line.starts_with("--- ") || line.starts_with("+++ ") {
                i += 1;
            } else if line.starts_with("@@ ") {
                let (hunk, next) = parse_hunk(&lines, i)?;
                section.hunks.push(hunk);
                i = next;
            } else {
                return Err(malformed(format!(
                    "unexpected line in section '{}': '{line}'",
                    section.path
                )));
            }
        }
        sections.push(section);
    }
    Ok(sections)
}

fn parse_hunk(lines: &[&str], start: usize) -> Result<(Hunk, usize), SpecPackError> {
    let (old_start, old_len, new_start, new_len) = parse_hunk_header(lines[start])?;
    let mut hunk = Hunk {
        old_start,
        old_len,
        new_start,
        new_len,
        lines: Vec::new(),
    };

    let mut i = start + 1;
    let mut old_seen = 0;
    let mut new_seen = 0;
    while old_seen < old_len || new_seen < new_len {
        let line = lines
            .get(i)
            .ok_or_else(|| malformed("hunk ends before its declared line count"))?;
        let (tag, body) = match line.chars().next() {
            Some(c @ (' ' | '-' | '+')) => (c, &line[1..]),
            None => (' ', ""),
            Some(_) => return Err(malformed(format!("bad hunk line '{line}'"))),
        };
        let value = format!("{body}\n");
        let entry = match tag {
            '-' => {
                old_seen += 1;
                HunkLine::Delete(value)
            }
            '+' => {
                new_seen += 1;
                HunkLine::Insert(value)
            }
            _ => {
                old_seen += 1;
                new_seen += 1;
                HunkLine::Context(value)
            }
        };
        hunk.lines.push(entry);
        i += 1;

        if lines.get(i).is_some_and(|l| l.starts_with('\\')) {
            if let Some(last) = hunk.lines.last_mut() {
                last.value_mut().pop();
            }
            i += 1;
        }
    }
    if old_seen != old_len || new_seen != new_len {
        return Err(malformed("hunk line counts disagree with its header"));
    }
    Ok((hunk, i))
}

/// Replays hunks against `original`. Every context and deleted line must
/// match the original exactly.
pub fn apply_hunks(original: &str, hunks: &[Hunk]) -> Result<String, String> {
    let lines: Vec<&str> = original.split_inclusive('\n').collect();
    let mut out = String::with_capacity(original.len());
    let mut pos = 0;

    for hunk in hunks {
        let start = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start
                .checked_sub(1)
                .ok_or_else(|| "hunk starts at line 0".to_string())?
        };
        if start < pos || start > lines.len() {
            return Err(format!("hunk at line {} is out of order or range", hunk.old_start));
        }
        for line in &lines[pos..start] {
            out.push_str(line);
        }
        pos = start;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(expected) | HunkLine::Delete(expected) => {
                    let actual = lines.get(pos).copied();
                    if actual != Some(expected.as_str()) {
                        return Err(format!(
                            "line {} does not match: expected {:?}, found {:?}",
                            pos + 1,
                            expected,
                            actual
                        ));
                    }
                    if matches!(line, HunkLine::Context(_)) {
                        out.push_str(expected);
                    }
                    pos += 1;
                }
                HunkLine::Insert(value) => out.push_str(value),
            }
        }
    }
    for line in &lines[pos..] {
        out.push_str(line);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(old: &str, new: &str) -> String {
        let text = format!(
            "{}{}",
            section_header("f.txt", SectionKind::Modified),
            render_file_diff("f.txt", SectionKind::Modified, old, new, 3)
        );
        let sections = parse_patch_text(&text).unwrap();
        assert_eq!(sections.len(), 1);
        apply_hunks(old, &sections[0].hunks).unwrap()
    }

    #[test]
    fn replays_middle_edit() {
        let old = "a\nb\nc\nd\ne\nf\ng\nh\n";
        let new = "a\nb\nc\nD\ne\nf\ng\nh\ni\n";
        assert_eq!(replay(old, new), new);
    }

    #[test]
    fn replays_missing_trailing_newline_changes() {
        assert_eq!(replay("a\nb", "a\nc"), "a\nc");
        assert_eq!(replay("a\nb", "a\nb\n"), "a\nb\n");
        assert_eq!(replay("a\nb\n", "a\nb"), "a\nb");
        assert_eq!(replay("x", "y"), "y");
    }

    #[test]
    fn replays_from_and_to_empty() {
        assert_eq!(replay("", "one\ntwo\n"), "one\ntwo\n");
        assert_eq!(replay("one\ntwo\n", ""), "");
    }

    #[test]
    fn preserves_crlf_lines() {
        assert_eq!(replay("a\r\nb\r\n", "a\r\nc\r\n"), "a\r\nc\r\n");
    }

    #[test]
    fn bare_carriage_return_stays_inside_its_line() {
        assert_eq!(
            replay("one\rtwo\nthree\n", "one\rTWO\nthree\n"),
            "one\rTWO\nthree\n"
        );
        assert_eq!(replay("a\rb", "a\rc"), "a\rc");
        assert_eq!(replay("x\r\ny\n", "x\ry\n"), "x\ry\n");
    }

    #[test]
    fn content_that_looks_like_headers_is_not_misread() {
        let old = "keep\n";
        let new = "keep\ndiff --git a/x b/x\n@@ -1 +1 @@\n";
        assert_eq!(replay(old, new), new);
    }

    #[test]
    fn mismatched_context_is_refused() {
        let text = format!(
            "{}{}",
            section_header("f.txt", SectionKind::Modified),
            render_file_diff("f.txt", SectionKind::Modified, "a\nb\n", "a\nc\n", 3)
        );
        let sections = parse_patch_text(&text).unwrap();
        assert!(apply_hunks("a\nz\n", &sections[0].hunks).is_err());
    }

    #[test]
    fn header_with_spaces_in_path() {
        assert_eq!(
            parse_section_path("diff --git a/my dir/x y b/my dir/x y").unwrap(),
            "my dir/x y"
        );
        assert!(parse_section_path("diff --git a/x b/y").is_err());
    }

    #[test]
    fn binary_sections_have_no_hunks() {
        let text = render_binary_section("logo.png", SectionKind::Modified);
        let sections = parse_patch_text(&text).unwrap();
        assert!(sections[0].binary);
        assert!(sections[0].hunks.is_empty());
    }

    #[test]
    fn truncated_hunk_is_malformed() {
        let text = "diff --git a/f b/f\n@@ -1,2 +1,2 @@\n a\n";
        assert!(matches!(
            parse_patch_text(text),
            Err(SpecPackError::MalformedPatch(_))
        ));
    }
}

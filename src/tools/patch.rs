//! Unified-diff hunk application
//!
//! Pure text in, text out. File headers (`---`/`+++`) and anything else
//! before the first `@@` line are skipped; each hunk must match the
//! original exactly at the line numbers its header names.

#[cfg(test)]
mod proptests;

use thiserror::Error;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("patch contains no hunks")]
    NoHunks,

    #[error("malformed hunk header: {0}")]
    BadHeader(String),

    #[error("hunk {hunk}: unexpected line {line:?}")]
    BadLine { hunk: usize, line: String },

    #[error("hunk {hunk}: line {line} does not match, expected {expected:?}")]
    Mismatch {
        hunk: usize,
        line: usize,
        expected: String,
        found: Option<String>,
    },

    #[error("hunk {hunk} overlaps the previous hunk")]
    Overlap { hunk: usize },

    #[error("patch ends inside a hunk")]
    Truncated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Hunk {
    old_start: usize,
    old_len: usize,
    lines: Vec<HunkLine>,
}

/// Apply every hunk in `patch` to `original`
pub fn apply_unified_diff(original: &str, patch: &str) -> Result<String, PatchError> {
    let hunks = parse_hunks(patch)?;
    if hunks.is_empty() {
        return Err(PatchError::NoHunks);
    }

    let source: Vec<&str> = original.split_inclusive('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(source.len());
    let mut cursor = 0;

    for (index, hunk) in hunks.iter().enumerate() {
        let number = index + 1;
        let start = if hunk.old_len == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if start < cursor {
            return Err(PatchError::Overlap { hunk: number });
        }
        if start > source.len() {
            return Err(PatchError::Mismatch {
                hunk: number,
                line: start + 1,
                expected: String::new(),
                found: None,
            });
        }
        out.extend_from_slice(&source[cursor..start]);
        cursor = start;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(text) | HunkLine::Remove(text) => {
                    let found = source.get(cursor).copied();
                    if found != Some(text.as_str()) {
                        return Err(PatchError::Mismatch {
                            hunk: number,
                            line: cursor + 1,
                            expected: text.clone(),
                            found: found.map(str::to_string),
                        });
                    }
                    if matches!(line, HunkLine::Context(_)) {
                        out.push(source[cursor]);
                    }
                    cursor += 1;
                }
                HunkLine::Add(text) => out.push(text),
            }
        }
    }

    out.extend_from_slice(&source[cursor..]);
    Ok(out.concat())
}

fn parse_hunks(patch: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut lines = patch.split_inclusive('\n').peekable();
    let mut hunks = Vec::new();

    while let Some(line) = lines.next() {
        if !line.starts_with("@@") {
            continue;
        }
        let (old_start, old_len, new_len) = parse_header(line)?;
        let mut hunk = Hunk { old_start, old_len, lines: Vec::new() };
        let (mut old_seen, mut new_seen) = (0, 0);

        while old_seen < old_len || new_seen < new_len {
            let raw = lines.next().ok_or(PatchError::Truncated)?;
            let text = if raw.ends_with('\n') { raw.to_string() } else { format!("{raw}\n") };

            let parsed = if text == "\n" {
                HunkLine::Context(text)
            } else if let Some(rest) = text.strip_prefix(' ') {
                HunkLine::Context(rest.to_string())
            } else if let Some(rest) = text.strip_prefix('-') {
                HunkLine::Remove(rest.to_string())
            } else if let Some(rest) = text.strip_prefix('+') {
                HunkLine::Add(rest.to_string())
            } else if text.trim_end() == NO_NEWLINE_MARKER {
                strip_last_newline(&mut hunk.lines);
                continue;
            } else {
                return Err(PatchError::BadLine {
                    hunk: hunks.len() + 1,
                    line: text.trim_end().to_string(),
                });
            };

            match parsed {
                HunkLine::Context(_) => {
                    old_seen += 1;
                    new_seen += 1;
                }
                HunkLine::Remove(_) => old_seen += 1,
                HunkLine::Add(_) => new_seen += 1,
            }
            hunk.lines.push(parsed);
        }

        // A marker may trail the last counted line
        if lines.peek().is_some_and(|l| l.trim_end() == NO_NEWLINE_MARKER) {
            lines.next();
            strip_last_newline(&mut hunk.lines);
        }
        hunks.push(hunk);
    }

    Ok(hunks)
}

fn strip_last_newline(lines: &mut [HunkLine]) {
    if let Some(HunkLine::Context(text) | HunkLine::Remove(text) | HunkLine::Add(text)) = lines.last_mut() {
        if text.ends_with('\n') {
            text.pop();
        }
    }
}

/// Parse `@@ -a[,b] +c[,d] @@`, returning (a, b, d)
fn parse_header(line: &str) -> Result<(usize, usize, usize), PatchError> {
    let bad = || PatchError::BadHeader(line.trim_end().to_string());
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|rest| rest.split(" @@").next())
        .ok_or_else(bad)?;

    let mut parts = inner.split_whitespace();
    let old = parts.next().and_then(|p| p.strip_prefix('-')).ok_or_else(bad)?;
    let new = parts.next().and_then(|p| p.strip_prefix('+')).ok_or_else(bad)?;

    let range = |spec: &str| -> Option<(usize, usize)> {
        match spec.split_once(',') {
            Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
            None => Some((spec.parse().ok()?, 1)),
        }
    };
    let (old_start, old_len) = range(old).ok_or_else(bad)?;
    let (_, new_len) = range(new).ok_or_else(bad)?;
    Ok((old_start, old_len, new_len))
}

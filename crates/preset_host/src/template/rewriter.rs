//! Placeholder rewriting for `[$identifier]` tokens

use crate::config::{Resolution, UnresolvedReason, ValueSource};
use regex::{Captures, Regex};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::LazyLock;

/// Regex for matching placeholder tokens: [$identifier]
static PLACEHOLDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\$([a-z0-9_-]+)\]").unwrap());

/// Line terminator used for rewritten files
#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

/// A token that kept its literal text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedPlaceholder {
    pub key: String,
    pub reason: UnresolvedReason,
    /// 1-based line number
    pub line: usize,
}

/// Result of rewriting one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenLine {
    pub text: String,
    pub unresolved: Vec<(String, UnresolvedReason)>,
}

/// What happened to a single file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileReport {
    pub lines: usize,
    pub replaced: usize,
    pub unresolved: Vec<UnresolvedPlaceholder>,
    /// Not valid UTF-8, copied byte-for-byte
    pub copied_raw: bool,
}

/// Rewrites placeholder tokens with values from a [`ValueSource`]
///
/// Resolution is total: a token that cannot be resolved keeps its literal
/// text and is reported back to the caller.
pub struct PlaceholderRewriter<'a, S: ValueSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: ValueSource + ?Sized> PlaceholderRewriter<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Rewrite every token in a single line
    pub fn rewrite_line(&self, line: &str) -> RewrittenLine {
        let mut unresolved = Vec::new();

        let text = PLACEHOLDER_PATTERN.replace_all(line, |caps: &Captures| {
            let key = &caps[1];
            match self.source.resolve(key) {
                Resolution::Value(value) => value,
                Resolution::Unresolved(reason) => {
                    unresolved.push((key.to_string(), reason));
                    caps[0].to_string()
                }
            }
        });

        RewrittenLine {
            text: text.into_owned(),
            unresolved,
        }
    }

    /// Copy `src` to `dst`, rewriting line by line
    ///
    /// Every output line ends with [`LINE_ENDING`]. Files that are not valid
    /// UTF-8 are copied unchanged.
    pub fn rewrite_file(&self, src: &Path, dst: &Path) -> std::io::Result<FileReport> {
        let bytes = fs::read(src)?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                fs::write(dst, e.into_bytes())?;
                return Ok(FileReport {
                    copied_raw: true,
                    ..Default::default()
                });
            }
        };

        let mut report = FileReport::default();
        let mut out = BufWriter::new(fs::File::create(dst)?);

        for (index, line) in text.lines().enumerate() {
            let rewritten = self.rewrite_line(line);
            report.lines += 1;
            report.replaced += PLACEHOLDER_PATTERN.find_iter(line).count() - rewritten.unresolved.len();
            report
                .unresolved
                .extend(rewritten.unresolved.into_iter().map(|(key, reason)| {
                    UnresolvedPlaceholder {
                        key,
                        reason,
                        line: index + 1,
                    }
                }));

            out.write_all(rewritten.text.as_bytes())?;
            out.write_all(LINE_ENDING.as_bytes())?;
        }

        out.flush()?;
        Ok(report)
    }
}

/// Check whether text still contains placeholder tokens
pub fn contains_placeholder(text: &str) -> bool {
    PLACEHOLDER_PATTERN.is_match(text)
}

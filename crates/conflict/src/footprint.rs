//! Footprint comparison.
//!
//! A footprint entry is either a literal repository-relative path
//! (`src/a.py`), a directory (`src/api/`, treated as `src/api/**`) or a glob
//! (`src/**/*.rs`). Two footprints can share exact files, files reached
//! through a pattern, or only a parent directory.

use std::collections::BTreeSet;
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

/// How a task's footprint is derived when none was declared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FootprintInference {
    /// Union of artifact paths recorded in the task's live history
    #[default]
    ArtifactPaths,
    /// An undeclared footprint stays empty
    Disabled,
}

/// What two footprints have in common.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overlap {
    /// Literal paths present in both footprints
    pub exact: BTreeSet<String>,

    /// Paths or patterns shared through glob matching
    pub files: BTreeSet<String>,

    /// Parent directories both footprints touch
    pub directories: BTreeSet<String>,
}

impl Overlap {
    /// Nothing in common.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.files.is_empty() && self.directories.is_empty()
    }

    /// At least one file is (or may be) touched by both.
    pub fn shares_file(&self) -> bool {
        !self.exact.is_empty() || !self.files.is_empty()
    }

    /// Exact and pattern-matched files, merged.
    pub fn shared_files(&self) -> Vec<String> {
        self.exact.union(&self.files).cloned().collect()
    }
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

const GLOB_START: &[char] = &['*', '?', '['];
const GLOB_END: &[char] = &['*', '?', ']'];

enum Entry {
    Literal(String),
    Glob {
        raw: String,
        pattern: Pattern,
        prefix: String,
        suffix: String,
    },
}

impl Entry {
    fn parse(raw: &str) -> Option<Self> {
        let mut path = raw.trim();
        while let Some(rest) = path.strip_prefix("./") {
            path = rest;
        }
        if path.is_empty() {
            return None;
        }
        let path = if path.ends_with('/') {
            format!("{}**", path)
        } else {
            path.to_string()
        };

        if !path.contains(GLOB_START) {
            return Some(Entry::Literal(path));
        }
        match Pattern::new(&path) {
            Ok(pattern) => {
                let first = path.find(GLOB_START).unwrap_or(path.len());
                let last = path.rfind(GLOB_END).map(|i| i + 1).unwrap_or(path.len());
                Some(Entry::Glob {
                    prefix: path[..first].to_string(),
                    suffix: path[last..].to_string(),
                    pattern,
                    raw: path,
                })
            }
            Err(e) => {
                tracing::debug!(entry = %path, error = %e, "invalid glob, comparing literally");
                Some(Entry::Literal(path))
            }
        }
    }

    /// Every directory above the entry, deepest first; the repository root
    /// does not count.
    fn directories(&self) -> Vec<&str> {
        let text = match self {
            Entry::Literal(path) => path.as_str(),
            Entry::Glob { prefix, .. } => prefix.as_str(),
        };
        let mut dirs = Vec::new();
        let mut rest = text;
        while let Some((dir, _)) = rest.rsplit_once('/') {
            if !dir.is_empty() {
                dirs.push(dir);
            }
            rest = dir;
        }
        dirs
    }
}

/// Compare two footprints.
pub fn compare_footprints(a: &[String], b: &[String]) -> Overlap {
    let left: Vec<Entry> = a.iter().filter_map(|e| Entry::parse(e)).collect();
    let right: Vec<Entry> = b.iter().filter_map(|e| Entry::parse(e)).collect();

    let mut overlap = Overlap::default();
    for x in &left {
        for y in &right {
            match (x, y) {
                (Entry::Literal(p), Entry::Literal(q)) => {
                    if p == q {
                        overlap.exact.insert(p.clone());
                    }
                }
                (Entry::Literal(path), Entry::Glob { pattern, .. })
                | (Entry::Glob { pattern, .. }, Entry::Literal(path)) => {
                    if pattern.matches_with(path, MATCH_OPTIONS) {
                        overlap.files.insert(path.clone());
                    }
                }
                (
                    Entry::Glob { raw: r1, prefix: p1, suffix: s1, .. },
                    Entry::Glob { raw: r2, prefix: p2, suffix: s2, .. },
                ) => {
                    // Two patterns may overlap when their fixed parts are compatible.
                    let prefixes = p1.starts_with(p2.as_str()) || p2.starts_with(p1.as_str());
                    let suffixes = s1.ends_with(s2.as_str()) || s2.ends_with(s1.as_str());
                    if r1 == r2 || (prefixes && suffixes) {
                        let specific = if p1.len() >= p2.len() { r1 } else { r2 };
                        overlap.files.insert(specific.clone());
                    }
                }
            }
        }
    }

    // Only the deepest shared directories are reported.
    let left_dirs: BTreeSet<&str> = left.iter().flat_map(Entry::directories).collect();
    let right_dirs: BTreeSet<&str> = right.iter().flat_map(Entry::directories).collect();
    let shared: BTreeSet<&str> = left_dirs.intersection(&right_dirs).copied().collect();
    overlap.directories = shared
        .iter()
        .filter(|dir| {
            !shared
                .iter()
                .any(|other| other.len() > dir.len() && other.starts_with(&format!("{}/", dir)))
        })
        .map(|dir| format!("{}/", dir))
        .collect();

    overlap
}

//! Ingest, filter, merge and inspect raw V8 snapshots.

use super::snapshot::SNAPSHOT_PREFIX;
use super::{V8Coverage, V8Function, V8ScriptCoverage};
use crate::result::{CovError, CovResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Url fragments that are never application code
const BUILTIN_EXCLUDES: &[&str] = &["/node_modules/", "__vitest__", "__playwright__"];

/// Browser-captured coverage entry (no script id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaywrightEntry {
    /// Script URL
    pub url: String,
    /// Script text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Function coverage
    #[serde(default)]
    pub functions: Vec<V8Function>,
}

/// Additional url exclusion
#[derive(Debug, Clone)]
pub enum ExcludePattern {
    /// Url contains the substring
    Contains(String),
    /// Url matches the regex
    Regex(Regex),
}

impl ExcludePattern {
    /// Create a substring pattern
    #[must_use]
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into())
    }

    /// Compile a regex pattern
    pub fn regex(pattern: &str) -> CovResult<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| CovError::invalid_pattern(pattern, e))
    }

    /// Check whether a url matches
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Contains(needle) => url.contains(needle.as_str()),
            Self::Regex(re) => re.is_match(url),
        }
    }
}

/// How a caller-supplied predicate combines with the exclusion rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CustomFilterMode {
    /// Keep an entry only if it passes the exclusions and the predicate
    #[default]
    Intersect,
    /// The predicate alone decides
    Replace,
}

/// Reader configuration
#[derive(Debug, Clone, Default)]
pub struct ReaderConfig {
    /// Exclusions applied on top of the built-in ones
    pub exclude: Vec<ExcludePattern>,
    /// Predicate combination mode
    pub custom_filter_mode: CustomFilterMode,
}

impl ReaderConfig {
    /// Create a new config with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exclusion pattern
    #[must_use]
    pub fn with_exclude(mut self, pattern: ExcludePattern) -> Self {
        self.exclude.push(pattern);
        self
    }

    /// Set the predicate combination mode
    #[must_use]
    pub const fn with_custom_filter_mode(mut self, mode: CustomFilterMode) -> Self {
        self.custom_filter_mode = mode;
        self
    }
}

/// Entry counts of a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageStats {
    /// Entries before filtering
    pub total: usize,
    /// Entries after default exclusion filtering
    pub filtered: usize,
    /// Unique urls of the filtered entries
    pub urls: Vec<String>,
}

/// Reads and prepares raw V8 coverage
#[derive(Debug, Clone, Default)]
pub struct CoverageReader {
    config: ReaderConfig,
}

impl CoverageReader {
    /// Create a reader
    #[must_use]
    pub fn new(config: ReaderConfig) -> Self {
        Self { config }
    }

    /// Convert browser-shaped entries, numbering scripts by input order
    #[must_use]
    pub fn read_from_playwright(&self, entries: Vec<PlaywrightEntry>) -> V8Coverage {
        let result = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| V8ScriptCoverage {
                script_id: index.to_string(),
                url: entry.url,
                source: entry.source,
                functions: entry.functions,
            })
            .collect();
        V8Coverage::from_scripts(result)
    }

    /// Check a url against the built-in and configured exclusions
    #[must_use]
    pub fn is_excluded(&self, url: &str) -> bool {
        url.starts_with("node:")
            || BUILTIN_EXCLUDES.iter().any(|needle| url.contains(needle))
            || self.config.exclude.iter().any(|p| p.matches(url))
    }

    /// Drop excluded entries; the source map cache passes through
    pub fn filter_entries(
        &self,
        coverage: V8Coverage,
        custom_filter: Option<&dyn Fn(&V8ScriptCoverage) -> bool>,
    ) -> V8Coverage {
        let V8Coverage {
            result,
            source_map_cache,
        } = coverage;
        let before = result.len();
        let result: Vec<_> = result
            .into_iter()
            .filter(|entry| match (custom_filter, self.config.custom_filter_mode) {
                (Some(keep), CustomFilterMode::Replace) => keep(entry),
                (Some(keep), CustomFilterMode::Intersect) => {
                    !self.is_excluded(&entry.url) && keep(entry)
                }
                (None, _) => !self.is_excluded(&entry.url),
            })
            .collect();
        debug!(before, after = result.len(), "filtered coverage entries");
        V8Coverage {
            result,
            source_map_cache,
        }
    }

    /// Concatenate snapshots in call order.
    ///
    /// The first non-empty source map cache is kept as is.
    #[must_use]
    pub fn merge(coverages: impl IntoIterator<Item = V8Coverage>) -> V8Coverage {
        let mut coverages: Vec<V8Coverage> = coverages.into_iter().collect();
        match coverages.len() {
            0 => return V8Coverage::new(),
            1 => return coverages.remove(0),
            _ => {}
        }

        let mut merged = V8Coverage::new();
        for coverage in coverages {
            if merged.source_map_cache.is_none() && coverage.has_source_map_cache() {
                merged.source_map_cache = coverage.source_map_cache;
            }
            merged.result.extend(coverage.result);
        }
        merged
    }

    /// Unique urls in first-seen order
    #[must_use]
    pub fn get_source_urls(coverage: &V8Coverage) -> Vec<String> {
        let mut seen = HashSet::new();
        coverage
            .result
            .iter()
            .filter(|entry| seen.insert(entry.url.as_str()))
            .map(|entry| entry.url.clone())
            .collect()
    }

    /// Entry counts before and after default filtering
    #[must_use]
    pub fn get_stats(&self, coverage: &V8Coverage) -> CoverageStats {
        let filtered = self.filter_entries(coverage.clone(), None);
        CoverageStats {
            total: coverage.len(),
            filtered: filtered.len(),
            urls: Self::get_source_urls(&filtered),
        }
    }

    /// Parse one snapshot file
    pub fn read_file(path: &Path) -> CovResult<V8Coverage> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Merge every `coverage-*.json` snapshot of a directory in filename order
    pub fn read_from_directory(&self, dir: &Path) -> CovResult<V8Coverage> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(dir = %dir.display(), "coverage directory does not exist");
                return Ok(V8Coverage::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_snapshot_file(path))
            .collect();
        files.sort();

        if files.is_empty() {
            warn!(dir = %dir.display(), "no coverage snapshots found");
            return Ok(V8Coverage::new());
        }

        let mut snapshots = Vec::with_capacity(files.len());
        for path in &files {
            match Self::read_file(path) {
                Ok(coverage) => snapshots.push(coverage),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable snapshot"),
            }
        }
        debug!(files = snapshots.len(), "read coverage snapshots");
        Ok(Self::merge(snapshots))
    }
}

fn is_snapshot_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(".json"))
}

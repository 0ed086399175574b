//! Path-keyed collection of file coverage

use super::{CoverageSummary, FileCoverage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Istanbul coverage map (`coverage-final.json`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageMap {
    files: BTreeMap<String, FileCoverage>,
}

impl CoverageMap {
    /// Create an empty map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, merging with an existing entry for the same path
    pub fn add_file_coverage(&mut self, coverage: FileCoverage) {
        match self.files.get_mut(&coverage.path) {
            Some(existing) => existing.merge(coverage),
            None => {
                self.files.insert(coverage.path.clone(), coverage);
            }
        }
    }

    /// Merge every file of `other` into this map
    pub fn merge(&mut self, other: Self) {
        for (_, coverage) in other.files {
            self.add_file_coverage(coverage);
        }
    }

    /// Paths in sorted order
    #[must_use]
    pub fn files(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    /// Coverage of one path
    #[must_use]
    pub fn file_coverage_for(&self, path: &str) -> Option<&FileCoverage> {
        self.files.get(path)
    }

    /// Check whether a path is present
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Number of files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if the map has no files
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Keep only paths accepted by `keep`
    pub fn filter(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.files.retain(|path, _| keep(path));
    }

    /// Iterate over file coverage in path order
    pub fn iter(&self) -> impl Iterator<Item = &FileCoverage> {
        self.files.values()
    }

    /// Aggregate totals across all files
    #[must_use]
    pub fn summary(&self) -> CoverageSummary {
        self.files
            .values()
            .fold(CoverageSummary::default(), |acc, file| acc.combine(&file.summary()))
    }
}

impl FromIterator<FileCoverage> for CoverageMap {
    fn from_iter<I: IntoIterator<Item = FileCoverage>>(iter: I) -> Self {
        let mut map = Self::new();
        for coverage in iter {
            map.add_file_coverage(coverage);
        }
        map
    }
}

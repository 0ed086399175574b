//! Raw V8 coverage captures
//!
//! Types mirror the JSON emitted by V8's `Profiler.takePreciseCoverage`,
//! by `NODE_V8_COVERAGE` dumps and by browser automation coverage APIs.
//!
//! ## Usage
//!
//! ```ignore
//! let reader = CoverageReader::default();
//! let coverage = reader.read_from_directory(Path::new(".v8-coverage"))?;
//! let coverage = reader.filter_entries(coverage, None);
//! println!("{} scripts", coverage.len());
//! ```

mod ranges;
mod reader;
mod snapshot;

pub use ranges::RangeIndex;
pub use reader::{
    CoverageReader, CoverageStats, CustomFilterMode, ExcludePattern, PlaywrightEntry,
    ReaderConfig,
};
pub use snapshot::{SnapshotWriter, StagingDir, SNAPSHOT_PREFIX};

use crate::source_map::SourceMapData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A range of the script text with its execution count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V8Range {
    /// Start offset (inclusive)
    pub start_offset: u32,
    /// End offset (exclusive)
    pub end_offset: u32,
    /// Number of times this range was executed
    pub count: u64,
}

impl V8Range {
    /// Create a new range
    #[must_use]
    pub const fn new(start_offset: u32, end_offset: u32, count: u64) -> Self {
        Self {
            start_offset,
            end_offset,
            count,
        }
    }

    /// Check whether `offset` falls inside `[start, end)`
    #[must_use]
    pub const fn contains(&self, offset: u32) -> bool {
        self.start_offset <= offset && offset < self.end_offset
    }

    /// Length of the range
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end_offset.saturating_sub(self.start_offset)
    }

    /// Check if the range is empty
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Coverage data for a single function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V8Function {
    /// Function name (empty for anonymous functions and the script body)
    #[serde(default)]
    pub function_name: String,
    /// Whether V8 reported block-level ranges for this function
    #[serde(default)]
    pub is_block_coverage: bool,
    /// Nested ranges; the first one spans the whole function
    #[serde(default)]
    pub ranges: Vec<V8Range>,
}

impl V8Function {
    /// Check if the function was executed at least once
    #[must_use]
    pub fn was_executed(&self) -> bool {
        self.ranges.first().is_some_and(|r| r.count > 0)
    }

    /// Get the byte range covered
    #[must_use]
    pub fn byte_range(&self) -> Option<(u32, u32)> {
        let start = self.ranges.iter().map(|r| r.start_offset).min()?;
        let end = self.ranges.iter().map(|r| r.end_offset).max()?;
        Some((start, end))
    }
}

/// Coverage data for a single script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct V8ScriptCoverage {
    /// Script ID, unique only within one snapshot
    pub script_id: String,
    /// Script URL
    pub url: String,
    /// Script text, when the collector captured it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Functions in this script
    #[serde(default)]
    pub functions: Vec<V8Function>,
}

impl V8ScriptCoverage {
    /// Count functions that were executed
    #[must_use]
    pub fn functions_executed(&self) -> usize {
        self.functions.iter().filter(|f| f.was_executed()).count()
    }

    /// Total number of ranges across all functions
    #[must_use]
    pub fn range_count(&self) -> usize {
        self.functions.iter().map(|f| f.ranges.len()).sum()
    }
}

/// Entry of Node's `source-map-cache`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSourceMapEntry {
    /// Line lengths of the generated file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_lengths: Option<Vec<u32>>,
    /// Parsed source map payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SourceMapData>,
    /// Url the map was loaded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A V8 coverage snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct V8Coverage {
    /// Per-script coverage, in capture order
    #[serde(default)]
    pub result: Vec<V8ScriptCoverage>,
    /// Source maps Node cached while loading the scripts
    #[serde(
        rename = "source-map-cache",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_map_cache: Option<BTreeMap<String, CachedSourceMapEntry>>,
}

impl V8Coverage {
    /// Create an empty snapshot
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a snapshot from script entries
    #[must_use]
    pub fn from_scripts(result: Vec<V8ScriptCoverage>) -> Self {
        Self {
            result,
            source_map_cache: None,
        }
    }

    /// Number of script entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.result.len()
    }

    /// Check if the snapshot has no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }

    /// Check if a non-empty source map cache is attached
    #[must_use]
    pub fn has_source_map_cache(&self) -> bool {
        self.source_map_cache.as_ref().is_some_and(|c| !c.is_empty())
    }

    /// Look up the cached source map for a script url
    #[must_use]
    pub fn cached_source_map(&self, url: &str) -> Option<&SourceMapData> {
        self.source_map_cache
            .as_ref()?
            .get(url)
            .and_then(|entry| entry.data.as_ref())
    }
}

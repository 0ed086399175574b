//! Per-file coverage

use super::{BranchMapping, CoverageSummary, FunctionMapping, Location, Totals};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coverage of one original source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCoverage {
    /// Source path
    pub path: String,
    /// Statement id → location
    #[serde(default)]
    pub statement_map: BTreeMap<u32, Location>,
    /// Function id → mapping
    #[serde(default)]
    pub fn_map: BTreeMap<u32, FunctionMapping>,
    /// Branch id → mapping
    #[serde(default)]
    pub branch_map: BTreeMap<u32, BranchMapping>,
    /// Statement hit counts
    #[serde(default)]
    pub s: BTreeMap<u32, u64>,
    /// Function hit counts
    #[serde(default)]
    pub f: BTreeMap<u32, u64>,
    /// Branch hit counts, one per branch location
    #[serde(default)]
    pub b: BTreeMap<u32, Vec<u64>>,
}

impl FileCoverage {
    /// Create an empty coverage object for `path`
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            statement_map: BTreeMap::new(),
            fn_map: BTreeMap::new(),
            branch_map: BTreeMap::new(),
            s: BTreeMap::new(),
            f: BTreeMap::new(),
            b: BTreeMap::new(),
        }
    }

    /// Add a statement, returning its id
    pub fn add_statement(&mut self, loc: Location, count: u64) -> u32 {
        let id = next_id(&self.statement_map);
        self.statement_map.insert(id, loc);
        self.s.insert(id, count);
        id
    }

    /// Add a function, returning its id
    pub fn add_function(&mut self, mapping: FunctionMapping, count: u64) -> u32 {
        let id = next_id(&self.fn_map);
        self.fn_map.insert(id, mapping);
        self.f.insert(id, count);
        id
    }

    /// Add a branch with one counter per location, returning its id
    pub fn add_branch(&mut self, mapping: BranchMapping, counts: Vec<u64>) -> u32 {
        let id = next_id(&self.branch_map);
        let mut counts = counts;
        counts.resize(mapping.locations.len(), 0);
        self.branch_map.insert(id, mapping);
        self.b.insert(id, counts);
        id
    }

    /// Check whether nothing is instrumented
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statement_map.is_empty() && self.fn_map.is_empty() && self.branch_map.is_empty()
    }

    /// Check whether both objects describe the same instrumentation
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.statement_map == other.statement_map
            && self.fn_map == other.fn_map
            && self.branch_map == other.branch_map
    }

    /// Merge `other` into `self`.
    ///
    /// Counters are summed when both describe the same instrumentation;
    /// otherwise `other` replaces `self`.
    pub fn merge(&mut self, other: Self) {
        if !self.same_structure(&other) {
            *self = other;
            return;
        }
        sum_into(&mut self.s, other.s);
        sum_into(&mut self.f, other.f);
        for (id, counts) in other.b {
            let slot = self.b.entry(id).or_default();
            if slot.len() < counts.len() {
                slot.resize(counts.len(), 0);
            }
            for (dst, src) in slot.iter_mut().zip(counts) {
                *dst = dst.saturating_add(src);
            }
        }
    }

    /// Line → hit count, derived from statement start lines (max per line)
    #[must_use]
    pub fn line_coverage(&self) -> BTreeMap<u32, u64> {
        let mut lines = BTreeMap::new();
        for (id, loc) in &self.statement_map {
            let count = self.s.get(id).copied().unwrap_or(0);
            lines
                .entry(loc.start.line)
                .and_modify(|c: &mut u64| *c = (*c).max(count))
                .or_insert(count);
        }
        lines
    }

    /// Lines whose statements never ran
    #[must_use]
    pub fn uncovered_lines(&self) -> Vec<u32> {
        self.line_coverage()
            .into_iter()
            .filter_map(|(line, count)| (count == 0).then_some(line))
            .collect()
    }

    /// Totals for every metric of this file
    #[must_use]
    pub fn summary(&self) -> CoverageSummary {
        let lines = self.line_coverage();
        CoverageSummary {
            statements: totals(self.s.values()),
            branches: totals(self.b.values().flatten()),
            functions: totals(self.f.values()),
            lines: totals(lines.values()),
        }
    }
}

fn next_id<V>(map: &BTreeMap<u32, V>) -> u32 {
    map.keys().next_back().map_or(0, |last| last + 1)
}

fn sum_into(dst: &mut BTreeMap<u32, u64>, src: BTreeMap<u32, u64>) {
    for (id, count) in src {
        let slot = dst.entry(id).or_insert(0);
        *slot = slot.saturating_add(count);
    }
}

fn totals<'a>(counts: impl Iterator<Item = &'a u64>) -> Totals {
    let (total, covered) = counts.fold((0, 0), |(total, covered), &c| {
        (total + 1, covered + usize::from(c > 0))
    });
    Totals::new(total, covered)
}

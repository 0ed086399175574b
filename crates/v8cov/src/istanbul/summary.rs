//! Aggregate statistics and watermark classification

use serde::{Deserialize, Serialize};
use std::fmt;

/// Covered/total counts for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    /// Number of instrumented items
    pub total: usize,
    /// Items executed at least once
    pub covered: usize,
    /// Items excluded from the total
    pub skipped: usize,
    /// Coverage percentage, truncated to three decimals
    pub pct: f64,
}

impl Totals {
    /// Totals with the percentage computed from the counts
    #[must_use]
    pub fn new(total: usize, covered: usize) -> Self {
        Self {
            total,
            covered,
            skipped: 0,
            pct: percent(covered, total),
        }
    }

    /// Sum two totals, recomputing the percentage
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        Self {
            total: self.total + other.total,
            covered: self.covered + other.covered,
            skipped: self.skipped + other.skipped,
            pct: percent(self.covered + other.covered, self.total + other.total),
        }
    }
}

impl Default for Totals {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// `100` for an empty total, else `floor(100000 * covered / total) / 1000`
fn percent(covered: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let scaled = (covered as u128 * 100_000) / total as u128;
    scaled as f64 / 1000.0
}

/// Totals for every Istanbul metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Statement totals
    pub statements: Totals,
    /// Branch totals (one item per branch location)
    pub branches: Totals,
    /// Function totals
    pub functions: Totals,
    /// Line totals
    pub lines: Totals,
}

impl CoverageSummary {
    /// Sum two summaries metric by metric
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        Self {
            statements: self.statements.combine(&other.statements),
            branches: self.branches.combine(&other.branches),
            functions: self.functions.combine(&other.functions),
            lines: self.lines.combine(&other.lines),
        }
    }
}

impl fmt::Display for CoverageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Statements", self.statements),
            ("Branches", self.branches),
            ("Functions", self.functions),
            ("Lines", self.lines),
        ];
        for (name, t) in rows {
            writeln!(f, "{name:<12}: {:>7.2}% ( {}/{} )", t.pct, t.covered, t.total)?;
        }
        Ok(())
    }
}

/// Classification of a percentage against a watermark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkLevel {
    /// Below the low mark
    Low,
    /// Between the marks
    Medium,
    /// At or above the high mark
    High,
}

/// Low/high thresholds for one metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    /// Below this is low
    pub low: f64,
    /// At or above this is high
    pub high: f64,
}

impl Watermark {
    /// Create a watermark
    #[must_use]
    pub const fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Classify a percentage
    #[must_use]
    pub fn classify(&self, pct: f64) -> WatermarkLevel {
        if pct < self.low {
            WatermarkLevel::Low
        } else if pct >= self.high {
            WatermarkLevel::High
        } else {
            WatermarkLevel::Medium
        }
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new(50.0, 80.0)
    }
}

/// Watermarks for every metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Watermarks {
    /// Statement watermark
    pub statements: Watermark,
    /// Branch watermark
    pub branches: Watermark,
    /// Function watermark
    pub functions: Watermark,
    /// Line watermark
    pub lines: Watermark,
}

impl Watermarks {
    /// Same thresholds for every metric
    #[must_use]
    pub const fn uniform(low: f64, high: f64) -> Self {
        let mark = Watermark::new(low, high);
        Self {
            statements: mark,
            branches: mark,
            functions: mark,
            lines: mark,
        }
    }

    /// Level of each metric of `summary`: statements, branches, functions, lines
    #[must_use]
    pub fn classify(&self, summary: &CoverageSummary) -> [WatermarkLevel; 4] {
        [
            self.statements.classify(summary.statements.pct),
            self.branches.classify(summary.branches.pct),
            self.functions.classify(summary.functions.pct),
            self.lines.classify(summary.lines.pct),
        ]
    }
}

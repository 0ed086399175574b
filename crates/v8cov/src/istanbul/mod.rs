//! Istanbul coverage data
//!
//! The shapes written to `coverage-final.json` and consumed by standard
//! reporters: one [`FileCoverage`] per original source file, collected into a
//! [`CoverageMap`] keyed by path.
//!
//! # Merging
//!
//! ```text
//! fragment(a.ts) ─┐
//!                 ├─ same maps? ── yes ─→ counters summed
//! fragment(a.ts) ─┘             └─ no ──→ later fragment replaces
//! ```

mod file;
mod map;
mod summary;

pub use file::FileCoverage;
pub use map::CoverageMap;
pub use summary::{CoverageSummary, Totals, Watermark, WatermarkLevel, Watermarks};

use serde::{Deserialize, Serialize};

/// A position in a source file (1-based line, 0-based column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    /// Line number, starting at 1
    pub line: u32,
    /// Column, starting at 0
    pub column: u32,
}

impl Position {
    /// Create a new position
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A start/end span in a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Start position
    pub start: Position,
    /// End position
    pub end: Position,
}

impl Location {
    /// Create a new location
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Location from `(line, column)` pairs
    #[must_use]
    pub const fn from_coords(start: (u32, u32), end: (u32, u32)) -> Self {
        Self {
            start: Position::new(start.0, start.1),
            end: Position::new(end.0, end.1),
        }
    }
}

/// A function entry of `fnMap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMapping {
    /// Function name (`(anonymous_N)` when unnamed)
    pub name: String,
    /// Span of the declaration head
    pub decl: Location,
    /// Span of the whole function
    pub loc: Location,
    /// Start line
    pub line: u32,
}

/// Kind of branch point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchType {
    /// `if` / `else`
    #[serde(rename = "if")]
    If,
    /// `a ? b : c`
    #[serde(rename = "cond-expr")]
    CondExpr,
    /// `a && b`, `a || b`, `a ?? b` chains
    #[serde(rename = "binary-expr")]
    BinaryExpr,
    /// `switch` cases
    #[serde(rename = "switch")]
    Switch,
}

impl BranchType {
    /// Istanbul name of the branch kind
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::If => "if",
            Self::CondExpr => "cond-expr",
            Self::BinaryExpr => "binary-expr",
            Self::Switch => "switch",
        }
    }
}

/// A branch entry of `branchMap`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMapping {
    /// Span of the whole branch construct
    pub loc: Location,
    /// Branch kind
    #[serde(rename = "type")]
    pub branch_type: BranchType,
    /// One location per alternative; parallel to the `b` counters
    pub locations: Vec<Location>,
    /// Start line
    pub line: u32,
}

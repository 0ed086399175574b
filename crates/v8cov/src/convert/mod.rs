//! V8 ranges → Istanbul file coverage
//!
//! One [`ConvertTask`] per script: parse the code, walk statements,
//! functions and branch points, look up each construct's count with the
//! innermost-wins rule, and translate its position through the source map.
//! Tasks and outputs are plain owned data so they can cross to a worker.
//!
//! ```text
//! code ──parse──→ constructs ──count_at──→ counts
//!                     │
//!                     └──source map──→ (path, Location) ──→ FileCoverage[]
//! ```

mod lines;
mod mapping;
mod visitor;

pub use lines::{byte_to_utf16, utf16_to_byte, LineIndex};

use crate::istanbul::FileCoverage;
use crate::result::{CovError, CovResult};
use crate::source_map::SourceMapData;
use crate::v8::{RangeIndex, V8Function, V8Range};
use mapping::{FileBuilder, PositionMapper};
use serde::{Deserialize, Serialize};
use std::panic;
use std::path::Path;
use std::thread;
use std::time::Instant;
use tracing::debug;
use visitor::{Arm, Construct};

/// Stack reserved for parsing and walking one script
pub const CONVERT_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Scripts nested deeper than this are reported as failed instead of parsed
pub const MAX_NESTING_DEPTH: usize = 4096;

/// Portion `[start, end)` of a script, in V8 offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetWindow {
    /// Start offset (inclusive)
    pub start: u32,
    /// End offset (exclusive)
    pub end: u32,
}

impl OffsetWindow {
    /// Create a window
    #[must_use]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Clamp a range into the window and shift it to window offsets
    #[must_use]
    pub fn clip(&self, range: &V8Range) -> Option<V8Range> {
        if range.end_offset <= self.start || range.start_offset >= self.end {
            return None;
        }
        let start = range.start_offset.max(self.start) - self.start;
        let end = range.end_offset.min(self.end) - self.start;
        Some(V8Range::new(start, end, range.count))
    }
}

/// Dialect of the code handed to the parser
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSyntax {
    /// JavaScript with JSX
    #[default]
    JavaScript,
    /// TypeScript
    TypeScript,
    /// TypeScript with JSX
    Tsx,
}

impl SourceSyntax {
    /// Dialect implied by a file extension
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("ts" | "mts" | "cts") => Self::TypeScript,
            Some("tsx") => Self::Tsx,
            _ => Self::JavaScript,
        }
    }
}

/// Conversion input for one script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertTask {
    /// Script url, for diagnostics
    pub url: String,
    /// Script (or window) code
    pub code: String,
    /// Source map of the code
    pub source_map: Option<SourceMapData>,
    /// V8 functions of the script
    pub functions: Vec<V8Function>,
    /// Restrict analysis to part of the code
    pub window: Option<OffsetWindow>,
    /// Path used when no source map applies
    pub fallback_path: String,
    /// Parser dialect
    pub syntax: SourceSyntax,
}

impl ConvertTask {
    /// Task for a script; the url doubles as the fallback path
    #[must_use]
    pub fn new(url: impl Into<String>, code: impl Into<String>, functions: Vec<V8Function>) -> Self {
        let url = url.into();
        Self {
            fallback_path: url.clone(),
            url,
            code: code.into(),
            source_map: None,
            functions,
            window: None,
            syntax: SourceSyntax::JavaScript,
        }
    }

    /// Set the source map
    #[must_use]
    pub fn with_source_map(mut self, map: SourceMapData) -> Self {
        self.source_map = Some(map);
        self
    }

    /// Restrict to a window of the script
    #[must_use]
    pub fn with_window(mut self, window: OffsetWindow) -> Self {
        self.window = Some(window);
        self
    }

    /// Set the fallback path
    #[must_use]
    pub fn with_fallback_path(mut self, path: impl Into<String>) -> Self {
        self.fallback_path = path.into();
        self
    }

    /// Set the parser dialect
    #[must_use]
    pub fn with_syntax(mut self, syntax: SourceSyntax) -> Self {
        self.syntax = syntax;
        self
    }
}

/// Milliseconds spent per phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
    /// Parsing
    pub parse_ms: f64,
    /// Walking and mapping
    pub convert_ms: f64,
    /// Whole task
    pub total_ms: f64,
}

/// Ranges seen vs. ranges inside the window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStats {
    /// Ranges in the task
    pub considered: usize,
    /// Ranges kept after windowing
    pub kept: usize,
}

/// Conversion result for one script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertOutput {
    /// Script url
    pub url: String,
    /// Whether conversion completed
    pub success: bool,
    /// Failure message
    pub error: Option<String>,
    /// Coverage fragments, one per original file
    pub files: Vec<FileCoverage>,
    /// Phase timings
    pub timings: Timings,
    /// Range filter statistics
    pub filter: FilterStats,
    /// Constructs that mapped to no original source
    pub unmapped: usize,
}

impl ConvertOutput {
    fn failed(url: &str, error: String, timings: Timings, filter: FilterStats) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            error: Some(error),
            files: Vec::new(),
            timings,
            filter,
            unmapped: 0,
        }
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

/// Ranges of the task, windowed when a window is set
fn task_ranges(task: &ConvertTask) -> (Vec<V8Range>, FilterStats) {
    let all = task.functions.iter().flat_map(|f| f.ranges.iter());
    let ranges: Vec<V8Range> = match task.window {
        Some(window) => all.filter_map(|r| window.clip(r)).collect(),
        None => all.copied().collect(),
    };
    let considered = task.functions.iter().map(|f| f.ranges.len()).sum();
    let kept = ranges.len();
    (ranges, FilterStats { considered, kept })
}

/// Code the task analyses
fn task_code(task: &ConvertTask) -> &str {
    match task.window {
        Some(window) => {
            let lo = utf16_to_byte(&task.code, window.start);
            let hi = utf16_to_byte(&task.code, window.end).max(lo);
            &task.code[lo..hi]
        }
        None => &task.code,
    }
}

/// Convert one script. Never panics on bad input; failures set `success = false`.
///
/// The work runs on a dedicated thread with [`CONVERT_STACK_SIZE`] of stack.
#[must_use]
pub fn convert(task: &ConvertTask) -> ConvertOutput {
    let spawned = thread::scope(|scope| {
        thread::Builder::new()
            .name("v8cov-convert".to_string())
            .stack_size(CONVERT_STACK_SIZE)
            .spawn_scoped(scope, || convert_in_place(task))
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|payload| panic::resume_unwind(payload))
            })
    });
    spawned.unwrap_or_else(|e| {
        ConvertOutput::failed(
            &task.url,
            format!("failed to spawn conversion thread: {e}"),
            Timings::default(),
            FilterStats::default(),
        )
    })
}

/// [`convert`] on the current thread, which must own [`CONVERT_STACK_SIZE`] of stack
pub(crate) fn convert_in_place(task: &ConvertTask) -> ConvertOutput {
    let started = Instant::now();
    let (ranges, filter) = task_ranges(task);
    let code = task_code(task);

    let depth = visitor::nesting_estimate(code);
    if depth > MAX_NESTING_DEPTH {
        debug!(url = %task.url, depth, "script nests too deeply to parse");
        let timings = Timings {
            parse_ms: 0.0,
            convert_ms: 0.0,
            total_ms: elapsed_ms(started),
        };
        let message = format!("nesting depth {depth} exceeds {MAX_NESTING_DEPTH}");
        return ConvertOutput::failed(&task.url, message, timings, filter);
    }

    let program = match visitor::parse(code, task.syntax) {
        Ok(program) => program,
        Err(message) => {
            debug!(url = %task.url, error = %message, "parse failed");
            let timings = Timings {
                parse_ms: elapsed_ms(started),
                convert_ms: 0.0,
                total_ms: elapsed_ms(started),
            };
            return ConvertOutput::failed(&task.url, message, timings, filter);
        }
    };
    let parse_ms = elapsed_ms(started);

    let convert_started = Instant::now();
    let decoded = match task.source_map.as_ref().map(SourceMapData::to_decoded).transpose() {
        Ok(decoded) => decoded,
        Err(e) => {
            let timings = Timings {
                parse_ms,
                convert_ms: elapsed_ms(convert_started),
                total_ms: elapsed_ms(started),
            };
            return ConvertOutput::failed(&task.url, e.to_string(), timings, filter);
        }
    };

    let lines = LineIndex::new(code);
    let index = RangeIndex::new(ranges);
    let mut mapper = PositionMapper::new(&lines, decoded, &task.fallback_path);
    let mut builder = FileBuilder::default();
    let mut unmapped = 0;
    let count_at = |byte: usize| index.count_or_zero(lines.utf16_offset(byte));

    for construct in visitor::collect(&program) {
        match construct {
            Construct::Statement(span) => match mapper.locate(span) {
                Some((path, loc)) => builder.statement(&path, loc, count_at(span.lo)),
                None => unmapped += 1,
            },
            Construct::Function { name, decl, span } => {
                let Some((path, loc)) = mapper.locate(span) else {
                    unmapped += 1;
                    continue;
                };
                let decl = mapper
                    .locate(decl)
                    .filter(|(p, _)| *p == path)
                    .map_or(loc, |(_, l)| l);
                builder.function(&path, name, decl, loc, count_at(span.lo));
            }
            Construct::Branch { kind, span, arms } => {
                let Some((path, loc)) = mapper.locate(span) else {
                    unmapped += 1;
                    continue;
                };
                let mut resolved = Vec::with_capacity(arms.len());
                let mut explicit_total = 0u64;
                for arm in &arms {
                    if let Arm::Explicit(arm_span) = arm {
                        let count = count_at(arm_span.lo);
                        explicit_total = explicit_total.saturating_add(count);
                        let arm_loc = mapper
                            .locate(*arm_span)
                            .filter(|(p, _)| *p == path)
                            .map_or(loc, |(_, l)| l);
                        resolved.push((arm_loc, count));
                    } else {
                        resolved.push((loc, count_at(span.lo).saturating_sub(explicit_total)));
                    }
                }
                builder.branch(&path, kind, loc, resolved);
            }
        }
    }

    let files = builder.finish();
    let timings = Timings {
        parse_ms,
        convert_ms: elapsed_ms(convert_started),
        total_ms: elapsed_ms(started),
    };
    debug!(
        url = %task.url,
        files = files.len(),
        unmapped,
        total_ms = timings.total_ms,
        "converted script"
    );
    ConvertOutput {
        url: task.url.clone(),
        success: true,
        error: None,
        files,
        timings,
        filter,
        unmapped,
    }
}

/// All-zero coverage of an original source file
pub fn zero_coverage(path: &str, code: &str) -> CovResult<FileCoverage> {
    let task = ConvertTask::new(path, code, Vec::new()).with_syntax(SourceSyntax::from_path(path));
    let output = convert(&task);
    if !output.success {
        return Err(CovError::parse(path, output.error.unwrap_or_default()));
    }
    Ok(output
        .files
        .into_iter()
        .next()
        .unwrap_or_else(|| FileCoverage::new(path)))
}

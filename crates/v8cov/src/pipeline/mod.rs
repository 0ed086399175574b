//! One processing run, from raw V8 entries to a coverage map
//!
//! ```text
//! V8Coverage ─filter─→ scripts ─plan─→ ConvertTask[] ─executor─→ ConvertOutput[]
//!                                                                   │
//!   ProcessResult ←─ summary ←─ uncovered ←─ exclude ←─ CoverageMap ←┘
//! ```

mod tasks;
mod uncovered;

pub use tasks::TaskSources;

use crate::config::PipelineConfig;
use crate::istanbul::{CoverageMap, CoverageSummary, WatermarkLevel};
use crate::pool::{executor_for, Executor};
use crate::result::{CovError, CovResult};
use crate::source_map::paths::relativize;
use crate::source_map::{DevModeExtractor, SourceMapLoader};
use crate::v8::{CoverageReader, ExcludePattern, ReaderConfig, V8Coverage};
use globset::GlobSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A task that produced no coverage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Script url
    pub url: String,
    /// Failure description
    pub message: String,
}

/// What happened during a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    /// Entries handed to the run
    pub entries_total: usize,
    /// Entries left after filtering
    pub entries_kept: usize,
    /// Conversion tasks per source-map origin
    pub sources: TaskSources,
    /// Scripts for which no task could be built
    pub skipped_scripts: usize,
    /// Dev chunk modules whose code could not be located
    pub unlocated_modules: usize,
    /// Dev-mode extractions served without decoding
    pub dev_cache_hits: usize,
    /// Tasks that failed or crashed
    pub failed_tasks: usize,
    /// Failure details
    pub failures: Vec<TaskFailure>,
    /// Constructs that mapped to no original source
    pub unmapped_constructs: usize,
    /// V8 ranges seen by successful tasks
    pub ranges_considered: usize,
    /// V8 ranges inside task windows
    pub ranges_kept: usize,
    /// Files dropped by exclude globs
    pub excluded_files: usize,
    /// Never-loaded files added with zero counts
    pub uncovered_files: usize,
    /// Sum of per-task conversion time
    pub convert_ms: f64,
    /// Wall time of the run
    pub elapsed_ms: f64,
}

/// Outcome of [`CoverageProcessor::process`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResult {
    /// Merged coverage keyed by project-relative path
    pub coverage_map: CoverageMap,
    /// Aggregate totals
    pub summary: CoverageSummary,
    /// Run statistics
    pub diagnostics: Diagnostics,
}

/// Drives filtering, conversion and aggregation
#[derive(Debug)]
pub struct CoverageProcessor {
    config: PipelineConfig,
    root: PathBuf,
    reader: CoverageReader,
    loader: SourceMapLoader,
    dev: DevModeExtractor,
    executor: Arc<dyn Executor>,
    include: GlobSet,
    exclude: GlobSet,
}

impl CoverageProcessor {
    /// Build a processor; the executor follows [`PipelineConfig::resolved_max_workers`]
    pub fn new(config: PipelineConfig) -> CovResult<Self> {
        let executor = executor_for(config.resolved_max_workers());
        Self::with_executor(config, executor)
    }

    /// Build a processor around an existing executor
    pub fn with_executor(config: PipelineConfig, executor: Arc<dyn Executor>) -> CovResult<Self> {
        config.validate()?;
        let root = fs::canonicalize(&config.root).unwrap_or_else(|_| config.root.clone());
        let build_dir = if config.build_dir.is_absolute() {
            config.build_dir.clone()
        } else {
            root.join(&config.build_dir)
        };

        let reader_config = config
            .reader_excludes
            .iter()
            .fold(ReaderConfig::new(), |rc, needle| {
                rc.with_exclude(ExcludePattern::contains(needle.as_str()))
            });

        Ok(Self {
            reader: CoverageReader::new(reader_config),
            loader: SourceMapLoader::new(build_dir, config.public_prefix.clone()),
            dev: DevModeExtractor::new(config.source_root.clone(), config.dev_cache_capacity),
            include: config.include_set()?,
            exclude: config.exclude_set()?,
            executor,
            root,
            config,
        })
    }

    /// Configuration of the run
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Resolved project root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reader used for filtering
    #[must_use]
    pub fn reader(&self) -> &CoverageReader {
        &self.reader
    }

    /// Executor running the conversions
    #[must_use]
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Read every snapshot of a directory and process the merge
    pub fn process_directory(&self, dir: &Path) -> CovResult<ProcessResult> {
        let coverage = self.reader.read_from_directory(dir)?;
        self.process(coverage)
    }

    /// Process one (possibly merged) coverage capture.
    ///
    /// Individual script failures are logged and counted; only a terminated
    /// executor fails the run.
    pub fn process(&self, coverage: V8Coverage) -> CovResult<ProcessResult> {
        let started = Instant::now();
        let mut diagnostics = Diagnostics {
            entries_total: coverage.len(),
            ..Diagnostics::default()
        };

        let coverage = self.reader.filter_entries(coverage, None);
        diagnostics.entries_kept = coverage.len();

        let hits_before = self.dev.cache_stats().hits;
        let tasks = self.plan_tasks(&coverage, &mut diagnostics);
        diagnostics.dev_cache_hits = self.dev.cache_stats().hits - hits_before;
        let urls: Vec<String> = tasks.iter().map(|t| t.url.clone()).collect();
        info!(
            scripts = diagnostics.entries_kept,
            tasks = tasks.len(),
            workers = self.executor.max_workers(),
            "converting coverage"
        );

        let mut coverage_map = CoverageMap::new();
        for (url, result) in urls.into_iter().zip(self.executor.execute_all(tasks)) {
            match result {
                Ok(output) if output.success => {
                    diagnostics.unmapped_constructs += output.unmapped;
                    diagnostics.ranges_considered += output.filter.considered;
                    diagnostics.ranges_kept += output.filter.kept;
                    diagnostics.convert_ms += output.timings.total_ms;
                    for mut fragment in output.files {
                        fragment.path = relativize(&fragment.path, &self.root);
                        coverage_map.add_file_coverage(fragment);
                    }
                }
                Ok(output) => {
                    let message = output.error.unwrap_or_else(|| "conversion failed".to_string());
                    warn!(url = %url, error = %message, "script conversion failed");
                    diagnostics.failed_tasks += 1;
                    diagnostics.failures.push(TaskFailure { url, message });
                }
                Err(CovError::PoolTerminated) => return Err(CovError::PoolTerminated),
                Err(e) => {
                    warn!(url = %url, error = %e, "conversion task failed");
                    diagnostics.failed_tasks += 1;
                    diagnostics.failures.push(TaskFailure {
                        url,
                        message: e.to_string(),
                    });
                }
            }
        }

        let before = coverage_map.len();
        coverage_map.filter(|path| !self.exclude.is_match(path));
        diagnostics.excluded_files = before - coverage_map.len();

        if !self.config.include.is_empty() {
            diagnostics.uncovered_files = uncovered::synthesize(
                &self.root,
                self.loader.build_dir(),
                &self.include,
                &self.exclude,
                &mut coverage_map,
            );
        }

        let summary = coverage_map.summary();
        diagnostics.elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        info!(
            files = coverage_map.len(),
            failed = diagnostics.failed_tasks,
            uncovered = diagnostics.uncovered_files,
            elapsed_ms = diagnostics.elapsed_ms,
            %summary,
            "coverage processed"
        );

        Ok(ProcessResult {
            coverage_map,
            summary,
            diagnostics,
        })
    }

    /// Classify a result against the configured watermarks
    #[must_use]
    pub fn classify(&self, result: &ProcessResult) -> [WatermarkLevel; 4] {
        self.config.watermarks.classify(&result.summary)
    }
}

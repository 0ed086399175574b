//! Pipeline configuration
//!
//! Deserializable with every field optional, so an external config file
//! loader can hand a partial document straight to [`PipelineConfig`].

use crate::istanbul::Watermarks;
use crate::pool::default_max_workers;
use crate::result::{CovError, CovResult};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the worker count (`0` = single-threaded)
pub const WORKERS_ENV: &str = "V8COV_WORKERS";

/// Default capacity of the dev-mode extraction cache
pub const DEFAULT_DEV_CACHE_CAPACITY: usize = 1000;

/// Configuration of one processing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Project root; final paths are made relative to it
    pub root: PathBuf,
    /// Build output directory, relative to `root` unless absolute
    pub build_dir: PathBuf,
    /// Url path prefix under which the build directory is served
    pub public_prefix: String,
    /// Source directory segment identifying project files
    pub source_root: String,
    /// Globs of files that should appear in the report
    pub include: Vec<String>,
    /// Globs removed from the report
    pub exclude: Vec<String>,
    /// Extra url substrings excluded while reading captures
    pub reader_excludes: Vec<String>,
    /// Worker limit; `None` picks a default from the core count
    pub max_workers: Option<usize>,
    /// Resolve bundler-internal dev scripts
    pub dev_mode: bool,
    /// Capacity of the dev-mode extraction cache
    pub dev_cache_capacity: usize,
    /// Report scripts without any source map against their url
    pub include_unmapped: bool,
    /// Thresholds for summary classification
    pub watermarks: Watermarks,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            build_dir: PathBuf::from(".next"),
            public_prefix: "/_next/".to_string(),
            source_root: "src".to_string(),
            include: vec!["src/**/*.{js,jsx,ts,tsx}".to_string()],
            exclude: vec![
                "**/*.test.*".to_string(),
                "**/*.spec.*".to_string(),
                "**/*.d.ts".to_string(),
                "**/node_modules/**".to_string(),
            ],
            reader_excludes: Vec::new(),
            max_workers: None,
            dev_mode: true,
            dev_cache_capacity: DEFAULT_DEV_CACHE_CAPACITY,
            include_unmapped: false,
            watermarks: Watermarks::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the project root
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Set the build directory
    #[must_use]
    pub fn with_build_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.build_dir = dir.into();
        self
    }

    /// Set the public url prefix
    #[must_use]
    pub fn with_public_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.public_prefix = prefix.into();
        self
    }

    /// Set the source root segment
    #[must_use]
    pub fn with_source_root(mut self, root: impl Into<String>) -> Self {
        self.source_root = root.into();
        self
    }

    /// Replace the include globs
    #[must_use]
    pub fn with_include<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = globs.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the exclude globs
    #[must_use]
    pub fn with_exclude<I, S>(mut self, globs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = globs.into_iter().map(Into::into).collect();
        self
    }

    /// Add a url substring excluded while reading captures
    #[must_use]
    pub fn with_reader_exclude(mut self, needle: impl Into<String>) -> Self {
        self.reader_excludes.push(needle.into());
        self
    }

    /// Set the worker limit
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Enable or disable dev-mode resolution
    #[must_use]
    pub const fn with_dev_mode(mut self, enabled: bool) -> Self {
        self.dev_mode = enabled;
        self
    }

    /// Set the dev-mode cache capacity
    #[must_use]
    pub const fn with_dev_cache_capacity(mut self, capacity: usize) -> Self {
        self.dev_cache_capacity = capacity;
        self
    }

    /// Report scripts that have no source map
    #[must_use]
    pub const fn with_include_unmapped(mut self, enabled: bool) -> Self {
        self.include_unmapped = enabled;
        self
    }

    /// Set the watermarks
    #[must_use]
    pub const fn with_watermarks(mut self, watermarks: Watermarks) -> Self {
        self.watermarks = watermarks;
        self
    }

    /// Build directory resolved against the root
    #[must_use]
    pub fn build_path(&self) -> PathBuf {
        if self.build_dir.is_absolute() {
            self.build_dir.clone()
        } else {
            self.root.join(&self.build_dir)
        }
    }

    /// Worker limit: `V8COV_WORKERS`, then the config, then the default
    #[must_use]
    pub fn resolved_max_workers(&self) -> usize {
        Self::workers_from_env(std::env::var(WORKERS_ENV).ok().as_deref())
            .or(self.max_workers)
            .unwrap_or_else(default_max_workers)
    }

    fn workers_from_env(value: Option<&str>) -> Option<usize> {
        value.and_then(|v| v.trim().parse().ok())
    }

    /// Compiled include globs
    pub fn include_set(&self) -> CovResult<GlobSet> {
        compile_globs(&self.include)
    }

    /// Compiled exclude globs
    pub fn exclude_set(&self) -> CovResult<GlobSet> {
        compile_globs(&self.exclude)
    }

    /// Check the configuration before a run
    pub fn validate(&self) -> CovResult<()> {
        if self.public_prefix.is_empty() || !self.public_prefix.starts_with('/') {
            return Err(CovError::config(format!(
                "public_prefix must start with '/': {:?}",
                self.public_prefix
            )));
        }
        if self.source_root.trim_matches('/').is_empty() {
            return Err(CovError::config("source_root must not be empty"));
        }
        for (name, mark) in [
            ("statements", self.watermarks.statements),
            ("branches", self.watermarks.branches),
            ("functions", self.watermarks.functions),
            ("lines", self.watermarks.lines),
        ] {
            if mark.low > mark.high {
                return Err(CovError::config(format!(
                    "{name} watermark low ({}) exceeds high ({})",
                    mark.low, mark.high
                )));
            }
        }
        self.include_set()?;
        self.exclude_set()?;
        Ok(())
    }
}

fn compile_globs(patterns: &[String]) -> CovResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| CovError::invalid_pattern(pattern, e))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| CovError::invalid_pattern(patterns.join(","), e))
}

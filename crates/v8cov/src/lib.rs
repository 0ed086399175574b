//! v8cov: V8 execution counts to Istanbul coverage
//!
//! Takes the raw block coverage V8 reports for a web application's server
//! process and browser client, resolves every script to its original
//! sources through (inline, on-disk or Node-cached) source maps, and turns
//! byte-range hit counts into statement, branch and function coverage.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ collect      │   │ v8::reader   │   │ source_map   │   │ convert      │
//! │ server+client│──►│ filter/merge │──►│ loader / dev │──►│ swc AST walk │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                                                 │ pool
//!                    ┌──────────────┐   ┌──────────────┐          │
//!                    │ summary      │◄──│ istanbul     │◄─────────┘
//!                    │ watermarks   │   │ CoverageMap  │
//!                    └──────────────┘   └──────────────┘
//! ```
//!
//! [`pipeline::CoverageProcessor`] drives one run end to end.

#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::large_stack_arrays, clippy::large_stack_frames))]

/// Bounded FIFO cache
pub mod cache;

/// Collector boundary
pub mod collect;

/// Pipeline configuration
pub mod config;

/// AST-based range conversion
pub mod convert;

/// Istanbul data model and summaries
pub mod istanbul;

/// Subscriber setup
pub mod logging;

/// Processing runs
pub mod pipeline;

/// Worker pool and executors
pub mod pool;

/// Error types
pub mod result;

/// Source map loading and bundler path handling
pub mod source_map;

/// Raw V8 coverage
pub mod v8;

pub use collect::{CollectedCoverage, CollectionSession, CoverageSource};
pub use config::PipelineConfig;
pub use istanbul::{CoverageMap, CoverageSummary, FileCoverage};
pub use pipeline::{CoverageProcessor, Diagnostics, ProcessResult};
pub use result::{CovError, CovResult};
pub use v8::V8Coverage;

/// Common imports
pub mod prelude {
    pub use super::cache::BoundedCache;
    pub use super::collect::*;
    pub use super::config::*;
    pub use super::convert::{convert, zero_coverage, ConvertOutput, ConvertTask, OffsetWindow};
    pub use super::istanbul::*;
    pub use super::logging::{init_logging, LogFormat};
    pub use super::pipeline::*;
    pub use super::pool::{executor_for, Executor, InlineExecutor, PooledExecutor, WorkerPool};
    pub use super::result::*;
    pub use super::source_map::{
        normalize_source_path, DevCacheStats, DevModeExtractor, ExtractedSourceMap, SourceMapData,
        SourceMapLoader,
    };
    pub use super::v8::*;
}

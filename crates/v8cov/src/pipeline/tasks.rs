//! Turning filtered scripts into conversion tasks.

use super::{CoverageProcessor, Diagnostics};
use crate::convert::{byte_to_utf16, utf16_to_byte, ConvertTask, OffsetWindow};
use crate::source_map::paths::{relativize, to_slash};
use crate::source_map::{unescaped_offsets, SourceMapData, SourceMapLoader, EVAL_MARKER};
use crate::v8::{V8Coverage, V8Function, V8Range, V8ScriptCoverage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Number of tasks built from each source-map origin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSources {
    /// Dev-mode module scripts (`webpack-internal:///`)
    pub dev_scripts: usize,
    /// Modules evaluated inside dev chunks
    pub chunk_modules: usize,
    /// Node's `source-map-cache`
    pub node_cache: usize,
    /// Inline `data:` maps
    pub inline: usize,
    /// `.map` files next to build artifacts
    pub map_files: usize,
    /// Scripts reported without a map
    pub unmapped: usize,
}

impl TaskSources {
    /// Tasks across all origins
    #[must_use]
    pub fn total(&self) -> usize {
        self.dev_scripts
            + self.chunk_modules
            + self.node_cache
            + self.inline
            + self.map_files
            + self.unmapped
    }
}

enum MapOrigin {
    NodeCache,
    Inline,
    MapFile,
}

impl CoverageProcessor {
    pub(super) fn plan_tasks(
        &self,
        coverage: &V8Coverage,
        diagnostics: &mut Diagnostics,
    ) -> Vec<ConvertTask> {
        let mut tasks = Vec::new();
        for script in &coverage.result {
            let before = tasks.len();
            self.plan_script(coverage, script, &mut tasks, diagnostics);
            if tasks.len() == before {
                diagnostics.skipped_scripts += 1;
                debug!(url = %script.url, "no conversion source for script");
            }
        }
        tasks
    }

    fn plan_script(
        &self,
        coverage: &V8Coverage,
        script: &V8ScriptCoverage,
        tasks: &mut Vec<ConvertTask>,
        diagnostics: &mut Diagnostics,
    ) {
        let sources = &mut diagnostics.sources;
        let url = script.url.as_str();
        if self.config.dev_mode {
            if self.dev.is_project_script(url) {
                if let Some(task) = self.dev_script_task(script) {
                    sources.dev_scripts += 1;
                    tasks.push(task);
                }
                return;
            }
            if let Some(source) = script.source.as_deref().filter(|s| s.contains(EVAL_MARKER)) {
                let (modules, unlocated) = self.chunk_tasks(script, source);
                diagnostics.unlocated_modules += unlocated;
                if !modules.is_empty() || unlocated > 0 {
                    sources.chunk_modules += modules.len();
                    tasks.extend(modules);
                    return;
                }
            }
        }

        let artifact = self.loader.resolve_script_path(url);
        let code = script
            .source
            .clone()
            .or_else(|| artifact.as_deref().and_then(|p| self.loader.read_script(p)));
        let Some(code) = code else {
            return;
        };
        let fallback = self.fallback_path(url, artifact.as_deref());

        let resolved = coverage
            .cached_source_map(url)
            .map(|map| (map.clone(), MapOrigin::NodeCache))
            .or_else(|| SourceMapLoader::decode_inline(&code).map(|map| (map, MapOrigin::Inline)))
            .or_else(|| {
                artifact
                    .as_deref()
                    .and_then(|path| self.loader.load_for_script(path, Some(&code)))
                    .map(|map| (SourceMapData::clone(&map), MapOrigin::MapFile))
            });

        let task = ConvertTask::new(url, code, script.functions.clone()).with_fallback_path(fallback);
        match resolved {
            Some((map, origin)) => {
                match origin {
                    MapOrigin::NodeCache => sources.node_cache += 1,
                    MapOrigin::Inline => sources.inline += 1,
                    MapOrigin::MapFile => sources.map_files += 1,
                }
                tasks.push(task.with_source_map(map));
            }
            None if self.config.include_unmapped => {
                sources.unmapped += 1;
                tasks.push(task);
            }
            None => {}
        }
    }

    /// A dev module script: its text minus the trailing map comment
    fn dev_script_task(&self, script: &V8ScriptCoverage) -> Option<ConvertTask> {
        let source = script.source.as_deref()?;
        let module = self.dev.extract_from_script_source(&script.url, source)?;
        Some(
            ConvertTask::new(&script.url, module.code, script.functions.clone())
                .with_source_map(module.source_map)
                .with_fallback_path(module.original_path),
        )
    }

    /// One task per project module evaluated inside a chunk, plus the number
    /// of modules whose code could not be located in the chunk text.
    ///
    /// Chunk ranges over a module's escaped string literal are carried over
    /// to offsets of the unescaped module code.
    fn chunk_tasks(&self, script: &V8ScriptCoverage, source: &str) -> (Vec<ConvertTask>, usize) {
        let modules = self
            .dev
            .filter_project_source_maps(self.dev.extract_from_chunk_content(source));
        let mut tasks = Vec::with_capacity(modules.len());
        let mut unlocated = 0;
        for module in modules {
            let Some(span) = module.escaped_span.filter(|_| !module.code.is_empty()) else {
                warn!(
                    url = %script.url,
                    module = %module.original_path,
                    "module code not found in chunk; its counts are lost"
                );
                unlocated += 1;
                continue;
            };
            let functions = module_functions(source, span, &module.code, &script.functions);
            tasks.push(
                ConvertTask::new(&script.url, module.code, functions)
                    .with_source_map(module.source_map)
                    .with_fallback_path(module.original_path),
            );
        }
        (tasks, unlocated)
    }

    /// Report path for constructs that no source map covers
    fn fallback_path(&self, url: &str, artifact: Option<&Path>) -> String {
        artifact.map_or_else(
            || url.to_string(),
            |path| relativize(&to_slash(path), &self.root),
        )
    }
}

/// Chunk ranges re-expressed in offsets of a module's unescaped code
fn module_functions(
    source: &str,
    (lo, hi): (usize, usize),
    code: &str,
    functions: &[V8Function],
) -> Vec<V8Function> {
    let escaped = &source[lo..hi];
    let offsets = unescaped_offsets(escaped);
    let window = OffsetWindow::new(byte_to_utf16(source, lo), byte_to_utf16(source, hi));
    let to_plain = |offset: u32| {
        let raw = utf16_to_byte(escaped, offset).min(offsets.len() - 1);
        byte_to_utf16(code, offsets[raw])
    };
    functions
        .iter()
        .map(|f| V8Function {
            function_name: f.function_name.clone(),
            is_block_coverage: f.is_block_coverage,
            ranges: f
                .ranges
                .iter()
                .filter_map(|r| window.clip(r))
                .map(|r| V8Range::new(to_plain(r.start_offset), to_plain(r.end_offset), r.count))
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_functions_follow_escapes() {
        // chunk: `f("a();\nb();")` with the module text still escaped
        let source = r#"f("a();\nb();")"#;
        let (lo, hi) = (3, 13);
        assert_eq!(&source[lo..hi], r"a();\nb();");
        let functions = vec![V8Function {
            function_name: String::new(),
            is_block_coverage: true,
            ranges: vec![V8Range::new(0, 15, 1), V8Range::new(9, 13, 0)],
        }];
        let mapped = module_functions(source, (lo, hi), "a();\nb();", &functions);
        assert_eq!(
            mapped[0].ranges,
            vec![V8Range::new(0, 9, 1), V8Range::new(5, 9, 0)]
        );
    }

    #[test]
    fn test_task_sources_total() {
        let sources = TaskSources {
            dev_scripts: 1,
            chunk_modules: 2,
            node_cache: 3,
            inline: 4,
            map_files: 5,
            unmapped: 6,
        };
        assert_eq!(sources.total(), 21);
        assert_eq!(TaskSources::default().total(), 0);
    }
}

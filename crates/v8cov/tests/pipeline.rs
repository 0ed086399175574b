//! End-to-end: collectors → snapshots → processing → Istanbul JSON

#![allow(clippy::unwrap_used, clippy::expect_used)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use v8cov::prelude::*;

struct StaticSource {
    name: &'static str,
    coverage: Option<V8Coverage>,
}

impl CoverageSource for StaticSource {
    fn name(&self) -> &str {
        self.name
    }

    fn start(&mut self) -> CovResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> CovResult<V8Coverage> {
        self.coverage
            .take()
            .ok_or_else(|| CovError::collector(self.name, "already stopped"))
    }
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, text).unwrap();
}

fn function(ranges: Vec<V8Range>) -> V8Function {
    V8Function {
        function_name: String::new(),
        is_block_coverage: true,
        ranges,
    }
}

/// Server capture: one Node module with an inline map to `src/server/api.ts`
fn server_capture() -> V8Coverage {
    let map = SourceMapData::new(vec!["webpack://app/./src/server/api.ts".to_string()], "AAAA;AACA");
    let code = format!(
        "handle();\nidle();\n//# sourceMappingURL=data:application/json;base64,{}",
        STANDARD.encode(serde_json::to_vec(&map).unwrap())
    );
    let idle_start = code.find("idle").unwrap() as u32;
    let idle_end = idle_start + "idle();".len() as u32;
    V8Coverage::from_scripts(vec![V8ScriptCoverage {
        script_id: "12".to_string(),
        url: "file:///srv/app/.next/server/api.js".to_string(),
        source: Some(code.clone()),
        functions: vec![function(vec![
            V8Range::new(0, code.len() as u32, 1),
            V8Range::new(idle_start, idle_end, 0),
        ])],
    }])
}

/// Client capture: a production chunk whose `.map` lives in the build dir
fn client_capture(reader: &CoverageReader) -> V8Coverage {
    reader.read_from_playwright(vec![
        PlaywrightEntry {
            url: "http://localhost:3000/_next/static/chunks/page.js".to_string(),
            source: None,
            functions: vec![function(vec![V8Range::new(0, 11, 4)])],
        },
        PlaywrightEntry {
            url: "http://localhost:3000/_next/static/chunks/node_modules/react.js".to_string(),
            source: None,
            functions: vec![function(vec![V8Range::new(0, 10, 9)])],
        },
    ])
}

#[test]
fn test_collect_persist_and_process() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, ".next/static/chunks/page.js", "render(1);\n");
    write(
        root,
        ".next/static/chunks/page.js.map",
        r#"{"version":3,"sources":["webpack://_N_E/./src/app/page.tsx"],"mappings":"AAAA"}"#,
    );
    write(root, "src/app/page.tsx", "render(1);\n");
    write(root, "src/server/api.ts", "handle();\nidle();\n");
    write(root, "src/lib/never.ts", "export function never() {\n  return 1;\n}\n");
    write(root, "src/lib/never.test.ts", "never();\n");

    // collect both sides and stage one snapshot per side
    let reader = CoverageReader::default();
    let session = CollectionSession::start(
        Box::new(StaticSource {
            name: "server",
            coverage: Some(server_capture()),
        }),
        Box::new(StaticSource {
            name: "client",
            coverage: Some(client_capture(&reader)),
        }),
    );
    let collected = session.stop();
    assert!(!collected.is_empty());

    let staging = StagingDir::create(root.join(".v8cov")).unwrap();
    let writer = staging.writer().unwrap();
    writer.write(&collected.server).unwrap();
    writer.write(&collected.client).unwrap();
    fs::write(staging.path().join("notes.txt"), "ignored").unwrap();

    let merged = reader.read_from_directory(staging.path()).unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(reader.get_stats(&merged).filtered, 2);

    let config = PipelineConfig::new().with_root(root).with_max_workers(2);
    let processor = CoverageProcessor::with_executor(config, executor_for(2)).unwrap();
    let result = processor.process(merged).unwrap();
    drop(staging);

    assert_eq!(
        result.coverage_map.files(),
        vec!["src/app/page.tsx", "src/lib/never.ts", "src/server/api.ts"]
    );
    assert_eq!(result.diagnostics.entries_kept, 2);
    assert_eq!(result.diagnostics.sources.inline, 1);
    assert_eq!(result.diagnostics.sources.map_files, 1);
    assert_eq!(result.diagnostics.uncovered_files, 1);
    assert_eq!(result.diagnostics.failed_tasks, 0);

    let page = result.coverage_map.file_coverage_for("src/app/page.tsx").unwrap();
    assert_eq!(page.s.values().copied().collect::<Vec<_>>(), vec![4]);

    let api = result.coverage_map.file_coverage_for("src/server/api.ts").unwrap();
    assert_eq!(api.s.values().copied().collect::<Vec<_>>(), vec![1, 0]);
    assert_eq!(api.uncovered_lines(), vec![2]);

    assert_eq!(result.summary.statements.total, 4);
    assert_eq!(result.summary.statements.covered, 2);
    assert_eq!(result.summary.statements.pct, 50.0);
    assert_eq!(processor.classify(&result)[0], WatermarkLevel::Medium);

    // Istanbul JSON: path → file coverage with string ids
    let json = serde_json::to_value(&result.coverage_map).unwrap();
    let page_json = &json["src/app/page.tsx"];
    assert_eq!(page_json["path"], "src/app/page.tsx");
    assert_eq!(page_json["s"]["0"], 4);
    assert_eq!(page_json["statementMap"]["0"]["start"]["line"], 1);
    assert!(page_json["fnMap"].as_object().unwrap().is_empty());

    let back: CoverageMap = serde_json::from_value(json).unwrap();
    assert_eq!(back, result.coverage_map);
}

#[test]
fn test_repeated_runs_accumulate() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let config = PipelineConfig::new()
        .with_root(root)
        .with_include(Vec::<String>::new());
    let processor = CoverageProcessor::with_executor(config, Arc::new(InlineExecutor::new())).unwrap();

    let first = processor.process(server_capture()).unwrap();
    let second = processor.process(server_capture()).unwrap();

    let mut total = first.coverage_map.clone();
    total.merge(second.coverage_map);
    let api = total.file_coverage_for("src/server/api.ts").unwrap();
    assert_eq!(api.s.values().copied().collect::<Vec<_>>(), vec![2, 0]);
    assert_eq!(total.summary().statements.covered, 1);
}

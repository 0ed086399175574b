//! Zero-count entries for project files no bundle ever loaded.

use crate::convert::zero_coverage;
use crate::istanbul::{CoverageMap, FileCoverage};
use crate::source_map::paths::to_slash;
use globset::GlobSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

fn is_pruned(entry: &DirEntry, build_dir: &Path) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == "node_modules" || name.starts_with('.') || entry.path() == build_dir
}

/// Add every included, non-excluded file under `root` missing from `map`.
///
/// Returns the number of files added.
pub(super) fn synthesize(
    root: &Path,
    build_dir: &Path,
    include: &GlobSet,
    exclude: &GlobSet,
    map: &mut CoverageMap,
) -> usize {
    let mut added = 0;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_pruned(entry, build_dir));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = to_slash(relative);
        if !include.is_match(&relative) || exclude.is_match(&relative) || map.contains(&relative) {
            continue;
        }

        let code = match fs::read_to_string(entry.path()) {
            Ok(code) => code,
            Err(e) => {
                warn!(file = %relative, error = %e, "skipping unreadable source file");
                continue;
            }
        };
        let coverage = zero_coverage(&relative, &code).unwrap_or_else(|e| {
            warn!(file = %relative, error = %e, "unparsable source; adding empty coverage");
            FileCoverage::new(relative.as_str())
        });
        map.add_file_coverage(coverage);
        added += 1;
    }

    debug!(added, root = %root.display(), "synthesized uncovered files");
    added
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use std::fs;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_adds_only_missing_included_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/a.ts", "export const a = 1;\n");
        write(root, "src/b.tsx", "export function B() { return null; }\n");
        write(root, "src/b.test.tsx", "it('x', () => {});\n");
        write(root, "src/broken.ts", "export const = ;\n");
        write(root, "lib/c.ts", "export const c = 1;\n");
        write(root, "node_modules/pkg/src/d.ts", "export const d = 1;\n");
        write(root, ".next/server/src/e.js", "e();\n");

        let config = PipelineConfig::default();
        let mut map = CoverageMap::new();
        map.add_file_coverage(FileCoverage::new("src/a.ts"));

        let added = synthesize(
            root,
            &root.join(".next"),
            &config.include_set().unwrap(),
            &config.exclude_set().unwrap(),
            &mut map,
        );

        assert_eq!(added, 2);
        assert_eq!(map.files(), vec!["src/a.ts", "src/b.tsx", "src/broken.ts"]);
        let b = map.file_coverage_for("src/b.tsx").unwrap();
        assert!(!b.fn_map.is_empty());
        assert!(b.f.values().all(|&c| c == 0));
        assert!(map.file_coverage_for("src/broken.ts").unwrap().is_empty());
        // pre-existing entries keep their data
        assert!(map.file_coverage_for("src/a.ts").unwrap().is_empty());
    }
}

//! Snapshot persistence for server-side captures.
//!
//! Every capture lands in its own `coverage-<ms>-<seq>.json` file, so writers
//! never share a file and the directory reads back in write order.

use super::V8Coverage;
use crate::result::CovResult;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// File name prefix recognised by `CoverageReader::read_from_directory`
pub const SNAPSHOT_PREFIX: &str = "coverage-";

/// Writes uniquely named snapshot files into a directory
#[derive(Debug)]
pub struct SnapshotWriter {
    dir: PathBuf,
    seq: AtomicU64,
    last_ms: AtomicU64,
}

impl SnapshotWriter {
    /// Create a writer, creating the directory if needed
    pub fn new(dir: impl Into<PathBuf>) -> CovResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
            last_ms: AtomicU64::new(0),
        })
    }

    /// Target directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Next file name; timestamps never go backwards between calls
    fn next_name(&self) -> String {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let ms = self.last_ms.fetch_max(now, Ordering::SeqCst).max(now);
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        format!("{SNAPSHOT_PREFIX}{ms:013}-{seq:06}.json")
    }

    /// Persist a snapshot as `{result: [...]}`
    pub fn write(&self, coverage: &V8Coverage) -> CovResult<PathBuf> {
        let snapshot = V8Coverage::from_scripts(coverage.result.clone());
        let path = self.dir.join(self.next_name());
        fs::write(&path, serde_json::to_vec(&snapshot)?)?;
        debug!(file = %path.display(), scripts = snapshot.len(), "wrote coverage snapshot");
        Ok(path)
    }
}

/// Staging directory removed on drop unless retained
#[derive(Debug)]
pub struct StagingDir {
    path: PathBuf,
    retain: bool,
}

impl StagingDir {
    /// Create (or reuse) a staging directory
    pub fn create(path: impl Into<PathBuf>) -> CovResult<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self {
            path,
            retain: false,
        })
    }

    /// Staging path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the directory after this value is dropped
    pub fn retain(&mut self) {
        self.retain = true;
    }

    /// Writer that stages snapshots here
    pub fn writer(&self) -> CovResult<SnapshotWriter> {
        SnapshotWriter::new(&self.path)
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.retain {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(dir = %self.path.display(), error = %e, "failed to remove staging directory");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::v8::{CoverageReader, V8ScriptCoverage};
    use tempfile::TempDir;

    fn one_script(url: &str) -> V8Coverage {
        V8Coverage::from_scripts(vec![V8ScriptCoverage {
            script_id: "1".to_string(),
            url: url.to_string(),
            source: None,
            functions: vec![],
        }])
    }

    #[test]
    fn test_names_are_unique_and_ordered() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(dir.path()).unwrap();
        let names: Vec<String> = (0..20).map(|_| writer.next_name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, names);
        assert!(names.iter().all(|n| n.starts_with(SNAPSHOT_PREFIX)));
    }

    #[test]
    fn test_snapshots_read_back_in_write_order() {
        let dir = TempDir::new().unwrap();
        let writer = SnapshotWriter::new(dir.path()).unwrap();
        writer.write(&one_script("/first.js")).unwrap();
        writer.write(&one_script("/second.js")).unwrap();
        writer.write(&one_script("/third.js")).unwrap();

        let merged = CoverageReader::default()
            .read_from_directory(dir.path())
            .unwrap();
        let urls: Vec<_> = merged.result.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["/first.js", "/second.js", "/third.js"]);
    }

    #[test]
    fn test_staging_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("staging");
        {
            let staging = StagingDir::create(&path).unwrap();
            staging.writer().unwrap().write(&one_script("/a.js")).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_staging_retained() {
        let root = TempDir::new().unwrap();
        let path = root.path().join("staging");
        {
            let mut staging = StagingDir::create(&path).unwrap();
            staging.retain();
        }
        assert!(path.exists());
    }
}

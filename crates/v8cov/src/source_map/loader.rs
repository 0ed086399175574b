//! Production source maps loaded from build artifacts on disk.

use super::{find_source_mapping_url, SourceMapData};
use percent_encoding::percent_decode_str;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

type MapCache = HashMap<PathBuf, Option<Arc<SourceMapData>>>;

/// Resolves script urls to build artifacts and loads their maps
#[derive(Debug)]
pub struct SourceMapLoader {
    build_dir: PathBuf,
    public_prefix: String,
    cache: Mutex<MapCache>,
}

impl SourceMapLoader {
    /// Create a loader for a build directory served under `public_prefix`
    #[must_use]
    pub fn new(build_dir: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self {
            build_dir: build_dir.into(),
            public_prefix: public_prefix.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build directory
    #[must_use]
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Map a script url to the artifact it was served from
    #[must_use]
    pub fn resolve_script_path(&self, url: &str) -> Option<PathBuf> {
        if let Some(rest) = url.strip_prefix("file://") {
            return Some(decode_path(rest));
        }

        let path = if let Some((_, after_scheme)) = url.split_once("://") {
            let slash = after_scheme.find('/')?;
            &after_scheme[slash..]
        } else if url.starts_with('/') {
            url
        } else {
            return None;
        };
        let path = path
            .split(|c: char| c == '?' || c == '#')
            .next()
            .unwrap_or(path);

        if let Some(rest) = path.strip_prefix(self.public_prefix.as_str()) {
            Some(self.build_dir.join(decode_path(rest)))
        } else if url.starts_with('/') {
            Some(decode_path(path))
        } else {
            None
        }
    }

    /// Read the generated code of an artifact
    #[must_use]
    pub fn read_script(&self, path: &Path) -> Option<String> {
        match fs::read_to_string(path) {
            Ok(code) => Some(code),
            Err(e) => {
                debug!(file = %path.display(), error = %e, "script artifact not readable");
                None
            }
        }
    }

    /// Find the source map of an artifact.
    ///
    /// A `sourceMappingURL` comment wins over the sibling `<file>.map`.
    #[must_use]
    pub fn load_for_script(&self, script: &Path, code: Option<&str>) -> Option<Arc<SourceMapData>> {
        if let Some(reference) = code.and_then(find_source_mapping_url) {
            if reference.starts_with("data:") {
                return match SourceMapData::from_data_url(reference) {
                    Ok(map) => Some(Arc::new(map)),
                    Err(e) => {
                        warn!(file = %script.display(), error = %e, "invalid inline source map");
                        None
                    }
                };
            }
            let reference = reference.split('?').next().unwrap_or(reference);
            let dir = script.parent().unwrap_or_else(|| Path::new(""));
            return self.load_map_file(&dir.join(decode_path(reference)));
        }

        let mut sibling = script.as_os_str().to_os_string();
        sibling.push(".map");
        self.load_map_file(Path::new(&sibling))
    }

    /// Decode the trailing inline `data:` source map of a script
    #[must_use]
    pub fn decode_inline(code: &str) -> Option<SourceMapData> {
        let reference = find_source_mapping_url(code)?;
        if !reference.starts_with("data:") {
            return None;
        }
        SourceMapData::from_data_url(reference)
            .map_err(|e| debug!(error = %e, "undecodable inline source map"))
            .ok()
    }

    /// Load and cache a `.map` file; misses are cached too
    #[must_use]
    pub fn load_map_file(&self, path: &Path) -> Option<Arc<SourceMapData>> {
        let key = cache_key(path);
        if let Some(hit) = self.lock().get(&key) {
            return hit.clone();
        }

        let loaded = match fs::read(&key) {
            Ok(bytes) => match SourceMapData::from_json_slice(&bytes) {
                Ok(map) => Some(Arc::new(map)),
                Err(e) => {
                    warn!(file = %key.display(), error = %e, "skipping malformed source map");
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(file = %key.display(), "no source map on disk");
                None
            }
            Err(e) => {
                warn!(file = %key.display(), error = %e, "skipping unreadable source map");
                None
            }
        };
        self.lock().insert(key, loaded.clone());
        loaded
    }

    /// Number of cached lookups (hits and misses)
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MapCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Absolute key that stays stable when the file itself disappears
fn cache_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|dir| dir.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

fn decode_path(raw: &str) -> PathBuf {
    PathBuf::from(percent_decode_str(raw).decode_utf8_lossy().into_owned())
}

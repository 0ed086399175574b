//! Inline source maps of development bundles.
//!
//! In development the bundler wraps every module in
//! `eval(__webpack_require__.ts("<escaped code>\n//# sourceMappingURL=data:...base64,<map>"))`
//! and V8 reports each evaluated module as its own script with a
//! `webpack-internal:///` url.

use super::paths::normalize_source_path;
use super::{static_regex, SourceMapData};
use crate::cache::BoundedCache;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::debug;

/// Maximum distance scanned backwards for the eval wrapper
pub const LOOKBACK_WINDOW: usize = 10_000;

/// Wrapper preceding each module's escaped code in a chunk
pub const EVAL_MARKER: &str = "eval(__webpack_require__.ts(\"";

fn chunk_map_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &CELL,
        r"sourceMappingURL=data:application/json;charset=utf-8;base64,([A-Za-z0-9+/=]+)",
    )
}

fn script_map_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(
        &CELL,
        r"//[#@]\s*sourceMappingURL=data:application/json;(?:charset=[^;,]+;)?base64,([A-Za-z0-9+/=]+)",
    )
}

fn internal_url_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(&CELL, r"^webpack-internal:///(?:\([^)]+\)/)?(.+)$")
}

/// One module's code and inline map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedSourceMap {
    /// Bundler module id
    pub module_id: String,
    /// Module code as evaluated
    pub code: String,
    /// Decoded inline map
    pub source_map: SourceMapData,
    /// Normalized original source path
    pub original_path: String,
    /// Byte span of the still-escaped code inside its chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escaped_span: Option<(usize, usize)>,
}

/// Hit and decode counts of the extraction cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevCacheStats {
    /// Extractions served without decoding
    pub hits: usize,
    /// Inline map payloads decoded
    pub decodes: usize,
}

/// Extractions by original path, reachable from the payload they came from
#[derive(Debug)]
struct ExtractionCache {
    by_path: BoundedCache<String, (u64, ExtractedSourceMap)>,
    paths: BoundedCache<u64, String>,
    stats: DevCacheStats,
}

impl ExtractionCache {
    fn lookup(&mut self, fingerprint: u64) -> Option<ExtractedSourceMap> {
        let path = self.paths.get(&fingerprint)?;
        let (stored, entry) = self.by_path.get(path)?;
        let entry = (*stored == fingerprint).then(|| entry.clone())?;
        self.stats.hits += 1;
        Some(entry)
    }

    fn insert(&mut self, fingerprint: u64, entry: &ExtractedSourceMap) -> usize {
        self.paths.insert(fingerprint, entry.original_path.clone());
        self.by_path
            .insert(entry.original_path.clone(), (fingerprint, entry.clone()))
    }
}

fn fingerprint(payload: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    payload.hash(&mut hasher);
    hasher.finish()
}

/// Extracts inline maps from development bundles
#[derive(Debug)]
pub struct DevModeExtractor {
    source_root: String,
    cache: Mutex<ExtractionCache>,
}

impl DevModeExtractor {
    /// Create an extractor for project files under `source_root`
    #[must_use]
    pub fn new(source_root: impl Into<String>, cache_capacity: usize) -> Self {
        let source_root = source_root.into().trim_matches('/').to_string();
        Self {
            source_root,
            cache: Mutex::new(ExtractionCache {
                by_path: BoundedCache::new(cache_capacity),
                paths: BoundedCache::new(cache_capacity),
                stats: DevCacheStats::default(),
            }),
        }
    }

    /// Source root segment, without slashes
    #[must_use]
    pub fn source_root(&self) -> &str {
        &self.source_root
    }

    /// Extract every inline-mapped module of a bundle chunk
    pub fn extract_from_chunk_content(&self, text: &str) -> Vec<ExtractedSourceMap> {
        let mut extracted = Vec::new();
        for caps in chunk_map_regex().captures_iter(text) {
            let (Some(whole), Some(payload)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let (code, escaped_span) = match recover_eval_code(text, whole.start()) {
                Some((code, span)) => (code, Some(span)),
                None => (String::new(), None),
            };
            let fingerprint = fingerprint(payload.as_str());
            if let Some(cached) = self.lock().lookup(fingerprint) {
                extracted.push(ExtractedSourceMap {
                    code,
                    escaped_span,
                    ..cached
                });
                continue;
            }

            let Some(source_map) = self.decode(payload.as_str(), whole.start()) else {
                continue;
            };
            let Some(original_path) = source_map.first_source().and_then(normalize_source_path)
            else {
                continue;
            };
            let module_id = source_map
                .file
                .clone()
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| original_path.clone());

            let entry = ExtractedSourceMap {
                module_id,
                code,
                source_map,
                original_path,
                escaped_span,
            };
            self.remember(fingerprint, &entry);
            extracted.push(entry);
        }
        debug!(modules = extracted.len(), "extracted inline source maps from chunk");
        extracted
    }

    /// Extract the inline map of one evaluated module script
    pub fn extract_from_script_source(&self, url: &str, source: &str) -> Option<ExtractedSourceMap> {
        let caps = script_map_regex().captures_iter(source).last()?;
        let whole = caps.get(0)?;
        let payload = caps.get(1)?.as_str();
        let code = source[..whole.start()].to_string();
        let module_id = module_id_from_url(url);
        let fingerprint = fingerprint(payload);

        if let Some(cached) = self.lock().lookup(fingerprint) {
            return Some(ExtractedSourceMap {
                module_id: module_id.unwrap_or_else(|| cached.original_path.clone()),
                code,
                escaped_span: None,
                ..cached
            });
        }

        let source_map = self.decode(payload, whole.start())?;
        let original_path = source_map
            .first_source()
            .and_then(normalize_source_path)
            .or_else(|| module_id.as_deref().and_then(normalize_source_path))?;

        let entry = ExtractedSourceMap {
            module_id: module_id.unwrap_or_else(|| original_path.clone()),
            code,
            source_map,
            original_path,
            escaped_span: None,
        };
        self.remember(fingerprint, &entry);
        Some(entry)
    }

    /// Check whether a script url is a project module of the dev bundle
    #[must_use]
    pub fn is_project_script(&self, url: &str) -> bool {
        if !internal_url_regex().is_match(url) {
            return false;
        }
        let decoded = percent_decode_str(url).decode_utf8_lossy();
        decoded.contains(&format!("/{}/", self.source_root))
            || decoded.contains(&format!("/./{}/", self.source_root))
    }

    /// Keep project modules, dropping anything from `node_modules`
    #[must_use]
    pub fn filter_project_source_maps(
        &self,
        list: Vec<ExtractedSourceMap>,
    ) -> Vec<ExtractedSourceMap> {
        list.into_iter()
            .filter(|entry| {
                !entry.module_id.contains("node_modules")
                    && !entry.original_path.contains("node_modules")
            })
            .filter(|entry| {
                entry.module_id.contains(self.source_root.as_str())
                    || entry.original_path.contains(self.source_root.as_str())
            })
            .collect()
    }

    /// Previously extracted module for an original path
    #[must_use]
    pub fn cached(&self, original_path: &str) -> Option<ExtractedSourceMap> {
        self.lock()
            .by_path
            .get(&original_path.to_string())
            .map(|(_, entry)| entry.clone())
    }

    /// Number of cached extractions
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.lock().by_path.len()
    }

    /// Cache hits and payload decodes so far
    #[must_use]
    pub fn cache_stats(&self) -> DevCacheStats {
        self.lock().stats
    }

    fn decode(&self, payload: &str, offset: usize) -> Option<SourceMapData> {
        self.lock().stats.decodes += 1;
        match SourceMapData::from_base64(payload) {
            Ok(map) => Some(map),
            Err(e) => {
                debug!(offset, error = %e, "skipping undecodable inline map");
                None
            }
        }
    }

    fn remember(&self, fingerprint: u64, entry: &ExtractedSourceMap) {
        let evicted = self.lock().insert(fingerprint, entry);
        if evicted > 0 {
            debug!(evicted, "evicted oldest dev-mode source maps");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExtractionCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Module id of a `webpack-internal:///` url
fn module_id_from_url(url: &str) -> Option<String> {
    internal_url_regex()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Code between the nearest eval wrapper and the map comment at `comment_start`,
/// with the byte span it occupies in `text` while still escaped
fn recover_eval_code(text: &str, comment_start: usize) -> Option<(String, (usize, usize))> {
    let mut window_start = comment_start.saturating_sub(LOOKBACK_WINDOW);
    while !text.is_char_boundary(window_start) {
        window_start += 1;
    }
    let window = &text[window_start..comment_start];
    let code_start = window.rfind(EVAL_MARKER)? + EVAL_MARKER.len();
    let raw = window[code_start..].trim_end_matches(' ');
    let raw = raw
        .strip_suffix("//#")
        .or_else(|| raw.strip_suffix("//@"))
        .unwrap_or(raw);
    let lo = window_start + code_start;
    Some((unescape(raw).0, (lo, lo + raw.len())))
}

/// Undo the string escaping of eval'd module code.
///
/// The table maps every byte offset of `raw` (end included) to the
/// matching offset of the unescaped text.
fn unescape(raw: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(raw.len());
    let mut offsets = Vec::with_capacity(raw.len() + 1);
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            offsets.extend(std::iter::repeat(out.len()).take(c.len_utf8()));
            out.push(c);
            continue;
        }
        let escaped = match chars.peek() {
            Some('n') => Some('\n'),
            Some('"') => Some('"'),
            Some('t') => Some('\t'),
            _ => None,
        };
        match escaped {
            Some(plain) => {
                chars.next();
                offsets.extend([out.len(), out.len()]);
                out.push(plain);
            }
            None => {
                offsets.push(out.len());
                out.push('\\');
                if let Some(next) = chars.next() {
                    offsets.extend(std::iter::repeat(out.len()).take(next.len_utf8()));
                    out.push(next);
                }
            }
        }
    }
    offsets.push(out.len());
    (out, offsets)
}

/// Escaped byte offset → unescaped byte offset, for every offset of `escaped` and its end
#[must_use]
pub fn unescaped_offsets(escaped: &str) -> Vec<usize> {
    unescape(escaped).1
}

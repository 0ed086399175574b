//! Source map resolution
//!
//! Production builds ship sibling `.map` files; development bundles inline
//! base64 maps inside `eval()`-wrapped modules. Both end up as
//! [`SourceMapData`], the plain serializable form handed to workers.

mod dev;
mod loader;
pub mod paths;

pub use dev::{
    unescaped_offsets, DevCacheStats, DevModeExtractor, ExtractedSourceMap, EVAL_MARKER,
    LOOKBACK_WINDOW,
};
pub use loader::SourceMapLoader;
pub use paths::normalize_source_path;

use crate::result::{CovError, CovResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const fn default_version() -> u32 {
    3
}

/// Source map v3 payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMapData {
    /// Format version (always 3 in practice)
    #[serde(default = "default_version")]
    pub version: u32,
    /// Original source paths
    #[serde(default)]
    pub sources: Vec<String>,
    /// Original source text, parallel to `sources`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<Option<String>>>,
    /// VLQ mappings
    #[serde(default)]
    pub mappings: String,
    /// Symbol names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,
    /// Generated file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Prefix for entries of `sources`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_root: Option<String>,
}

impl SourceMapData {
    /// Create a map from sources and mappings
    #[must_use]
    pub fn new(sources: Vec<String>, mappings: impl Into<String>) -> Self {
        Self {
            version: default_version(),
            sources,
            sources_content: None,
            mappings: mappings.into(),
            names: Vec::new(),
            file: None,
            source_root: None,
        }
    }

    /// Set the generated file name
    #[must_use]
    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Parse JSON bytes
    pub fn from_json_slice(bytes: &[u8]) -> CovResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decode a base64 JSON payload
    pub fn from_base64(payload: &str) -> CovResult<Self> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| CovError::source_map("<inline>", e.to_string()))?;
        Self::from_json_slice(&bytes)
    }

    /// Decode a `data:` URL (base64 or percent-encoded JSON)
    pub fn from_data_url(url: &str) -> CovResult<Self> {
        let Some((header, payload)) = url.split_once(',') else {
            return Err(CovError::source_map("<inline>", "data url without payload"));
        };
        if header.ends_with(";base64") {
            Self::from_base64(payload)
        } else {
            let json = percent_encoding::percent_decode_str(payload).decode_utf8_lossy();
            Self::from_json_slice(json.as_bytes())
        }
    }

    /// First original source, as written in the map
    #[must_use]
    pub fn first_source(&self) -> Option<&str> {
        self.sources.first().map(String::as_str)
    }

    /// Build the lookup structure used during conversion
    pub fn to_decoded(&self) -> CovResult<::sourcemap::SourceMap> {
        let bytes = serde_json::to_vec(self)?;
        ::sourcemap::SourceMap::from_slice(&bytes).map_err(|e| {
            CovError::source_map(self.file.as_deref().unwrap_or("<map>"), e.to_string())
        })
    }
}

/// Compile a literal pattern once
#[allow(clippy::expect_used)]
pub(crate) fn static_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("literal regex pattern is valid"))
}

fn source_mapping_url_regex() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    static_regex(&CELL, r#"//[#@]\s*sourceMappingURL=([^\s'"\\]+)"#)
}

/// Target of the last `sourceMappingURL` comment in `code`
#[must_use]
pub fn find_source_mapping_url(code: &str) -> Option<&str> {
    source_mapping_url_regex()
        .captures_iter(code)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn encode(map: &SourceMapData) -> String {
        STANDARD.encode(serde_json::to_vec(map).unwrap())
    }

    #[test]
    fn test_deserialize_minimal_map() {
        let map: SourceMapData =
            serde_json::from_str(r#"{"sources":["a.ts"],"mappings":"AAAA"}"#).unwrap();
        assert_eq!(map.version, 3);
        assert_eq!(map.first_source(), Some("a.ts"));
        assert!(map.names.is_empty());
    }

    #[test]
    fn test_base64_round_trip() {
        let map = SourceMapData::new(vec!["./src/App.tsx".to_string()], "AAAA").with_file("app");
        let decoded = SourceMapData::from_base64(&encode(&map)).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn test_invalid_base64_is_error() {
        let err = SourceMapData::from_base64("@@@").unwrap_err();
        assert!(matches!(err, CovError::SourceMap { .. }));
    }

    #[test]
    fn test_data_url_variants() {
        let map = SourceMapData::new(vec!["a.ts".to_string()], "AAAA");
        let url = format!("data:application/json;charset=utf-8;base64,{}", encode(&map));
        assert_eq!(SourceMapData::from_data_url(&url).unwrap(), map);

        let plain = "data:application/json,%7B%22sources%22%3A%5B%22b.ts%22%5D%2C%22mappings%22%3A%22%22%7D";
        assert_eq!(
            SourceMapData::from_data_url(plain).unwrap().first_source(),
            Some("b.ts")
        );
        assert!(SourceMapData::from_data_url("data:nothing").is_err());
    }

    #[test]
    fn test_find_last_source_mapping_url() {
        let code = "a();\n//# sourceMappingURL=old.js.map\nb();\n//# sourceMappingURL=main.js.map\n";
        assert_eq!(find_source_mapping_url(code), Some("main.js.map"));
        assert_eq!(find_source_mapping_url("no comment"), None);
    }

    #[test]
    fn test_to_decoded_lookup() {
        let map = SourceMapData::new(vec!["a.ts".to_string()], "AAAA");
        let decoded = map.to_decoded().unwrap();
        let token = decoded.lookup_token(0, 0).unwrap();
        assert_eq!(token.get_source(), Some("a.ts"));
        assert_eq!(token.get_src_line(), 0);
    }
}

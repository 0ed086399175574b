//! Bundler path conventions.

use percent_encoding::percent_decode_str;
use std::path::Path;

/// Scheme prefixes that carry no path information
const SCHEME_PREFIXES: &[&str] = &["webpack-internal:///", "file://"];

/// Normalize a source path as written by a bundler.
///
/// Strips `webpack://<namespace>/`, `webpack-internal:///`, `file://`,
/// layer markers such as `(rsc)/`, query strings and leading `./`, then
/// percent-decodes. Returns `None` for bundler runtime modules and paths that
/// end up empty.
#[must_use]
pub fn normalize_source_path(raw: &str) -> Option<String> {
    let mut path = raw.trim();
    if let Some(end) = path.find(|c: char| c == '?' || c == '#') {
        path = &path[..end];
    }

    if let Some(rest) = path.strip_prefix("webpack://") {
        path = strip_namespace(rest);
    } else if let Some(rest) = SCHEME_PREFIXES.iter().find_map(|p| path.strip_prefix(p)) {
        path = rest;
    }

    loop {
        if let Some(rest) = path.strip_prefix("/./") {
            path = rest;
        } else if let Some(rest) = path.strip_prefix("./") {
            path = rest;
        } else if let Some(rest) = strip_layer(path) {
            path = rest;
        } else {
            break;
        }
    }

    if path.is_empty() || path.starts_with("webpack/") || path.starts_with("external ") {
        return None;
    }
    let decoded = percent_decode_str(path).decode_utf8_lossy().into_owned();
    (!decoded.is_empty()).then_some(decoded)
}

/// Drop the `<namespace>/` segment after `webpack://`
fn strip_namespace(rest: &str) -> &str {
    if rest.starts_with(|c: char| matches!(c, '.' | '/' | '(')) {
        return rest;
    }
    match rest.split_once('/') {
        Some((_, tail)) => tail,
        None => rest,
    }
}

/// Strip a leading `(layer)/` marker
fn strip_layer(path: &str) -> Option<&str> {
    let inner = path.strip_prefix('(')?;
    let close = inner.find(")/")?;
    Some(&inner[close + 2..])
}

/// Render a path with forward slashes
#[must_use]
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
        .replacen("//", "/", 1)
}

/// Make `path` relative to `root` when it lies inside it
#[must_use]
pub fn relativize(path: &str, root: &Path) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        if let Ok(stripped) = candidate.strip_prefix(root) {
            return to_slash(stripped);
        }
    }
    path.to_string()
}

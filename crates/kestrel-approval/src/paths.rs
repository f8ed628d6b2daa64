use std::path::{Component, Path, PathBuf};

use serde_json::Value;

/// Extract filesystem paths from request params, normalized to clean absolute form.
///
/// Strings under path-like keys (`path`, `file_path`, `dir`, ...) are taken as
/// paths; elsewhere only strings that look like paths (`/x`, `./x`, `../x`,
/// `~/x`) are. Empty or malformed entries are skipped. Order is preserved and
/// duplicates dropped.
pub fn extract_paths(params: &Value) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect(params, false, &mut found);

    let mut out: Vec<PathBuf> = Vec::with_capacity(found.len());
    for raw in found {
        if let Some(path) = normalize_path(raw) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

fn collect<'a>(value: &'a Value, under_path_key: bool, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => {
            if under_path_key || looks_like_path(s) {
                out.push(s);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect(item, under_path_key, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect(item, is_path_key(key), out);
            }
        }
        _ => {}
    }
}

fn is_path_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.contains("path")
        || key.contains("file")
        || key.contains("dir")
        || matches!(key.as_str(), "cwd" | "target" | "source" | "dest" | "destination")
}

fn looks_like_path(s: &str) -> bool {
    let s = s.trim();
    s.starts_with('/') || s.starts_with("./") || s.starts_with("../") || s.starts_with("~/")
}

/// Clean and absolutize a single path string.
///
/// Returns `None` for empty input, NUL bytes, URLs, or when a relative path
/// can't be anchored to the current directory.
pub fn normalize_path(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() || raw.contains('\0') || raw.contains("://") {
        return None;
    }

    let expanded = match raw.strip_prefix("~/") {
        Some(rest) => PathBuf::from(std::env::var_os("HOME")?).join(rest),
        None => PathBuf::from(raw),
    };

    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir().ok()?.join(expanded)
    };

    Some(lexical_normalize(&absolute))
}

/// Resolve `.` and `..` without touching the filesystem.
fn lexical_normalize(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

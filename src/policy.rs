//! Which paths may appear in a bundle
//!
//! Patterns come in three flavors:
//!
//! - `dir/` matches anything inside a directory named `dir`, at any depth
//! - `*suffix` matches paths ending in `suffix` (`*.pyc`)
//! - anything else matches that exact path, or a file with that name at any depth

/// A reasonable default for [`BundleConfig::forbidden_patterns`].
///
/// [`BundleConfig::forbidden_patterns`]: ../bundle/struct.BundleConfig.html#structfield.forbidden_patterns
pub const DEFAULT_FORBIDDEN_PATTERNS: &[&str] = &[
    ".git/",
    "node_modules/",
    "__pycache__/",
    ".DS_Store",
    "*.pyc",
    ".env",
];

/// Returns true if `path` matches any of the given patterns.
pub fn is_forbidden<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    patterns
        .iter()
        .any(|pattern| matches_pattern(path, pattern.as_ref()))
}

fn matches_pattern(path: &str, pattern: &str) -> bool {
    if pattern.is_empty() {
        return false;
    }
    if pattern.ends_with('/') {
        path.starts_with(pattern) || path.contains(&format!("/{pattern}"))
    } else if let Some(suffix) = pattern.strip_prefix('*') {
        path.ends_with(suffix)
    } else {
        path == pattern || path.ends_with(&format!("/{pattern}"))
    }
}

/// Returns true if `path` could land outside the folder it's extracted into:
/// absolute paths, drive letters, and `..` components.
///
/// Backslashes count as separators here since some Windows tools write them.
pub fn is_unsafe(path: &str) -> bool {
    if path.starts_with(['/', '\\']) || path.contains('\0') {
        return true;
    }
    let mut chars = path.chars();
    if let (Some(drive), Some(':')) = (chars.next(), chars.next()) {
        if drive.is_ascii_alphabetic() {
            return true;
        }
    }
    path.split(['/', '\\']).any(|component| component == "..")
}

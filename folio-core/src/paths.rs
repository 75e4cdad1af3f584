//! Path-key utilities.
//!
//! A path key is the root-relative, forward-slash form of a filesystem path
//! with no leading slash. The library root itself is the empty key. Every
//! other module goes through these helpers before touching the disk.

use std::path::{Component, Path, PathBuf};

use crate::error::{LibraryError, Result};

/// Collapse a user-supplied path into key form: backslashes become forward
/// slashes, empty and `.` segments are dropped. `..` segments are kept so
/// that [`validate_key`] can reject them.
pub fn normalize(input: &str) -> String {
    input
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize and reject anything that could leave the media root.
pub fn validate_key(input: &str) -> Result<String> {
    let key = normalize(input);
    if key.split('/').any(|segment| segment == "..") {
        return Err(LibraryError::PathEscape(input.to_string()));
    }
    if key.contains('\0') {
        return Err(LibraryError::Validation(format!(
            "path '{}' contains a NUL byte",
            input.escape_debug()
        )));
    }
    Ok(key)
}

/// Validate a single file or folder name used by rename operations.
pub fn validate_name(name: &str) -> Result<&str> {
    if name == ".." || name.contains(['/', '\\']) {
        return Err(LibraryError::PathEscape(name.to_string()));
    }
    if name.trim().is_empty() || name == "." {
        return Err(LibraryError::Validation("name cannot be empty".into()));
    }
    if name.starts_with('.') {
        return Err(LibraryError::Validation(format!(
            "'{name}' would be a hidden entry"
        )));
    }
    Ok(name)
}

/// Resolve a key to an absolute filesystem path under `root`.
pub fn resolve(root: &Path, key: &str) -> Result<PathBuf> {
    let key = validate_key(key)?;
    let mut resolved = root.to_path_buf();
    for segment in key.split('/').filter(|segment| !segment.is_empty()) {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => resolved.push(part),
            _ => return Err(LibraryError::PathEscape(key.clone())),
        }
    }
    if !resolved.starts_with(root) {
        return Err(LibraryError::PathEscape(key));
    }
    Ok(resolved)
}

/// Key of an absolute path under `root`; `None` when the path lies outside
/// it or is not valid UTF-8.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(segments.join("/"))
}

/// Parent key; top-level entries have the root (`""`) as parent.
pub fn parent_of(key: &str) -> &str {
    key.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

pub fn file_name(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, name)| name).unwrap_or(key)
}

pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Any segment starting with a dot.
pub fn is_hidden(key: &str) -> bool {
    key.split('/').any(|segment| segment.starts_with('.'))
}

/// `key` equals `ancestor` or is nested under it.
pub fn is_within(key: &str, ancestor: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    match key.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Swap the `old` prefix of `key` for `new`. Returns `None` when `key` is
/// not within `old`.
pub fn rebase(key: &str, old: &str, new: &str) -> Option<String> {
    if old.is_empty() || !is_within(key, old) {
        return None;
    }
    let rest = &key[old.len()..];
    Some(format!("{new}{rest}"))
}

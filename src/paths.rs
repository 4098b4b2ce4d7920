//! Relative path handling on both ends of a transfer
//!
//! On the wire a relative path always uses `/` separators. The receiver
//! refuses anything that could escape the mirror root.

use std::path::{Component, Path, PathBuf};

use crate::error::{MirrorError, Result};

/// Wire form of `path` relative to `root`
///
/// `None` if `path` lies outside `root`, equals it, or has a component that
/// is not valid UTF-8. Lossy conversion would map distinct names onto one
/// wire path.
pub fn to_relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        if let Component::Normal(part) = component {
            parts.push(part.to_str()?);
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Resolve a wire relative path under `root`
///
/// Empty paths, absolute paths and any `..` component are rejected.
pub fn resolve_under(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = relative.trim();
    if relative.is_empty() {
        return Err(MirrorError::InvalidPath("relativePath is required".to_string()));
    }

    let normalized = relative.replace('\\', "/");
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for segment in normalized.split('/') {
        match segment {
            "" if depth == 0 => {
                return Err(MirrorError::InvalidPath(format!(
                    "absolute paths are not allowed: {}",
                    relative
                )))
            }
            "" | "." => continue,
            ".." => {
                return Err(MirrorError::InvalidPath(format!(
                    "parent components are not allowed: {}",
                    relative
                )))
            }
            part => {
                if Path::new(part)
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return Err(MirrorError::InvalidPath(format!(
                        "invalid path segment {:?}",
                        part
                    )));
                }
                resolved.push(part);
                depth += 1;
            }
        }
    }

    if depth == 0 {
        return Err(MirrorError::InvalidPath(format!(
            "path has no file component: {}",
            relative
        )));
    }

    Ok(resolved)
}

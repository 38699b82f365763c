use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting ledger and workspace files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Set or clear the owner/group/other execute bits.
#[cfg(unix)]
pub fn set_executable(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o755 } else { 0o644 };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
pub fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

/// Replace the text strictly between the lines holding `start_marker` and
/// `end_marker`, keeping both marker lines.
///
/// Returns `None` when either marker is missing.
pub fn replace_between_markers(
    content: &str,
    start_marker: &str,
    end_marker: &str,
    replacement: &str,
) -> Option<String> {
    let start_pos = content.find(start_marker)?;
    let body_start = match content[start_pos..].find('\n') {
        Some(off) => start_pos + off + 1,
        None => return None,
    };
    let end_offset = content[body_start..].find(end_marker)?;
    // Back up to the beginning of the end marker's line so its indentation survives.
    let end_pos = body_start + end_offset;
    let end_line_start = content[..end_pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end_line_start = end_line_start.max(body_start);

    let mut updated = String::with_capacity(content.len() + replacement.len());
    updated.push_str(&content[..body_start]);
    updated.push_str(replacement);
    if !replacement.is_empty() && !replacement.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&content[end_line_start..]);
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/test.json");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn remove_file_if_exists_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        std::fs::write(&path, "x").unwrap();
        assert!(remove_file_if_exists(&path).unwrap());
        assert!(!remove_file_if_exists(&path).unwrap());
    }

    #[test]
    fn replace_between_markers_keeps_marker_lines() {
        let src = "a\n  // start\n  old1\n  old2\n  // end\nb\n";
        let out = replace_between_markers(src, "// start", "// end", "  new\n").unwrap();
        assert_eq!(out, "a\n  // start\n  new\n  // end\nb\n");
    }

    #[test]
    fn replace_between_markers_can_empty_block() {
        let src = "// start\nold\n// end\n";
        let out = replace_between_markers(src, "// start", "// end", "").unwrap();
        assert_eq!(out, "// start\n// end\n");
    }

    #[test]
    fn replace_between_markers_missing_marker() {
        assert!(replace_between_markers("no markers", "// start", "// end", "x").is_none());
    }
}

//! `latest` / `best` references inside the checkpoint directory.
//!
//! On Unix a pointer is a relative directory symlink named after the pointer.
//! Elsewhere it is a small file containing the step-tag. Either way the new
//! reference is created under a temporary name and renamed over the old one,
//! so readers see the old or the new target.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CheckpointError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer {
    Latest,
    Best,
}

impl Pointer {
    pub fn name(self) -> &'static str {
        match self {
            Pointer::Latest => "latest",
            Pointer::Best => "best",
        }
    }

    pub fn path_in(self, checkpoint_dir: &Path) -> PathBuf {
        checkpoint_dir.join(self.name())
    }
}

/// Point `pointer` at `checkpoint_dir/<tag>`, retrying once on failure.
pub fn update_pointer(checkpoint_dir: &Path, pointer: Pointer, tag: &str) -> io::Result<()> {
    match replace_pointer(checkpoint_dir, pointer, tag) {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(pointer = pointer.name(), error = %e, "pointer update failed, retrying");
            replace_pointer(checkpoint_dir, pointer, tag)
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn create_reference(tag: &str, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(tag, at)
}

#[cfg(not(unix))]
fn create_reference(tag: &str, at: &Path) -> io::Result<()> {
    fs::write(at, tag)
}

fn replace_pointer(checkpoint_dir: &Path, pointer: Pointer, tag: &str) -> io::Result<()> {
    let link = pointer.path_in(checkpoint_dir);
    let tmp = checkpoint_dir.join(format!(".{}.tmp", pointer.name()));
    remove_if_present(&tmp)?;
    create_reference(tag, &tmp)?;
    if fs::rename(&tmp, &link).is_ok() {
        return Ok(());
    }
    // `link` may be a real directory left behind by another tool; fall back
    // to remove-then-create.
    remove_if_present(&tmp)?;
    remove_if_present(&link)?;
    create_reference(tag, &link)
}

/// Step-tag a pointer currently refers to, if any.
pub fn read_pointer(checkpoint_dir: &Path, pointer: Pointer) -> Option<String> {
    let link = pointer.path_in(checkpoint_dir);
    let meta = fs::symlink_metadata(&link).ok()?;
    if meta.file_type().is_symlink() {
        let target = fs::read_link(&link).ok()?;
        return target.file_name().map(|n| n.to_string_lossy().into_owned());
    }
    if meta.is_file() {
        let content = fs::read_to_string(&link).ok()?;
        let tag = content.trim();
        return (!tag.is_empty()).then(|| tag.to_string());
    }
    None
}

/// Resolve a pointer to an existing checkpoint directory.
///
/// This is the entry point for readers such as an inference process; it
/// never modifies anything.
pub fn resolve_pointer(checkpoint_dir: &Path, pointer: Pointer) -> Result<PathBuf, CheckpointError> {
    if !checkpoint_dir.is_dir() {
        return Err(CheckpointError::DirNotFound(checkpoint_dir.to_path_buf()));
    }
    let tag = read_pointer(checkpoint_dir, pointer).ok_or_else(|| CheckpointError::NoPointer {
        pointer: pointer.name().to_string(),
        dir: checkpoint_dir.to_path_buf(),
    })?;
    let target = checkpoint_dir.join(tag);
    if !target.is_dir() {
        return Err(CheckpointError::DanglingPointer {
            pointer: pointer.name().to_string(),
            dir: checkpoint_dir.to_path_buf(),
            target,
        });
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("step-000100")).unwrap();
        fs::create_dir(dir.path().join("step-000200")).unwrap();

        update_pointer(dir.path(), Pointer::Latest, "step-000100").unwrap();
        assert_eq!(
            resolve_pointer(dir.path(), Pointer::Latest).unwrap(),
            dir.path().join("step-000100")
        );

        update_pointer(dir.path(), Pointer::Latest, "step-000200").unwrap();
        assert_eq!(
            read_pointer(dir.path(), Pointer::Latest).as_deref(),
            Some("step-000200")
        );
        assert!(!dir.path().join(".latest.tmp").exists());
    }

    #[test]
    fn test_missing_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_pointer(dir.path(), Pointer::Best).unwrap_err();
        assert!(matches!(err, CheckpointError::NoPointer { .. }), "got: {err}");
    }

    #[test]
    fn test_missing_checkpoint_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_pointer(&dir.path().join("nope"), Pointer::Latest).unwrap_err();
        assert!(matches!(err, CheckpointError::DirNotFound(_)), "got: {err}");
    }

    #[test]
    fn test_dangling_pointer() {
        let dir = tempfile::tempdir().unwrap();
        update_pointer(dir.path(), Pointer::Best, "step-000900").unwrap();
        let err = resolve_pointer(dir.path(), Pointer::Best).unwrap_err();
        assert!(matches!(err, CheckpointError::DanglingPointer { .. }), "got: {err}");
    }

    #[test]
    fn test_replaces_stray_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("step-000100")).unwrap();
        fs::create_dir(dir.path().join("latest")).unwrap();
        fs::write(dir.path().join("latest").join("junk"), b"x").unwrap();

        update_pointer(dir.path(), Pointer::Latest, "step-000100").unwrap();
        assert_eq!(
            read_pointer(dir.path(), Pointer::Latest).as_deref(),
            Some("step-000100")
        );
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Physical file relocation
//!
//! A move is a rename when source and destination share a filesystem.
//! Otherwise the file is copied to a hidden partial file next to the
//! destination, verified against the source, renamed into place, and only
//! then is the source removed.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Suffix of in-flight copies
pub const PARTIAL_SUFFIX: &str = "arquivista-partial";
/// Suffix of files set aside by the overwrite policy
pub const BACKUP_SUFFIX: &str = "arquivista-backup";

const MAX_RENAME_ATTEMPTS: u32 = 10_000;

#[derive(Debug, Error)]
pub enum RelocateError {
    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("copy verification failed: {0}")]
    Verification(String),
}

/// How a file reached its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Rename,
    CopyVerified,
}

/// Move `from` to `to`; `to` must not exist
pub fn relocate(from: &Path, to: &Path) -> Result<Method, RelocateError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(Method::Rename),
        Err(e) if is_cross_device(&e) => {
            debug!("Rename across filesystems, copying {:?} -> {:?}", from, to);
            copy_verified(from, to)?;
            Ok(Method::CopyVerified)
        }
        Err(e) => Err(e.into()),
    }
}

/// Copy, verify, then delete the source
///
/// On any error the source is left in place and nothing remains at `to`.
pub fn copy_verified(from: &Path, to: &Path) -> Result<(), RelocateError> {
    commit_staged(from, to, |from, partial| {
        fs::copy(from, partial)?;
        Ok(())
    })
}

/// Stage `from` into the partial sibling of `to` with `stage`, then sync,
/// verify, rename into place and delete the source
fn commit_staged<F>(from: &Path, to: &Path, stage: F) -> Result<(), RelocateError>
where
    F: FnOnce(&Path, &Path) -> io::Result<()>,
{
    let partial = hidden_sibling(to, PARTIAL_SUFFIX)?;

    let staged = (|| -> Result<(), RelocateError> {
        stage(from, &partial)?;
        File::open(&partial)?.sync_all()?;
        verify_copy(from, &partial)?;
        fs::rename(&partial, to)?;
        Ok(())
    })();

    if let Err(e) = staged {
        let _ = fs::remove_file(&partial);
        return Err(e);
    }

    if let Err(e) = fs::remove_file(from) {
        // Keep exactly one copy: the original
        let _ = fs::remove_file(to);
        return Err(e.into());
    }

    Ok(())
}

/// Compare size and BLAKE3 digest of two files
pub fn verify_copy(original: &Path, copy: &Path) -> Result<(), RelocateError> {
    let original_len = fs::metadata(original)?.len();
    let copy_len = fs::metadata(copy)?.len();
    if original_len != copy_len {
        return Err(RelocateError::Verification(format!(
            "size mismatch ({} bytes vs {} bytes)",
            original_len, copy_len
        )));
    }

    let original_hash = file_digest(original)?;
    let copy_hash = file_digest(copy)?;
    if original_hash != copy_hash {
        return Err(RelocateError::Verification(format!(
            "digest mismatch ({} vs {})",
            original_hash.to_hex(),
            copy_hash.to_hex()
        )));
    }

    Ok(())
}

/// BLAKE3 digest of a file's contents
pub fn file_digest(path: &Path) -> io::Result<blake3::Hash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Whether anything (file, dir or dangling link) sits at `path`
pub fn occupied(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// `.name.suffix` in the same directory as `path`
pub fn hidden_sibling(path: &Path, suffix: &str) -> io::Result<PathBuf> {
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{:?} has no usable file name", path),
        )
    })?;
    Ok(path.with_file_name(format!(".{}.{}", name, suffix)))
}

/// First free `stem_N.ext` in `dir`
pub fn next_free_name(dir: &Path, name: &str) -> Option<String> {
    let as_path = Path::new(name);
    let stem = as_path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    let ext = as_path.extension().and_then(|e| e.to_str());

    (1..=MAX_RENAME_ATTEMPTS)
        .map(|n| match ext {
            Some(ext) => format!("{}_{}.{}", stem, n, ext),
            None => format!("{}_{}", stem, n),
        })
        .find(|candidate| !occupied(&dir.join(candidate)))
}

/// Whether a rename failed only because the paths are on different devices
pub fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    const CROSS_DEVICE: i32 = 18; // EXDEV
    #[cfg(windows)]
    const CROSS_DEVICE: i32 = 17; // ERROR_NOT_SAME_DEVICE
    #[cfg(not(any(unix, windows)))]
    const CROSS_DEVICE: i32 = -1;

    err.raw_os_error() == Some(CROSS_DEVICE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_relocate_same_filesystem() {
        let tmp = TempDir::new().unwrap();
        let from = write(tmp.path(), "a.txt", "hello");
        let to = tmp.path().join("b.txt");

        assert_eq!(relocate(&from, &to).unwrap(), Method::Rename);
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "hello");
    }

    #[test]
    fn test_copy_verified_moves_content() {
        let tmp = TempDir::new().unwrap();
        let src_dir = tmp.path().join("src");
        let dst_dir = tmp.path().join("dst");
        fs::create_dir_all(&src_dir).unwrap();
        fs::create_dir_all(&dst_dir).unwrap();
        let from = write(&src_dir, "report.pdf", "%PDF-1.7 content");
        let to = dst_dir.join("report.pdf");

        copy_verified(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).unwrap(), "%PDF-1.7 content");
        assert!(!hidden_sibling(&to, PARTIAL_SUFFIX).unwrap().exists());
    }

    #[test]
    fn test_copy_verified_missing_source_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("missing.txt");
        let to = tmp.path().join("out").join("missing.txt");
        fs::create_dir_all(to.parent().unwrap()).unwrap();

        assert!(matches!(copy_verified(&from, &to), Err(RelocateError::Io(_))));
        assert!(!to.exists());
        assert!(!hidden_sibling(&to, PARTIAL_SUFFIX).unwrap().exists());
    }

    #[test]
    fn test_corrupted_copy_keeps_source() {
        let tmp = TempDir::new().unwrap();
        let src_dir = tmp.path().join("src");
        let dst_dir = tmp.path().join("dst");
        fs::create_dir_all(&src_dir).unwrap();
        fs::create_dir_all(&dst_dir).unwrap();
        let from = write(&src_dir, "song.mp3", "ID3 original frames");
        let to = dst_dir.join("song.mp3");

        let result = commit_staged(&from, &to, |_, partial| fs::write(partial, "ID3 damaged frames!"));

        assert!(matches!(result, Err(RelocateError::Verification(_))));
        assert_eq!(fs::read_to_string(&from).unwrap(), "ID3 original frames");
        assert!(!to.exists());
        assert!(!hidden_sibling(&to, PARTIAL_SUFFIX).unwrap().exists());
        assert_eq!(fs::read_dir(&dst_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_verify_copy_detects_mismatch() {
        let tmp = TempDir::new().unwrap();
        let a = write(tmp.path(), "a", "same length!");
        let b = write(tmp.path(), "b", "same length?");
        let c = write(tmp.path(), "c", "short");
        let d = write(tmp.path(), "d", "same length!");

        assert!(matches!(verify_copy(&a, &b), Err(RelocateError::Verification(_))));
        assert!(matches!(verify_copy(&a, &c), Err(RelocateError::Verification(_))));
        assert!(verify_copy(&a, &d).is_ok());
    }

    #[test]
    fn test_next_free_name() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "photo.png", "");
        write(tmp.path(), "photo_1.png", "");
        write(tmp.path(), "README", "");

        assert_eq!(next_free_name(tmp.path(), "photo.png").as_deref(), Some("photo_2.png"));
        assert_eq!(next_free_name(tmp.path(), "README").as_deref(), Some("README_1"));
    }

    #[test]
    fn test_hidden_sibling() {
        let path = Path::new("/storage/ana/other/notes.md");
        assert_eq!(
            hidden_sibling(path, BACKUP_SUFFIX).unwrap(),
            PathBuf::from("/storage/ana/other/.notes.md.arquivista-backup")
        );
    }

    #[test]
    fn test_cross_device_detection() {
        assert!(!is_cross_device(&io::Error::from(io::ErrorKind::NotFound)));
        #[cfg(unix)]
        assert!(is_cross_device(&io::Error::from_raw_os_error(18)));
    }
}

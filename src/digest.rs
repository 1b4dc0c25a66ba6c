//! Content hashing and freshness checks.
//!
//! SHA-256 over file contents backs the image checksum and the staging
//! tree digest used to show that staging is reproducible.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Hex-encoded SHA-256 of a single file.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Digest of a directory tree: relative paths and contents, visited in
/// sorted order so the result only depends on what is in the tree.
pub fn hash_tree(root: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        if entry.file_type().is_file() {
            hasher.update(fs::read(entry.path())?);
        }
        hasher.update([0u8]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check if `source` is newer than `target`.
///
/// A missing target counts as stale. Unreadable metadata counts as newer.
pub fn is_newer(source: &Path, target: &Path) -> bool {
    if !target.exists() {
        return true;
    }
    if !source.exists() {
        return false;
    }

    let (Ok(src_meta), Ok(tgt_meta)) = (source.metadata(), target.metadata()) else {
        return true;
    };
    let (Ok(src_time), Ok(tgt_time)) = (src_meta.modified(), tgt_meta.modified()) else {
        return true;
    };

    src_time > tgt_time
}

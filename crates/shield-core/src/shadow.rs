//! Content-preserving gzip shadow copies.
//!
//! One compressed blob per protected file, keyed by a digest of the
//! absolute path so arbitrary paths map onto flat file names. Writes are
//! lock-free and last-writer-wins; a partial write is tolerated because the
//! next accepted observation overwrites the blob. Shadows are never removed
//! automatically and survive restarts.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct ShadowStore {
    root: PathBuf,
}

impl ShadowStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Default location: `.shadow_copies/` under the working directory.
    pub fn in_working_dir() -> Self {
        Self::new(".shadow_copies")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Blob name for a path: md5 of its UTF-8 form, hex, `.gz` suffix.
    fn shadow_path(&self, path: &Path) -> PathBuf {
        let digest = Md5::digest(path.to_string_lossy().as_bytes());
        self.root.join(format!("{}.gz", hex::encode(digest)))
    }

    /// Stream-copy `path` into its shadow blob. Compression favors write
    /// throughput over ratio; a change-storm must not back up on gzip.
    pub fn backup(&self, path: &Path) -> bool {
        if let Err(e) = fs::create_dir_all(&self.root) {
            warn!(root = %self.root.display(), error = %e, "cannot create shadow root");
            return false;
        }
        let mut source = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "shadow source unreadable");
                return false;
            }
        };
        let blob = self.shadow_path(path);
        let dest = match File::create(&blob) {
            Ok(f) => f,
            Err(e) => {
                warn!(blob = %blob.display(), error = %e, "cannot create shadow blob");
                return false;
            }
        };
        let mut encoder = GzEncoder::new(dest, Compression::fast());
        if let Err(e) = io::copy(&mut source, &mut encoder) {
            warn!(path = %path.display(), error = %e, "shadow copy failed");
            return false;
        }
        encoder.finish().is_ok()
    }

    /// Read and decompress the shadow for `path`. `None` when the blob is
    /// absent or unreadable; readers tolerate absence.
    pub fn restore_bytes(&self, path: &Path) -> Option<Vec<u8>> {
        let file = File::open(self.shadow_path(path)).ok()?;
        let mut decoder = GzDecoder::new(file);
        let mut data = Vec::new();
        decoder.read_to_end(&mut data).ok()?;
        Some(data)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.shadow_path(path).exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn backup_restore_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path().join("shadows"));
        let source = dir.path().join("doc.txt");
        fs::write(&source, b"original bytes").unwrap();

        assert!(store.backup(&source));
        assert_eq!(store.restore_bytes(&source).unwrap(), b"original bytes");
    }

    #[test]
    fn restore_without_backup_is_none() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path().join("shadows"));
        assert!(store.restore_bytes(Path::new("/never/backed/up")).is_none());
    }

    #[test]
    fn backup_of_missing_source_fails() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path().join("shadows"));
        assert!(!store.backup(Path::new("/nonexistent/file")));
    }

    #[test]
    fn backup_reflects_latest_accepted_content() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path().join("shadows"));
        let source = dir.path().join("doc.txt");
        fs::write(&source, b"v1").unwrap();
        assert!(store.backup(&source));
        fs::write(&source, b"v2").unwrap();
        assert!(store.backup(&source));
        assert_eq!(store.restore_bytes(&source).unwrap(), b"v2");
    }

    #[test]
    fn distinct_paths_get_distinct_blobs() {
        let dir = tempdir().unwrap();
        let store = ShadowStore::new(dir.path().join("shadows"));
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"aaa").unwrap();
        fs::write(&b, b"bbb").unwrap();
        assert!(store.backup(&a));
        assert!(store.backup(&b));
        assert_eq!(store.restore_bytes(&a).unwrap(), b"aaa");
        assert_eq!(store.restore_bytes(&b).unwrap(), b"bbb");
    }
}

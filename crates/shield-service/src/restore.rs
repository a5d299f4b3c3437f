//! Shadow-copy write-back.
//!
//! In-place rewrite with a bounded contention-retry loop: an active
//! encryptor or indexer holding the file produces sharing violations that
//! clear within a few tens of milliseconds. After an automatic restore the
//! descriptor is held open for a short window so a concurrently running
//! encryptor cannot immediately reacquire and clobber the restored bytes;
//! the hold length is a policy knob, not a correctness requirement.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: usize = 20;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);
/// Descriptor hold after an automatic restore.
pub const ANTI_CLOBBER_HOLD: Duration = Duration::from_secs(2);

/// Best-effort chmod. Persistent permission problems surface later as
/// exhausted write retries.
pub fn make_writable(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        if perms.readonly() {
            perms.set_readonly(false);
            let _ = fs::set_permissions(path, perms);
        }
    }
}

pub fn make_readonly(path: &Path) {
    if let Ok(meta) = fs::metadata(path) {
        let mut perms = meta.permissions();
        perms.set_readonly(true);
        let _ = fs::set_permissions(path, perms);
    }
}

/// Write `data` over `path`, retrying on permission/sharing contention.
///
/// `on_written` fires once, after the bytes are durably on disk and before
/// the anti-clobber hold. When `hold` is set the descriptor stays open for
/// [`ANTI_CLOBBER_HOLD`] before the file is re-locked read-only.
pub async fn write_back<F: FnOnce()>(path: &Path, data: &[u8], hold: bool, on_written: F) -> bool {
    make_writable(path);
    let mut on_written = Some(on_written);

    for attempt in 0..MAX_ATTEMPTS {
        match try_write(path, data) {
            Ok(file) => {
                if let Some(callback) = on_written.take() {
                    callback();
                }
                if hold {
                    tokio::time::sleep(ANTI_CLOBBER_HOLD).await;
                }
                drop(file);
                make_readonly(path);
                return true;
            }
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                debug!(path = %path.display(), attempt, "restore write contended");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "restore write failed");
                return false;
            }
        }
    }
    warn!(path = %path.display(), "restore retries exhausted");
    false
}

fn try_write(path: &Path, data: &[u8]) -> std::io::Result<File> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.flush()?;
    file.sync_all()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn write_back_replaces_content_and_relocks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        fs::write(&path, b"tampered").unwrap();

        let mut fired = false;
        assert!(write_back(&path, b"clean", false, || fired = true).await);
        assert!(fired);
        assert_eq!(fs::read(&path).unwrap(), b"clean");
        assert!(fs::metadata(&path).unwrap().permissions().readonly());
    }

    #[tokio::test]
    async fn write_back_recovers_a_readonly_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.txt");
        fs::write(&path, b"old").unwrap();
        make_readonly(&path);

        assert!(write_back(&path, b"new", false, || {}).await);
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }
}

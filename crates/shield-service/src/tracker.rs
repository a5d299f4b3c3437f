//! Per-file rename tracking via a held read handle.
//!
//! Directory notifications do not reliably report a file moved *out* of the
//! watched tree to a sibling directory, so every file target keeps a read
//! handle open and polls the OS for the handle's current canonical path
//! once a second. Several renames between polls collapse into a single move
//! reporting the final path; the intermediate names are lost.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::watcher::FileEvent;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct RenameTracker {
    stop_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl RenameTracker {
    /// Open a read handle on `path` and start polling for renames. The
    /// handle stays open until [`stop`](Self::stop); other processes may
    /// still read, write or delete the file.
    pub fn spawn(path: PathBuf, event_tx: mpsc::Sender<FileEvent>) -> Result<Self> {
        let file = File::open(&path)
            .with_context(|| format!("open {} for rename tracking", path.display()))?;
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut known = path;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(POLL_INTERVAL) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }

                let Some(real) = current_path(&file) else { continue };
                // A deleted file keeps the handle alive but no longer has a
                // live path; the deletion handler owns that case.
                if !real.exists() {
                    continue;
                }
                if !same_path(&known, &real) {
                    debug!(from = %known.display(), to = %real.display(), "tracked file moved");
                    let moved = FileEvent::Moved {
                        from: known.clone(),
                        to: real.clone(),
                    };
                    if event_tx.send(moved).await.is_err() {
                        return;
                    }
                    known = real;
                }
            }
        });

        Ok(Self { stop_tx, handle })
    }

    /// Signal the poll loop and join it. Closes the held handle.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "rename tracker task failed");
        }
    }
}

/// The OS may report the same file with different casing.
fn same_path(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().eq_ignore_ascii_case(&b.to_string_lossy())
}

#[cfg(target_os = "linux")]
fn current_path(file: &File) -> Option<PathBuf> {
    use std::os::unix::io::AsRawFd;
    std::fs::read_link(format!("/proc/self/fd/{}", file.as_raw_fd())).ok()
}

#[cfg(windows)]
fn current_path(file: &File) -> Option<PathBuf> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Storage::FileSystem::GetFinalPathNameByHandleW;

    let mut buf = [0u16; 1024];
    let len = unsafe {
        GetFinalPathNameByHandleW(file.as_raw_handle() as _, buf.as_mut_ptr(), buf.len() as u32, 0)
    };
    if len == 0 || len as usize > buf.len() {
        return None;
    }
    let s = String::from_utf16_lossy(&buf[..len as usize]);
    Some(PathBuf::from(s.strip_prefix(r"\\?\").unwrap_or(&s)))
}

#[cfg(not(any(target_os = "linux", windows)))]
fn current_path(_file: &File) -> Option<PathBuf> {
    // No handle-path query on this platform; directory-level move events
    // are the only rename signal.
    None
}

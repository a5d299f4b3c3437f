//! Thin adapter over the OS recursive change-notification facility.
//!
//! A bridge thread forwards `notify` callbacks into the engine's event
//! queue. Relevance filtering happens in the engine, so the subscription
//! set can stay fixed while targets change at runtime.

use anyhow::Result;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use tokio::sync::mpsc as async_mpsc;
use tracing::{debug, error, info, warn};

/// File-level changes the engine cares about. Directory events are
/// discarded before they reach the queue.
#[derive(Debug, Clone)]
pub enum FileEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
    Deleted(PathBuf),
}

pub struct DirWatcher {
    watcher: RecommendedWatcher,
    bridge: thread::JoinHandle<()>,
}

impl DirWatcher {
    pub fn new(event_tx: async_mpsc::Sender<FileEvent>) -> Result<Self> {
        let (sync_tx, sync_rx) = mpsc::channel::<std::result::Result<Event, notify::Error>>();

        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = sync_tx.send(res);
            },
            Config::default(),
        )?;

        // Bridge notify's sync callbacks into the async event queue.
        let bridge = thread::Builder::new()
            .name("shield-watcher-bridge".into())
            .spawn(move || loop {
                match sync_rx.recv() {
                    Ok(Ok(event)) => {
                        for change in classify_event(&event) {
                            if event_tx.blocking_send(change).is_err() {
                                debug!("engine queue closed, stopping watcher bridge");
                                return;
                            }
                        }
                    }
                    Ok(Err(e)) => error!(error = %e, "file watcher error"),
                    Err(_) => {
                        debug!("watcher channel closed");
                        return;
                    }
                }
            })?;

        Ok(Self { watcher, bridge })
    }

    /// Install one recursive subscription per root.
    pub fn watch_roots(&mut self, roots: &[PathBuf]) -> Result<()> {
        for root in roots {
            if root.exists() {
                self.watcher.watch(root, RecursiveMode::Recursive)?;
                info!(root = %root.display(), "watching");
            } else {
                warn!(root = %root.display(), "watch root does not exist");
            }
        }
        Ok(())
    }

    /// Tear down the subscription and join the bridge thread.
    pub fn shutdown(self) {
        let DirWatcher { watcher, bridge } = self;
        drop(watcher);
        if bridge.join().is_err() {
            warn!("watcher bridge thread panicked");
        }
    }
}

/// Map a notify event onto the engine's event model.
fn classify_event(event: &Event) -> Vec<FileEvent> {
    let mut changes = Vec::new();

    match &event.kind {
        EventKind::Create(_) => {
            for path in &event.paths {
                if !path.is_dir() {
                    changes.push(FileEvent::Created(path.clone()));
                }
            }
        }
        EventKind::Modify(modify_kind) => {
            use notify::event::ModifyKind;
            match modify_kind {
                ModifyKind::Name(_) if event.paths.len() >= 2 => {
                    if !event.paths[1].is_dir() {
                        changes.push(FileEvent::Moved {
                            from: event.paths[0].clone(),
                            to: event.paths[1].clone(),
                        });
                    }
                }
                // Metadata-only changes carry no content to classify.
                ModifyKind::Metadata(_) => {}
                _ => {
                    for path in &event.paths {
                        if !path.is_dir() {
                            changes.push(FileEvent::Modified(path.clone()));
                        }
                    }
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                changes.push(FileEvent::Deleted(path.clone()));
            }
        }
        _ => {}
    }

    changes
}

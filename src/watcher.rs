// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Inbox watcher for watch mode

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::organizer::relocate::{BACKUP_SUFFIX, PARTIAL_SUFFIX};
use crate::Result;

/// Events emitted by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file appeared (created or moved in)
    FileArrived(PathBuf),
    /// Watcher error
    Error(String),
}

/// Non-recursive watcher over one inbox directory
pub struct InboxWatcher {
    _watcher: RecommendedWatcher,
    inbox: PathBuf,
    event_rx: Receiver<notify::Result<Event>>,
}

impl InboxWatcher {
    /// Start watching `inbox`, creating it if needed
    pub fn new(inbox: &Path, poll_interval: Duration) -> Result<Self> {
        let (tx, rx) = channel();

        let config = Config::default().with_poll_interval(poll_interval);
        let mut watcher = RecommendedWatcher::new(tx, config)?;

        if !inbox.exists() {
            std::fs::create_dir_all(inbox)?;
            info!("Created inbox directory: {:?}", inbox);
        }

        watcher.watch(inbox, RecursiveMode::NonRecursive)?;
        info!("Watching: {:?}", inbox);

        Ok(Self {
            _watcher: watcher,
            inbox: inbox.to_path_buf(),
            event_rx: rx,
        })
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    /// Get the next event (blocking with timeout)
    pub fn next_event(&self, timeout: Duration) -> Option<WatchEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(Ok(event)) => convert_event(event),
            Ok(Err(e)) => Some(WatchEvent::Error(e.to_string())),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => None,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Some(WatchEvent::Error("Watcher disconnected".to_string()))
            }
        }
    }
}

/// Convert notify event to our event type
fn convert_event(event: Event) -> Option<WatchEvent> {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(notify::event::ModifyKind::Name(_)) => event
            .paths
            .last()
            .map(|p| WatchEvent::FileArrived(p.clone())),
        _ => None,
    }
}

/// Whether a new inbox file should trigger an organize pass
pub fn should_trigger(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Hidden files, including our own partial copies
    if filename.starts_with('.')
        || filename.ends_with(PARTIAL_SUFFIX)
        || filename.ends_with(BACKUP_SUFFIX)
    {
        return false;
    }

    // Browser downloads still in progress
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download"];
    if temp_extensions.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    let skip_names = ["desktop.ini", "thumbs.db"];
    !skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n))
}

/// Wait for file to be stable (not being written)
pub async fn wait_for_stable(path: &Path, max_wait: Duration) -> bool {
    let check_interval = Duration::from_millis(500);
    let start = std::time::Instant::now();

    let mut last_size = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    loop {
        tokio::time::sleep(check_interval).await;

        if start.elapsed() > max_wait {
            warn!("File stability check timed out for {:?}", path);
            return true;
        }

        let current_size = match std::fs::metadata(path) {
            Ok(m) => m.len(),
            Err(_) => return false,
        };

        if current_size == last_size {
            return true;
        }

        last_size = current_size;
        debug!("File {:?} still being written, size: {}", path, current_size);
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! One mutex per destination directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

type LockMap = HashMap<PathBuf, Arc<Mutex<()>>>;

/// Serializes collision check, move and catalog write per destination
///
/// Entries live only while some caller holds a [`DirectoryLock`], so the map
/// is bounded by the number of directories being written concurrently.
#[derive(Debug, Default)]
pub struct DirectoryLocks {
    locks: Mutex<LockMap>,
}

impl DirectoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        // Every mutation leaves the map consistent, so a poisoned guard is usable
        self.locks.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Handle on the mutex guarding `dir`, created on first use
    pub fn lock_for(&self, dir: &Path) -> DirectoryLock<'_> {
        let mutex = self
            .map()
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        DirectoryLock {
            locks: self,
            dir: dir.to_path_buf(),
            mutex,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

/// A registered interest in one directory's mutex
///
/// Dropping the last handle for a directory removes its entry.
#[derive(Debug)]
pub struct DirectoryLock<'a> {
    locks: &'a DirectoryLocks,
    dir: PathBuf,
    mutex: Arc<Mutex<()>>,
}

impl DirectoryLock<'_> {
    /// Block until the directory is ours; it guards no data so poisoning is ignored
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Drop for DirectoryLock<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        // Clones are only handed out under the map lock: the map's and ours
        // are the only ones left when the count is 2
        let last = map
            .get(&self.dir)
            .is_some_and(|m| Arc::ptr_eq(m, &self.mutex) && Arc::strong_count(m) == 2);
        if last {
            map.remove(&self.dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_dir_shares_lock() {
        let locks = DirectoryLocks::new();
        let a = locks.lock_for(Path::new("storage/ana/images/png"));
        let b = locks.lock_for(Path::new("storage/ana/images/png"));
        let c = locks.lock_for(Path::new("storage/ana/other"));
        assert!(Arc::ptr_eq(&a.mutex, &b.mutex));
        assert!(!Arc::ptr_eq(&a.mutex, &c.mutex));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_entries_are_pruned_after_release() {
        let locks = DirectoryLocks::new();
        {
            let a = locks.lock_for(Path::new("storage/ana/images/png"));
            let b = locks.lock_for(Path::new("storage/ana/images/png"));
            let _guard = a.acquire();
            drop(b);
            assert_eq!(locks.len(), 1, "still held by `a`");
        }
        assert_eq!(locks.len(), 0);

        for i in 0..100 {
            let dir = PathBuf::from(format!("storage/owner{}/other", i));
            let lock = locks.lock_for(&dir);
            let _guard = lock.acquire();
        }
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_lock_excludes_concurrent_holders() {
        let locks = Arc::new(DirectoryLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let lock = locks.lock_for(Path::new("storage/ana/other"));
                    let _guard = lock.acquire();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 0);
    }
}

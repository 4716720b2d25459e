// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Catalog of relocated files
//!
//! The catalog is append-only: one record per successful move, read back per
//! owner in the order the records were appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::owner::Owner;
use crate::Result;

/// Default number of records fetched per history page
pub const HISTORY_PAGE_SIZE: usize = 256;

/// Catalog row identifier, increasing in append order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record about to be appended
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub owner: Owner,
    pub name: String,
    pub category: String,
    pub path: PathBuf,
    pub run_id: Uuid,
}

/// One relocated file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: RecordId,
    pub owner: Owner,
    /// File name including extension
    pub name: String,
    pub category: String,
    /// Destination directory
    pub path: PathBuf,
    pub run_id: Uuid,
    pub organized_at: DateTime<Utc>,
}

impl ArchiveRecord {
    /// Full path of the cataloged file
    pub fn file_path(&self) -> PathBuf {
        self.path.join(&self.name)
    }
}

/// Durable store for archive records
pub trait CatalogStore: Send + Sync {
    /// Persist one record atomically
    fn append(&self, record: &NewRecord) -> Result<RecordId>;

    /// Records of `owner` with id greater than `after`, in append order
    fn page(&self, owner: &Owner, after: Option<RecordId>, limit: usize)
        -> Result<Vec<ArchiveRecord>>;

    /// Number of records per category for `owner`
    fn category_counts(&self, owner: &Owner) -> Result<Vec<(String, i64)>>;

    /// Latest record of `owner` stored as `name` in directory `path`
    ///
    /// Stores with an index should override the full scan.
    fn latest_at(&self, owner: &Owner, path: &Path, name: &str) -> Result<Option<ArchiveRecord>> {
        let mut latest = None;
        for record in &History::new(self, owner.clone()) {
            let record = record?;
            if record.name == name && record.path == path {
                latest = Some(record);
            }
        }
        Ok(latest)
    }

    /// Lazy, restartable view over the records of `owner`
    fn history(&self, owner: &Owner) -> History<'_, Self>
    where
        Self: Sized,
    {
        History::new(self, owner.clone())
    }
}

/// Per-owner record sequence
///
/// Nothing is read until iteration starts. Every call to [`History::iter`]
/// starts again from the first record.
pub struct History<'a, S: CatalogStore + ?Sized> {
    store: &'a S,
    owner: Owner,
    page_size: usize,
}

impl<'a, S: CatalogStore + ?Sized> History<'a, S> {
    pub fn new(store: &'a S, owner: Owner) -> Self {
        Self {
            store,
            owner,
            page_size: HISTORY_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn iter(&self) -> HistoryIter<'a, S> {
        HistoryIter {
            store: self.store,
            owner: self.owner.clone(),
            page_size: self.page_size,
            buffer: VecDeque::new(),
            cursor: None,
            exhausted: false,
        }
    }

    /// Read the whole sequence into memory
    pub fn collect_all(&self) -> Result<Vec<ArchiveRecord>> {
        self.iter().collect()
    }
}

impl<'a, 'h, S: CatalogStore + ?Sized> IntoIterator for &'h History<'a, S> {
    type Item = Result<ArchiveRecord>;
    type IntoIter = HistoryIter<'a, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator fetching history pages on demand
pub struct HistoryIter<'a, S: CatalogStore + ?Sized> {
    store: &'a S,
    owner: Owner,
    page_size: usize,
    buffer: VecDeque<ArchiveRecord>,
    cursor: Option<RecordId>,
    exhausted: bool,
}

impl<S: CatalogStore + ?Sized> Iterator for HistoryIter<'_, S> {
    type Item = Result<ArchiveRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.page(&self.owner, self.cursor, self.page_size) {
                Ok(page) => {
                    if page.len() < self.page_size {
                        self.exhausted = true;
                    }
                    if let Some(last) = page.last() {
                        self.cursor = Some(last.id);
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    // An error ends the sequence
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        self.buffer.pop_front().map(Ok)
    }
}

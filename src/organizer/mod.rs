// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Organizer engine
//!
//! Moves every file of a source directory into
//! `<storage_root>/<owner>/<category>/` and appends one catalog record per
//! move. A move whose record cannot be written is rolled back; when the
//! rollback itself fails the outcome says so and the file is left for manual
//! reconciliation.

pub mod locks;
pub mod relocate;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, DirEntry};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{ArchiveRecord, CatalogStore, History, NewRecord, RecordId};
use crate::categories::CategoryRules;
use crate::owner::Owner;
use crate::{ArquivistaError, Result};

use locks::DirectoryLocks;
use relocate::{RelocateError, BACKUP_SUFFIX};

/// What to do when the destination name is already taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Leave the file in the source directory
    #[default]
    Reject,
    /// Replace the existing destination file
    Overwrite,
    /// Store under the first free `name_N.ext`
    Rename,
}

impl CollisionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Overwrite => "overwrite",
            Self::Rename => "rename",
        }
    }
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollisionPolicy {
    type Err = ArquivistaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" | "skip" => Ok(Self::Reject),
            "overwrite" => Ok(Self::Overwrite),
            "rename" => Ok(Self::Rename),
            other => Err(ArquivistaError::Config(format!(
                "unknown collision policy `{}`; expected reject|overwrite|rename",
                other
            ))),
        }
    }
}

/// Why a file was left where it was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DestinationExists,
    SymbolicLink,
    NonUtf8Name,
    Protected,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DestinationExists => "destination exists",
            Self::SymbolicLink => "symbolic link",
            Self::NonUtf8Name => "file name is not valid UTF-8",
            Self::Protected => "protected file",
        })
    }
}

/// State after a failed catalog write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Rollback {
    /// The file is back at its source path
    Restored,
    /// The file stays in storage without a record
    NeedsReconciliation { message: String },
}

/// Why a single file could not be organized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileFailure {
    Filesystem { message: String },
    /// Cross-filesystem copy did not match the source; source untouched
    Verification { message: String },
    Persistence { message: String, rollback: Rollback },
}

impl FileFailure {
    pub fn needs_reconciliation(&self) -> bool {
        matches!(
            self,
            Self::Persistence {
                rollback: Rollback::NeedsReconciliation { .. },
                ..
            }
        )
    }
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem { message } => write!(f, "filesystem error: {}", message),
            Self::Verification { message } => write!(f, "verification error: {}", message),
            Self::Persistence {
                message,
                rollback: Rollback::Restored,
            } => write!(f, "catalog error: {} (file restored to source)", message),
            Self::Persistence {
                message,
                rollback: Rollback::NeedsReconciliation { message: rollback },
            } => write!(
                f,
                "catalog error: {}; rollback failed: {} (needs manual reconciliation)",
                message, rollback
            ),
        }
    }
}

impl From<RelocateError> for FileFailure {
    fn from(err: RelocateError) -> Self {
        match err {
            RelocateError::Io(e) => Self::Filesystem {
                message: e.to_string(),
            },
            RelocateError::Verification(message) => Self::Verification { message },
        }
    }
}

/// Result for one enumerated file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    Moved {
        /// Name under which the file was stored and cataloged
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        renamed_from: Option<String>,
        category: String,
        destination: PathBuf,
        record_id: RecordId,
        /// Earlier record of the file this one overwrote
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replaced: Option<RecordId>,
    },
    Skipped {
        name: String,
        reason: SkipReason,
    },
    Failed {
        name: String,
        error: FileFailure,
    },
}

impl FileOutcome {
    /// Name of the file as found in the source directory
    pub fn source_name(&self) -> &str {
        match self {
            Self::Moved {
                name, renamed_from, ..
            } => renamed_from.as_deref().unwrap_or(name),
            Self::Skipped { name, .. } | Self::Failed { name, .. } => name,
        }
    }

    pub fn is_moved(&self) -> bool {
        matches!(self, Self::Moved { .. })
    }
}

/// Outcome of one organize call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizeReport {
    pub run_id: Uuid,
    pub owner: Owner,
    pub source: PathBuf,
    pub policy: CollisionPolicy,
    pub entries: Vec<FileOutcome>,
}

impl OrganizeReport {
    pub fn moved(&self) -> usize {
        self.entries.iter().filter(|e| e.is_moved()).count()
    }

    pub fn skipped(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, FileOutcome::Skipped { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, FileOutcome::Failed { .. }))
            .count()
    }

    /// Files left in storage without a catalog record
    pub fn needs_reconciliation(&self) -> Vec<&FileOutcome> {
        self.entries
            .iter()
            .filter(|e| matches!(e, FileOutcome::Failed { error, .. } if error.needs_reconciliation()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Differences between an owner's storage tree and the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub owner: Owner,
    /// Records whose file is gone
    pub missing: Vec<ArchiveRecord>,
    /// Files in storage with no record
    pub untracked: Vec<PathBuf>,
    /// Records overwritten by a later record for the same file
    #[serde(default)]
    pub superseded: Vec<ArchiveRecord>,
}

impl AuditReport {
    /// Storage tree and current records disagree
    pub fn has_drift(&self) -> bool {
        !self.missing.is_empty() || !self.untracked.is_empty()
    }

    /// Every file has exactly one record and every record one file
    pub fn is_consistent(&self) -> bool {
        !self.has_drift() && self.superseded.is_empty()
    }
}

/// Per-call settings shared by every file of one organize run
struct Run<'a> {
    id: Uuid,
    owner: &'a Owner,
    policy: CollisionPolicy,
}

/// Organizes source directories into per-owner category folders
pub struct Organizer<S: CatalogStore> {
    store: S,
    rules: CategoryRules,
    storage_root: PathBuf,
    locks: DirectoryLocks,
    protected: HashSet<PathBuf>,
}

impl<S: CatalogStore> Organizer<S> {
    pub fn new(store: S, rules: CategoryRules, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            rules,
            storage_root: storage_root.into(),
            locks: DirectoryLocks::new(),
            protected: HashSet::new(),
        }
    }

    /// Never move `path`, even if it sits in a source directory
    ///
    /// Paths that do not exist yet are ignored.
    pub fn protect(&mut self, path: &Path) {
        if let Ok(canonical) = path.canonicalize() {
            self.protected.insert(canonical);
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn rules(&self) -> &CategoryRules {
        &self.rules
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Root of the owner's storage tree
    pub fn owner_root(&self, owner: &Owner) -> PathBuf {
        self.storage_root.join(owner.as_str())
    }

    /// Records appended for `owner`, oldest first
    pub fn history(&self, owner: &Owner) -> History<'_, S> {
        self.store.history(owner)
    }

    /// Organize every file directly inside `source`
    ///
    /// Only a missing or unreadable source directory is an error; every
    /// per-file problem is reported in the returned report.
    pub fn organize(
        &self,
        owner: &Owner,
        source: &Path,
        policy: CollisionPolicy,
    ) -> Result<OrganizeReport> {
        let meta = fs::metadata(source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ArquivistaError::SourceMissing(source.to_path_buf()),
            _ => ArquivistaError::FileSystem(e),
        })?;
        if !meta.is_dir() {
            return Err(ArquivistaError::SourceNotDirectory(source.to_path_buf()));
        }

        let run = Run {
            id: Uuid::new_v4(),
            owner,
            policy,
        };
        info!(run = %run.id, owner = %owner, policy = %policy, "Organizing {:?}", source);

        let mut entries: Vec<FileOutcome> = Vec::new();
        let mut listing: Vec<DirEntry> = Vec::new();
        for entry in fs::read_dir(source)? {
            match entry {
                Ok(entry) => listing.push(entry),
                Err(e) => {
                    warn!("Unreadable entry in {:?}: {}", source, e);
                    entries.push(FileOutcome::Failed {
                        name: String::from("<unreadable entry>"),
                        error: FileFailure::Filesystem {
                            message: e.to_string(),
                        },
                    });
                }
            }
        }
        listing.sort_by_key(|entry| entry.file_name());

        for entry in listing {
            if let Some(outcome) = self.process_entry(&run, &entry) {
                entries.push(outcome);
            }
        }

        let report = OrganizeReport {
            run_id: run.id,
            owner: owner.clone(),
            source: source.to_path_buf(),
            policy,
            entries,
        };
        info!(
            run = %report.run_id,
            moved = report.moved(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Organize finished"
        );
        Ok(report)
    }

    /// `None` for entries that are not reported (directories)
    fn process_entry(&self, run: &Run<'_>, entry: &DirEntry) -> Option<FileOutcome> {
        let path = entry.path();
        let file_name = entry.file_name();

        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(e) => {
                return Some(FileOutcome::Failed {
                    name: file_name.to_string_lossy().into_owned(),
                    error: FileFailure::Filesystem {
                        message: e.to_string(),
                    },
                })
            }
        };

        if file_type.is_dir() {
            debug!("Ignoring subdirectory {:?}", path);
            return None;
        }

        let name = match file_name.to_str() {
            Some(name) => name.to_string(),
            None => {
                let lossy = file_name.to_string_lossy().into_owned();
                warn!("Skipping {:?}: name is not valid UTF-8", path);
                return Some(FileOutcome::Skipped {
                    name: lossy,
                    reason: SkipReason::NonUtf8Name,
                });
            }
        };
        if file_type.is_symlink() {
            return Some(skipped(name, SkipReason::SymbolicLink));
        }
        if self.is_protected(&path) {
            return Some(skipped(name, SkipReason::Protected));
        }

        Some(self.move_and_record(run, &path, name))
    }

    fn is_protected(&self, path: &Path) -> bool {
        !self.protected.is_empty()
            && path
                .canonicalize()
                .map(|p| self.protected.contains(&p))
                .unwrap_or(false)
    }

    fn move_and_record(&self, run: &Run<'_>, source: &Path, name: String) -> FileOutcome {
        let category = self.rules.resolve_path(source).to_string();
        let dest_dir = self.owner_root(run.owner).join(&category);

        let lock = self.locks.lock_for(&dest_dir);
        let _guard = lock.acquire();

        if let Err(e) = fs::create_dir_all(&dest_dir) {
            return failed(
                name,
                format!("cannot create destination {:?}: {}", dest_dir, e),
            );
        }

        let mut final_name = name.clone();
        let mut backup: Option<PathBuf> = None;
        let mut replaced: Option<RecordId> = None;
        let occupied_target = dest_dir.join(&name);

        if relocate::occupied(&occupied_target) {
            match run.policy {
                CollisionPolicy::Reject => {
                    info!(run = %run.id, "{} already exists in {:?}, skipping", name, dest_dir);
                    return skipped(name, SkipReason::DestinationExists);
                }
                CollisionPolicy::Rename => match relocate::next_free_name(&dest_dir, &name) {
                    Some(free) => final_name = free,
                    None => return failed(name, format!("no free name in {:?}", dest_dir)),
                },
                CollisionPolicy::Overwrite => {
                    if occupied_target.is_dir() {
                        return failed(
                            name,
                            format!("{:?} is a directory and cannot be overwritten", occupied_target),
                        );
                    }
                    replaced = match self.store.latest_at(run.owner, &dest_dir, &name) {
                        Ok(previous) => previous.map(|r| r.id),
                        Err(e) => {
                            warn!(run = %run.id, "Catalog lookup for {} failed: {}", name, e);
                            return FileOutcome::Failed {
                                name,
                                error: FileFailure::Persistence {
                                    message: e.to_string(),
                                    rollback: Rollback::Restored,
                                },
                            };
                        }
                    };
                    let set_aside = match relocate::hidden_sibling(&occupied_target, BACKUP_SUFFIX)
                        .and_then(|b| fs::rename(&occupied_target, &b).map(|()| b))
                    {
                        Ok(b) => b,
                        Err(e) => {
                            return failed(
                                name,
                                format!("cannot set aside existing {:?}: {}", occupied_target, e),
                            )
                        }
                    };
                    backup = Some(set_aside);
                }
            }
        }

        let target = dest_dir.join(&final_name);
        let method = match relocate::relocate(source, &target) {
            Ok(method) => method,
            Err(e) => {
                let mut failure = FileFailure::from(e);
                if let Some(backup) = &backup {
                    if let Err(restore) = fs::rename(backup, &target) {
                        error!("Could not restore {:?} from {:?}: {}", target, backup, restore);
                        append_message(
                            &mut failure,
                            &format!("previous file kept at {:?}: {}", backup, restore),
                        );
                    }
                }
                warn!(run = %run.id, "Failed to move {:?}: {}", source, failure);
                return FileOutcome::Failed {
                    name,
                    error: failure,
                };
            }
        };

        let record = NewRecord {
            owner: run.owner.clone(),
            name: final_name.clone(),
            category: category.clone(),
            path: dest_dir.clone(),
            run_id: run.id,
        };

        match self.store.append(&record) {
            Ok(record_id) => {
                if let Some(backup) = &backup {
                    if let Err(e) = fs::remove_file(backup) {
                        warn!("Could not remove replaced file {:?}: {}", backup, e);
                    }
                }
                info!(
                    run = %run.id,
                    record = %record_id,
                    method = ?method,
                    "[{}] {} -> {:?}",
                    category.to_uppercase(),
                    final_name,
                    dest_dir
                );
                FileOutcome::Moved {
                    renamed_from: (final_name != name).then(|| name.clone()),
                    name: final_name,
                    category,
                    destination: dest_dir,
                    record_id,
                    replaced,
                }
            }
            Err(persist_err) => {
                let rollback = match roll_back(source, &target, backup.as_deref()) {
                    Ok(()) => {
                        warn!(run = %run.id, "Catalog write failed, restored {:?}: {}", source, persist_err);
                        Rollback::Restored
                    }
                    Err(message) => {
                        error!(
                            run = %run.id,
                            "Catalog write failed and rollback failed; {:?} needs reconciliation: {}; {}",
                            target,
                            persist_err,
                            message
                        );
                        Rollback::NeedsReconciliation { message }
                    }
                };
                FileOutcome::Failed {
                    name,
                    error: FileFailure::Persistence {
                        message: persist_err.to_string(),
                        rollback,
                    },
                }
            }
        }
    }

    /// Compare the owner's storage tree with the catalog
    pub fn audit(&self, owner: &Owner) -> Result<AuditReport> {
        // Latest record per file path; history is in append order
        let mut current: HashMap<PathBuf, ArchiveRecord> = HashMap::new();
        let mut superseded = Vec::new();

        for record in self.history(owner).iter() {
            let record = record?;
            if let Some(previous) = current.insert(record.file_path(), record) {
                superseded.push(previous);
            }
        }
        superseded.sort_by_key(|r| r.id);

        let mut cataloged = HashSet::new();
        let mut missing = Vec::new();
        for (path, record) in current {
            if path.is_file() {
                cataloged.insert(path);
            } else {
                missing.push(record);
            }
        }
        missing.sort_by_key(|r| r.id);

        let root = self.owner_root(owner);
        let mut untracked: Vec<PathBuf> = if root.is_dir() {
            walk_files(&root)?
                .into_iter()
                .filter(|p| !cataloged.contains(p))
                .collect()
        } else {
            Vec::new()
        };
        untracked.sort();

        Ok(AuditReport {
            owner: owner.clone(),
            missing,
            untracked,
            superseded,
        })
    }
}

/// Undo a completed move after its record could not be written
fn roll_back(source: &Path, target: &Path, backup: Option<&Path>) -> std::result::Result<(), String> {
    if relocate::occupied(source) {
        return Err(format!("{:?} was recreated in the meantime", source));
    }
    relocate::relocate(target, source)
        .map_err(|e| format!("moving back to {:?}: {}", source, e))?;

    if let Some(backup) = backup {
        fs::rename(backup, target).map_err(|e| {
            format!("file restored but previous {:?} remains at {:?}: {}", target, backup, e)
        })?;
    }
    Ok(())
}

fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            files.extend(walk_files(&entry.path())?);
        } else {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn skipped(name: String, reason: SkipReason) -> FileOutcome {
    debug!("Skipping {}: {}", name, reason);
    FileOutcome::Skipped { name, reason }
}

fn failed(name: String, message: String) -> FileOutcome {
    warn!("Failed to organize {}: {}", name, message);
    FileOutcome::Failed {
        name,
        error: FileFailure::Filesystem { message },
    }
}

fn append_message(failure: &mut FileFailure, extra: &str) {
    match failure {
        FileFailure::Filesystem { message }
        | FileFailure::Verification { message }
        | FileFailure::Persistence { message, .. } => {
            message.push_str("; ");
            message.push_str(extra);
        }
    }
}

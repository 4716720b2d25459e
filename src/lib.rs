// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Arquivista: per-owner file organizer
//!
//! Files dropped into a source directory are moved into
//! `<storage_root>/<owner>/<category>/` by extension, and every move is
//! recorded in a SQLite catalog that can be queried per owner.

pub mod catalog;
pub mod categories;
pub mod config;
pub mod db;
pub mod error;
pub mod organizer;
pub mod owner;
pub mod watcher;
pub mod web;

pub use catalog::{ArchiveRecord, CatalogStore, History, NewRecord, RecordId};
pub use categories::{CategoryRules, FALLBACK_CATEGORY};
pub use config::AppConfig;
pub use db::Database;
pub use error::{ArquivistaError, Result};
pub use organizer::{
    AuditReport, CollisionPolicy, FileFailure, FileOutcome, OrganizeReport, Organizer, Rollback,
    SkipReason,
};
pub use owner::Owner;

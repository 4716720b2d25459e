// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Error types for Arquivista

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Arquivista operations
pub type Result<T> = std::result::Result<T, ArquivistaError>;

/// Arquivista error types
#[derive(Error, Debug)]
pub enum ArquivistaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid owner identifier: {0}")]
    InvalidOwner(String),

    #[error("Source directory not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Source path is not a directory: {0}")]
    SourceNotDirectory(PathBuf),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),

    #[error("Invalid catalog data: {0}")]
    InvalidData(String),
}

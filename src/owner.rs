// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Owner identifiers
//!
//! Owners are authenticated elsewhere. The only check made here is that the
//! identifier is usable as a single directory name under the storage root.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ArquivistaError, Result};

/// Identity namespace for stored files and catalog records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Owner(String);

impl Owner {
    /// Wrap an already-authenticated owner identifier
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.trim().is_empty() {
            return Err(ArquivistaError::InvalidOwner("owner cannot be empty".to_string()));
        }
        if id.starts_with('.') {
            return Err(ArquivistaError::InvalidOwner(format!(
                "`{}` cannot start with a dot",
                id
            )));
        }
        if id.contains(['/', '\\', '\0']) {
            return Err(ArquivistaError::InvalidOwner(format!(
                "`{}` contains a path separator",
                id.escape_debug()
            )));
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Owner {
    type Err = ArquivistaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Owner {
    type Error = ArquivistaError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Owner> for String {
    fn from(owner: Owner) -> Self {
        owner.0
    }
}

impl AsRef<str> for Owner {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Extension based category resolution

use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path};

use crate::{ArquivistaError, Result};

/// Category for every extension missing from the rule table
pub const FALLBACK_CATEGORY: &str = "other";

/// Immutable extension → category table
///
/// Keys are stored normalized (no leading dot, lowercase) so lookups never
/// fail. Category values are relative paths such as `images/png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRules {
    rules: HashMap<String, String>,
}

impl CategoryRules {
    /// Build a rule table, normalizing extensions and checking categories
    pub fn new<I, K, V>(rules: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut table = HashMap::new();

        for (ext, category) in rules {
            let ext = normalize_extension(ext.as_ref());
            if ext.is_empty() {
                return Err(ArquivistaError::Config(
                    "category rule with an empty extension".to_string(),
                ));
            }

            let category = category.into();
            validate_category(&category)?;

            if let Some(previous) = table.insert(ext.clone(), category.clone()) {
                if previous != category {
                    return Err(ArquivistaError::Config(format!(
                        "extension `{}` maps to both `{}` and `{}`",
                        ext, previous, category
                    )));
                }
            }
        }

        Ok(Self { rules: table })
    }

    /// Resolve an extension (with or without leading dot, any case)
    pub fn resolve(&self, extension: &str) -> &str {
        let ext = normalize_extension(extension);
        self.rules
            .get(&ext)
            .map(String::as_str)
            .unwrap_or(FALLBACK_CATEGORY)
    }

    /// Resolve the category for a file path by its extension
    pub fn resolve_path(&self, path: &Path) -> &str {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.resolve(ext),
            None => FALLBACK_CATEGORY,
        }
    }

    /// Rules sorted by extension, for display
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.rules
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for CategoryRules {
    fn default() -> Self {
        Self {
            rules: default_rules()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Built-in extension table
pub fn default_rules() -> BTreeMap<&'static str, &'static str> {
    [
        ("png", "images/png"),
        ("jpg", "images/jpg"),
        ("jpeg", "images/jpg"),
        ("gif", "images/gif"),
        ("webp", "images/webp"),
        ("svg", "images/vector"),
        ("pdf", "documents/pdf"),
        ("doc", "documents/word"),
        ("docx", "documents/word"),
        ("xls", "documents/excel"),
        ("xlsx", "documents/excel"),
        ("ppt", "documents/powerpoint"),
        ("pptx", "documents/powerpoint"),
        ("txt", "documents/text"),
        ("mp3", "multimedia/audio"),
        ("wav", "multimedia/audio"),
        ("mp4", "multimedia/video"),
        ("zip", "archives"),
        ("rar", "archives"),
    ]
    .into_iter()
    .collect()
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

fn validate_category(category: &str) -> Result<()> {
    let invalid = |why: &str| {
        Err(ArquivistaError::Config(format!(
            "invalid category `{}`: {}",
            category, why
        )))
    };

    if category.trim().is_empty() {
        return invalid("empty");
    }
    if category.split(['/', '\\']).any(|segment| segment.is_empty()) {
        return invalid("empty path segment");
    }
    let all_normal = Path::new(category)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal || category.contains('\\') {
        return invalid("must be a relative path without `.` or `..`");
    }
    if category.split('/').any(|segment| segment.starts_with('.')) {
        return invalid("segments cannot start with a dot");
    }

    Ok(())
}

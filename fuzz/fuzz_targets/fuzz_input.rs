// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::path::{Component, Path};

use arquivista::{CategoryRules, Owner, FALLBACK_CATEGORY};

#[derive(Arbitrary, Debug)]
struct Input {
    owner: String,
    rules: Vec<(String, String)>,
    file_name: String,
}

fn stays_below(path: &str) -> bool {
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

fuzz_target!(|input: Input| {
    // Accepted owners are a single safe path segment
    if let Ok(owner) = Owner::new(input.owner) {
        assert!(stays_below(owner.as_str()));
        assert_eq!(Path::new(owner.as_str()).components().count(), 1);
    }

    let rules = CategoryRules::new(input.rules).unwrap_or_default();

    // Resolution is total and never escapes the owner root
    let category = rules.resolve_path(Path::new(&input.file_name));
    assert!(!category.is_empty());
    assert!(stays_below(category));

    if Path::new(&input.file_name).extension().is_none() {
        assert_eq!(category, FALLBACK_CATEGORY);
    }
});

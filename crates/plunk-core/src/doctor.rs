// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `doctor`: a read-only diagnostic sweep over the store and registry,
//! surfacing problems `clean` would otherwise fix silently or that need
//! a human decision (a consumer directory that vanished, a dangling
//! registration with no matching link).

use crate::{Error, Plunk};

#[derive(Debug, Clone, Default)]
pub struct DoctorReport {
    pub issues: Vec<String>,
    pub store_entries_checked: usize,
}

impl Plunk {
    pub async fn doctor(&self) -> Result<DoctorReport, Error> {
        let mut issues = Vec::new();

        if !self.home.root().is_dir() {
            issues.push(format!("home root {:?} does not exist", self.home.root()));
        }
        if !self.home.store_root().is_dir() {
            issues.push(format!("store root {:?} does not exist", self.home.store_root()));
        }

        let entries = self.store.list_store_entries().await?;
        for entry in &entries {
            if entry.meta.content_hash.is_empty() {
                issues.push(format!("{}@{} has an empty content hash", entry.name, entry.version));
            }
            if !entry.package_dir.is_dir() {
                issues.push(format!("{}@{} is missing its package directory", entry.name, entry.version));
            }
        }

        let mut checked_names: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for entry in &entries {
            if !checked_names.insert(&entry.name) {
                continue;
            }
            for consumer_dir in self.tracker.get_consumers(&entry.name).await {
                if !consumer_dir.is_dir() {
                    issues.push(format!("{} is registered for a consumer directory that no longer exists: {consumer_dir:?}", entry.name));
                    continue;
                }
                if self.tracker.get_link(&consumer_dir, &entry.name).await.is_none() {
                    issues.push(format!("{} is registered for {consumer_dir:?} but has no link entry there", entry.name));
                }
            }
        }

        Ok(DoctorReport { issues, store_entries_checked: entries.len() })
    }
}

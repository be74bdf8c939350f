// Run context - state shared by every reconciler call of one run
//
// Owned by the dispatcher and passed by reference to each row; nothing here is
// global, so two runs never see each other's caches or locks.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;

use crate::cache::LookupCache;
use crate::config::RunConfig;
use crate::locks::LockRegistry;

/// Which primary table a mutation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryKind {
    Identity,
    Enrollment,
}

impl PrimaryKind {
    pub fn table(self) -> &'static str {
        match self {
            PrimaryKind::Identity => "identities",
            PrimaryKind::Enrollment => "enrollments",
        }
    }
}

/// Distinct keys written during the run, per table.
#[derive(Debug, Default)]
struct UpdatedSets {
    identities: HashSet<String>,
    enrollments: HashSet<String>,
    uidentities: HashSet<String>,
    profiles: HashSet<String>,
}

/// Distinct updated record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateCounts {
    pub identities: usize,
    pub enrollments: usize,
    pub uidentities: usize,
    pub profiles: usize,
}

pub struct RunContext {
    pub config: RunConfig,
    pub cache: LookupCache,
    pub locks: LockRegistry,
    updated: Mutex<UpdatedSets>,
}

impl RunContext {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            cache: LookupCache::new(),
            locks: LockRegistry::new(),
            updated: Mutex::new(UpdatedSets::default()),
        }
    }

    /// Record a committed mutation of `key` and both dependents of `merged_id`.
    pub fn record_update(&self, kind: PrimaryKind, key: &str, merged_id: &str) {
        let mut updated = self.updated.lock();
        match kind {
            PrimaryKind::Identity => updated.identities.insert(key.to_string()),
            PrimaryKind::Enrollment => updated.enrollments.insert(key.to_string()),
        };
        updated.uidentities.insert(merged_id.to_string());
        updated.profiles.insert(merged_id.to_string());
    }

    pub fn update_counts(&self) -> UpdateCounts {
        let updated = self.updated.lock();
        UpdateCounts {
            identities: updated.identities.len(),
            enrollments: updated.enrollments.len(),
            uidentities: updated.uidentities.len(),
            profiles: updated.profiles.len(),
        }
    }
}

// Row outcomes - what a reconciler did with one row
//
// Hard failures are `ReconcileError`s. Everything here leaves the run going.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Primary record and both dependent records written and committed.
    Applied,
    /// Every tracked field already had the requested value.
    NoChange,
    /// Dry run: the change was only previewed.
    DryRun,
    /// A uniqueness violation showed the change was already applied elsewhere.
    Collision,
    /// Nothing written; see the warning.
    Warning(Warning),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    IdentityNotFound,
    /// Organization or project slug unknown to the store.
    UnresolvedReference,
    NoMatchingEnrollment,
    AmbiguousEnrollment,
    /// At least one of the three writes touched no row; rolled back.
    PartialEffect {
        primary: usize,
        uidentities: usize,
        profiles: usize,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::IdentityNotFound => write!(f, "identity not found"),
            Warning::UnresolvedReference => write!(f, "unresolved reference"),
            Warning::NoMatchingEnrollment => write!(f, "no matching enrollment"),
            Warning::AmbiguousEnrollment => write!(f, "more than one matching enrollment"),
            Warning::PartialEffect {
                primary,
                uidentities,
                profiles,
            } => write!(
                f,
                "partial effect ({},{},{})",
                primary, uidentities, profiles
            ),
        }
    }
}

/// Outcome counts for one phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub rows: usize,
    pub applied: usize,
    pub no_change: usize,
    pub dry_run: usize,
    pub collisions: usize,
    pub warnings: usize,
    pub errors: usize,
}

impl Tally {
    pub fn record(&mut self, outcome: &Outcome) {
        self.rows += 1;
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::NoChange => self.no_change += 1,
            Outcome::DryRun => self.dry_run += 1,
            Outcome::Collision => self.collisions += 1,
            Outcome::Warning(_) => self.warnings += 1,
        }
    }

    pub fn record_error(&mut self) {
        self.rows += 1;
        self.errors += 1;
    }
}

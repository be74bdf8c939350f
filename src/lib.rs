// Affiliations Import - Core Library
// Concurrent reconciliation of identity and affiliation corrections against the identity store

pub mod row;
pub mod dates;
pub mod schema;
pub mod sql;
pub mod store;
pub mod error;
pub mod cache;          // Lookup Cache - org ids and project slugs
pub mod locks;          // Lock Registry - per-entity locks
pub mod context;
pub mod commit;         // Transactional apply
pub mod identity;       // Identity Reconciler
pub mod enrollment;     // Enrollment Reconciler
pub mod outcome;
pub mod dispatch;       // Worker pool + phases
pub mod config;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use row::{load_rows, ChangeRow};
pub use dates::{OPEN_END, OPEN_START};
pub use schema::setup_database;
pub use store::{
    EnrollmentKey, EnrollmentRecord, IdentityRecord,
    SqliteStore, Store, StoreTx,
};
pub use error::{ReconcileError, StoreError};
pub use cache::{LookupCache, MissingRef, RefKind};
pub use locks::{LockRegistry, ScopedLock};
pub use context::{RunContext, UpdateCounts};
pub use identity::reconcile_identity;
pub use enrollment::reconcile_enrollment;
pub use outcome::{Outcome, Tally, Warning};
pub use dispatch::{Dispatcher, Phase, PhaseReport, PhaseState, RunReport};
pub use config::{host_parallelism, resolve_workers, ConfigError, RunConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

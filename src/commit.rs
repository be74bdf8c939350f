// Transactional apply - one primary write plus both dependent touches
//
// The three statements commit together or not at all. A uniqueness violation
// on the primary write is a collision (no-op); a write that affects no row
// rolls everything back with a warning.

use rusqlite::types::Value;
use tracing::{debug, warn};

use crate::context::{PrimaryKind, RunContext};
use crate::error::{ReconcileError, RowContext, StoreError};
use crate::outcome::{Outcome, Warning};
use crate::row::ChangeRow;
use crate::sql::{Stamp, Statement, Update};
use crate::store::{Store, StoreTx};

/// The two record kinds stamped after every primary mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentKind {
    UIdentities,
    Profiles,
}

impl DependentKind {
    pub const ALL: [DependentKind; 2] = [DependentKind::UIdentities, DependentKind::Profiles];

    pub fn table(self) -> &'static str {
        match self {
            DependentKind::UIdentities => "uidentities",
            DependentKind::Profiles => "profiles",
        }
    }

    fn touch(self, stamp: &Stamp, merged_id: &str) -> Statement {
        Update::new(self.table()).finish(stamp, "uuid", Value::Text(merged_id.to_string()))
    }
}

/// A primary write ready to be applied.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub kind: PrimaryKind,
    pub statement: Statement,
    /// Key recorded in the updated-set. `None` for inserts: the generated id is used.
    pub key: Option<String>,
    pub merged_id: String,
    pub stamp: Stamp,
    /// Human-readable description used in log lines.
    pub summary: String,
}

/// Apply a mutation in its own transaction.
pub fn apply(
    ctx: &RunContext,
    store: &dyn Store,
    mutation: &Mutation,
    row: &ChangeRow,
) -> Result<Outcome, ReconcileError> {
    let mut tx = store
        .begin()
        .for_row(row, "error starting transaction")?;

    let primary = match tx.execute(&mutation.statement) {
        Ok(n) => n,
        Err(StoreError::UniqueViolation(reason)) => {
            debug!("{}: collision ({})", mutation.summary, reason);
            rollback(tx, mutation, row)?;
            return Ok(Outcome::Collision);
        }
        Err(e) => {
            debug!("rollback {}", mutation.summary);
            let context = format!("error writing {}", mutation.kind.table());
            // Report the write error, not a rollback error
            let _ = tx.rollback();
            return Err(e).for_row(row, &context);
        }
    };
    let key = match &mutation.key {
        Some(key) => key.clone(),
        None => tx.last_insert_id().to_string(),
    };
    if primary == 0 || ctx.config.debug {
        debug!(
            "{}: affected {} {} rows",
            mutation.summary,
            primary,
            mutation.kind.table()
        );
    }

    let mut touched = [0usize; 2];
    for (i, dependent) in DependentKind::ALL.into_iter().enumerate() {
        touched[i] = match tx.execute(&dependent.touch(&mutation.stamp, &mutation.merged_id)) {
            Ok(n) => n,
            Err(e) => {
                debug!("rollback {}", mutation.summary);
                let context = format!(
                    "error updating {} for uuid {}",
                    dependent.table(),
                    mutation.merged_id
                );
                let _ = tx.rollback();
                return Err(e).for_row(row, &context);
            }
        };
    }

    if primary == 0 || touched.contains(&0) {
        let warning = Warning::PartialEffect {
            primary,
            uidentities: touched[0],
            profiles: touched[1],
        };
        warn!(
            "{}: didn't affect {} or uidentities or profiles: ({},{},{})",
            mutation.summary,
            mutation.kind.table(),
            primary,
            touched[0],
            touched[1]
        );
        rollback(tx, mutation, row)?;
        return Ok(Outcome::Warning(warning));
    }

    tx.commit().for_row(row, "error committing transaction")?;
    ctx.record_update(mutation.kind, &key, &mutation.merged_id);
    debug!("{}: committed", mutation.summary);

    Ok(Outcome::Applied)
}

fn rollback(
    tx: Box<dyn StoreTx + '_>,
    mutation: &Mutation,
    row: &ChangeRow,
) -> Result<(), ReconcileError> {
    debug!("rollback {}", mutation.summary);
    tx.rollback().for_row(row, "error rolling back transaction")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::sql::text;
    use crate::test_support::{
        dependent_stamps, seed_identity, seeded_store, Fault, FaultyStore,
    };

    fn rename(id: &str, merged_id: &str, name: &str) -> Mutation {
        let stamp = Stamp::now("email:ops@x.com,sfid:S1");
        let mut update = Update::new("identities");
        update.set("name", text(name));
        Mutation {
            kind: PrimaryKind::Identity,
            statement: update.finish(&stamp, "id", text(id)),
            key: Some(id.to_string()),
            merged_id: merged_id.to_string(),
            stamp,
            summary: format!("identity_id {}/{}", id, merged_id),
        }
    }

    #[test]
    fn test_applies_all_three_writes() {
        let store = seeded_store();
        let merged = seed_identity(&store, "42", "Jane", "jx", "jane@x.com", "github");
        let ctx = RunContext::new(RunConfig::default());

        let outcome = apply(&ctx, &store, &rename("42", &merged, "Jane X"), &ChangeRow::new())
            .unwrap();

        assert_eq!(outcome, Outcome::Applied);
        assert_eq!(store.identity("42").unwrap().unwrap().name, "Jane X");
        let (uid_by, profile_by) = dependent_stamps(&store, &merged);
        assert_eq!(uid_by.as_deref(), Some("email:ops@x.com,sfid:S1"));
        assert_eq!(profile_by.as_deref(), Some("email:ops@x.com,sfid:S1"));
        assert_eq!(ctx.update_counts().identities, 1);
    }

    #[test]
    fn test_missing_dependent_rolls_back() {
        let store = seeded_store();
        let merged = seed_identity(&store, "42", "Jane", "jx", "jane@x.com", "github");
        store
            .connection()
            .execute("DELETE FROM profiles WHERE uuid = ?1", [&merged])
            .unwrap();
        let ctx = RunContext::new(RunConfig::default());

        let outcome = apply(&ctx, &store, &rename("42", &merged, "Jane X"), &ChangeRow::new())
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Warning(Warning::PartialEffect {
                primary: 1,
                uidentities: 1,
                profiles: 0
            })
        );
        assert_eq!(store.identity("42").unwrap().unwrap().name, "Jane");
        assert_eq!(dependent_stamps(&store, &merged).0, None);
        assert_eq!(ctx.update_counts().identities, 0);
    }

    #[test]
    fn test_fault_between_writes_leaves_nothing() {
        let store = FaultyStore::new(seeded_store(), Fault::StoreErrorAt(2));
        let merged = seed_identity(store.inner(), "42", "Jane", "jx", "jane@x.com", "github");
        let ctx = RunContext::new(RunConfig::default());

        let err = apply(&ctx, &store, &rename("42", &merged, "Jane X"), &ChangeRow::new())
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Store { .. }));
        assert_eq!(store.inner().identity("42").unwrap().unwrap().name, "Jane");
        assert_eq!(dependent_stamps(store.inner(), &merged), (None, None));
    }

    #[test]
    fn test_injected_collision_is_noop() {
        let store = FaultyStore::new(seeded_store(), Fault::CollisionAt(1));
        let merged = seed_identity(store.inner(), "42", "Jane", "jx", "jane@x.com", "github");
        let ctx = RunContext::new(RunConfig::default());

        let outcome = apply(&ctx, &store, &rename("42", &merged, "Jane X"), &ChangeRow::new())
            .unwrap();

        assert_eq!(outcome, Outcome::Collision);
        assert_eq!(store.inner().identity("42").unwrap().unwrap().name, "Jane");
    }
}

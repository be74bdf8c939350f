// Identity Reconciler - minimal diff update of one identity
//
// Columns: identity_id (required), identity_name, identity_username,
// identity_email, identity_source, user_sfid, user_email.

use tracing::{debug, info, warn};

use crate::commit::{self, Mutation};
use crate::context::{PrimaryKind, RunContext};
use crate::error::{ReconcileError, RowContext, StoreError};
use crate::locks::ScopedLock;
use crate::outcome::{Outcome, Warning};
use crate::row::ChangeRow;
use crate::sql::{describe, text, FieldChange, Stamp, Update};
use crate::store::{IdentityRecord, Store};

/// Values an identity row asks for, trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IdentityTarget<'a> {
    name: &'a str,
    username: &'a str,
    email: &'a str,
    source: &'a str,
}

impl<'a> IdentityTarget<'a> {
    fn from_row(row: &'a ChangeRow) -> Self {
        Self {
            name: row.trimmed("identity_name"),
            username: row.trimmed("identity_username"),
            email: row.trimmed("identity_email"),
            source: row.trimmed("identity_source"),
        }
    }

    fn diff(&self, current: &IdentityRecord) -> Vec<FieldChange> {
        [
            ("name", current.name.as_str(), self.name),
            ("username", current.username.as_str(), self.username),
            ("email", current.email.as_str(), self.email),
        ]
        .into_iter()
        .filter(|(_, before, after)| before != after)
        .map(|(column, before, after)| FieldChange::text(column, before, after))
        .collect()
    }
}

/// Read an identity and lock it together with its merged id.
///
/// The record is re-read once the locks are held. If it moved to another
/// merged id in between, the locks are swapped for the new one.
pub(crate) fn lock_identity(
    ctx: &RunContext,
    store: &dyn Store,
    id: &str,
    merged_id: &str,
) -> Result<Option<(ScopedLock, IdentityRecord)>, StoreError> {
    let mut merged_id = merged_id.to_string();
    loop {
        let lock = ctx.locks.acquire(id, &merged_id);
        match store.identity(id)? {
            None => return Ok(None),
            Some(fresh) if fresh.merged_id == merged_id => return Ok(Some((lock, fresh))),
            Some(fresh) => {
                debug!(
                    "identity_id {} moved {} -> {} while waiting for lock",
                    id, merged_id, fresh.merged_id
                );
                drop(lock);
                merged_id = fresh.merged_id;
            }
        }
    }
}

/// Apply one identity correction row.
pub fn reconcile_identity(
    ctx: &RunContext,
    store: &dyn Store,
    row: &ChangeRow,
) -> Result<Outcome, ReconcileError> {
    debug!("{}", row);

    let id = row.trimmed("identity_id");
    if id.is_empty() {
        return Err(ReconcileError::input(row, "identity_id cannot be empty"));
    }

    let Some(current) = store.identity(id).for_row(row, "error reading identity")? else {
        warn!("cannot find identity with id={} (row {})", id, row);
        return Ok(Outcome::Warning(Warning::IdentityNotFound));
    };
    debug!(
        "Found: ({},{},{},{},{}) for id {}",
        current.merged_id, current.name, current.username, current.email, current.source, id
    );

    let target = IdentityTarget::from_row(row);
    if current.source != target.source {
        return Err(ReconcileError::input(
            row,
            format!(
                "identity_id {}/{} updating source is not supported, attempted {} -> {}",
                id, current.merged_id, current.source, target.source
            ),
        ));
    }

    if target.diff(&current).is_empty() {
        debug!(
            "identity_id {}/{} ({},{},{}) nothing changed",
            id, current.merged_id, current.name, current.username, current.email
        );
        return Ok(Outcome::NoChange);
    }

    let Some((_lock, fresh)) =
        lock_identity(ctx, store, id, &current.merged_id).for_row(row, "error reading identity")?
    else {
        warn!("identity with id={} disappeared (row {})", id, row);
        return Ok(Outcome::Warning(Warning::IdentityNotFound));
    };

    // Diff again: a row holding the lock before us may have moved the record
    let changes = target.diff(&fresh);
    if changes.is_empty() {
        debug!("identity_id {}/{} already up to date", id, fresh.merged_id);
        return Ok(Outcome::NoChange);
    }

    let who = format!(
        "email:{},sfid:{}",
        row.trimmed("user_email"),
        row.trimmed("user_sfid")
    );
    let stamp = Stamp::now(who.as_str());
    let statement = Update::with_changes(PrimaryKind::Identity.table(), &changes).finish(
        &stamp,
        "id",
        text(id),
    );
    let mutation = Mutation {
        kind: PrimaryKind::Identity,
        statement,
        key: Some(id.to_string()),
        merged_id: fresh.merged_id.clone(),
        stamp,
        summary: format!(
            "identity_id {}/{} {} by {}",
            id,
            fresh.merged_id,
            describe(&changes),
            who
        ),
    };

    if ctx.config.dry_run {
        info!("{}", mutation.summary);
        debug!("{}", mutation.statement);
        return Ok(Outcome::DryRun);
    }

    commit::apply(ctx, store, &mutation, row)
}

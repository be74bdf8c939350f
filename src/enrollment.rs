// Enrollment Reconciler - move, re-date or create one affiliation
//
// Columns: identity_id, user_sfid, user_name, user_email, project_slug,
// to_org_name (required), to_start_date, to_end_date, and from_org_name,
// from_start_date, from_end_date locating the enrollment to change.
//
// Without from_org_name the row inserts a new enrollment. An identical
// enrollment that already exists is reported by the store as a collision.

use chrono::NaiveDate;
use rusqlite::types::Value;
use tracing::{debug, info, warn};

use crate::commit::{self, Mutation};
use crate::context::{PrimaryKind, RunContext};
use crate::dates;
use crate::error::{ReconcileError, RowContext};
use crate::identity::lock_identity;
use crate::outcome::{Outcome, Warning};
use crate::row::ChangeRow;
use crate::sql::{self, describe, FieldChange, Stamp, Statement, Update, LOCKED_BY};
use crate::store::{EnrollmentKey, EnrollmentRecord, Store};

/// Organization and range the row wants the enrollment to have.
#[derive(Debug, Clone)]
struct EnrollmentTarget<'a> {
    org_name: &'a str,
    organization_id: i64,
    start: NaiveDate,
    end: NaiveDate,
}

impl EnrollmentTarget<'_> {
    fn diff(&self, current: &EnrollmentRecord, current_org_name: &str) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        if current.organization_id != self.organization_id {
            changes.push(FieldChange {
                column: "organization_id",
                before: format!("{}/{}", current_org_name, current.organization_id),
                after: format!("{}/{}", self.org_name, self.organization_id),
                value: Value::Integer(self.organization_id),
            });
        }
        for (column, before, after) in [
            ("start", current.start, self.start),
            ("end", current.end, self.end),
        ] {
            if before != after {
                changes.push(FieldChange {
                    column,
                    before: before.to_string(),
                    after: after.to_string(),
                    value: sql::date(after),
                });
            }
        }
        changes
    }
}

/// The single enrollment named by `key`, or the warning explaining why not.
fn match_one(
    store: &dyn Store,
    key: &EnrollmentKey,
    org_name: &str,
    row: &ChangeRow,
) -> Result<Result<EnrollmentRecord, Warning>, ReconcileError> {
    let mut found = store
        .find_enrollments(key, 2)
        .for_row(row, "error reading enrollments")?;
    match found.len() {
        1 => Ok(Ok(found.remove(0))),
        0 => {
            warn!(
                "cannot find enrollment with uuid={} project_slug={} organization={}/{} start={} end={} (row {})",
                key.merged_id, key.project_slug, org_name, key.organization_id, key.start, key.end, row
            );
            Ok(Err(Warning::NoMatchingEnrollment))
        }
        _ => {
            warn!(
                "found more than one enrollment with uuid={} project_slug={} organization={}/{} start={} end={} (row {})",
                key.merged_id, key.project_slug, org_name, key.organization_id, key.start, key.end, row
            );
            Ok(Err(Warning::AmbiguousEnrollment))
        }
    }
}

fn parse_date(
    row: &ChangeRow,
    column: &str,
    open: fn(&str) -> Result<NaiveDate, dates::DateParseError>,
    id: &str,
    merged_id: &str,
) -> Result<NaiveDate, ReconcileError> {
    open(row.get(column)).map_err(|e| {
        ReconcileError::input(row, format!("identity_id {}/{} {} ({})", id, merged_id, e, column))
    })
}

/// Apply one affiliation correction row.
pub fn reconcile_enrollment(
    ctx: &RunContext,
    store: &dyn Store,
    row: &ChangeRow,
) -> Result<Outcome, ReconcileError> {
    debug!("{}", row);

    let id = row.trimmed("identity_id");
    if id.is_empty() {
        return Err(ReconcileError::input(row, "identity_id cannot be empty"));
    }

    let Some(identity) = store.identity(id).for_row(row, "error reading identity")? else {
        warn!("cannot find identity with id={} (row {})", id, row);
        return Ok(Outcome::Warning(Warning::IdentityNotFound));
    };
    let merged_id = identity.merged_id;
    debug!("Found: uuid {} for id {}", merged_id, id);

    let from_org = row.trimmed("from_org_name");
    let from_start = parse_date(row, "from_start_date", dates::parse_start, id, &merged_id)?;
    let from_end = parse_date(row, "from_end_date", dates::parse_end, id, &merged_id)?;

    let to_org = row.trimmed("to_org_name");
    if to_org.is_empty() {
        return Err(ReconcileError::input(
            row,
            format!("identity_id {}/{} to_org_name cannot be empty", id, merged_id),
        ));
    }
    let to_start = parse_date(row, "to_start_date", dates::parse_start, id, &merged_id)?;
    let to_end = parse_date(row, "to_end_date", dates::parse_end, id, &merged_id)?;

    // Unknown references are expected noise: the cache reports each once
    let external_slug = row.trimmed("project_slug");
    let project_slug = if external_slug.is_empty() {
        String::new()
    } else {
        match ctx
            .cache
            .internal_slug(store, external_slug)
            .for_row(row, "error resolving project slug")?
        {
            Some(slug) => slug,
            None => {
                debug!("identity_id {}/{} unknown project slug {}", id, merged_id, external_slug);
                return Ok(Outcome::Warning(Warning::UnresolvedReference));
            }
        }
    };

    let from_org_id = if from_org.is_empty() {
        None
    } else {
        match ctx
            .cache
            .organization_id(store, from_org)
            .for_row(row, "error resolving organization")?
        {
            Some(org_id) => Some(org_id),
            None => {
                debug!("identity_id {}/{} unknown organization {}", id, merged_id, from_org);
                return Ok(Outcome::Warning(Warning::UnresolvedReference));
            }
        }
    };

    let Some(to_org_id) = ctx
        .cache
        .organization_id(store, to_org)
        .for_row(row, "error resolving organization")?
    else {
        debug!("identity_id {}/{} unknown organization {}", id, merged_id, to_org);
        return Ok(Outcome::Warning(Warning::UnresolvedReference));
    };

    let target = EnrollmentTarget {
        org_name: to_org,
        organization_id: to_org_id,
        start: to_start,
        end: to_end,
    };
    let match_key = |merged_id: &str, organization_id: i64| EnrollmentKey {
        merged_id: merged_id.to_string(),
        project_slug: project_slug.clone(),
        organization_id,
        start: from_start,
        end: from_end,
    };

    // Update mode: the from_* columns must name exactly one enrollment
    match from_org_id {
        Some(org_id) => {
            let key = match_key(&merged_id, org_id);
            let current = match match_one(store, &key, from_org, row)? {
                Ok(current) => current,
                Err(warning) => return Ok(Outcome::Warning(warning)),
            };
            debug!("Found: ({}) for {:?}", current.id, key);

            let changes = target.diff(&current, from_org);
            if changes.is_empty() {
                debug!(
                    "enrollment {} for identity_id {}/{} nothing changed",
                    current.id, id, merged_id
                );
                return Ok(Outcome::NoChange);
            }
        }
        None => debug!("identity {}/{} insert mode", id, merged_id),
    }

    let Some((_lock, fresh)) =
        lock_identity(ctx, store, id, &merged_id).for_row(row, "error reading identity")?
    else {
        warn!("identity with id={} disappeared (row {})", id, row);
        return Ok(Outcome::Warning(Warning::IdentityNotFound));
    };
    let merged_id = fresh.merged_id;

    let who = format!(
        "email:{},name:{},sfid:{}",
        row.trimmed("user_email"),
        row.trimmed("user_name"),
        row.trimmed("user_sfid")
    );
    let stamp = Stamp::now(who.as_str());

    let mutation = match from_org_id {
        Some(org_id) => {
            // Re-match under the lock; another row may have moved it meanwhile
            let key = match_key(&merged_id, org_id);
            let current = match match_one(store, &key, from_org, row)? {
                Ok(current) => current,
                Err(warning) => return Ok(Outcome::Warning(warning)),
            };
            let changes = target.diff(&current, from_org);
            if changes.is_empty() {
                debug!("enrollment {} already up to date", current.id);
                return Ok(Outcome::NoChange);
            }

            let statement = Update::with_changes(PrimaryKind::Enrollment.table(), &changes)
                .finish(&stamp, "id", Value::Integer(current.id));
            Mutation {
                kind: PrimaryKind::Enrollment,
                statement,
                key: Some(current.id.to_string()),
                merged_id: merged_id.clone(),
                stamp,
                summary: format!(
                    "enrollment {} identity_id {}/{} {} by {}",
                    current.id,
                    id,
                    merged_id,
                    describe(&changes),
                    who
                ),
            }
        }
        None => {
            let statement = Statement::new(
                "insert into enrollments(uuid, organization_id, project_slug, \"start\", \"end\", \
                 last_modified, last_modified_by, locked_by) values(?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    sql::text(merged_id.as_str()),
                    Value::Integer(to_org_id),
                    sql::text_or_null(&project_slug),
                    sql::date(to_start),
                    sql::date(to_end),
                    sql::text(stamp.modified_at.as_str()),
                    sql::text(stamp.modified_by.as_str()),
                    sql::text(LOCKED_BY),
                ],
            );
            Mutation {
                kind: PrimaryKind::Enrollment,
                statement,
                key: None,
                merged_id: merged_id.clone(),
                stamp,
                summary: format!(
                    "new enrollment identity_id {}/{} {}/{} {} {} {} by {}",
                    id, merged_id, to_org, to_org_id, project_slug, to_start, to_end, who
                ),
            }
        }
    };

    if ctx.config.dry_run {
        info!("{}", mutation.summary);
        debug!("{}", mutation.statement);
        return Ok(Outcome::DryRun);
    }

    commit::apply(ctx, store, &mutation, row)
}

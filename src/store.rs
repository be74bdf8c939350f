// Store access - the reads the reconcilers need, plus transactional writes
//
// Reconcilers only see the `Store`/`StoreTx` traits. `SqliteStore` is the
// production implementation: one connection behind a mutex, a transaction
// owns the guard from BEGIN until COMMIT/ROLLBACK.

use chrono::NaiveDate;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{error, info};

use crate::error::StoreError;
use crate::sql::Statement;

/// Log target for generated statements.
pub const SQL_TARGET: &str = "affiliations_import::sql";

// ============================================================================
// RECORDS
// ============================================================================

/// Current state of an identity, with text columns trimmed and NULL read as "".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: String,
    pub merged_id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRecord {
    pub id: i64,
    pub merged_id: String,
    pub organization_id: i64,
    pub project_slug: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Composite key locating an existing enrollment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentKey {
    pub merged_id: String,
    /// Internal slug, "" when the row names no project.
    pub project_slug: String,
    pub organization_id: i64,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

// ============================================================================
// TRAITS
// ============================================================================

/// Authoritative store. Must be usable from several workers at once; each
/// transaction is independent.
pub trait Store: Sync {
    fn identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError>;

    fn organization_id(&self, name: &str) -> Result<Option<i64>, StoreError>;

    fn internal_slug(&self, external_slug: &str) -> Result<Option<String>, StoreError>;

    /// Enrollments matching `key`, at most `limit` of them.
    fn find_enrollments(
        &self,
        key: &EnrollmentKey,
        limit: usize,
    ) -> Result<Vec<EnrollmentRecord>, StoreError>;

    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError>;
}

/// An open transaction. Dropping it without `commit` rolls back.
pub trait StoreTx {
    /// Execute a write, returning the number of affected rows.
    fn execute(&mut self, stmt: &Statement) -> Result<usize, StoreError>;

    /// Row id generated by the last successful insert.
    fn last_insert_id(&self) -> i64;

    fn commit(self: Box<Self>) -> Result<(), StoreError>;

    fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

// ============================================================================
// SQLITE
// ============================================================================

pub struct SqliteStore {
    conn: Mutex<Connection>,
    trace_statements: bool,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            trace_statements: false,
        }
    }

    /// Log every generated statement.
    pub fn with_statement_trace(mut self, enabled: bool) -> Self {
        self.trace_statements = enabled;
        self
    }

    /// Direct access to the connection, e.g. for setup or inspection.
    /// Blocks while a transaction is open.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn trace(&self, sql: &str, args: &dyn std::fmt::Debug) {
        if self.trace_statements {
            info!(target: SQL_TARGET, "{} {:?}", sql, args);
        }
    }
}

impl Store for SqliteStore {
    fn identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let sql = "select uuid, trim(coalesce(name, '')), trim(coalesce(username, '')),
                          trim(coalesce(email, '')), trim(source)
                   from identities where id = ?1";
        self.trace(sql, &[id]);

        let conn = self.conn.lock();
        let record = conn
            .query_row(sql, params![id], |row| {
                Ok(IdentityRecord {
                    id: id.to_string(),
                    merged_id: row.get(0)?,
                    name: row.get(1)?,
                    username: row.get(2)?,
                    email: row.get(3)?,
                    source: row.get(4)?,
                })
            })
            .optional()?;
        Ok(record)
    }

    fn organization_id(&self, name: &str) -> Result<Option<i64>, StoreError> {
        let sql = "select id from organizations where name = ?1";
        self.trace(sql, &[name]);

        let conn = self.conn.lock();
        let id = conn
            .query_row(sql, params![name], |row| row.get(0))
            .optional()?;
        Ok(id)
    }

    fn internal_slug(&self, external_slug: &str) -> Result<Option<String>, StoreError> {
        let sql = "select da_name from slug_mapping where sf_name = ?1";
        self.trace(sql, &[external_slug]);

        let conn = self.conn.lock();
        let slug = conn
            .query_row(sql, params![external_slug], |row| row.get(0))
            .optional()?;
        Ok(slug)
    }

    fn find_enrollments(
        &self,
        key: &EnrollmentKey,
        limit: usize,
    ) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let sql = "select id, uuid, organization_id, trim(coalesce(project_slug, '')), \"start\", \"end\"
                   from enrollments
                   where uuid = ?1 and trim(coalesce(project_slug, '')) = ?2
                     and organization_id = ?3 and \"start\" = ?4 and \"end\" = ?5
                   order by id
                   limit ?6";
        self.trace(sql, key);

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(
                params![
                    key.merged_id,
                    key.project_slug,
                    key.organization_id,
                    key.start,
                    key.end,
                    limit as i64,
                ],
                |row| {
                    Ok(EnrollmentRecord {
                        id: row.get(0)?,
                        merged_id: row.get(1)?,
                        organization_id: row.get(2)?,
                        project_slug: row.get(3)?,
                        start: row.get(4)?,
                        end: row.get(5)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTx {
            conn,
            trace_statements: self.trace_statements,
            open: true,
        }))
    }
}

struct SqliteTx<'a> {
    conn: MutexGuard<'a, Connection>,
    trace_statements: bool,
    open: bool,
}

impl StoreTx for SqliteTx<'_> {
    fn execute(&mut self, stmt: &Statement) -> Result<usize, StoreError> {
        if self.trace_statements {
            info!(target: SQL_TARGET, "{}", stmt);
        }
        self.conn
            .execute(&stmt.sql, params_from_iter(stmt.params.iter()))
            .map_err(|e| {
                let err = StoreError::from(e);
                if !err.is_collision() {
                    error!(target: SQL_TARGET, "{} failed: {}", stmt, err);
                }
                err
            })
    }

    fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.open = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteTx<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

// Fixtures shared by the unit tests: an in-memory store with reference data,
// row builders, and store wrappers that count lookups or inject faults.

use rusqlite::{params, Connection};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::StoreError;
use crate::row::ChangeRow;
use crate::schema::setup_database;
use crate::sql::Statement;
use crate::store::{EnrollmentKey, EnrollmentRecord, IdentityRecord, SqliteStore, Store, StoreTx};

/// Empty schema plus organizations `Acme`, `Beta` and one slug mapping.
pub fn seeded_store() -> SqliteStore {
    let conn = Connection::open_in_memory().expect("in-memory database");
    setup_database(&conn).expect("schema");
    conn.execute_batch(
        "INSERT INTO organizations(name) VALUES ('Acme'), ('Beta');
         INSERT INTO slug_mapping(sf_name, da_name) VALUES ('sf-kubernetes', 'cncf/kubernetes');",
    )
    .expect("reference data");
    SqliteStore::new(conn)
}

/// New person with one identity; returns the merged identifier.
pub fn seed_identity(
    store: &SqliteStore,
    id: &str,
    name: &str,
    username: &str,
    email: &str,
    source: &str,
) -> String {
    let merged = uuid::Uuid::new_v4().to_string();
    {
        let conn = store.connection();
        conn.execute("INSERT INTO uidentities(uuid) VALUES (?1)", params![merged])
            .expect("uidentity");
        conn.execute(
            "INSERT INTO profiles(uuid, name, email) VALUES (?1, ?2, ?3)",
            params![merged, name, email],
        )
        .expect("profile");
    }
    seed_identity_in(store, id, &merged, name, username, email, source);
    merged
}

/// Extra identity for an existing person.
pub fn seed_identity_in(
    store: &SqliteStore,
    id: &str,
    merged: &str,
    name: &str,
    username: &str,
    email: &str,
    source: &str,
) {
    store
        .connection()
        .execute(
            "INSERT INTO identities(id, uuid, name, username, email, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, merged, name, username, email, source],
        )
        .expect("identity");
}

pub fn seed_enrollment(
    store: &SqliteStore,
    merged: &str,
    org_name: &str,
    project_slug: &str,
    start: &str,
    end: &str,
) {
    let slug = (!project_slug.is_empty()).then_some(project_slug);
    store
        .connection()
        .execute(
            "INSERT INTO enrollments(uuid, organization_id, project_slug, \"start\", \"end\")
             SELECT ?1, id, ?3, ?4, ?5 FROM organizations WHERE name = ?2",
            params![merged, org_name, slug, start, end],
        )
        .expect("enrollment");
}

pub fn enrollments_of(store: &SqliteStore, merged: &str) -> Vec<EnrollmentRecord> {
    let conn = store.connection();
    let mut stmt = conn
        .prepare(
            "SELECT id, uuid, organization_id, coalesce(project_slug, ''), \"start\", \"end\"
             FROM enrollments WHERE uuid = ?1 ORDER BY id",
        )
        .expect("prepare");
    let rows = stmt
        .query_map(params![merged], |row| {
            Ok(EnrollmentRecord {
                id: row.get(0)?,
                merged_id: row.get(1)?,
                organization_id: row.get(2)?,
                project_slug: row.get(3)?,
                start: row.get(4)?,
                end: row.get(5)?,
            })
        })
        .expect("query")
        .collect::<Result<Vec<_>, _>>()
        .expect("rows");
    rows
}

/// `last_modified_by` of the uidentity and the profile.
pub fn dependent_stamps(store: &SqliteStore, merged: &str) -> (Option<String>, Option<String>) {
    let conn = store.connection();
    let stamp = |table: &str| -> Option<String> {
        conn.query_row(
            &format!("SELECT last_modified_by FROM {} WHERE uuid = ?1", table),
            params![merged],
            |row| row.get(0),
        )
        .expect("stamp")
    };
    (stamp("uidentities"), stamp("profiles"))
}

pub fn identity_row(id: &str, name: &str, username: &str, email: &str, source: &str) -> ChangeRow {
    [
        ("action", "update"),
        ("identity_id", id),
        ("identity_name", name),
        ("identity_username", username),
        ("identity_email", email),
        ("identity_source", source),
        ("user_sfid", "SF1"),
        ("user_email", "ops@x.com"),
    ]
    .into_iter()
    .collect()
}

#[allow(clippy::too_many_arguments)]
pub fn enrollment_row(
    id: &str,
    project_slug: &str,
    to_org: &str,
    to_start: &str,
    to_end: &str,
    from_org: &str,
    from_start: &str,
    from_end: &str,
) -> ChangeRow {
    [
        ("action", "update"),
        ("identity_id", id),
        ("user_sfid", "SF1"),
        ("user_name", "Ops"),
        ("user_email", "ops@x.com"),
        ("project_slug", project_slug),
        ("to_org_name", to_org),
        ("to_start_date", to_start),
        ("to_end_date", to_end),
        ("from_org_name", from_org),
        ("from_start_date", from_start),
        ("from_end_date", from_end),
    ]
    .into_iter()
    .collect()
}

// ============================================================================
// STORE WRAPPERS
// ============================================================================

/// Counts organization and slug lookups reaching the store.
pub struct CountingStore {
    inner: SqliteStore,
    lookups: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: SqliteStore) -> Self {
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Store for CountingStore {
    fn identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.inner.identity(id)
    }

    fn organization_id(&self, name: &str) -> Result<Option<i64>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.organization_id(name)
    }

    fn internal_slug(&self, external_slug: &str) -> Result<Option<String>, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.internal_slug(external_slug)
    }

    fn find_enrollments(
        &self,
        key: &EnrollmentKey,
        limit: usize,
    ) -> Result<Vec<EnrollmentRecord>, StoreError> {
        self.inner.find_enrollments(key, limit)
    }

    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        self.inner.begin()
    }
}

/// Which write (1-based, counted across the store's lifetime) fails, and how.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    StoreErrorAt(usize),
    CollisionAt(usize),
}

pub struct FaultyStore {
    inner: SqliteStore,
    fault: Fault,
    executed: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: SqliteStore, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            executed: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &SqliteStore {
        &self.inner
    }
}

impl Store for FaultyStore {
    fn identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        self.inner.identity(id)
    }

    fn organization_id(&self, name: &str) -> Result<Option<i64>, StoreError> {
        self.inner.organization_id(name)
    }

    fn internal_slug(&self, external_slug: &str) -> Result<Option<String>, StoreError> {
        self.inner.internal_slug(external_slug)
    }

    fn find_enrollments(
        &self,
        key: &EnrollmentKey,
        limit: usize,
    ) -> Result<Vec<EnrollmentRecord>, StoreError> {
        self.inner.find_enrollments(key, limit)
    }

    fn begin(&self) -> Result<Box<dyn StoreTx + '_>, StoreError> {
        Ok(Box::new(FaultyTx {
            inner: self.inner.begin()?,
            fault: self.fault,
            executed: &self.executed,
        }))
    }
}

struct FaultyTx<'a> {
    inner: Box<dyn StoreTx + 'a>,
    fault: Fault,
    executed: &'a AtomicUsize,
}

impl StoreTx for FaultyTx<'_> {
    fn execute(&mut self, stmt: &Statement) -> Result<usize, StoreError> {
        let n = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fault {
            Fault::StoreErrorAt(at) if at == n => {
                Err(StoreError::Sqlite(rusqlite::Error::InvalidQuery))
            }
            Fault::CollisionAt(at) if at == n => {
                Err(StoreError::UniqueViolation("injected".to_string()))
            }
            _ => self.inner.execute(stmt),
        }
    }

    fn last_insert_id(&self) -> i64 {
        self.inner.last_insert_id()
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit()
    }

    fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.rollback()
    }
}

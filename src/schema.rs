// Store schema
//
// Only the columns the reconcilers read or write. The unique indexes are what
// turns a concurrent duplicate correction into a collision.

use anyhow::Result;
use rusqlite::Connection;

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery (no-op for in-memory databases)
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Reference data (read-only for the importer)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS organizations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS slug_mapping (
            sf_name TEXT PRIMARY KEY,
            da_name TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Dependent records (touched to propagate the modification stamp)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS uidentities (
            uuid TEXT PRIMARY KEY,
            last_modified TEXT,
            last_modified_by TEXT,
            locked_by TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles (
            uuid TEXT PRIMARY KEY REFERENCES uidentities(uuid),
            name TEXT,
            email TEXT,
            last_modified TEXT,
            last_modified_by TEXT,
            locked_by TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Primary records
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS identities (
            id TEXT PRIMARY KEY,
            uuid TEXT NOT NULL REFERENCES uidentities(uuid),
            name TEXT,
            email TEXT,
            username TEXT,
            source TEXT NOT NULL,
            last_modified TEXT,
            last_modified_by TEXT,
            locked_by TEXT,
            UNIQUE (source, name, email, username)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL REFERENCES uidentities(uuid),
            organization_id INTEGER NOT NULL REFERENCES organizations(id),
            project_slug TEXT,
            \"start\" TEXT NOT NULL,
            \"end\" TEXT NOT NULL,
            last_modified TEXT,
            last_modified_by TEXT,
            locked_by TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_enrollments_period
            ON enrollments(uuid, organization_id, ifnull(project_slug, ''), \"start\", \"end\")",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_identities_uuid ON identities(uuid)",
        [],
    )?;

    Ok(())
}

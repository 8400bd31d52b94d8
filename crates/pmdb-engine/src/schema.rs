//! DDL for the storage schema (§4.A). Idempotent: safe to run against an
//! already-initialized database file.

use pmdb_core::Result;
use rusqlite::Connection;

/// Bumped whenever the DDL below changes shape. Not used for migrations yet
/// (this revision ships a single schema generation) but gives a later
/// migration path a place to branch from.
pub const SCHEMA_VERSION: i32 = 1;

pub fn init(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS project (
            id              INTEGER PRIMARY KEY,
            slug            TEXT NOT NULL UNIQUE,
            name            TEXT NOT NULL,
            source_url      TEXT,
            default_branch  TEXT NOT NULL DEFAULT 'main',
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS project_file (
            id              INTEGER PRIMARY KEY,
            project_id      INTEGER NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            path            TEXT NOT NULL,
            type_tag        TEXT NOT NULL DEFAULT 'unknown',
            component       TEXT,
            updated_at      INTEGER NOT NULL,
            UNIQUE (project_id, path)
        );

        CREATE TABLE IF NOT EXISTS content_blob (
            content_hash    TEXT PRIMARY KEY,
            text_payload    TEXT,
            binary_payload  BLOB,
            kind            TEXT NOT NULL CHECK (kind IN ('text', 'binary')),
            encoding        TEXT,
            size_bytes      INTEGER NOT NULL,
            first_seen_at   INTEGER NOT NULL,
            reference_count INTEGER NOT NULL DEFAULT 0,
            CHECK ((text_payload IS NULL) != (binary_payload IS NULL))
        );

        CREATE TABLE IF NOT EXISTS file_content (
            file_id         INTEGER NOT NULL REFERENCES project_file(id) ON DELETE CASCADE,
            content_hash    TEXT NOT NULL REFERENCES content_blob(content_hash),
            size_bytes      INTEGER NOT NULL,
            line_count      INTEGER,
            version         INTEGER NOT NULL,
            is_current      INTEGER NOT NULL DEFAULT 0,
            updated_at      INTEGER NOT NULL,
            PRIMARY KEY (file_id, version)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_file_content_current
            ON file_content(file_id)
            WHERE is_current = 1;

        CREATE TABLE IF NOT EXISTS branch (
            id              INTEGER PRIMARY KEY,
            project_id      INTEGER NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            name            TEXT NOT NULL,
            parent_branch   TEXT,
            is_default      INTEGER NOT NULL DEFAULT 0,
            head_commit_id  INTEGER,
            UNIQUE (project_id, name)
        );

        CREATE TABLE IF NOT EXISTS commit_record (
            id              INTEGER PRIMARY KEY,
            project_id      INTEGER NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            branch_id       INTEGER NOT NULL REFERENCES branch(id) ON DELETE CASCADE,
            commit_hash     TEXT NOT NULL UNIQUE,
            parent_commit_id INTEGER REFERENCES commit_record(id),
            author          TEXT NOT NULL,
            message         TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            files_changed   INTEGER NOT NULL DEFAULT 0,
            lines_added     INTEGER NOT NULL DEFAULT 0,
            lines_removed   INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS commit_file (
            commit_id       INTEGER NOT NULL REFERENCES commit_record(id) ON DELETE CASCADE,
            file_id         INTEGER NOT NULL REFERENCES project_file(id),
            path            TEXT NOT NULL,
            change_type     TEXT NOT NULL CHECK (change_type IN ('added', 'modified', 'deleted', 'renamed')),
            old_content_hash TEXT,
            new_content_hash TEXT,
            old_path        TEXT,
            new_path        TEXT,
            lines_added     INTEGER NOT NULL DEFAULT 0,
            lines_removed   INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (commit_id, file_id)
        );

        CREATE TABLE IF NOT EXISTS checkout (
            id              INTEGER PRIMARY KEY,
            project_id      INTEGER NOT NULL REFERENCES project(id) ON DELETE CASCADE,
            path            TEXT NOT NULL,
            branch          TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            last_synced_at  INTEGER NOT NULL,
            active          INTEGER NOT NULL DEFAULT 1,
            UNIQUE (project_id, path)
        );

        CREATE TABLE IF NOT EXISTS checkout_snapshot (
            checkout_id     INTEGER NOT NULL REFERENCES checkout(id) ON DELETE CASCADE,
            file_id         INTEGER NOT NULL REFERENCES project_file(id) ON DELETE CASCADE,
            content_hash    TEXT NOT NULL REFERENCES content_blob(content_hash),
            version         INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            PRIMARY KEY (checkout_id, file_id)
        );

        -- Reference counting (§4.A, §9): triggers keep content_blob.reference_count
        -- in sync with the number of file_content rows pointing at each hash.
        CREATE TRIGGER IF NOT EXISTS trg_file_content_ref_inc
        AFTER INSERT ON file_content
        BEGIN
            UPDATE content_blob SET reference_count = reference_count + 1
            WHERE content_hash = NEW.content_hash;
        END;

        CREATE TRIGGER IF NOT EXISTS trg_file_content_ref_dec
        AFTER DELETE ON file_content
        BEGIN
            UPDATE content_blob SET reference_count = reference_count - 1
            WHERE content_hash = OLD.content_hash;
        END;
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO project_file (project_id, path, updated_at) VALUES (999, 'x', 0)",
            [],
        );
        assert!(err.is_err());
    }
}

//! Safe-query facade (§4.I): every read that can cross a project boundary
//! takes a `project_id` (resolved from a slug at the call's edge) so a
//! locally-unique column — path, branch name — can never resolve to the
//! wrong project's row by accident.

use pmdb_core::{
    BranchId, BranchRow, CheckoutRow, CommitFileRow, CommitRow, Error, EntityKind, FileContentRow,
    FileId, FileListEntry, ProjectDetail, ProjectFileRow, ProjectId, ProjectRow, ProjectSummary,
    Result,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::scanner::glob_match_public;
use crate::time::from_ms;

fn row_to_project(row: &Row) -> rusqlite::Result<ProjectRow> {
    Ok(ProjectRow {
        id: row.get(0)?,
        slug: row.get(1)?,
        name: row.get(2)?,
        source_url: row.get(3)?,
        default_branch: row.get(4)?,
        created_at: from_ms(row.get(5)?),
        updated_at: from_ms(row.get(6)?),
    })
}

const PROJECT_COLUMNS: &str =
    "id, slug, name, source_url, default_branch, created_at, updated_at";

pub fn get_project_by_slug(conn: &Connection, slug: &str) -> Result<ProjectRow> {
    conn.query_row(
        &format!("SELECT {PROJECT_COLUMNS} FROM project WHERE slug = ?1"),
        params![slug],
        row_to_project,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(EntityKind::Project, slug))
}

/// Upserts the project row for `slug`, creating its default branch on first
/// sight. Returns the row as it stands after the upsert.
pub fn ensure_project(
    conn: &Connection,
    slug: &str,
    name: Option<&str>,
    source_url: Option<&str>,
    now_ms: i64,
) -> Result<ProjectRow> {
    let existing = get_project_by_slug(conn, slug).ok();
    let display_name = name.unwrap_or(slug);

    match existing {
        Some(row) => {
            conn.execute(
                "UPDATE project SET name = ?2, source_url = COALESCE(?3, source_url), updated_at = ?4
                 WHERE id = ?1",
                params![row.id, display_name, source_url, now_ms],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO project (slug, name, source_url, default_branch, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'main', ?4, ?4)",
                params![slug, display_name, source_url, now_ms],
            )?;
        }
    }

    let project = get_project_by_slug(conn, slug)?;
    ensure_branch(conn, project.id, &project.default_branch, None, true)?;
    Ok(project)
}

pub fn delete_project(conn: &Connection, slug: &str) -> Result<()> {
    let project = get_project_by_slug(conn, slug)?;
    conn.execute("DELETE FROM project WHERE id = ?1", params![project.id])?;
    Ok(())
}

pub fn list_projects(conn: &Connection) -> Result<Vec<ProjectSummary>> {
    let mut stmt = conn.prepare(
        "SELECT p.slug, p.name,
                COUNT(DISTINCT fc.file_id),
                COALESCE(SUM(fc.size_bytes), 0),
                (SELECT MAX(c.created_at) FROM commit_record c WHERE c.project_id = p.id)
         FROM project p
         LEFT JOIN project_file f ON f.project_id = p.id
         LEFT JOIN file_content fc ON fc.file_id = f.id AND fc.is_current = 1
         GROUP BY p.id
         ORDER BY p.slug",
    )?;
    let rows = stmt.query_map([], |row| {
        let last_commit_ms: Option<i64> = row.get(4)?;
        Ok(ProjectSummary {
            slug: row.get(0)?,
            name: row.get(1)?,
            file_count: row.get(2)?,
            total_bytes: row.get(3)?,
            last_commit_at: last_commit_ms.map(from_ms),
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

pub fn get_project_detail(conn: &Connection, slug: &str) -> Result<ProjectDetail> {
    let project = get_project_by_slug(conn, slug)?;
    let branches = list_branches(conn, project.id)?;
    let (file_count, total_bytes): (u64, i64) = conn.query_row(
        "SELECT COUNT(DISTINCT fc.file_id), COALESCE(SUM(fc.size_bytes), 0)
         FROM project_file f
         JOIN file_content fc ON fc.file_id = f.id AND fc.is_current = 1
         WHERE f.project_id = ?1",
        params![project.id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(ProjectDetail {
        project,
        branches,
        file_count,
        total_bytes: total_bytes as u64,
    })
}

fn row_to_branch(row: &Row) -> rusqlite::Result<BranchRow> {
    Ok(BranchRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        parent_branch: row.get(3)?,
        is_default: row.get::<_, i64>(4)? != 0,
        head_commit_id: row.get(5)?,
    })
}

const BRANCH_COLUMNS: &str = "id, project_id, name, parent_branch, is_default, head_commit_id";

pub fn list_branches(conn: &Connection, project_id: ProjectId) -> Result<Vec<BranchRow>> {
    let mut stmt =
        conn.prepare(&format!("SELECT {BRANCH_COLUMNS} FROM branch WHERE project_id = ?1 ORDER BY name"))?;
    let rows = stmt.query_map(params![project_id], row_to_branch)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

pub fn get_branch(conn: &Connection, project_id: ProjectId, name: &str) -> Result<BranchRow> {
    conn.query_row(
        &format!("SELECT {BRANCH_COLUMNS} FROM branch WHERE project_id = ?1 AND name = ?2"),
        params![project_id, name],
        row_to_branch,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(EntityKind::Branch, name))
}

/// Inserts the branch row if absent; returns the existing or new row.
pub fn ensure_branch(
    conn: &Connection,
    project_id: ProjectId,
    name: &str,
    parent_branch: Option<&str>,
    is_default: bool,
) -> Result<BranchRow> {
    if let Ok(row) = get_branch(conn, project_id, name) {
        return Ok(row);
    }
    conn.execute(
        "INSERT INTO branch (project_id, name, parent_branch, is_default, head_commit_id)
         VALUES (?1, ?2, ?3, ?4, NULL)",
        params![project_id, name, parent_branch, is_default as i64],
    )?;
    get_branch(conn, project_id, name)
}

/// Resolves `name`, falling back to the project's default branch when
/// `name` is `None`. Unlike `ensure_branch`, never creates a row.
pub fn resolve_branch(conn: &Connection, project: &ProjectRow, name: Option<&str>) -> Result<BranchRow> {
    let name = name.unwrap_or(&project.default_branch);
    get_branch(conn, project.id, name)
}

pub fn get_project_file(conn: &Connection, project_id: ProjectId, path: &str) -> Result<Option<ProjectFileRow>> {
    conn.query_row(
        "SELECT id, project_id, path, type_tag, component, updated_at
         FROM project_file WHERE project_id = ?1 AND path = ?2",
        params![project_id, path],
        |row| {
            Ok(ProjectFileRow {
                id: row.get(0)?,
                project_id: row.get(1)?,
                path: row.get(2)?,
                type_tag: row.get(3)?,
                component: row.get(4)?,
                updated_at: from_ms(row.get(5)?),
            })
        },
    )
    .optional()
    .map_err(Error::from)
}

pub fn ensure_project_file(
    conn: &Connection,
    project_id: ProjectId,
    path: &str,
    type_tag: &str,
    now_ms: i64,
) -> Result<FileId> {
    if let Some(row) = get_project_file(conn, project_id, path)? {
        conn.execute(
            "UPDATE project_file SET updated_at = ?2 WHERE id = ?1",
            params![row.id, now_ms],
        )?;
        return Ok(row.id);
    }
    conn.execute(
        "INSERT INTO project_file (project_id, path, type_tag, updated_at) VALUES (?1, ?2, ?3, ?4)",
        params![project_id, path, type_tag, now_ms],
    )?;
    Ok(conn.last_insert_rowid())
}

fn row_to_file_content(row: &Row) -> rusqlite::Result<FileContentRow> {
    Ok(FileContentRow {
        file_id: row.get(0)?,
        content_hash: row.get(1)?,
        size_bytes: row.get(2)?,
        line_count: row.get(3)?,
        version: row.get(4)?,
        is_current: row.get::<_, i64>(5)? != 0,
        updated_at: from_ms(row.get(6)?),
    })
}

const FILE_CONTENT_COLUMNS: &str =
    "file_id, content_hash, size_bytes, line_count, version, is_current, updated_at";

pub fn get_current_file_content(conn: &Connection, file_id: FileId) -> Result<Option<FileContentRow>> {
    conn.query_row(
        &format!("SELECT {FILE_CONTENT_COLUMNS} FROM file_content WHERE file_id = ?1 AND is_current = 1"),
        params![file_id],
        row_to_file_content,
    )
    .optional()
    .map_err(Error::from)
}

pub fn max_version(conn: &Connection, file_id: FileId) -> Result<i64> {
    let v: Option<i64> = conn.query_row(
        "SELECT MAX(version) FROM file_content WHERE file_id = ?1",
        params![file_id],
        |row| row.get(0),
    )?;
    Ok(v.unwrap_or(0))
}

/// Clears `is_current` on `file_id`'s current row, if any. A no-op for
/// brand-new files, which have no prior current row to clear.
pub fn clear_current_flag(conn: &Connection, file_id: FileId) -> Result<()> {
    conn.execute(
        "UPDATE file_content SET is_current = 0 WHERE file_id = ?1 AND is_current = 1",
        params![file_id],
    )?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn insert_file_content(
    conn: &Connection,
    file_id: FileId,
    content_hash: &str,
    size_bytes: i64,
    line_count: Option<i64>,
    version: i64,
    now_ms: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO file_content
            (file_id, content_hash, size_bytes, line_count, version, is_current, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![file_id, content_hash, size_bytes, line_count, version, now_ms],
    )?;
    Ok(())
}

/// Current `(path, file_id, content_hash, version)` view for a whole
/// project — the backbone of checkout materialization and commit diffing.
pub fn current_files(conn: &Connection, project_id: ProjectId) -> Result<Vec<(String, FileId, String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT f.path, f.id, fc.content_hash, fc.version
         FROM project_file f
         JOIN file_content fc ON fc.file_id = f.id AND fc.is_current = 1
         WHERE f.project_id = ?1",
    )?;
    let rows = stmt.query_map(params![project_id], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

pub fn get_current_file(
    conn: &Connection,
    project_id: ProjectId,
    path: &str,
) -> Result<(FileId, String, i64, i64)> {
    conn.query_row(
        "SELECT f.id, fc.content_hash, fc.version, fc.size_bytes
         FROM project_file f
         JOIN file_content fc ON fc.file_id = f.id AND fc.is_current = 1
         WHERE f.project_id = ?1 AND f.path = ?2",
        params![project_id, path],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )
    .optional()?
    .ok_or_else(|| Error::not_found(EntityKind::File, path))
}

pub fn list_files(conn: &Connection, project_id: ProjectId, glob: Option<&str>) -> Result<Vec<FileListEntry>> {
    let mut stmt = conn.prepare(
        "SELECT f.path, fc.size_bytes, fc.version, f.type_tag
         FROM project_file f
         JOIN file_content fc ON fc.file_id = f.id AND fc.is_current = 1
         WHERE f.project_id = ?1
         ORDER BY f.path",
    )?;
    let rows = stmt.query_map(params![project_id], |row| {
        Ok(FileListEntry {
            path: row.get(0)?,
            size_bytes: row.get(1)?,
            version: row.get(2)?,
            type_tag: row.get(3)?,
        })
    })?;
    let mut entries = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    if let Some(pattern) = glob {
        entries.retain(|e| glob_match_public(pattern, &e.path));
    }
    Ok(entries)
}

/// Checkout row lookup by (project, path) — the precondition every commit
/// checks before anything else (§4.G).
pub fn get_checkout(conn: &Connection, project_id: ProjectId, path: &str) -> Result<Option<CheckoutRow>> {
    conn.query_row(
        "SELECT id, project_id, path, branch, created_at, last_synced_at, active
         FROM checkout WHERE project_id = ?1 AND path = ?2",
        params![project_id, path],
        row_to_checkout,
    )
    .optional()
    .map_err(Error::from)
}

pub fn row_to_checkout(row: &Row) -> rusqlite::Result<CheckoutRow> {
    Ok(CheckoutRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        path: row.get(2)?,
        branch: row.get(3)?,
        created_at: from_ms(row.get(4)?),
        last_synced_at: from_ms(row.get(5)?),
        active: row.get::<_, i64>(6)? != 0,
    })
}

/// The `(path, file_id, content_hash, version)` triples a checkout
/// snapshot recorded, keyed by path for O(1) diff lookups.
pub fn snapshot_by_path(
    conn: &Connection,
    checkout_id: pmdb_core::CheckoutId,
) -> Result<Vec<(String, FileId, String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT f.path, s.file_id, s.content_hash, s.version
         FROM checkout_snapshot s
         JOIN project_file f ON f.id = s.file_id
         WHERE s.checkout_id = ?1",
    )?;
    let rows = stmt.query_map(params![checkout_id], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

/// The author/time of the commit that last set `file_id`'s current
/// version — used to enrich conflict entries with "who got there first".
pub fn last_touch(conn: &Connection, file_id: FileId) -> Result<(Option<String>, Option<i64>)> {
    conn.query_row(
        "SELECT c.author, c.created_at
         FROM commit_file cf
         JOIN commit_record c ON c.id = cf.commit_id
         WHERE cf.file_id = ?1
         ORDER BY c.id DESC LIMIT 1",
        params![file_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map(|opt| opt.unwrap_or((None, None)))
    .map_err(Error::from)
}

fn row_to_commit(row: &Row) -> rusqlite::Result<CommitRow> {
    Ok(CommitRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        branch_id: row.get(2)?,
        commit_hash: row.get(3)?,
        parent_commit_id: row.get(4)?,
        author: row.get(5)?,
        message: row.get(6)?,
        created_at: from_ms(row.get(7)?),
        files_changed: row.get(8)?,
        lines_added: row.get(9)?,
        lines_removed: row.get(10)?,
    })
}

const COMMIT_COLUMNS: &str = "id, project_id, branch_id, commit_hash, parent_commit_id, author, message, created_at, files_changed, lines_added, lines_removed";

pub fn log(conn: &Connection, project_id: ProjectId, branch_id: Option<BranchId>, limit: u32) -> Result<Vec<CommitRow>> {
    let rows = if let Some(branch_id) = branch_id {
        let sql = format!("SELECT {COMMIT_COLUMNS} FROM commit_record WHERE project_id = ?1 AND branch_id = ?2 ORDER BY id DESC LIMIT ?3");
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_map(params![project_id, branch_id, limit], row_to_commit)?
            .collect::<rusqlite::Result<Vec<_>>>()
    } else {
        let sql = format!("SELECT {COMMIT_COLUMNS} FROM commit_record WHERE project_id = ?1 ORDER BY id DESC LIMIT ?2");
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_map(params![project_id, limit], row_to_commit)?
            .collect::<rusqlite::Result<Vec<_>>>()
    };
    rows.map_err(Error::from)
}

pub fn commit_files(conn: &Connection, commit_id: pmdb_core::CommitId) -> Result<Vec<CommitFileRow>> {
    let mut stmt = conn.prepare(
        "SELECT commit_id, file_id, path, change_type, old_content_hash, new_content_hash,
                old_path, new_path, lines_added, lines_removed
         FROM commit_file WHERE commit_id = ?1",
    )?;
    let files = stmt
        .query_map(params![commit_id], |row| {
            let change_type: String = row.get(3)?;
            Ok(CommitFileRow {
                commit_id: row.get(0)?,
                file_id: row.get(1)?,
                path: row.get(2)?,
                change_type: change_type.parse().unwrap_or(pmdb_core::ChangeType::Modified),
                old_content_hash: row.get(4)?,
                new_content_hash: row.get(5)?,
                old_path: row.get(6)?,
                new_path: row.get(7)?,
                lines_added: row.get(8)?,
                lines_removed: row.get(9)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(files)
}

pub fn get_commit_by_hash_prefix(conn: &Connection, commit_hash_prefix: &str) -> Result<CommitRow> {
    let pattern = format!("{commit_hash_prefix}%");
    conn.query_row(
        &format!("SELECT {COMMIT_COLUMNS} FROM commit_record WHERE commit_hash LIKE ?1 ORDER BY id LIMIT 1"),
        params![pattern],
        row_to_commit,
    )
    .optional()?
    .ok_or_else(|| Error::not_found(EntityKind::Commit, commit_hash_prefix))
}

pub fn show(conn: &Connection, commit_hash_prefix: &str) -> Result<(CommitRow, Vec<CommitFileRow>)> {
    let commit = get_commit_by_hash_prefix(conn, commit_hash_prefix)?;
    let files = commit_files(conn, commit.id)?;
    Ok((commit, files))
}

/// The most recent `commit_file` row touching `path` at or before `commit_id`,
/// ordered by global commit id rather than branch ancestry — a scoped
/// simplification documented in DESIGN.md.
pub fn file_at_commit(conn: &Connection, project_id: ProjectId, path: &str, commit_id: pmdb_core::CommitId) -> Result<Option<CommitFileRow>> {
    conn.query_row(
        "SELECT cf.commit_id, cf.file_id, cf.path, cf.change_type, cf.old_content_hash, cf.new_content_hash,
                cf.old_path, cf.new_path, cf.lines_added, cf.lines_removed
         FROM commit_file cf
         JOIN commit_record c ON c.id = cf.commit_id
         WHERE c.project_id = ?1 AND cf.path = ?2 AND cf.commit_id <= ?3
         ORDER BY cf.commit_id DESC LIMIT 1",
        params![project_id, path, commit_id],
        |row| {
            let change_type: String = row.get(3)?;
            Ok(CommitFileRow {
                commit_id: row.get(0)?,
                file_id: row.get(1)?,
                path: row.get(2)?,
                change_type: change_type.parse().unwrap_or(pmdb_core::ChangeType::Modified),
                old_content_hash: row.get(4)?,
                new_content_hash: row.get(5)?,
                old_path: row.get(6)?,
                new_path: row.get(7)?,
                lines_added: row.get(8)?,
                lines_removed: row.get(9)?,
            })
        },
    )
    .optional()
    .map_err(Error::from)
}

/// Resolves the highest commit id for `project_id` — used as `to_ref`'s
/// default ("current state") when a caller omits it.
pub fn latest_commit_id(conn: &Connection, project_id: ProjectId) -> Result<Option<pmdb_core::CommitId>> {
    conn.query_row(
        "SELECT MAX(id) FROM commit_record WHERE project_id = ?1",
        params![project_id],
        |row| row.get(0),
    )
    .map_err(Error::from)
}

pub fn upsert_checkout(
    conn: &Connection,
    project_id: ProjectId,
    path: &str,
    branch: &str,
    now_ms: i64,
) -> Result<pmdb_core::CheckoutId> {
    conn.execute(
        "INSERT INTO checkout (project_id, path, branch, created_at, last_synced_at, active)
         VALUES (?1, ?2, ?3, ?4, ?4, 1)
         ON CONFLICT (project_id, path)
         DO UPDATE SET branch = excluded.branch, last_synced_at = excluded.last_synced_at, active = 1",
        params![project_id, path, branch, now_ms],
    )?;
    let id: pmdb_core::CheckoutId = conn.query_row(
        "SELECT id FROM checkout WHERE project_id = ?1 AND path = ?2",
        params![project_id, path],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn touch_checkout(conn: &Connection, checkout_id: pmdb_core::CheckoutId, now_ms: i64) -> Result<()> {
    conn.execute(
        "UPDATE checkout SET last_synced_at = ?2 WHERE id = ?1",
        params![checkout_id, now_ms],
    )?;
    Ok(())
}

pub fn replace_snapshot(
    conn: &Connection,
    checkout_id: pmdb_core::CheckoutId,
    triples: &[(FileId, String, i64)],
    now_ms: i64,
) -> Result<()> {
    conn.execute(
        "DELETE FROM checkout_snapshot WHERE checkout_id = ?1",
        params![checkout_id],
    )?;
    for (file_id, content_hash, version) in triples {
        conn.execute(
            "INSERT INTO checkout_snapshot (checkout_id, file_id, content_hash, version, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![checkout_id, file_id, content_hash, version, now_ms],
        )?;
    }
    Ok(())
}

pub fn upsert_snapshot_row(
    conn: &Connection,
    checkout_id: pmdb_core::CheckoutId,
    file_id: FileId,
    content_hash: &str,
    version: i64,
    now_ms: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO checkout_snapshot (checkout_id, file_id, content_hash, version, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT (checkout_id, file_id)
         DO UPDATE SET content_hash = excluded.content_hash, version = excluded.version, updated_at = excluded.updated_at",
        params![checkout_id, file_id, content_hash, version, now_ms],
    )?;
    Ok(())
}

pub fn delete_snapshot_row(conn: &Connection, checkout_id: pmdb_core::CheckoutId, file_id: FileId) -> Result<()> {
    conn.execute(
        "DELETE FROM checkout_snapshot WHERE checkout_id = ?1 AND file_id = ?2",
        params![checkout_id, file_id],
    )?;
    Ok(())
}

pub fn list_checkouts(conn: &Connection, project_id: Option<ProjectId>) -> Result<Vec<pmdb_core::CheckoutRow>> {
    let rows = if let Some(project_id) = project_id {
        let mut stmt = conn.prepare(
            "SELECT id, project_id, path, branch, created_at, last_synced_at, active
             FROM checkout WHERE project_id = ?1 ORDER BY id",
        )?;
        stmt.query_map(params![project_id], row_to_checkout)?
            .collect::<rusqlite::Result<Vec<_>>>()
    } else {
        let mut stmt = conn.prepare(
            "SELECT id, project_id, path, branch, created_at, last_synced_at, active
             FROM checkout ORDER BY id",
        )?;
        stmt.query_map([], row_to_checkout)?
            .collect::<rusqlite::Result<Vec<_>>>()
    };
    rows.map_err(Error::from)
}

pub fn delete_checkout(conn: &Connection, checkout_id: pmdb_core::CheckoutId) -> Result<()> {
    conn.execute("DELETE FROM checkout WHERE id = ?1", params![checkout_id])?;
    Ok(())
}

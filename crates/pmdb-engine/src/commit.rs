//! Commit engine (§4.G): diffs a workspace against its checkout snapshot,
//! detects optimistic-locking conflicts, and records an atomic commit.

use std::collections::HashMap;
use std::path::Path;

use pmdb_core::{
    CancellationToken, ChangeType, CommitFileRow, CommitOutcome, CommitResult, ConflictEntry,
    ConflictStrategy, EmptyCommitPolicy, Error, Payload, Result,
};
use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};
use tracing::{instrument, warn};

use crate::engine::Engine;
use crate::{blob, content, query, scanner, time};

struct WorkspaceEntry {
    payload: Payload,
    hash: String,
    type_tag: String,
}

impl Engine {
    /// Diffs `workspace_dir` against its checkout snapshot and, absent
    /// conflicts (or under `ConflictStrategy::Force`), writes a commit.
    #[instrument(skip(self, message, author, token))]
    pub fn commit(
        &self,
        slug: &str,
        workspace_dir: &Path,
        message: &str,
        author: &str,
        strategy: ConflictStrategy,
        branch: Option<&str>,
        token: &CancellationToken,
    ) -> Result<CommitOutcome> {
        let workspace_path = workspace_dir.display().to_string();

        let (project, checkout) = self.with_connection(|conn| {
            let project = query::get_project_by_slug(conn, slug)?;
            let checkout = query::get_checkout(conn, project.id, &workspace_path)?.ok_or_else(|| {
                Error::NoSuchCheckout {
                    project: slug.to_string(),
                    path: workspace_path.clone(),
                }
            })?;
            Ok((project, checkout))
        })?;

        let workspace = scan_workspace(workspace_dir, &self.rule_set, token)?;

        if token.is_cancelled() {
            return Err(Error::CancelledByCaller);
        }

        let now = time::now_ms();

        // The current-state load, the snapshot load, and the version-conflict
        // check all happen inside this single `BEGIN IMMEDIATE` scope (§5):
        // loading them earlier via an autocommit read would let two writers
        // both pass conflict detection against the same pre-commit state
        // before either one's write becomes visible, silently losing one
        // side's edit under `ConflictStrategy::Abort` (§8.4). `BEGIN
        // IMMEDIATE` serializes writers right here, so the second commit to
        // reach this point always re-reads the first one's already-committed
        // effects.
        let outcome = self.with_txn(|conn| {
            let current = query::current_files(conn, project.id)?
                .into_iter()
                .map(|(path, file_id, hash, version)| (path, (file_id, hash, version)))
                .collect::<HashMap<_, _>>();
            let snapshot = query::snapshot_by_path(conn, checkout.id)?
                .into_iter()
                .map(|(path, file_id, hash, version)| (path, (file_id, hash, version)))
                .collect::<HashMap<_, _>>();

            let mut added: Vec<String> = Vec::new();
            let mut modified: Vec<String> = Vec::new();
            for (path, entry) in &workspace {
                match current.get(path) {
                    None => added.push(path.clone()),
                    Some((_, current_hash, _)) if current_hash != &entry.hash => modified.push(path.clone()),
                    Some(_) => {}
                }
            }
            let deleted: Vec<String> = current
                .keys()
                .filter(|path| !workspace.contains_key(*path) && snapshot.contains_key(*path))
                .cloned()
                .collect();

            if added.is_empty() && modified.is_empty() && deleted.is_empty() {
                return match self.config.empty_commit_policy {
                    EmptyCommitPolicy::AcceptNoOp => Ok(CommitOutcome::NoOp),
                    EmptyCommitPolicy::Reject => {
                        Err(Error::IntegrityViolation("empty commit rejected by configuration".into()))
                    }
                };
            }

            let mut conflicts = Vec::new();
            for path in modified.iter().chain(deleted.iter()) {
                let (file_id, _, current_version) = &current[path];
                if let Some((_, _, snapshot_version)) = snapshot.get(path) {
                    if current_version != snapshot_version {
                        let (last_author, last_time_ms) = query::last_touch(conn, *file_id)?;
                        conflicts.push(ConflictEntry {
                            path: path.clone(),
                            snapshot_version: *snapshot_version,
                            current_version: *current_version,
                            last_author,
                            last_time: last_time_ms.map(time::from_ms),
                        });
                    }
                }
            }

            if !conflicts.is_empty() {
                if strategy == ConflictStrategy::Abort {
                    return Ok(CommitOutcome::Conflict(conflicts));
                }
                warn!(count = conflicts.len(), "forcing commit over detected conflicts");
            }

            if token.is_cancelled() {
                return Err(Error::CancelledByCaller);
            }

            let mut staged: Vec<CommitFileRow> = Vec::new();
            let mut lines_added_total = 0i64;
            let mut lines_removed_total = 0i64;

            for path in &added {
                let entry = &workspace[path];
                blob::put(conn, &entry.payload, content::encoding_for(&entry.payload), now)?;
                let file_id = query::ensure_project_file(conn, project.id, path, &entry.type_tag, now)?;
                let next_version = query::max_version(conn, file_id)? + 1;
                query::insert_file_content(
                    conn,
                    file_id,
                    &entry.hash,
                    entry.payload.len() as i64,
                    content::line_count(&entry.payload),
                    next_version,
                    now,
                )?;
                let (la, lr) = diff_lines(None, Some(&entry.payload));
                lines_added_total += la;
                lines_removed_total += lr;
                staged.push(CommitFileRow {
                    commit_id: 0,
                    file_id,
                    path: path.clone(),
                    change_type: ChangeType::Added,
                    old_content_hash: None,
                    new_content_hash: Some(entry.hash.clone()),
                    old_path: None,
                    new_path: None,
                    lines_added: la,
                    lines_removed: lr,
                });
            }

            for path in &modified {
                let entry = &workspace[path];
                let (file_id, old_hash, _) = current[path].clone();
                blob::put(conn, &entry.payload, content::encoding_for(&entry.payload), now)?;
                query::clear_current_flag(conn, file_id)?;
                let next_version = query::max_version(conn, file_id)? + 1;
                query::insert_file_content(
                    conn,
                    file_id,
                    &entry.hash,
                    entry.payload.len() as i64,
                    content::line_count(&entry.payload),
                    next_version,
                    now,
                )?;
                let (old_payload, _, _) = blob::get(conn, &old_hash, self.config.blob_verify_on_read)?;
                let (la, lr) = diff_lines(Some(&old_payload), Some(&entry.payload));
                lines_added_total += la;
                lines_removed_total += lr;
                staged.push(CommitFileRow {
                    commit_id: 0,
                    file_id,
                    path: path.clone(),
                    change_type: ChangeType::Modified,
                    old_content_hash: Some(old_hash),
                    new_content_hash: Some(entry.hash.clone()),
                    old_path: None,
                    new_path: None,
                    lines_added: la,
                    lines_removed: lr,
                });
            }

            for path in &deleted {
                let (file_id, old_hash, _) = current[path].clone();
                query::clear_current_flag(conn, file_id)?;
                let (old_payload, _, _) = blob::get(conn, &old_hash, self.config.blob_verify_on_read)?;
                let (la, lr) = diff_lines(Some(&old_payload), None);
                lines_added_total += la;
                lines_removed_total += lr;
                staged.push(CommitFileRow {
                    commit_id: 0,
                    file_id,
                    path: path.clone(),
                    change_type: ChangeType::Deleted,
                    old_content_hash: Some(old_hash),
                    new_content_hash: None,
                    old_path: None,
                    new_path: None,
                    lines_added: la,
                    lines_removed: lr,
                });
            }

            let branch_name = branch.unwrap_or(&project.default_branch).to_string();
            let branch_row = query::ensure_branch(conn, project.id, &branch_name, None, branch.is_none())?;

            let commit_hash = compute_commit_hash(
                &project.slug,
                &branch_row.name,
                branch_row.head_commit_id,
                author,
                message,
                now,
                &staged,
            );

            conn.execute(
                "INSERT INTO commit_record
                    (project_id, branch_id, commit_hash, parent_commit_id, author, message,
                     created_at, files_changed, lines_added, lines_removed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    project.id,
                    branch_row.id,
                    commit_hash,
                    branch_row.head_commit_id,
                    author,
                    message,
                    now,
                    staged.len() as i64,
                    lines_added_total,
                    lines_removed_total,
                ],
            )?;
            let commit_id = conn.last_insert_rowid();
            conn.execute(
                "UPDATE branch SET head_commit_id = ?1 WHERE id = ?2",
                rusqlite::params![commit_id, branch_row.id],
            )?;

            for stage in &staged {
                conn.execute(
                    "INSERT INTO commit_file
                        (commit_id, file_id, path, change_type, old_content_hash, new_content_hash,
                         old_path, new_path, lines_added, lines_removed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        commit_id,
                        stage.file_id,
                        stage.path,
                        stage.change_type.as_str(),
                        stage.old_content_hash,
                        stage.new_content_hash,
                        stage.old_path,
                        stage.new_path,
                        stage.lines_added,
                        stage.lines_removed,
                    ],
                )?;
            }

            for path in added.iter().chain(modified.iter()) {
                let entry = &workspace[path];
                let file_id = staged.iter().find(|s| &s.path == path).expect("staged above").file_id;
                let version = query::max_version(conn, file_id)?;
                query::upsert_snapshot_row(conn, checkout.id, file_id, &entry.hash, version, now)?;
            }
            for path in &deleted {
                let (file_id, _, _) = &current[path];
                query::delete_snapshot_row(conn, checkout.id, *file_id)?;
            }
            query::touch_checkout(conn, checkout.id, now)?;

            Ok(CommitOutcome::Committed(CommitResult {
                commit_id,
                commit_hash,
                files_added: added.len() as u64,
                files_modified: modified.len() as u64,
                files_deleted: deleted.len() as u64,
                lines_added: lines_added_total,
                lines_removed: lines_removed_total,
            }))
        })?;

        Ok(outcome)
    }
}

fn scan_workspace(
    dir: &Path,
    rules: &pmdb_core::RuleSet,
    token: &CancellationToken,
) -> Result<HashMap<String, WorkspaceEntry>> {
    let mut workspace = HashMap::new();
    for entry in scanner::scan(dir, rules) {
        if token.is_cancelled() {
            return Err(Error::CancelledByCaller);
        }
        let scanned = match entry {
            pmdb_core::ScanEntry::File(f) => f,
            pmdb_core::ScanEntry::Unreadable { relative_path, message } => {
                return Err(Error::io(relative_path, message));
            }
        };
        let bytes = std::fs::read(&scanned.absolute_path)
            .map_err(|e| Error::io(scanned.relative_path.clone(), e.to_string()))?;
        let payload = content::classify_payload(bytes);
        let hash = blob::hash_payload(&payload);
        workspace.insert(
            scanned.relative_path,
            WorkspaceEntry { payload, hash, type_tag: scanned.type_tag },
        );
    }
    Ok(workspace)
}

/// Line-level insert/delete counts. Binary files never participate in line
/// diffing (§4.G Non-goals): their `(lines_added, lines_removed)` is `(0, 0)`.
fn diff_lines(old: Option<&Payload>, new: Option<&Payload>) -> (i64, i64) {
    if matches!(old, Some(Payload::Binary(_))) || matches!(new, Some(Payload::Binary(_))) {
        return (0, 0);
    }
    let old_text = match old {
        Some(Payload::Text(s)) => s.as_str(),
        _ => "",
    };
    let new_text = match new {
        Some(Payload::Text(s)) => s.as_str(),
        _ => "",
    };
    let diff = TextDiff::from_lines(old_text, new_text);
    let mut added = 0i64;
    let mut removed = 0i64;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    (added, removed)
}

#[allow(clippy::too_many_arguments)]
fn compute_commit_hash(
    project_slug: &str,
    branch: &str,
    parent: Option<i64>,
    author: &str,
    message: &str,
    now_ms: i64,
    staged: &[CommitFileRow],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_slug.as_bytes());
    hasher.update(branch.as_bytes());
    hasher.update(parent.unwrap_or(0).to_le_bytes());
    hasher.update(author.as_bytes());
    hasher.update(message.as_bytes());
    hasher.update(now_ms.to_le_bytes());

    let mut sorted: Vec<&CommitFileRow> = staged.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    for file in sorted {
        hasher.update(file.path.as_bytes());
        hasher.update(file.change_type.as_str().as_bytes());
        hasher.update(file.old_content_hash.as_deref().unwrap_or("").as_bytes());
        hasher.update(file.new_content_hash.as_deref().unwrap_or("").as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmdb_core::{CancellationToken, EngineConfig, RuleSet};
    use std::fs;

    fn setup() -> (Engine, tempfile::TempDir) {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let root = tempfile::tempdir().unwrap();
        let db_path = root.path().join("store.db");
        let engine = Engine::open_at(db_path, EngineConfig::default()).unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();
        engine.import("p", None, None, &src, &RuleSet::default_rules(), &CancellationToken::new()).unwrap();
        (engine, root)
    }

    #[test]
    fn commit_without_checkout_fails() {
        let (engine, root) = setup();
        let ws = root.path().join("ws");
        fs::create_dir_all(&ws).unwrap();
        let err = engine
            .commit("p", &ws, "msg", "alice", ConflictStrategy::Abort, None, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchCheckout { .. }));
    }

    #[test]
    fn neutral_commit_after_checkout_is_a_noop() {
        let (engine, root) = setup();
        let ws = root.path().join("ws");
        engine.checkout("p", &ws, None, false, &CancellationToken::new()).unwrap();
        let outcome = engine
            .commit("p", &ws, "msg", "alice", ConflictStrategy::Abort, None, &CancellationToken::new())
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::NoOp));
    }

    #[test]
    fn modifying_and_committing_advances_version() {
        let (engine, root) = setup();
        let ws = root.path().join("ws");
        engine.checkout("p", &ws, None, false, &CancellationToken::new()).unwrap();
        fs::write(ws.join("a.txt"), b"HELLO").unwrap();

        let outcome = engine
            .commit("p", &ws, "update a", "alice", ConflictStrategy::Abort, None, &CancellationToken::new())
            .unwrap();
        let CommitOutcome::Committed(result) = outcome else {
            panic!("expected committed outcome");
        };
        assert_eq!(result.files_modified, 1);

        let (_, _, _, version) = engine.get_current_content("p", "a.txt").unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn concurrent_modification_is_detected_as_conflict() {
        let (engine, root) = setup();
        let ws1 = root.path().join("ws1");
        let ws2 = root.path().join("ws2");
        engine.checkout("p", &ws1, None, false, &CancellationToken::new()).unwrap();
        engine.checkout("p", &ws2, None, false, &CancellationToken::new()).unwrap();

        fs::write(ws1.join("a.txt"), b"from worker one").unwrap();
        engine.commit("p", &ws1, "w1 edit", "w1", ConflictStrategy::Abort, None, &CancellationToken::new()).unwrap();

        fs::write(ws2.join("a.txt"), b"from worker two").unwrap();
        let outcome = engine
            .commit("p", &ws2, "w2 edit", "w2", ConflictStrategy::Abort, None, &CancellationToken::new())
            .unwrap();
        let CommitOutcome::Conflict(conflicts) = outcome else {
            panic!("expected conflict outcome");
        };
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].path, "a.txt");
        assert_eq!(conflicts[0].snapshot_version, 1);
        assert_eq!(conflicts[0].current_version, 2);

        let forced = engine
            .commit("p", &ws2, "w2 forced", "w2", ConflictStrategy::Force, None, &CancellationToken::new())
            .unwrap();
        assert!(matches!(forced, CommitOutcome::Committed(_)));
        let (_, _, _, version) = engine.get_current_content("p", "a.txt").unwrap();
        assert_eq!(version, 3);
    }

    #[test]
    fn consecutive_commits_from_same_checkout_do_not_false_conflict() {
        let (engine, root) = setup();
        let ws = root.path().join("ws");
        engine.checkout("p", &ws, None, false, &CancellationToken::new()).unwrap();

        fs::write(ws.join("a.txt"), b"first edit").unwrap();
        engine.commit("p", &ws, "first", "alice", ConflictStrategy::Abort, None, &CancellationToken::new()).unwrap();

        fs::write(ws.join("a.txt"), b"second edit").unwrap();
        let outcome = engine
            .commit("p", &ws, "second", "alice", ConflictStrategy::Abort, None, &CancellationToken::new())
            .unwrap();
        assert!(matches!(outcome, CommitOutcome::Committed(_)));

        let (_, _, _, version) = engine.get_current_content("p", "a.txt").unwrap();
        assert!(version >= 3);
    }

    #[test]
    fn added_and_deleted_files_are_recorded() {
        let (engine, root) = setup();
        let ws = root.path().join("ws");
        engine.checkout("p", &ws, None, false, &CancellationToken::new()).unwrap();

        fs::write(ws.join("new.txt"), b"brand new").unwrap();
        fs::remove_file(ws.join("a.txt")).unwrap();

        let outcome = engine
            .commit("p", &ws, "add+delete", "alice", ConflictStrategy::Abort, None, &CancellationToken::new())
            .unwrap();
        let CommitOutcome::Committed(result) = outcome else {
            panic!("expected committed outcome");
        };
        assert_eq!(result.files_added, 1);
        assert_eq!(result.files_deleted, 1);

        let err = engine.get_current_content("p", "a.txt").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}

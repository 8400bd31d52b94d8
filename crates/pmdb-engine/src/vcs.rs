//! VCS read operations (§6): history, single-commit detail, and on-the-fly
//! unified diffs. Nothing here writes; diffs are rendered fresh every call.

use pmdb_core::{BlobVerifyOnRead, CommitRecord, Error, Payload, Result, UnifiedDiff};
use rusqlite::Connection;
use similar::{ChangeTag, TextDiff};

use crate::blob;
use crate::engine::Engine;
use crate::query;

impl Engine {
    pub fn log(&self, slug: &str, branch: Option<&str>, limit: u32) -> Result<Vec<CommitRecord>> {
        self.with_connection(|conn| {
            let project = query::get_project_by_slug(conn, slug)?;
            let branch_id = branch
                .map(|name| query::get_branch(conn, project.id, name))
                .transpose()?
                .map(|b| b.id);
            let commits = query::log(conn, project.id, branch_id, limit)?;
            commits
                .into_iter()
                .map(|commit| {
                    let files = query::commit_files(conn, commit.id)?;
                    Ok(CommitRecord { commit, files })
                })
                .collect()
        })
    }

    pub fn show(&self, commit_hash_prefix: &str) -> Result<CommitRecord> {
        self.with_connection(|conn| {
            let (commit, files) = query::show(conn, commit_hash_prefix)?;
            Ok(CommitRecord { commit, files })
        })
    }

    /// Renders a unified diff of `path` between two commit references.
    /// `from_ref = None` diffs from nothing (useful for "show the whole
    /// file as of `to_ref`"); `to_ref = None` diffs up to the file's
    /// current, possibly-uncommitted content.
    pub fn diff(&self, slug: &str, path: &str, from_ref: Option<&str>, to_ref: Option<&str>) -> Result<UnifiedDiff> {
        self.with_connection(|conn| {
            let project = query::get_project_by_slug(conn, slug)?;

            let from_hash = match from_ref {
                Some(r) => {
                    let commit = query::get_commit_by_hash_prefix(conn, r)?;
                    query::file_at_commit(conn, project.id, path, commit.id)?.and_then(|f| f.new_content_hash)
                }
                None => None,
            };
            let to_hash = match to_ref {
                Some(r) => {
                    let commit = query::get_commit_by_hash_prefix(conn, r)?;
                    query::file_at_commit(conn, project.id, path, commit.id)?.and_then(|f| f.new_content_hash)
                }
                None => query::get_current_file(conn, project.id, path)
                    .ok()
                    .map(|(_, hash, _, _)| hash),
            };

            if from_hash.is_none() && to_hash.is_none() {
                return Err(Error::not_found(pmdb_core::EntityKind::File, path));
            }

            let from_text = text_at(conn, from_hash.as_deref(), self.config.blob_verify_on_read)?;
            let to_text = text_at(conn, to_hash.as_deref(), self.config.blob_verify_on_read)?;

            let from_label = from_ref.unwrap_or("(empty)").to_string();
            let to_label = to_ref.unwrap_or("(current)").to_string();

            let text_diff = TextDiff::from_lines(&from_text, &to_text);
            let mut rendered = String::new();
            for change in text_diff.iter_all_changes() {
                let sign = match change.tag() {
                    ChangeTag::Delete => "-",
                    ChangeTag::Insert => "+",
                    ChangeTag::Equal => " ",
                };
                rendered.push_str(sign);
                rendered.push_str(change.value());
            }

            Ok(UnifiedDiff {
                path: path.to_string(),
                from_label,
                to_label,
                text: rendered,
            })
        })
    }
}

/// Binary files never participate in diffing (§4.G Non-goals); their text
/// is treated as empty rather than erroring, so a diff involving one side
/// binary still renders (as a full add/remove of the other side).
fn text_at(conn: &Connection, hash: Option<&str>, verify: BlobVerifyOnRead) -> Result<String> {
    match hash {
        None => Ok(String::new()),
        Some(h) => {
            let (payload, _, _) = blob::get(conn, h, verify)?;
            Ok(match payload {
                Payload::Text(s) => s,
                Payload::Binary(_) => String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmdb_core::{CancellationToken, ConflictStrategy, EngineConfig, RuleSet};
    use std::fs;

    fn engine_with_history() -> (Engine, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let db_path = root.path().join("store.db");
        let engine = Engine::open_at(db_path, EngineConfig::default()).unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), "line one\nline two\n").unwrap();
        engine.import("p", None, None, &src, &RuleSet::default_rules(), &CancellationToken::new()).unwrap();

        let ws = root.path().join("ws");
        engine.checkout("p", &ws, None, false, &CancellationToken::new()).unwrap();
        fs::write(ws.join("a.txt"), "line one\nline two changed\nline three\n").unwrap();
        engine
            .commit("p", &ws, "edit a", "alice", ConflictStrategy::Abort, None, &CancellationToken::new())
            .unwrap();
        (engine, root)
    }

    #[test]
    fn log_returns_commits_newest_first() {
        let (engine, _root) = engine_with_history();
        let records = engine.log("p", None, 10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].commit.author, "alice");
        assert_eq!(records[0].files.len(), 1);
    }

    #[test]
    fn show_finds_commit_by_hash_prefix() {
        let (engine, _root) = engine_with_history();
        let full = engine.log("p", None, 10).unwrap()[0].commit.commit_hash.clone();
        let record = engine.show(&full[..8]).unwrap();
        assert_eq!(record.commit.commit_hash, full);
    }

    #[test]
    fn diff_against_current_shows_inserted_lines() {
        let (engine, _root) = engine_with_history();
        let diff = engine.diff("p", "a.txt", None, None).unwrap();
        assert!(diff.text.lines().any(|l| l.starts_with('+')));
    }

    #[test]
    fn diff_missing_path_is_not_found() {
        let (engine, _root) = engine_with_history();
        let err = engine.diff("p", "nope.txt", None, None).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}

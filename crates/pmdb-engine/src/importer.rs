//! Importer (§4.E): bulk-ingests a working tree into a project under one
//! transaction. Partial imports never persist — any per-file error aborts
//! the whole batch.

use std::path::Path;

use pmdb_core::{CancellationToken, Error, ImportSummary, RuleSet};
use tracing::{info, instrument};

use crate::content;
use crate::engine::Engine;
use crate::{blob, query, time};

impl Engine {
    /// Ingests `dir` into `slug` under `rule_set`, creating the project
    /// (and its default branch) on first sight.
    #[instrument(skip(self, rule_set, token))]
    pub fn import(
        &self,
        slug: &str,
        name: Option<&str>,
        source_url: Option<&str>,
        dir: &Path,
        rule_set: &RuleSet,
        token: &CancellationToken,
    ) -> Result<ImportSummary, Error> {
        let entries = crate::scanner::scan(dir, rule_set);
        let now = time::now_ms();

        self.with_txn(|conn| {
            let project = query::ensure_project(conn, slug, name, source_url, now)?;
            let mut summary = ImportSummary::default();

            for entry in entries {
                if token.is_cancelled() {
                    return Err(Error::CancelledByCaller);
                }

                let scanned = match entry {
                    pmdb_core::ScanEntry::File(f) => f,
                    pmdb_core::ScanEntry::Unreadable { relative_path, message } => {
                        return Err(Error::io(relative_path, message));
                    }
                };

                let bytes = std::fs::read(&scanned.absolute_path).map_err(|e| {
                    Error::io(scanned.relative_path.clone(), e.to_string())
                })?;
                let size_bytes = bytes.len() as i64;
                let payload = content::classify_payload(bytes);
                let encoding = content::encoding_for(&payload);
                let lines = content::line_count(&payload);

                let (hash, inserted) = blob::put(conn, &payload, encoding, now)?;
                if inserted {
                    summary.blobs_added += 1;
                    summary.bytes_stored += payload.len() as u64;
                }

                let file_id =
                    query::ensure_project_file(conn, project.id, &scanned.relative_path, &scanned.type_tag, now)?;
                let current = query::get_current_file_content(conn, file_id)?;

                match current {
                    None => {
                        query::insert_file_content(conn, file_id, &hash, size_bytes, lines, 1, now)?;
                        summary.files_added += 1;
                    }
                    Some(row) if row.content_hash != hash => {
                        query::clear_current_flag(conn, file_id)?;
                        query::insert_file_content(conn, file_id, &hash, size_bytes, lines, row.version + 1, now)?;
                        summary.files_updated += 1;
                    }
                    Some(_) => {
                        summary.files_unchanged += 1;
                    }
                }
            }

            if token.is_cancelled() {
                return Err(Error::CancelledByCaller);
            }
            info!(slug, files_added = summary.files_added, files_updated = summary.files_updated, "import complete");
            Ok(summary)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use pmdb_core::EngineConfig;
    use std::fs;

    fn engine() -> (Engine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let engine = Engine::open_at(db_path, EngineConfig::default()).unwrap();
        (engine, dir)
    }

    #[test]
    fn basic_import_dedups_identical_content() {
        let (engine, tmp) = engine();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), b"hello").unwrap();
        fs::write(src.join("b.txt"), b"hello").unwrap();
        fs::write(src.join("c.bin"), [0u8, 1, 2]).unwrap();

        let summary = engine
            .import("p", None, None, &src, &RuleSet::default_rules(), &CancellationToken::new())
            .unwrap();
        assert_eq!(summary.files_added, 3);
        assert_eq!(summary.blobs_added, 2);

        let project = engine.get_project("p").unwrap();
        let files = engine.list_files("p", None).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.version == 1));
        let _ = project;
    }

    #[test]
    fn reimport_with_no_changes_is_a_no_op() {
        let (engine, tmp) = engine();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        engine.import("p", None, None, tmp.path(), &RuleSet::default_rules(), &CancellationToken::new()).unwrap();
        let second = engine
            .import("p", None, None, tmp.path(), &RuleSet::default_rules(), &CancellationToken::new())
            .unwrap();
        assert_eq!(second.files_added, 0);
        assert_eq!(second.files_updated, 0);
        assert_eq!(second.blobs_added, 0);
        assert_eq!(second.files_unchanged, 1);
    }

    #[test]
    fn reimport_with_changed_content_bumps_version() {
        let (engine, tmp) = engine();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();
        engine.import("p", None, None, tmp.path(), &RuleSet::default_rules(), &CancellationToken::new()).unwrap();
        fs::write(tmp.path().join("a.txt"), b"goodbye").unwrap();
        engine.import("p", None, None, tmp.path(), &RuleSet::default_rules(), &CancellationToken::new()).unwrap();

        let files = engine.list_files("p", None).unwrap();
        let a = files.iter().find(|f| f.path == "a.txt").unwrap();
        assert_eq!(a.version, 2);
    }

    #[test]
    fn empty_file_imports_cleanly() {
        let (engine, tmp) = engine();
        fs::write(tmp.path().join("empty.txt"), b"").unwrap();
        let summary = engine
            .import("p", None, None, tmp.path(), &RuleSet::default_rules(), &CancellationToken::new())
            .unwrap();
        assert_eq!(summary.files_added, 1);
        let (_, payload, _, version) = engine.get_current_content("p", "empty.txt").unwrap();
        assert!(payload.is_empty());
        assert_eq!(version, 1);
    }
}

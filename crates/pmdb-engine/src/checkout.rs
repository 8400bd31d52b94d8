//! Checkout engine (§4.F): materializes a project's current content onto a
//! target directory and records the per-file versions it exposed, so a
//! later commit from that directory can detect conflicts.

use std::path::{Path, PathBuf};

use pmdb_core::{CancellationToken, CheckoutResult, Error, Result};
use tracing::{info, instrument};

use crate::engine::Engine;
use crate::{blob, query, time};

impl Engine {
    /// Writes the project's current content to `target_dir` and registers
    /// a checkout + snapshot. DB work commits only after every file has
    /// been written to disk.
    #[instrument(skip(self, token))]
    pub fn checkout(
        &self,
        slug: &str,
        target_dir: &Path,
        branch: Option<&str>,
        force: bool,
        token: &CancellationToken,
    ) -> Result<CheckoutResult> {
        if target_dir.exists() {
            let non_empty = std::fs::read_dir(target_dir)
                .map_err(|e| Error::io(target_dir.display().to_string(), e.to_string()))?
                .next()
                .is_some();
            if non_empty && !force {
                return Err(Error::io(
                    target_dir.display().to_string(),
                    "target directory exists and is not empty; pass force to overwrite".into(),
                ));
            }
        }

        let (project, branch_row, triples) = self.with_connection(|conn| {
            let project = query::get_project_by_slug(conn, slug)?;
            let branch_row = query::resolve_branch(conn, &project, branch)?;
            let triples = query::current_files(conn, project.id)?;
            Ok((project, branch_row, triples))
        })?;

        std::fs::create_dir_all(target_dir)
            .map_err(|e| Error::io(target_dir.display().to_string(), e.to_string()))?;

        let mut bytes_written = 0u64;
        for (path, _file_id, content_hash, _version) in &triples {
            if token.is_cancelled() {
                return Err(Error::CancelledByCaller);
            }
            let dest = safe_join(target_dir, path)?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::io(parent.display().to_string(), e.to_string()))?;
            }
            if dest.is_symlink() {
                std::fs::remove_file(&dest)
                    .map_err(|e| Error::io(dest.display().to_string(), e.to_string()))?;
            }
            let (payload, _kind, _encoding) = self.with_connection(|conn| {
                blob::get(conn, content_hash, self.config.blob_verify_on_read)
            })?;
            std::fs::write(&dest, payload.as_bytes())
                .map_err(|e| Error::io(dest.display().to_string(), e.to_string()))?;
            bytes_written += payload.len() as u64;
        }

        if token.is_cancelled() {
            return Err(Error::CancelledByCaller);
        }

        let now = time::now_ms();
        let target_str = target_dir.display().to_string();
        let checkout_id = self.with_txn(|conn| {
            let checkout_id = query::upsert_checkout(conn, project.id, &target_str, &branch_row.name, now)?;
            let snapshot_triples: Vec<_> = triples
                .iter()
                .map(|(_, file_id, hash, version)| (*file_id, hash.clone(), *version))
                .collect();
            query::replace_snapshot(conn, checkout_id, &snapshot_triples, now)?;
            Ok(checkout_id)
        })?;

        info!(slug, files = triples.len(), "checkout complete");
        Ok(CheckoutResult {
            checkout_id,
            files_written: triples.len() as u64,
            bytes_written,
        })
    }
}

/// Joins `root` with the stored relative `path`, rejecting any attempt to
/// climb out via `..` — `path` only ever comes from our own project_file
/// rows, but this keeps a malformed path from escaping the checkout root.
fn safe_join(root: &Path, path: &str) -> Result<PathBuf> {
    let rel = Path::new(path);
    if rel.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(Error::IntegrityViolation(format!(
            "refusing to materialize path outside checkout root: {path}"
        )));
    }
    Ok(root.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmdb_core::{CancellationToken, EngineConfig, RuleSet};
    use sha2::{Digest, Sha256};
    use std::fs;

    fn engine_with_import(files: &[(&str, &[u8])]) -> (Engine, tempfile::TempDir) {
        let root = tempfile::tempdir().unwrap();
        let db_path = root.path().join("store.db");
        let engine = Engine::open_at(db_path, EngineConfig::default()).unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(&src).unwrap();
        for (name, content) in files {
            fs::write(src.join(name), content).unwrap();
        }
        engine.import("p", None, None, &src, &RuleSet::default_rules(), &CancellationToken::new()).unwrap();
        (engine, root)
    }

    #[test]
    fn checkout_writes_byte_identical_files() {
        let (engine, root) = engine_with_import(&[("a.txt", b"hello"), ("b.bin", &[0, 1, 2])]);
        let target = root.path().join("checkout1");
        let result = engine.checkout("p", &target, None, false, &CancellationToken::new()).unwrap();
        assert_eq!(result.files_written, 2);
        assert_eq!(result.bytes_written, 8);

        let a_bytes = fs::read(target.join("a.txt")).unwrap();
        assert_eq!(Sha256::digest(&a_bytes).as_slice(), Sha256::digest(b"hello").as_slice());
    }

    #[test]
    fn checkout_refuses_nonempty_target_without_force() {
        let (engine, root) = engine_with_import(&[("a.txt", b"hi")]);
        let target = root.path().join("dirty");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stray.txt"), b"pre-existing").unwrap();

        let err = engine.checkout("p", &target, None, false, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, Error::IOError { .. }));
    }

    #[test]
    fn checkout_records_snapshot_rows() {
        let (engine, root) = engine_with_import(&[("a.txt", b"hi")]);
        let target = root.path().join("checkout1");
        engine.checkout("p", &target, None, false, &CancellationToken::new()).unwrap();

        engine
            .with_connection(|conn| {
                let checkout = query::get_checkout(conn, engine.project_id("p").unwrap(), &target.display().to_string())?
                    .unwrap();
                let rows = query::snapshot_by_path(conn, checkout.id)?;
                assert_eq!(rows.len(), 1);
                Ok(())
            })
            .unwrap();
    }
}

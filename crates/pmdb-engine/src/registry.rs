//! Checkout registry (§4.H): lists known checkouts and prunes the ones
//! whose working directory has gone away.

use pmdb_core::{CheckoutListEntry, Result};
use tracing::{info, instrument};

use crate::engine::Engine;
use crate::query;

impl Engine {
    pub fn checkout_list(&self, slug: Option<&str>) -> Result<Vec<CheckoutListEntry>> {
        self.with_connection(|conn| {
            let project_id = slug
                .map(|s| query::get_project_by_slug(conn, s))
                .transpose()?
                .map(|p| p.id);
            let rows = query::list_checkouts(conn, project_id)?;
            Ok(rows
                .into_iter()
                .map(|checkout| {
                    let path_exists = std::path::Path::new(&checkout.path).exists();
                    CheckoutListEntry { checkout, path_exists }
                })
                .collect())
        })
    }

    /// Deletes Checkout rows whose target directory no longer exists.
    /// Rows whose directory is still present are never removed, `force`
    /// or not (§4.H) — `force` only gates whether this call actually
    /// performs the deletion versus returning a dry-run count.
    #[instrument(skip(self))]
    pub fn checkout_prune(&self, slug: Option<&str>, force: bool) -> Result<u64> {
        let candidates = self.checkout_list(slug)?;
        let stale: Vec<_> = candidates.into_iter().filter(|e| !e.path_exists).collect();
        let count = stale.len() as u64;

        if force {
            self.with_txn(|conn| {
                for entry in &stale {
                    query::delete_checkout(conn, entry.checkout.id)?;
                }
                Ok(())
            })?;
        }

        info!(count, force, "pruned checkouts");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmdb_core::{CancellationToken, EngineConfig, RuleSet};
    use std::fs;

    fn engine_with_checkout() -> (Engine, tempfile::TempDir, std::path::PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let db_path = root.path().join("store.db");
        let engine = Engine::open_at(db_path, EngineConfig::default()).unwrap();
        let src = root.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.txt"), b"hi").unwrap();
        engine.import("p", None, None, &src, &RuleSet::default_rules(), &CancellationToken::new()).unwrap();
        let target = root.path().join("checkout1");
        engine.checkout("p", &target, None, false, &CancellationToken::new()).unwrap();
        (engine, root, target)
    }

    #[test]
    fn checkout_list_reports_path_existence() {
        let (engine, _root, target) = engine_with_checkout();
        let entries = engine.checkout_list(None).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].path_exists);
        assert_eq!(entries[0].checkout.path, target.display().to_string());
    }

    #[test]
    fn prune_reports_zero_when_all_checkouts_are_live() {
        let (engine, _root, _target) = engine_with_checkout();
        let pruned = engine.checkout_prune(None, true).unwrap();
        assert_eq!(pruned, 0);
        assert_eq!(engine.checkout_list(None).unwrap().len(), 1);
    }

    #[test]
    fn prune_without_force_is_a_dry_run() {
        let (engine, _root, target) = engine_with_checkout();
        fs::remove_dir_all(&target).unwrap();
        let pruned = engine.checkout_prune(None, false).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(engine.checkout_list(None).unwrap().len(), 1, "dry run must not delete");
    }

    #[test]
    fn prune_with_force_removes_stale_checkouts() {
        let (engine, _root, target) = engine_with_checkout();
        fs::remove_dir_all(&target).unwrap();
        let pruned = engine.checkout_prune(None, true).unwrap();
        assert_eq!(pruned, 1);
        assert!(engine.checkout_list(None).unwrap().is_empty());
    }
}

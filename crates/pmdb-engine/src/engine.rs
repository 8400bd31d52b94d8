//! The engine object (§9's "module-level database handle" note): every
//! piece of state the original kept in a process-global thread-local lives
//! here instead, so tests can spin up as many isolated engines as they like.

use std::path::{Path, PathBuf};
use std::thread::ThreadId;

use dashmap::DashMap;
use pmdb_core::{EngineConfig, Error, RuleSet};
use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::schema;
use crate::txn::Txn;

/// Central orchestration object. `&self` methods are safe to call
/// concurrently from many threads: each thread gets its own lazily-opened
/// `rusqlite::Connection`, kept alive in `connections` for reuse.
pub struct Engine {
    db_path: PathBuf,
    pub(crate) config: EngineConfig,
    pub(crate) rule_set: RuleSet,
    connections: DashMap<ThreadId, Connection>,
}

impl Engine {
    /// Opens (creating if absent) the database at `config.db_path`, or the
    /// OS-appropriate default (`$XDG_DATA_HOME/pmdb/store.db` and
    /// equivalents) when unset.
    pub fn open(config: EngineConfig) -> Result<Self, Error> {
        let db_path = resolve_db_path(config.db_path.as_deref())?;
        Self::open_at(db_path, config)
    }

    /// Reads `config_path` as JSON into an [`EngineConfig`] and opens the
    /// engine with it (§6's "Configuration options recognized on engine
    /// init" — callers such as a CLI front-end persist these as a plain
    /// JSON file rather than re-deriving the struct's defaults each run).
    pub fn open_with_config_file(config_path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(config_path)
            .map_err(|e| Error::io(config_path.display().to_string(), e.to_string()))?;
        let config: EngineConfig = serde_json::from_str(&raw).map_err(|e| {
            Error::io(config_path.display().to_string(), format!("invalid engine config: {e}"))
        })?;
        Self::open(config)
    }

    /// Opens a database at an explicit path — the entry point tests and
    /// embedders use to avoid touching the real data directory.
    pub fn open_at(db_path: PathBuf, config: EngineConfig) -> Result<Self, Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(parent.display().to_string(), e.to_string()))?;
        }
        let rule_set = rule_set_for(&config);
        let engine = Self {
            db_path,
            config,
            rule_set,
            connections: DashMap::new(),
        };
        let conn = engine.open_connection()?;
        schema::init(&conn)?;
        engine.connections.insert(std::thread::current().id(), conn);
        Ok(engine)
    }

    /// An engine backed by a private in-memory database — for tests that
    /// don't need WAL/cross-thread semantics.
    pub fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        schema::init(&conn)?;
        let connections = DashMap::new();
        connections.insert(std::thread::current().id(), conn);
        let config = EngineConfig::default();
        let rule_set = rule_set_for(&config);
        Ok(Self {
            db_path: PathBuf::from(":memory:"),
            config,
            rule_set,
            connections,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    fn open_connection(&self) -> Result<Connection, Error> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_millis(self.config.busy_timeout_ms as u64))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    /// Runs `f` against this thread's connection in autocommit mode. Used
    /// for plain reads that don't need transactional isolation.
    pub(crate) fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let tid = std::thread::current().id();
        if !self.connections.contains_key(&tid) {
            let conn = self.open_connection()?;
            self.connections.insert(tid, conn);
        }
        let conn = self.connections.get(&tid).expect("connection just ensured");
        f(&conn)
    }

    /// Runs `f` inside a single `BEGIN IMMEDIATE` transaction on this
    /// thread's connection (§4.B, §5). Commits iff `f` returns `Ok`;
    /// otherwise the transaction is rolled back and `f`'s error propagated.
    #[instrument(skip(self, f))]
    pub(crate) fn with_txn<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let tid = std::thread::current().id();
        if !self.connections.contains_key(&tid) {
            let conn = self.open_connection()?;
            self.connections.insert(tid, conn);
        }
        let mut entry = self.connections.get_mut(&tid).expect("connection just ensured");
        let conn = entry.value_mut();
        let txn = Txn::begin(conn)?;
        match f(txn.as_connection()) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "rolling back transaction");
                let _ = txn.rollback();
                Err(err)
            }
        }
    }
}

/// Builds the engine-wide `RuleSet`, applying `config.scan_max_file_bytes`
/// (§6) over the otherwise-fixed default classification rules so the
/// configured ceiling actually reaches the scanner instead of being
/// shadowed by `RuleSet::default_rules()`'s own default.
fn rule_set_for(config: &EngineConfig) -> RuleSet {
    let mut rule_set = RuleSet::default_rules();
    rule_set.max_file_bytes = config.scan_max_file_bytes;
    rule_set
}

fn resolve_db_path(override_path: Option<&str>) -> Result<PathBuf, Error> {
    if let Some(p) = override_path {
        return Ok(PathBuf::from(p));
    }
    let data_dir = dirs::data_dir().ok_or_else(|| {
        Error::io("<data_dir>", "could not determine OS-appropriate data directory")
    })?;
    Ok(data_dir.join("pmdb").join("store.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_at_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("store.db");
        let engine = Engine::open_at(db_path.clone(), EngineConfig::default()).unwrap();
        assert!(db_path.exists());
        assert_eq!(engine.db_path(), db_path);
    }

    #[test]
    fn open_with_config_file_parses_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let config_path = dir.path().join("pmdb.json");
        std::fs::write(
            &config_path,
            format!(r#"{{"db_path": "{}", "busy_timeout_ms": 1500}}"#, db_path.display()),
        )
        .unwrap();

        let engine = Engine::open_with_config_file(&config_path).unwrap();
        assert_eq!(engine.config().busy_timeout_ms, 1500);
        assert_eq!(engine.db_path(), db_path);
    }

    #[test]
    fn scan_max_file_bytes_reaches_the_rule_set() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let config = EngineConfig {
            scan_max_file_bytes: 64,
            ..EngineConfig::default()
        };
        let engine = Engine::open_at(db_path, config).unwrap();
        assert_eq!(engine.rule_set().max_file_bytes, 64);
    }

    #[test]
    fn in_memory_engine_initializes_schema() {
        let engine = Engine::open_in_memory().unwrap();
        engine
            .with_connection(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM project", [], |r| r.get(0))?;
                assert_eq!(count, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn with_txn_rolls_back_on_error() {
        let engine = Engine::open_in_memory().unwrap();
        let result: Result<(), Error> = engine.with_txn(|conn| {
            conn.execute(
                "INSERT INTO project (slug, name, created_at, updated_at) VALUES ('p','p',0,0)",
                [],
            )?;
            Err(Error::CancelledByCaller)
        });
        assert!(result.is_err());
        engine
            .with_connection(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM project", [], |r| r.get(0))?;
                assert_eq!(count, 0);
                Ok(())
            })
            .unwrap();
    }
}

//! Transaction gateway (§4.B): the single point through which every
//! multi-statement mutation runs, expressed as the corpus's RAII-guard idiom
//! rather than a context-manager — a [`Txn`] rolls back on drop unless the
//! caller explicitly commits it.

use pmdb_core::Result;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, instrument};

/// A single serializable transaction scope, acquired with `BEGIN IMMEDIATE`
/// so two writers cannot both pass a diff/conflict-detection stage before
/// one of them commits (§5).
pub struct Txn<'conn> {
    inner: Option<rusqlite::Transaction<'conn>>,
}

impl<'conn> Txn<'conn> {
    #[instrument(skip(conn))]
    pub fn begin(conn: &'conn mut Connection) -> Result<Self> {
        debug!("beginning transaction");
        let inner = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self { inner: Some(inner) })
    }

    pub fn as_connection(&self) -> &rusqlite::Transaction<'conn> {
        self.inner.as_ref().expect("transaction already finalized")
    }

    #[instrument(skip(self))]
    pub fn commit(mut self) -> Result<()> {
        let inner = self.inner.take().expect("transaction already finalized");
        inner.commit()?;
        debug!("transaction committed");
        Ok(())
    }

    /// Explicit rollback. Equivalent to dropping the guard without calling
    /// `commit()`, provided for call sites where the intent should read
    /// clearly at the point of failure.
    #[instrument(skip(self))]
    pub fn rollback(mut self) -> Result<()> {
        let inner = self.inner.take().expect("transaction already finalized");
        inner.rollback()?;
        debug!("transaction rolled back");
        Ok(())
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        // `inner`'s own Drop rolls back if it was never committed; this
        // guard's only job is to make that the *only* path left once the
        // scope exits via `?` or panic.
        if self.inner.is_some() {
            debug!("transaction dropped without commit; rolling back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncommitted_txn_rolls_back() {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::schema::init(&conn).unwrap();
        {
            let txn = Txn::begin(&mut conn).unwrap();
            txn.as_connection()
                .execute(
                    "INSERT INTO project (slug, name, created_at, updated_at) VALUES ('p','p',0,0)",
                    [],
                )
                .unwrap();
            // dropped without commit
        }
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM project", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn committed_txn_persists() {
        let mut conn = Connection::open_in_memory().unwrap();
        crate::schema::init(&conn).unwrap();
        let txn = Txn::begin(&mut conn).unwrap();
        txn.as_connection()
            .execute(
                "INSERT INTO project (slug, name, created_at, updated_at) VALUES ('p','p',0,0)",
                [],
            )
            .unwrap();
        txn.commit().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM project", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}

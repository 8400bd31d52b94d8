//! Content blob store (§4.C): insert-if-absent content keyed by SHA-256.
//! Reference counts are maintained entirely by the triggers in
//! [`crate::schema`]; this module never touches `reference_count` directly.

use pmdb_core::{BlobVerifyOnRead, ContentKind, Error, EntityKind, Payload, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};

pub fn hash_payload(payload: &Payload) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(digest)
}

/// Inserts `payload` under its SHA-256 if no row exists yet. Idempotent:
/// concurrent `put`s of the same hash collide harmlessly on the primary key.
///
/// Returns `(content_hash, inserted)` — `inserted` is `false` when the blob
/// was already present, which callers use to avoid double-counting
/// "blobs added" in import/commit summaries.
pub fn put(
    conn: &rusqlite::Connection,
    payload: &Payload,
    encoding: Option<&str>,
    now_ms: i64,
) -> Result<(String, bool)> {
    let hash = hash_payload(payload);
    let kind = payload.kind();
    let (text, binary): (Option<&str>, Option<&[u8]>) = match payload {
        Payload::Text(s) => (Some(s.as_str()), None),
        Payload::Binary(b) => (None, Some(b.as_slice())),
    };

    let changed = conn.execute(
        "INSERT OR IGNORE INTO content_blob
            (content_hash, text_payload, binary_payload, kind, encoding, size_bytes, first_seen_at, reference_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
        params![hash, text, binary, kind.as_str(), encoding, payload.len() as i64, now_ms],
    )?;

    Ok((hash, changed == 1))
}

pub fn exists(conn: &rusqlite::Connection, content_hash: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM content_blob WHERE content_hash = ?1",
            params![content_hash],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Fetches a blob's payload, kind, and encoding. Verifies the hash against
/// the payload per `verify`, surfacing a mismatch as `IntegrityViolation` —
/// the spec's "SHOULD verify on read in debug builds" made into an explicit,
/// caller-selected policy (`EngineConfig::blob_verify_on_read`).
pub fn get(
    conn: &rusqlite::Connection,
    content_hash: &str,
    verify: BlobVerifyOnRead,
) -> Result<(Payload, ContentKind, Option<String>)> {
    let row = conn
        .query_row(
            "SELECT text_payload, binary_payload, kind, encoding
             FROM content_blob WHERE content_hash = ?1",
            params![content_hash],
            |row| {
                let text: Option<String> = row.get(0)?;
                let binary: Option<Vec<u8>> = row.get(1)?;
                let kind: String = row.get(2)?;
                let encoding: Option<String> = row.get(3)?;
                Ok((text, binary, kind, encoding))
            },
        )
        .optional()?;

    let Some((text, binary, kind, encoding)) = row else {
        return Err(Error::not_found(EntityKind::Blob, content_hash));
    };

    let payload = match (text, binary) {
        (Some(t), None) => Payload::Text(t),
        (None, Some(b)) => Payload::Binary(b),
        _ => {
            return Err(Error::IntegrityViolation(format!(
                "blob {content_hash} has neither or both of text/binary payload"
            )))
        }
    };
    let kind: ContentKind = kind.parse().map_err(Error::IntegrityViolation)?;

    if should_verify(verify, content_hash) {
        let actual = hash_payload(&payload);
        if actual != content_hash {
            return Err(Error::IntegrityViolation(format!(
                "blob {content_hash} payload hashes to {actual}"
            )));
        }
    }

    Ok((payload, kind, encoding))
}

fn should_verify(policy: BlobVerifyOnRead, content_hash: &str) -> bool {
    match policy {
        BlobVerifyOnRead::Off => false,
        BlobVerifyOnRead::Always => true,
        // Deterministic ~1-in-16 sample keyed on the hash itself, so repeat
        // reads of the same blob are stable within a process rather than
        // flapping on each call (no RNG dependency for this low-stakes path).
        BlobVerifyOnRead::Sample => content_hash.as_bytes().first().is_some_and(|b| b % 16 == 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init(&conn).unwrap();
        conn
    }

    #[test]
    fn put_is_idempotent() {
        let conn = conn();
        let payload = Payload::Text("hello".into());
        let (h1, inserted1) = put(&conn, &payload, Some("utf-8"), 0).unwrap();
        let (h2, inserted2) = put(&conn, &payload, Some("utf-8"), 0).unwrap();
        assert_eq!(h1, h2);
        assert!(inserted1);
        assert!(!inserted2);
    }

    #[test]
    fn hash_matches_sha256() {
        let payload = Payload::Text("hello".into());
        let hash = hash_payload(&payload);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn get_roundtrips_binary() {
        let conn = conn();
        let payload = Payload::Binary(vec![0, 1, 2]);
        let (hash, _) = put(&conn, &payload, None, 0).unwrap();
        let (got, kind, encoding) = get(&conn, &hash, BlobVerifyOnRead::Always).unwrap();
        assert_eq!(got, payload);
        assert_eq!(kind, ContentKind::Binary);
        assert_eq!(encoding, None);
    }

    #[test]
    fn get_missing_is_not_found() {
        let conn = conn();
        let err = get(&conn, "deadbeef", BlobVerifyOnRead::Off).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn exists_reflects_insert() {
        let conn = conn();
        let payload = Payload::Text("x".into());
        assert!(!exists(&conn, &hash_payload(&payload)).unwrap());
        let (hash, _) = put(&conn, &payload, Some("utf-8"), 0).unwrap();
        assert!(exists(&conn, &hash).unwrap());
    }
}

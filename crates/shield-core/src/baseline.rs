//! Encrypted persistent baseline: absolute path → current SHA-256.
//!
//! A single SQLite table holds nondeterministic ciphertexts of both the
//! path and the hash. A deterministic keyed digest of the path carries the
//! UNIQUE index, so one row per plaintext path holds without a linear
//! decrypt-scan. All access is serialized through one connection mutex;
//! this is the process-wide single-writer discipline the engine relies on.

use crate::crypto::{self, KEY_LEN};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;
use zeroize::Zeroizing;

/// Result type for baseline store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto failure: {0}")]
    Crypto(String),
}

pub struct BaselineStore {
    conn: Mutex<Connection>,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl BaselineStore {
    /// Open or create the store at `db_path`, loading (or generating) key
    /// material from `key_path`.
    pub fn open(db_path: &Path, key_path: &Path) -> Result<Self> {
        let key = crypto::load_or_generate_key(key_path)
            .map_err(|e| StoreError::Crypto(e.to_string()))?;
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS files (
                 id INTEGER PRIMARY KEY,
                 path_digest TEXT NOT NULL UNIQUE,
                 path_ct BLOB NOT NULL,
                 hash_ct BLOB NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            key,
        })
    }

    /// Decrypt every row. Rows that fail to decrypt (foreign key, corrupted
    /// blob) are skipped, not fatal.
    pub fn load_all(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT path_ct, hash_ct FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut entries = BTreeMap::new();
        for row in rows {
            let (path_ct, hash_ct) = row?;
            let path = crypto::open(&self.key, &path_ct);
            let hash = crypto::open(&self.key, &hash_ct);
            match (path, hash) {
                (Ok(p), Ok(h)) => {
                    match (String::from_utf8(p), String::from_utf8(h)) {
                        (Ok(p), Ok(h)) => {
                            entries.insert(p, h);
                        }
                        _ => warn!("skipping baseline row with non-utf8 plaintext"),
                    }
                }
                _ => warn!("skipping undecryptable baseline row"),
            }
        }
        Ok(entries)
    }

    /// Fetch the stored hash for an exact path, decrypting a single row.
    pub fn get(&self, path: &str) -> Result<Option<String>> {
        let digest = crypto::path_digest(&self.key, path);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT hash_ct FROM files WHERE path_digest = ?1")?;
        let mut rows = stmt.query(params![digest])?;
        match rows.next()? {
            Some(row) => {
                let hash_ct: Vec<u8> = row.get(0)?;
                let hash = crypto::open(&self.key, &hash_ct)
                    .map_err(|e| StoreError::Crypto(e.to_string()))?;
                String::from_utf8(hash)
                    .map(Some)
                    .map_err(|e| StoreError::Crypto(e.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Upsert one record. The digest column guarantees a single row per
    /// plaintext path even though the ciphertexts never repeat.
    pub fn put(&self, path: &str, hash: &str) -> Result<()> {
        let digest = crypto::path_digest(&self.key, path);
        let path_ct = self.seal(path)?;
        let hash_ct = self.seal(hash)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO files (path_digest, path_ct, hash_ct) VALUES (?1, ?2, ?3)",
            params![digest, path_ct, hash_ct],
        )?;
        Ok(())
    }

    /// Upsert many records in a single transaction.
    pub fn put_batch(&self, pairs: &[(String, String)]) -> Result<()> {
        if pairs.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO files (path_digest, path_ct, hash_ct) VALUES (?1, ?2, ?3)",
            )?;
            for (path, hash) in pairs {
                let digest = crypto::path_digest(&self.key, path);
                let path_ct = crypto::seal(&self.key, path.as_bytes())
                    .map_err(|e| StoreError::Crypto(e.to_string()))?;
                let hash_ct = crypto::seal(&self.key, hash.as_bytes())
                    .map_err(|e| StoreError::Crypto(e.to_string()))?;
                stmt.execute(params![digest, path_ct, hash_ct])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove the record for an exact path, if present.
    pub fn delete(&self, path: &str) -> Result<()> {
        let digest = crypto::path_digest(&self.key, path);
        let conn = self.conn.lock();
        conn.execute("DELETE FROM files WHERE path_digest = ?1", params![digest])?;
        Ok(())
    }

    /// Remove all records.
    pub fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM files", [])?;
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn seal(&self, plaintext: &str) -> Result<Vec<u8>> {
        crypto::seal(&self.key, plaintext.as_bytes()).map_err(|e| StoreError::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> BaselineStore {
        BaselineStore::open(&dir.join("integrity.db"), &dir.join("secret.key")).unwrap()
    }

    #[test]
    fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.put("/data/a.txt", "aaaa").unwrap();
        assert_eq!(store.get("/data/a.txt").unwrap().unwrap(), "aaaa");
        assert!(store.get("/data/missing").unwrap().is_none());
    }

    #[test]
    fn put_twice_keeps_one_row_with_latest_hash() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.put("/data/a.txt", "h1").unwrap();
        store.put("/data/a.txt", "h2").unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["/data/a.txt"], "h2");
    }

    #[test]
    fn delete_removes_record() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.put("/data/a.txt", "h1").unwrap();
        store.delete("/data/a.txt").unwrap();
        assert!(!store.load_all().unwrap().contains_key("/data/a.txt"));
    }

    #[test]
    fn batch_commits_all_pairs() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let pairs: Vec<(String, String)> = (0..10)
            .map(|i| (format!("/data/f{i}"), format!("hash{i}")))
            .collect();
        store.put_batch(&pairs).unwrap();
        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all["/data/f7"], "hash7");
    }

    #[test]
    fn clear_empties_store() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.put("/data/a.txt", "h1").unwrap();
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn rows_under_a_lost_key_are_skipped() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store.put("/data/a.txt", "h1").unwrap();
        }
        // A fresh key means every existing row fails to decrypt.
        std::fs::remove_file(dir.path().join("secret.key")).unwrap();
        let store = store_in(dir.path());
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = store_in(dir.path());
            store.put("/data/a.txt", "h1").unwrap();
        }
        let store = store_in(dir.path());
        assert_eq!(store.get("/data/a.txt").unwrap().unwrap(), "h1");
    }
}

use rusqlite::{params, Connection};
use std::path::Path;

use crate::constants;
use crate::error::Result;

/// One cached archive as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub location: String,
    pub file_name: String,
    pub sha256: String,
    pub size_bytes: u64,
    pub fetched_at: i64,
}

/// SQLite manifest of the archive cache, keyed by resource location.
pub struct CacheMeta {
    conn: Connection,
}

impl CacheMeta {
    pub fn open_at_root<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        std::fs::create_dir_all(cache_dir.as_ref())?;
        let db_path = cache_dir.as_ref().join(constants::CACHE_META_FILE);
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS cached_archives (
                location    TEXT PRIMARY KEY,
                file_name   TEXT NOT NULL,
                sha256      TEXT NOT NULL,
                size_bytes  INTEGER NOT NULL,
                fetched_at  INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    pub fn get(&self, location: &str) -> Result<Option<CacheEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_name, sha256, size_bytes, fetched_at FROM cached_archives WHERE location = ?1",
        )?;
        let mut rows = stmt.query(params![location])?;
        if let Some(row) = rows.next()? {
            Ok(Some(CacheEntry {
                location: location.to_string(),
                file_name: row.get(0)?,
                sha256: row.get(1)?,
                size_bytes: row.get::<_, i64>(2)? as u64,
                fetched_at: row.get(3)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO cached_archives (location, file_name, sha256, size_bytes, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(location) DO UPDATE SET
                file_name=excluded.file_name,
                sha256=excluded.sha256,
                size_bytes=excluded.size_bytes,
                fetched_at=excluded.fetched_at",
            params![
                entry.location,
                entry.file_name,
                entry.sha256,
                entry.size_bytes as i64,
                entry.fetched_at
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, location: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM cached_archives WHERE location = ?1",
            params![location],
        )?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM cached_archives", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(location: &str, sha: &str) -> CacheEntry {
        CacheEntry {
            location: location.into(),
            file_name: "pubmed24n0001.xml.gz".into(),
            sha256: sha.into(),
            size_bytes: 42,
            fetched_at: 1_700_000_000,
        }
    }

    #[test]
    fn put_get_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let meta = CacheMeta::open_at_root(dir.path()).unwrap();
        assert_eq!(meta.get("https://example.org/a.xml.gz").unwrap(), None);

        meta.put(&entry("https://example.org/a.xml.gz", "aa")).unwrap();
        meta.put(&entry("https://example.org/a.xml.gz", "bb")).unwrap();
        let got = meta.get("https://example.org/a.xml.gz").unwrap().unwrap();
        assert_eq!(got.sha256, "bb");
        assert_eq!(got.size_bytes, 42);
        assert_eq!(meta.len().unwrap(), 1);

        meta.remove("https://example.org/a.xml.gz").unwrap();
        assert_eq!(meta.len().unwrap(), 0);
    }

    #[test]
    fn manifest_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let meta = CacheMeta::open_at_root(dir.path()).unwrap();
            meta.put(&entry("/mirror/a.xml.gz", "cc")).unwrap();
        }
        let meta = CacheMeta::open_at_root(dir.path()).unwrap();
        assert_eq!(meta.get("/mirror/a.xml.gz").unwrap().unwrap().sha256, "cc");
    }
}

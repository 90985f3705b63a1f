//! SQLite backend for [`CacheStore`].
//!
//! Stores live in the `stores` table; entries reference their store with
//! `ON DELETE CASCADE`, so deleting a store is a single atomic statement.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::connection::CacheDb;
use super::store::{CacheStore, CacheVersion, StoreEntry};
use crate::Error;
use crate::response::CapturedResponse;

type RawEntry = (String, String, i64, String, Vec<u8>, String);

fn decode_entry(key: String, (method, url, status, headers_json, body, written_at): RawEntry) -> Result<StoreEntry, Error> {
    let status = u16::try_from(status).map_err(|_| Error::CorruptEntry(format!("status {status} for {url}")))?;
    let headers: Vec<(String, String)> =
        serde_json::from_str(&headers_json).map_err(|e| Error::CorruptEntry(format!("headers for {url}: {e}")))?;
    let written_at = DateTime::parse_from_rfc3339(&written_at)
        .map_err(|e| Error::CorruptEntry(format!("written_at for {url}: {e}")))?
        .with_timezone(&Utc);

    Ok(StoreEntry {
        key,
        method,
        url,
        response: CapturedResponse { status, headers, body: Bytes::from(body) },
        written_at,
    })
}

#[async_trait]
impl CacheStore for CacheDb {
    async fn create(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        let version = CacheVersion::from_store_name(&name).map(|v| v.0);
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO stores (name, version, created_at) VALUES (?1, ?2, ?3)",
                    params![name, version, now],
                )?;
                Ok(inserted == 1)
            })
            .await
            .map_err(Error::from)
    }

    async fn has(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM stores WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    async fn names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM stores ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, rusqlite::Error>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM stores WHERE name = ?1", params![name])?;
                Ok(deleted == 1)
            })
            .await
            .map_err(Error::from)
    }

    async fn delete_except(&self, keep: &str) -> Result<Vec<String>, Error> {
        let keep = keep.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let tx = conn.transaction()?;
                let doomed = {
                    let mut stmt = tx.prepare("SELECT name FROM stores WHERE name != ?1 ORDER BY name")?;
                    stmt.query_map(params![keep], |row| row.get(0))?
                        .collect::<Result<Vec<String>, rusqlite::Error>>()?
                };
                tx.execute("DELETE FROM stores WHERE name != ?1", params![keep])?;
                tx.commit()?;
                Ok(doomed)
            })
            .await
            .map_err(Error::from)
    }

    async fn get(&self, name: &str, key: &str) -> Result<Option<StoreEntry>, Error> {
        let name = name.to_string();
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<StoreEntry>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT method, url, status, headers_json, body, written_at
                     FROM entries WHERE store = ?1 AND key = ?2",
                )?;

                let result = stmt.query_row(params![name, key], |row| -> rusqlite::Result<RawEntry> {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?))
                });

                match result {
                    Ok(raw) => decode_entry(key, raw).map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    async fn put(&self, name: &str, entry: StoreEntry) -> Result<(), Error> {
        let name = name.to_string();
        let headers_json = serde_json::to_string(&entry.response.headers)?;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;

                let exists: bool =
                    tx.query_row("SELECT EXISTS(SELECT 1 FROM stores WHERE name = ?1)", params![name], |row| {
                        row.get(0)
                    })?;
                if !exists {
                    return Err(Error::StoreMissing(name));
                }

                tx.execute(
                    "INSERT OR REPLACE INTO entries (
                        store, key, method, url, status, headers_json, body, written_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        &name,
                        &entry.key,
                        &entry.method,
                        &entry.url,
                        entry.response.status as i64,
                        &headers_json,
                        &entry.response.body[..],
                        entry.written_at.to_rfc3339(),
                    ],
                )?;

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn len(&self, name: &str) -> Result<usize, Error> {
        if !self.has(name).await? {
            return Err(Error::StoreMissing(name.to_string()));
        }

        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries WHERE store = ?1", params![name], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn make_entry(path: &str, body: &'static str) -> StoreEntry {
        let url = Url::parse("https://app.example").unwrap().join(path).unwrap();
        let response = CapturedResponse::new(200, vec![("Content-Type".into(), "text/html".into())], body);
        StoreEntry::capture("GET", &url, response)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.create("offgrid-v1").await.unwrap());

        let entry = make_entry("/offline", "<h1>offline</h1>");
        db.put("offgrid-v1", entry.clone()).await.unwrap();

        let stored = db.get("offgrid-v1", &entry.key).await.unwrap().unwrap();
        assert_eq!(stored.url, "https://app.example/offline");
        assert_eq!(stored.response, entry.response);
        assert_eq!(stored.written_at.timestamp(), entry.written_at.timestamp());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.create("offgrid-v1").await.unwrap();
        assert!(db.get("offgrid-v1", "nonexistent").await.unwrap().is_none());
        assert!(db.get("offgrid-v2", "nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_whole_entry() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.create("offgrid-v1").await.unwrap();

        let first = make_entry("/", "A");
        let key = first.key.clone();
        db.put("offgrid-v1", first).await.unwrap();
        db.put("offgrid-v1", make_entry("/", "B")).await.unwrap();

        let stored = db.get("offgrid-v1", &key).await.unwrap().unwrap();
        assert_eq!(&stored.response.body[..], b"B");
        assert_eq!(db.len("offgrid-v1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_into_missing_store() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let result = db.put("offgrid-v7", make_entry("/", "x")).await;
        assert!(matches!(result, Err(Error::StoreMissing(name)) if name == "offgrid-v7"));
    }

    #[tokio::test]
    async fn test_delete_cascades_entries() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.create("offgrid-v1").await.unwrap();
        db.create("offgrid-v2").await.unwrap();
        let entry = make_entry("/", "x");
        db.put("offgrid-v1", entry.clone()).await.unwrap();
        db.put("offgrid-v2", entry.clone()).await.unwrap();

        assert!(db.delete("offgrid-v1").await.unwrap());
        assert!(!db.delete("offgrid-v1").await.unwrap());

        assert_eq!(db.names().await.unwrap(), vec!["offgrid-v2".to_string()]);
        let orphans: i64 = db
            .conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM entries WHERE store = 'offgrid-v1'", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn test_delete_except_removes_others_and_entries() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for name in ["offgrid-v1", "offgrid-v2", "offgrid-v3"] {
            db.create(name).await.unwrap();
            db.put(name, make_entry("/", "x")).await.unwrap();
        }

        let deleted = db.delete_except("offgrid-v3").await.unwrap();
        assert_eq!(deleted, vec!["offgrid-v1".to_string(), "offgrid-v2".to_string()]);
        assert_eq!(db.names().await.unwrap(), vec!["offgrid-v3".to_string()]);
        assert_eq!(db.len("offgrid-v3").await.unwrap(), 1);

        let remaining: i64 = db
            .conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0)))
            .await
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_create_twice() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.create("offgrid-v3").await.unwrap());
        assert!(!db.create("offgrid-v3").await.unwrap());
        assert!(db.has("offgrid-v3").await.unwrap());
    }
}

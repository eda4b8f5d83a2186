//! Rulestore persistence: SQLite-backed `ResourceStore` with per-uid revision history.
//! Keep code tiny and predictable.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use rulestore_core::{ApiError, ApiResult, Delta, DeltaKind, ObjectKey, ObjectList, StoredObject, Uid};
use rulestore_store::{version, EventBus, ResourceStore};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::broadcast;
use tracing::debug;

/// One retained revision of an object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Revision {
    pub uid: Uid,
    pub rv: u64,
    pub ts: i64,
    pub raw: Json,
}

/// SQLite-backed store. Simple, synchronous; every write is one transaction.
pub struct SqliteStore {
    db: Mutex<Connection>,
    events: EventBus,
    history_depth: usize,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("RULESTORE_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let started = std::time::Instant::now();
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", &"WAL").ok();
        db.pragma_update(None, "synchronous", &"NORMAL").ok();
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS objects (
                kind      TEXT NOT NULL,
                namespace TEXT NOT NULL,
                name      TEXT NOT NULL,
                uid       BLOB NOT NULL,
                rv        INTEGER NOT NULL,
                doc       TEXT NOT NULL,
                PRIMARY KEY (kind, namespace, name)
            );
            CREATE TABLE IF NOT EXISTS revision (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                rv INTEGER NOT NULL
            );
            INSERT OR IGNORE INTO revision(id, rv) VALUES (0, 0);
            CREATE TABLE IF NOT EXISTS history (
                uid BLOB NOT NULL,
                rv  INTEGER NOT NULL,
                ts  INTEGER NOT NULL,
                doc BLOB NOT NULL
            );",
        )
        .context("creating tables")?;
        db.execute("CREATE INDEX IF NOT EXISTS idx_history_uid_rv ON history(uid, rv DESC)", []).ok();
        let me = Self { db: Mutex::new(db), events: EventBus::new(1024), history_depth: 10 };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        debug!(path, "persist: opened");
        Ok(me)
    }

    /// Number of revisions retained per uid (at least one).
    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = depth.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.events = EventBus::new(capacity);
        self
    }

    /// Retained revisions of `uid`, newest first.
    pub fn history(&self, uid: Uid, limit: Option<usize>) -> Result<Vec<Revision>> {
        let started = std::time::Instant::now();
        let cap = limit.unwrap_or(self.history_depth);
        let db = self.db.lock().map_err(|_| anyhow!("sqlite connection lock poisoned"))?;
        let mut stmt = db.prepare("SELECT rv, ts, doc FROM history WHERE uid = ?1 ORDER BY rv DESC LIMIT ?2")?;
        let mut rows = stmt.query((uid.as_slice(), cap as i64))?;
        let mut out: Vec<Revision> = Vec::new();
        while let Some(row) = rows.next()? {
            let rv: i64 = row.get(0)?;
            let ts: i64 = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let raw = serde_json::from_str(&maybe_decompress(&blob)).context("decoding history document")?;
            out.push(Revision { uid, rv: rv as u64, ts, raw });
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn lock(&self) -> ApiResult<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| ApiError::internal("sqlite connection lock poisoned"))
    }
}

fn sql_err(e: anyhow::Error) -> ApiError {
    counter!("persist_err_total", 1u64);
    ApiError::Internal(format!("{:#}", e))
}

fn load(db: &Connection, key: &ObjectKey) -> Result<Option<StoredObject>> {
    db.query_row(
        "SELECT uid, rv, doc FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3",
        (&key.kind, &key.namespace, &key.name),
        |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
    )
    .optional()
    .with_context(|| format!("reading {}", key))?
    .map(|(uid, rv, doc)| decode(key.clone(), &uid, rv, &doc))
    .transpose()
}

fn decode(key: ObjectKey, uid: &[u8], rv: i64, doc: &str) -> Result<StoredObject> {
    let uid: Uid = uid.try_into().map_err(|_| anyhow!("{}: uid is {} bytes", key, uid.len()))?;
    let raw = serde_json::from_str(doc).with_context(|| format!("decoding document of {}", key))?;
    Ok(StoredObject { key, uid, resource_version: rv as u64, raw })
}

fn bump_revision(db: &Connection) -> Result<u64> {
    db.execute("UPDATE revision SET rv = rv + 1 WHERE id = 0", []).context("bumping revision")?;
    current_revision(db)
}

fn current_revision(db: &Connection) -> Result<u64> {
    let rv: i64 = db.query_row("SELECT rv FROM revision WHERE id = 0", [], |r| r.get(0)).context("reading revision")?;
    Ok(rv as u64)
}

fn write(db: &Connection, obj: &StoredObject, depth: usize) -> Result<()> {
    let doc = serde_json::to_string(&obj.raw).context("encoding document")?;
    db.execute(
        "INSERT INTO objects(kind, namespace, name, uid, rv, doc) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(kind, namespace, name) DO UPDATE SET uid = excluded.uid, rv = excluded.rv, doc = excluded.doc",
        (&obj.key.kind, &obj.key.namespace, &obj.key.name, &obj.uid[..], obj.resource_version as i64, &doc),
    )
    .with_context(|| format!("writing {}", obj.key))?;
    db.execute(
        "INSERT INTO history(uid, rv, ts, doc) VALUES (?1, ?2, ?3, ?4)",
        (&obj.uid[..], obj.resource_version as i64, now_ts(), maybe_compress(&doc)),
    )
    .context("recording history")?;
    // Keep latest `depth` revisions per uid (delete older rows by rowid)
    db.execute(
        "DELETE FROM history
         WHERE uid = ?1
           AND rowid NOT IN (
               SELECT rowid FROM history WHERE uid = ?1 ORDER BY rv DESC LIMIT ?2
           )",
        (&obj.uid[..], depth as i64),
    )
    .context("rotating history")?;
    Ok(())
}

fn delta(kind: DeltaKind, obj: &StoredObject) -> Delta {
    Delta { uid: obj.uid, kind, key: obj.key.clone(), resource_version: obj.resource_version, raw: obj.raw.clone() }
}

impl ResourceStore for SqliteStore {
    fn create(&self, key: &ObjectKey, raw: Json) -> ApiResult<StoredObject> {
        let started = std::time::Instant::now();
        let mut db = self.lock()?;
        let tx = db.transaction().context("begin").map_err(sql_err)?;
        if load(&tx, key).map_err(sql_err)?.is_some() {
            return Err(ApiError::AlreadyExists { key: key.clone() });
        }
        let rv = bump_revision(&tx).map_err(sql_err)?;
        let obj = version::stamp_created(key, raw, rv);
        write(&tx, &obj, self.history_depth).map_err(sql_err)?;
        tx.commit().context("commit").map_err(sql_err)?;
        self.events.publish(delta(DeltaKind::Added, &obj));
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(obj)
    }

    fn get(&self, key: &ObjectKey) -> ApiResult<StoredObject> {
        let started = std::time::Instant::now();
        let db = self.lock()?;
        let out = load(&db, key).map_err(sql_err)?.ok_or_else(|| ApiError::NotFound { key: key.clone() });
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        out
    }

    fn update(&self, key: &ObjectKey, expected_rv: u64, raw: Json) -> ApiResult<StoredObject> {
        let started = std::time::Instant::now();
        let mut db = self.lock()?;
        let tx = db.transaction().context("begin").map_err(sql_err)?;
        let prev = load(&tx, key).map_err(sql_err)?.ok_or_else(|| ApiError::NotFound { key: key.clone() })?;
        version::check(key, expected_rv, prev.resource_version)?;
        let rv = bump_revision(&tx).map_err(sql_err)?;
        let obj = version::stamp_updated(&prev, raw, rv);
        write(&tx, &obj, self.history_depth).map_err(sql_err)?;
        tx.commit().context("commit").map_err(sql_err)?;
        self.events.publish(delta(DeltaKind::Modified, &obj));
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(obj)
    }

    fn delete(&self, key: &ObjectKey, expected_rv: Option<u64>) -> ApiResult<StoredObject> {
        let mut db = self.lock()?;
        let tx = db.transaction().context("begin").map_err(sql_err)?;
        let prev = load(&tx, key).map_err(sql_err)?.ok_or_else(|| ApiError::NotFound { key: key.clone() })?;
        if let Some(rv) = expected_rv { version::check(key, rv, prev.resource_version)?; }
        tx.execute("DELETE FROM objects WHERE kind = ?1 AND namespace = ?2 AND name = ?3", (&key.kind, &key.namespace, &key.name))
            .with_context(|| format!("deleting {}", key))
            .map_err(sql_err)?;
        let rv = bump_revision(&tx).map_err(sql_err)?;
        tx.commit().context("commit").map_err(sql_err)?;
        let mut d = delta(DeltaKind::Deleted, &prev);
        d.resource_version = rv;
        self.events.publish(d);
        counter!("persist_delete_total", 1u64);
        Ok(prev)
    }

    fn list(&self, kind: &str, namespace: Option<&str>) -> ApiResult<ObjectList> {
        let db = self.lock()?;
        let read = || -> Result<ObjectList> {
            let resource_version = current_revision(&db)?;
            let mut stmt = db.prepare(
                "SELECT namespace, name, uid, rv, doc FROM objects
                 WHERE kind = ?1 AND (?2 IS NULL OR namespace = ?2)
                 ORDER BY namespace, name",
            )?;
            let mut rows = stmt.query((kind, namespace))?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                let key = ObjectKey::new(kind, row.get::<_, String>(0)?, row.get::<_, String>(1)?);
                let uid: Vec<u8> = row.get(2)?;
                let doc: String = row.get(4)?;
                items.push(decode(key, &uid, row.get(3)?, &doc)?);
            }
            Ok(ObjectList { resource_version, items })
        };
        read().map_err(sql_err)
    }

    fn revision(&self) -> ApiResult<u64> {
        let db = self.lock()?;
        current_revision(&db).map_err(sql_err)
    }

    fn subscribe(&self) -> broadcast::Receiver<Delta> { self.events.subscribe() }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".rulestore");
        let _ = std::fs::create_dir_all(&p);
        p.push("rulestore.db");
        return p.to_string_lossy().to_string();
    }
    "rulestore.db".to_string()
}

pub fn now_ts() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}

pub fn maybe_compress(doc: &str) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("RULESTORE_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(doc.as_bytes(), lvl).unwrap_or_else(|_| doc.as_bytes().to_vec());
    }
    doc.as_bytes().to_vec()
}

pub fn maybe_decompress(blob: &[u8]) -> String {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return String::from_utf8_lossy(&de).to_string();
        }
    }
    String::from_utf8_lossy(blob).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("rulestore-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    fn key(name: &str) -> ObjectKey { ObjectKey::new("RecordingRule", "default", name) }

    #[test]
    fn crud_with_compare_and_set() {
        let s = SqliteStore::open(&temp_db()).unwrap();
        let a = s.create(&key("a"), json!({ "spec": { "title": "T1" } })).unwrap();
        assert_eq!(s.get(&key("a")).unwrap(), a);
        assert!(s.create(&key("a"), json!({})).unwrap_err().is_already_exists());

        let b = s.update(&key("a"), a.resource_version, json!({ "spec": { "title": "T2" } })).unwrap();
        assert!(b.resource_version > a.resource_version);
        assert_eq!(b.uid, a.uid);
        assert!(s.update(&key("a"), a.resource_version, json!({})).unwrap_err().is_conflict());
        assert_eq!(s.get(&key("a")).unwrap().raw["spec"]["title"], "T2");

        s.delete(&key("a"), Some(b.resource_version)).unwrap();
        assert!(s.get(&key("a")).unwrap_err().is_not_found());
        assert!(s.delete(&key("a"), None).unwrap_err().is_not_found());
    }

    #[test]
    fn history_rotates_to_depth() {
        let s = SqliteStore::open(&temp_db()).unwrap().with_history_depth(3);
        let mut cur = s.create(&key("h"), json!({ "spec": { "title": "v0" } })).unwrap();
        for i in 1..5 {
            cur = s.update(&key("h"), cur.resource_version, json!({ "spec": { "title": format!("v{}", i) } })).unwrap();
        }
        let rows = s.history(cur.uid, None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].raw["spec"]["title"], "v4");
        assert_eq!(rows[1].raw["spec"]["title"], "v3");
        assert_eq!(rows[2].raw["spec"]["title"], "v2");
        assert!(rows[0].rv > rows[1].rv);
    }

    #[test]
    fn state_survives_reopen() {
        let path = temp_db();
        let created = {
            let s = SqliteStore::open(&path).unwrap();
            s.create(&ObjectKey::new("Folder", "team-b", "f2"), json!({ "spec": { "title": "b" } })).unwrap();
            s.create(&ObjectKey::new("Folder", "team-a", "f1"), json!({ "spec": { "title": "a" } })).unwrap()
        };
        let s = SqliteStore::open(&path).unwrap();
        assert_eq!(s.revision().unwrap(), 2);
        let list = s.list("Folder", None).unwrap();
        assert_eq!(list.resource_version, 2);
        let names: Vec<_> = list.items.iter().map(|o| o.key.to_string()).collect();
        assert_eq!(names, vec!["Folder/team-a/f1", "Folder/team-b/f2"]);
        assert_eq!(list.items[0], created);
        assert_eq!(s.list("Folder", Some("team-b")).unwrap().items.len(), 1);
        let next = s.create(&key("after-reopen"), json!({})).unwrap();
        assert_eq!(next.resource_version, 3);
    }
}

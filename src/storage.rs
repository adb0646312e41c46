use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::forum::Forum;

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// The acting user, as remembered between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
    pub is_admin: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub forum: Forum,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        debug!(path = %path.display(), "opening state database");
        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// Replaces the remembered identity. There is at most one.
    pub fn set_identity(&self, username: &str, is_admin: bool) -> Result<()> {
        let username = username.trim();
        if username.is_empty() {
            bail!("storage: username required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO identity (slot, username, is_admin, updated_at)
VALUES (1, ?1, ?2, ?3)
ON CONFLICT(slot) DO UPDATE SET
  username = excluded.username,
  is_admin = excluded.is_admin,
  updated_at = excluded.updated_at
"#,
            params![username, is_admin, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn identity(&self) -> Result<Option<Identity>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT username, is_admin, updated_at FROM identity WHERE slot = 1",
            [],
            identity_from_row,
        )
        .optional()
        .context("storage: query identity")
    }

    pub fn clear_identity(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM identity", [])?;
        Ok(())
    }

    /// Stores the latest copy of a forum, replacing any earlier one.
    pub fn save_snapshot(&self, forum: &Forum) -> Result<()> {
        if forum.forum_id.is_empty() {
            bail!("storage: forum id required for snapshot");
        }
        let body = serde_json::to_string(forum).context("storage: encode forum snapshot")?;
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO forum_snapshots (forum_id, body, fetched_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(forum_id) DO UPDATE SET
  body = excluded.body,
  fetched_at = excluded.fetched_at
"#,
            params![forum.forum_id, body, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn snapshot(&self, forum_id: &str) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT body, fetched_at FROM forum_snapshots WHERE forum_id = ?1",
                params![forum_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("storage: query forum snapshot")?;
        drop(conn);

        row.map(|(body, fetched)| {
            let forum: Forum = serde_json::from_str(&body)
                .with_context(|| format!("storage: decode snapshot for forum {forum_id}"))?;
            Ok(Snapshot {
                forum,
                fetched_at: Utc
                    .timestamp_opt(fetched, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
            })
        })
        .transpose()
    }

    pub fn list_snapshots(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT forum_id, fetched_at
FROM forum_snapshots
ORDER BY fetched_at DESC
"#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                let fetched: i64 = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    Utc.timestamp_opt(fetched, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let updated: i64 = row.get(2)?;
    Ok(Identity {
        username: row.get(0)?,
        is_admin: row.get(1)?,
        updated_at: Utc
            .timestamp_opt(updated, 0)
            .single()
            .unwrap_or_else(Utc::now),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        info!(version, "applying storage migration");
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![r#"
CREATE TABLE IF NOT EXISTS identity (
  slot INTEGER PRIMARY KEY CHECK (slot = 1),
  username TEXT NOT NULL,
  is_admin INTEGER NOT NULL DEFAULT 0,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS forum_snapshots (
  forum_id TEXT PRIMARY KEY,
  body TEXT NOT NULL,
  fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_forum_snapshots_fetched_at ON forum_snapshots(fetched_at);
"#]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("forum-thread").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forum::{ForumStatus, Post};
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(Options {
            path: Some(dir.path().join("state.db")),
        })
        .unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.db");
        let store = Store::open(Options {
            path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        store.close().unwrap();
    }

    #[test]
    fn identity_is_replaced_and_cleared() {
        let (_dir, store) = open_temp();
        assert!(store.identity().unwrap().is_none());

        store.set_identity("amy", false).unwrap();
        store.set_identity("bob", true).unwrap();
        let identity = store.identity().unwrap().unwrap();
        assert_eq!(identity.username, "bob");
        assert!(identity.is_admin);

        store.clear_identity().unwrap();
        assert!(store.identity().unwrap().is_none());
        assert!(store.set_identity("  ", false).is_err());
    }

    #[test]
    fn snapshot_round_trips_forum() {
        let (_dir, store) = open_temp();
        let mut forum = Forum {
            forum_id: "f-1".into(),
            title: "Tips".into(),
            posts: vec![Post {
                id: Some("1".into()),
                created_by: Some("amy".into()),
                message: "hello".into(),
                ..Post::default()
            }],
            ..Forum::default()
        };
        store.save_snapshot(&forum).unwrap();

        forum.metadata.status = ForumStatus::Archived;
        store.save_snapshot(&forum).unwrap();

        let snapshot = store.snapshot("f-1").unwrap().unwrap();
        assert_eq!(snapshot.forum, forum);
        assert!(store.snapshot("other").unwrap().is_none());
        assert_eq!(store.list_snapshots().unwrap().len(), 1);
    }

    #[test]
    fn snapshot_requires_forum_id() {
        let (_dir, store) = open_temp();
        assert!(store.save_snapshot(&Forum::default()).is_err());
    }
}

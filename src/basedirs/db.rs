// src/basedirs/db.rs
//
// Embedded store behind the base-dir aggregator: five logical
// buckets (group/user usage, group/user subdirs, group history) in
// one sqlite file. Usage and subdir buckets are rewritten per run
// inside a single transaction; history is append-only with a
// strictly-monotonic date rule, so re-running a snapshot is a no-op.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::basedirs::keys::{history_key, usage_key};
use crate::basedirs::model::{History, SubDir, Usage};
use crate::basedirs::quota::date_quota_full;
use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS group_usage (
    key      BLOB PRIMARY KEY,
    gid      INTEGER NOT NULL,
    base_dir TEXT NOT NULL,
    age      INTEGER NOT NULL,
    value    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS user_usage (
    key      BLOB PRIMARY KEY,
    uid      INTEGER NOT NULL,
    base_dir TEXT NOT NULL,
    age      INTEGER NOT NULL,
    value    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS group_subdirs (
    key      BLOB PRIMARY KEY,
    gid      INTEGER NOT NULL,
    base_dir TEXT NOT NULL,
    age      INTEGER NOT NULL,
    value    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS user_subdirs (
    key      BLOB PRIMARY KEY,
    uid      INTEGER NOT NULL,
    base_dir TEXT NOT NULL,
    age      INTEGER NOT NULL,
    value    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS group_history (
    key   BLOB PRIMARY KEY,
    gid   INTEGER NOT NULL,
    mount TEXT NOT NULL,
    value TEXT NOT NULL
);
";

pub struct BaseDirDb {
    conn: Connection,
    in_run: bool,
}

impl BaseDirDb {
    pub fn create(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            in_run: false,
        })
    }

    /// Start a dataset run: open the write transaction and clear the
    /// usage and subdir buckets. History survives.
    pub fn begin_run(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN IMMEDIATE;
             DELETE FROM group_usage;
             DELETE FROM user_usage;
             DELETE FROM group_subdirs;
             DELETE FROM user_subdirs;",
        )?;
        self.in_run = true;
        Ok(())
    }

    pub fn put_group_usage(&self, usage: &Usage) -> Result<()> {
        let key = usage_key(usage.gid, &usage.base_dir, usage.age);
        self.conn.execute(
            "INSERT OR REPLACE INTO group_usage (key, gid, base_dir, age, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                usage.gid,
                usage.base_dir,
                usage.age,
                serde_json::to_string(usage)?
            ],
        )?;
        Ok(())
    }

    pub fn put_user_usage(&self, usage: &Usage) -> Result<()> {
        let key = usage_key(usage.uid, &usage.base_dir, usage.age);
        self.conn.execute(
            "INSERT OR REPLACE INTO user_usage (key, uid, base_dir, age, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                key,
                usage.uid,
                usage.base_dir,
                usage.age,
                serde_json::to_string(usage)?
            ],
        )?;
        Ok(())
    }

    pub fn put_group_subdirs(
        &self,
        gid: u32,
        base_dir: &str,
        age: u8,
        subdirs: &[SubDir],
    ) -> Result<()> {
        let key = usage_key(gid, base_dir, age);
        self.conn.execute(
            "INSERT OR REPLACE INTO group_subdirs (key, gid, base_dir, age, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, gid, base_dir, age, serde_json::to_string(subdirs)?],
        )?;
        Ok(())
    }

    pub fn put_user_subdirs(
        &self,
        uid: u32,
        base_dir: &str,
        age: u8,
        subdirs: &[SubDir],
    ) -> Result<()> {
        let key = usage_key(uid, base_dir, age);
        self.conn.execute(
            "INSERT OR REPLACE INTO user_subdirs (key, uid, base_dir, age, value)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![key, uid, base_dir, age, serde_json::to_string(subdirs)?],
        )?;
        Ok(())
    }

    /// Append a history point iff its date is strictly after the last
    /// point of the series. Returns whether the point was kept.
    pub fn append_history(&self, gid: u32, mount: &str, point: History) -> Result<bool> {
        let key = history_key(gid, mount);
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM group_history WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        let mut series: Vec<History> = match &existing {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };

        if let Some(last) = series.last() {
            if point.date <= last.date {
                debug!(gid, mount, date = point.date, "history point not newer, skipped");
                return Ok(false);
            }
        }
        series.push(point);

        self.conn.execute(
            "INSERT OR REPLACE INTO group_history (key, gid, mount, value)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, gid, mount, serde_json::to_string(&series)?],
        )?;
        Ok(true)
    }

    /// Pair every group-usage row with its history series, fill in
    /// the projected exhaustion dates, and commit the run.
    pub fn finalise(&mut self, window: usize) -> Result<()> {
        let rows: Vec<(Vec<u8>, u32, String, String)> = {
            let mut stmt = self
                .conn
                .prepare("SELECT key, gid, base_dir, value FROM group_usage")?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };

        let mut updated = 0usize;
        for (key, gid, base_dir, value) in rows {
            let Some(series) = self.history_series(gid, &base_dir)? else {
                continue;
            };
            let (no_space, no_files) = date_quota_full(&series, window);

            let mut usage: Usage = serde_json::from_str(&value)?;
            if usage.date_no_space == no_space && usage.date_no_files == no_files {
                continue;
            }
            usage.date_no_space = no_space;
            usage.date_no_files = no_files;
            self.conn.execute(
                "UPDATE group_usage SET value = ?1 WHERE key = ?2",
                params![serde_json::to_string(&usage)?, key],
            )?;
            updated += 1;
        }

        self.conn.execute_batch("COMMIT")?;
        self.in_run = false;
        info!(projected = updated, "base-dir store committed");
        Ok(())
    }

    /// History series for the longest stored mount prefixing `path`.
    pub fn history_series(&self, gid: u32, path: &str) -> Result<Option<Vec<History>>> {
        let mut probe = path.to_string();
        if !probe.ends_with('/') {
            probe.push('/');
        }

        let mut stmt = self
            .conn
            .prepare("SELECT mount, value FROM group_history WHERE gid = ?1")?;
        let rows: Vec<(String, String)> = stmt
            .query_map(params![gid], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let best = rows
            .into_iter()
            .filter(|(mount, _)| probe.starts_with(mount.as_str()))
            .max_by_key(|(mount, _)| mount.len());

        match best {
            Some((_, json)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Flush without committing the current run.
    pub fn close_uncommitted(&mut self) -> Result<()> {
        if self.in_run {
            self.conn.execute_batch("ROLLBACK")?;
            self.in_run = false;
        }
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Db(e))
    }
}

fn ignore_no_rows<T>(e: rusqlite::Error) -> std::result::Result<Option<T>, rusqlite::Error> {
    match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

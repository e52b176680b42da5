// src/basedirs/reader.rs
//
// Read side of the base-dir store. Opened read-only; a reload is a
// new Reader over the swapped dataset file.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags};

use crate::basedirs::keys::usage_key;
use crate::basedirs::model::{History, SubDir, Usage};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbInfo {
    pub group_usage_rows: u64,
    pub user_usage_rows: u64,
    pub group_subdir_rows: u64,
    pub user_subdir_rows: u64,
    pub history_rows: u64,
}

pub struct BaseDirReader {
    conn: Connection,
}

impl BaseDirReader {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    pub fn group_usage(&self, age: u8) -> Result<Vec<Usage>> {
        self.usage_bucket("group_usage", age)
    }

    pub fn user_usage(&self, age: u8) -> Result<Vec<Usage>> {
        self.usage_bucket("user_usage", age)
    }

    fn usage_bucket(&self, table: &str, age: u8) -> Result<Vec<Usage>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT value FROM {table} WHERE age = ?1 ORDER BY key"
        ))?;
        let rows: Vec<String> = stmt
            .query_map(params![age], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(Error::from))
            .collect()
    }

    pub fn group_subdirs(&self, gid: u32, base_dir: &str, age: u8) -> Result<Vec<SubDir>> {
        self.subdir_bucket("group_subdirs", gid, base_dir, age)
    }

    pub fn user_subdirs(&self, uid: u32, base_dir: &str, age: u8) -> Result<Vec<SubDir>> {
        self.subdir_bucket("user_subdirs", uid, base_dir, age)
    }

    fn subdir_bucket(
        &self,
        table: &str,
        id: u32,
        base_dir: &str,
        age: u8,
    ) -> Result<Vec<SubDir>> {
        let mut dir = base_dir.to_string();
        if !dir.ends_with('/') {
            dir.push('/');
        }
        let key = usage_key(id, &dir, age);

        let value: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT value FROM {table} WHERE key = ?1"),
                params![key],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// History series for the longest stored mount that prefixes
    /// `path + "/"`. Unknown (gid, path) pairs are an error, unlike
    /// the empty-result usage queries.
    pub fn history(&self, gid: u32, path: &str) -> Result<Vec<History>> {
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
            Some((_, json)) => Ok(serde_json::from_str(&json)?),
            None => Err(Error::HistoryNotFound {
                gid,
                path: path.to_string(),
            }),
        }
    }

    pub fn info(&self) -> Result<DbInfo> {
        let count = |table: &str| -> Result<u64> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| {
                    r.get::<_, i64>(0)
                })? as u64)
        };
        Ok(DbInfo {
            group_usage_rows: count("group_usage")?,
            user_usage_rows: count("user_usage")?,
            group_subdir_rows: count("group_subdirs")?,
            user_subdir_rows: count("user_subdirs")?,
            history_rows: count("group_history")?,
        })
    }

    /// Latest snapshot date per mount, sorted by mount path.
    pub fn mount_timestamps(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT mount, value FROM group_history")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let mut latest: std::collections::BTreeMap<String, i64> = Default::default();
        for (mount, json) in rows {
            let series: Vec<History> = serde_json::from_str(&json)?;
            if let Some(last) = series.last() {
                let entry = latest.entry(mount).or_insert(i64::MIN);
                if last.date > *entry {
                    *entry = last.date;
                }
            }
        }
        Ok(latest.into_iter().collect())
    }
}

// src/backup/summary.rs
//
// Aggregated backup summary, streamed out as one JSON array. Entries
// are per (project-or-warn, uid, base) with project identification
// absent for warn-root entries.

use std::collections::HashMap;
use std::io::Write;

use serde::Serialize;

use crate::backup::plan::{BackupAction, Project};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SummaryEntry {
    #[serde(rename = "Faculty", skip_serializing_if = "Option::is_none")]
    pub faculty: Option<String>,
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Requestor", skip_serializing_if = "Option::is_none")]
    pub requestor: Option<String>,
    #[serde(rename = "Root")]
    pub root: String,
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "UserID")]
    pub user_id: u32,
    #[serde(rename = "Base")]
    pub base: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "Count")]
    pub count: u64,
    #[serde(rename = "OldestMTime")]
    pub oldest_mtime: i64,
    #[serde(rename = "NewestMTime")]
    pub newest_mtime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct SummaryKey {
    /// None for warn-root entries; sorts first.
    project: Option<(String, String, String)>,
    root: String,
    uid: u32,
    action: BackupAction,
    base: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct SummaryTotals {
    size: u64,
    count: u64,
    oldest_mtime: i64,
    newest_mtime: i64,
}

#[derive(Debug, Default)]
pub struct SummaryAccumulator {
    entries: HashMap<SummaryKey, SummaryTotals>,
}

impl SummaryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, project: &Project, uid: u32, base: String, size: u64, mtime: i64) {
        let key = SummaryKey {
            project: if project.is_warn() {
                None
            } else {
                Some((
                    project.faculty.clone(),
                    project.name.clone(),
                    project.requestor.clone(),
                ))
            },
            root: project.root.clone(),
            uid,
            action: project.action,
            base,
        };

        let totals = self.entries.entry(key).or_insert(SummaryTotals {
            oldest_mtime: i64::MAX,
            ..SummaryTotals::default()
        });
        totals.size = totals.size.saturating_add(size);
        totals.count += 1;
        totals.oldest_mtime = totals.oldest_mtime.min(mtime);
        totals.newest_mtime = totals.newest_mtime.max(mtime);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted entries: (faculty, name, requestor, root, uid, action),
    /// warn entries (no project) first.
    pub fn sorted_entries(&self) -> Vec<SummaryEntry> {
        let mut keys: Vec<&SummaryKey> = self.entries.keys().collect();
        keys.sort();

        keys.into_iter()
            .map(|key| {
                let totals = self.entries[key];
                let (faculty, name, requestor) = match &key.project {
                    Some((f, n, r)) => (Some(f.clone()), Some(n.clone()), Some(r.clone())),
                    None => (None, None, None),
                };
                SummaryEntry {
                    faculty,
                    name,
                    requestor,
                    root: key.root.clone(),
                    action: key.action.name().to_string(),
                    user_id: key.uid,
                    base: key.base.clone(),
                    size: totals.size,
                    count: totals.count,
                    oldest_mtime: totals.oldest_mtime,
                    newest_mtime: totals.newest_mtime,
                }
            })
            .collect()
    }

    /// Stream the summary as a JSON array.
    pub fn write_json<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(b"[")?;
        for (i, entry) in self.sorted_entries().iter().enumerate() {
            if i > 0 {
                writer.write_all(b",")?;
            }
            serde_json::to_writer(&mut writer, entry)?;
        }
        writer.write_all(b"]\n")?;
        Ok(())
    }
}

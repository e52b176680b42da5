// src/dguta/tree.rs
//
// Query side of the DGUTA store. A Tree is an immutable snapshot:
// open it once, query concurrently, swap the whole snapshot to
// reload.

use std::collections::HashSet;
use std::path::Path;

use crate::dguta::guta::{DgutaRow, Guta};
use crate::dguta::store::StoreReader;
use crate::error::{Error, Result};
use crate::fileclass::{age, FileType};

/// Predicate bundle for queries. Entries pass when every provided
/// set contains them and the age matches exactly.
#[derive(Debug, Default, Clone)]
pub struct Filter {
    pub gids: Option<HashSet<u32>>,
    pub uids: Option<HashSet<u32>>,
    pub types: Option<HashSet<FileType>>,
    pub age: u8,
}

impl Filter {
    pub fn with_age(age: u8) -> Self {
        Self {
            age,
            ..Self::default()
        }
    }

    fn pass(&self, key: &Guta) -> bool {
        if key.age != self.age {
            return false;
        }
        if let Some(gids) = &self.gids {
            if !gids.contains(&key.gid) {
                return false;
            }
        }
        if let Some(uids) = &self.uids {
            if !uids.contains(&key.uid) {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.contains(&key.file_type) {
                return false;
            }
        }
        true
    }
}

/// Aggregated view of one directory subtree under a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct DirSummary {
    pub dir: Vec<u8>,
    pub count: u64,
    pub size: u64,
    pub atime: i64,
    pub mtime: i64,
    pub uids: Vec<u32>,
    pub gids: Vec<u32>,
    pub file_types: Vec<FileType>,
    pub age: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirInfo {
    pub current: DirSummary,
    pub children: Vec<DirSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeInfo {
    pub directories: usize,
    pub total_entries: u64,
}

pub struct Tree {
    store: StoreReader,
}

impl Tree {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            store: StoreReader::open(dir)?,
        })
    }

    pub fn info(&self) -> TreeInfo {
        TreeInfo {
            directories: self.store.index.len(),
            total_entries: self.store.total_entries,
        }
    }

    fn load(&self, dir: &[u8]) -> Result<DgutaRow> {
        let entry = self
            .store
            .lookup(dir)
            .ok_or_else(|| Error::DirectoryNotFound(String::from_utf8_lossy(dir).into_owned()))?;
        self.store.read_row(entry)
    }

    /// Summary of `dir` plus one summary per direct child.
    pub fn dir_info(&self, dir: &[u8], filter: &Filter) -> Result<DirInfo> {
        let dir = normalise_dir(dir);
        let row = self.load(&dir)?;
        let current = summarise_row(&row, filter);

        let mut children = Vec::new();
        for child in &row.children {
            let mut child_path = dir.clone();
            child_path.extend_from_slice(child);
            match self.load(&child_path) {
                Ok(child_row) => {
                    let summary = summarise_row(&child_row, filter);
                    if summary.count > 0 {
                        children.push(summary);
                    }
                }
                Err(Error::DirectoryNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        children.sort_by(|a, b| a.dir.cmp(&b.dir));

        Ok(DirInfo { current, children })
    }

    /// Subtree summaries: each directory where `split_fn` of its
    /// parent allowed descent contributes its own cumulative row;
    /// deeper levels stay folded into their nearest emitted ancestor.
    /// Results are in ascending order by directory.
    pub fn where_(
        &self,
        dir: &[u8],
        filter: &Filter,
        split_fn: &dyn Fn(&[u8]) -> usize,
    ) -> Result<Vec<DirSummary>> {
        let dir = normalise_dir(dir);
        let row = self.load(&dir)?;

        let mut out = Vec::new();
        self.descend(row, filter, split_fn, &mut out)?;
        out.sort_by(|a, b| a.dir.cmp(&b.dir));
        Ok(out)
    }

    fn descend(
        &self,
        row: DgutaRow,
        filter: &Filter,
        split_fn: &dyn Fn(&[u8]) -> usize,
        out: &mut Vec<DirSummary>,
    ) -> Result<()> {
        let summary = summarise_row(&row, filter);
        if summary.count == 0 {
            return Ok(());
        }

        let splits = split_fn(&row.dir);
        out.push(summary);
        if splits == 0 {
            return Ok(());
        }

        for child in &row.children {
            let mut child_path = row.dir.clone();
            child_path.extend_from_slice(child);
            match self.load(&child_path) {
                Ok(child_row) => self.descend(child_row, filter, split_fn, out)?,
                Err(Error::DirectoryNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Split function descending a fixed number of levels below `root`.
pub fn depth_splits(root: &[u8], levels: usize) -> impl Fn(&[u8]) -> usize + '_ {
    let root_depth = slash_count(root);
    move |dir: &[u8]| {
        let below = slash_count(dir).saturating_sub(root_depth);
        levels.saturating_sub(below)
    }
}

fn slash_count(dir: &[u8]) -> usize {
    dir.iter().filter(|&&b| b == b'/').count()
}

fn normalise_dir(dir: &[u8]) -> Vec<u8> {
    let mut out = dir.to_vec();
    if !out.ends_with(b"/") {
        out.push(b'/');
    }
    out
}

fn summarise_row(row: &DgutaRow, filter: &Filter) -> DirSummary {
    let mut summary = DirSummary {
        dir: row.dir.clone(),
        count: 0,
        size: 0,
        atime: 0,
        mtime: 0,
        uids: Vec::new(),
        gids: Vec::new(),
        file_types: Vec::new(),
        age: filter.age,
    };

    let mut oldest = i64::MAX;
    let mut newest = i64::MIN;
    let mut uids = HashSet::new();
    let mut gids = HashSet::new();
    let mut types = HashSet::new();

    for (key, stats) in &row.entries {
        if !filter.pass(key) {
            continue;
        }
        // the temp overlay repeats bytes counted under natural types
        if key.file_type != FileType::Temp {
            summary.count += stats.count;
            summary.size += stats.size;
        }
        oldest = oldest.min(stats.oldest_atime);
        newest = newest.max(stats.newest_mtime);
        uids.insert(key.uid);
        gids.insert(key.gid);
        types.insert(key.file_type);
    }

    if oldest != i64::MAX {
        summary.atime = oldest;
    }
    if newest != i64::MIN {
        summary.mtime = newest;
    }
    summary.uids = sorted(uids);
    summary.gids = sorted(gids);
    let mut file_types: Vec<FileType> = types.into_iter().collect();
    file_types.sort();
    summary.file_types = file_types;
    summary
}

fn sorted(set: HashSet<u32>) -> Vec<u32> {
    let mut v: Vec<u32> = set.into_iter().collect();
    v.sort_unstable();
    v
}

/// Convenience for the common "everything, all ages" query.
pub fn filter_all() -> Filter {
    Filter::with_age(age::AGE_ALL)
}

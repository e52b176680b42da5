// src/basedirs/config.rs
//
// Which directories count as "base directories" for quota accounting.
// Config entries are (prefix segments, splits, min dirs); the
// longest-prefix entry governs a directory, and that entry's min_dirs
// depth picks the base dir itself.

use std::io::BufRead;

use crate::error::{Error, Result};
use crate::pathtree::{PathArena, PathId};

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigEntry {
    pub prefix: Vec<Vec<u8>>,
    pub splits: usize,
    pub min_dirs: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: Vec<ConfigEntry>,
}

/// How a directory participates in base-dir accounting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    /// Depth equals min_dirs: usage, history and subdirs key here.
    BaseDir,
    /// Between min_dirs+1 and min_dirs+splits-1: subdir accounting
    /// may key here as well.
    SubDirLevel,
}

impl Config {
    pub fn new(mut entries: Vec<ConfigEntry>) -> Self {
        entries.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { entries }
    }

    /// Parse tab-separated lines: `prefix<TAB>splits<TAB>min_dirs`.
    /// Blank lines and `#` comments are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut entries = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let malformed = |cause: &str| Error::MalformedRecord {
                line: (i + 1) as u64,
                cause: cause.to_string(),
            };

            let mut parts = line.split('\t');
            let prefix = parts.next().ok_or_else(|| malformed("missing prefix"))?;
            let splits: usize = parts
                .next()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| malformed("bad splits"))?;
            let min_dirs: usize = parts
                .next()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| malformed("bad min_dirs"))?;

            entries.push(ConfigEntry {
                prefix: split_segments(prefix.as_bytes()),
                splits,
                min_dirs,
            });
        }
        Ok(Self::new(entries))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The governing entry for a directory: the longest prefix whose
    /// segments match the directory's leading segments.
    pub fn entry_for(&self, arena: &PathArena, dir: PathId) -> Option<&ConfigEntry> {
        let depth = arena.depth(dir);
        self.entries.iter().find(|entry| {
            entry.prefix.len() <= depth && prefix_matches(arena, dir, &entry.prefix)
        })
    }

    /// Role of a directory under its governing entry, if any.
    pub fn role_for(&self, arena: &PathArena, dir: PathId) -> Option<(Role, &ConfigEntry)> {
        let entry = self.entry_for(arena, dir)?;
        let depth = arena.depth(dir);
        if depth == entry.min_dirs {
            Some((Role::BaseDir, entry))
        } else if depth > entry.min_dirs
            && entry.splits > 0
            && depth <= entry.min_dirs + entry.splits - 1
        {
            Some((Role::SubDirLevel, entry))
        } else {
            None
        }
    }
}

fn split_segments(path: &[u8]) -> Vec<Vec<u8>> {
    path.split(|&b| b == b'/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_vec())
        .collect()
}

fn prefix_matches(arena: &PathArena, dir: PathId, prefix: &[Vec<u8>]) -> bool {
    for (i, want) in prefix.iter().enumerate() {
        match arena.ancestor_at_depth(dir, i + 1) {
            Some(node) => {
                if arena.basename(node) != want.as_slice() {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

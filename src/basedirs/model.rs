// src/basedirs/model.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::fileclass::FileType;

/// One usage row per (gid|uid, base dir, age bucket). Exactly one of
/// `gid`/`uid` is meaningful per row, selected by which bucket the
/// row lives in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub gid: u32,
    pub uid: u32,
    /// For group rows the uids seen, for user rows the gids seen.
    pub other_ids: Vec<u32>,
    pub name: String,
    pub owner: String,
    pub base_dir: String,
    pub usage_size: u64,
    pub quota_size: u64,
    pub usage_inodes: u64,
    pub quota_inodes: u64,
    pub mtime: i64,
    /// Projected exhaustion dates (unix seconds, 0 = never/unknown).
    pub date_no_space: i64,
    pub date_no_files: i64,
    pub age: u8,
}

/// Per-subdirectory breakdown below a base dir. The synthetic `"."`
/// entry covers files sitting directly in the base dir.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubDir {
    pub sub_dir: String,
    pub num_files: u64,
    pub size_files: u64,
    pub last_modified: i64,
    pub file_usage: BTreeMap<FileType, u64>,
}

/// One point of an append-only history series per (gid, mount).
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub date: i64,
    pub usage_size: u64,
    pub quota_size: u64,
    pub usage_inodes: u64,
    pub quota_inodes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_json_round_trip() {
        let usage = Usage {
            gid: 7,
            name: "team7".into(),
            owner: "pi7".into(),
            base_dir: "/lustre/proj/".into(),
            usage_size: 123,
            usage_inodes: 4,
            mtime: 1_700_000_000,
            ..Usage::default()
        };
        let json = serde_json::to_string(&usage).unwrap();
        let back: Usage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, usage);
    }

    #[test]
    fn subdir_file_usage_keys_serialise_as_names() {
        let mut sub = SubDir {
            sub_dir: "data".into(),
            num_files: 2,
            size_files: 60,
            last_modified: 5,
            file_usage: BTreeMap::new(),
        };
        sub.file_usage.insert(FileType::Bam, 50);
        sub.file_usage.insert(FileType::VcfGz, 10);

        let json = serde_json::to_string(&sub).unwrap();
        assert!(json.contains("\"bam\":50"));
        assert!(json.contains("\"vcf.gz\":10"));

        let back: SubDir = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sub);
    }

    #[test]
    fn history_round_trip() {
        let h = History {
            date: 1_700_000_000,
            usage_size: 10,
            quota_size: 100,
            usage_inodes: 1,
            quota_inodes: 9,
        };
        let json = serde_json::to_string(&vec![h]).unwrap();
        let back: Vec<History> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![h]);
    }
}

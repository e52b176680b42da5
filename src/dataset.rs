// src/dataset.rs
//
// Dataset-version directory layout: each summarise run lands in a
// directory named `<version>_<mount_key>` holding the DGUTA pair
// files and the base-dir store. Versions sort lexicographically, so
// per mount key the greatest name is current and older siblings are
// candidates for deletion.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;

pub const DGUTA_DIR: &str = "dirguta.dbs";
pub const BASEDIRS_DB: &str = "basedirs.db";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub path: PathBuf,
    pub version: String,
    pub mount_key: String,
}

impl Dataset {
    pub fn dguta_path(&self) -> PathBuf {
        self.path.join(DGUTA_DIR)
    }

    pub fn basedirs_path(&self) -> PathBuf {
        self.path.join(BASEDIRS_DB)
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct DatasetScan {
    /// Greatest version per mount key, sorted by mount key.
    pub current: Vec<Dataset>,
    /// Older versions, candidates for deletion.
    pub stale: Vec<Dataset>,
}

/// Split `<version>_<mount_key>`; names starting with `.`, without a
/// separator, or with an empty half are not datasets.
fn parse_name(name: &str) -> Option<(String, String)> {
    if name.starts_with('.') {
        return None;
    }
    let sep = name.find('_')?;
    if sep == 0 || sep + 1 >= name.len() {
        return None;
    }
    Some((name[..sep].to_string(), name[sep + 1..].to_string()))
}

pub fn scan_datasets(parent: &Path) -> Result<DatasetScan> {
    let mut by_mount: HashMap<String, Vec<Dataset>> = HashMap::new();

    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some((version, mount_key)) = parse_name(name) else {
            debug!(name, "ignoring non-dataset directory");
            continue;
        };

        by_mount.entry(mount_key.clone()).or_default().push(Dataset {
            path: entry.path(),
            version,
            mount_key,
        });
    }

    let mut scan = DatasetScan::default();
    for (_, mut datasets) in by_mount {
        datasets.sort_by(|a, b| a.version.cmp(&b.version));
        let current = datasets.pop().expect("group never empty");
        scan.stale.extend(datasets);
        scan.current.push(current);
    }
    scan.current.sort_by(|a, b| a.mount_key.cmp(&b.mount_key));
    scan.stale.sort_by(|a, b| (&a.mount_key, &a.version).cmp(&(&b.mount_key, &b.version)));

    info!(
        current = scan.current.len(),
        stale = scan.stale.len(),
        "dataset scan"
    );
    Ok(scan)
}

/// Dataset version string for a snapshot date, e.g. `20260801`.
/// Lexicographic order of versions equals date order.
pub fn version_for(date: chrono::DateTime<chrono::Utc>) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn version_now() -> String {
    version_for(chrono::Utc::now())
}

/// Delete stale datasets the policy approves; returns what was
/// removed.
pub fn prune_stale<F>(stale: &[Dataset], mut policy: F) -> Result<Vec<PathBuf>>
where
    F: FnMut(&Dataset) -> bool,
{
    let mut removed = Vec::new();
    for dataset in stale {
        if !policy(dataset) {
            continue;
        }
        fs::remove_dir_all(&dataset.path)?;
        info!(path = %dataset.path.display(), "pruned stale dataset");
        removed.push(dataset.path.clone());
    }
    Ok(removed)
}

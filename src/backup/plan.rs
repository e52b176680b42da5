// src/backup/plan.rs
//
// Backup-plan CSV loader. Each row expands into wildcard patterns:
// one per ignore glob (forced to nobackup) and one per match glob
// (the row's own instruction), all rooted at reporting_root joined
// with the row's directory. Warn roots are monitored trees with no
// project attached.

use std::io::Read;

use crate::error::{Error, Result};
use crate::wildcard::PathGrouper;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackupAction {
    Backup,
    NoBackup,
    TempBackup,
    Warn,
}

impl BackupAction {
    pub fn parse(s: &str) -> Result<BackupAction> {
        match s.trim() {
            "backup" => Ok(BackupAction::Backup),
            "nobackup" => Ok(BackupAction::NoBackup),
            "tempbackup" => Ok(BackupAction::TempBackup),
            other => Err(Error::InvalidAction(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BackupAction::Backup => "backup",
            BackupAction::NoBackup => "nobackup",
            BackupAction::TempBackup => "tempbackup",
            BackupAction::Warn => "warn",
        }
    }
}

/// Group value attached to every compiled pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Project {
    pub action: BackupAction,
    pub name: String,
    pub root: String,
    pub requestor: String,
    pub faculty: String,
}

impl Project {
    pub fn is_warn(&self) -> bool {
        self.action == BackupAction::Warn
    }
}

const REQUIRED_HEADERS: [&str; 8] = [
    "reporting_name",
    "reporting_root",
    "requestor",
    "faculty",
    "directory",
    "instruction",
    "match",
    "ignore",
];

/// Parse the plan CSV and compile it, together with any warn roots,
/// into one matcher.
pub fn load_plan<R: Read>(reader: R, warn_roots: &[String]) -> Result<PathGrouper<Project>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let mut columns = [0usize; REQUIRED_HEADERS.len()];
    for (i, wanted) in REQUIRED_HEADERS.iter().enumerate() {
        columns[i] = headers
            .iter()
            .position(|h| h == *wanted)
            .ok_or_else(|| Error::HeaderNotFound(wanted.to_string()))?;
    }
    let field = |record: &csv::StringRecord, i: usize| -> String {
        record.get(columns[i]).unwrap_or("").to_string()
    };

    let mut patterns: Vec<(Vec<u8>, Project)> = Vec::new();
    for record in csv_reader.records() {
        let record = record?;

        let name = field(&record, 0);
        let root = field(&record, 1);
        let requestor = field(&record, 2);
        let faculty = field(&record, 3);
        let directory = field(&record, 4);
        let action = BackupAction::parse(&field(&record, 5))?;
        let match_globs = glob_list(&field(&record, 6), "*");
        let ignore_globs = glob_list(&field(&record, 7), "");

        let base = join_dir(&root, &directory);
        let project = |action: BackupAction| Project {
            action,
            name: name.clone(),
            root: root.clone(),
            requestor: requestor.clone(),
            faculty: faculty.clone(),
        };

        for glob in &ignore_globs {
            patterns.push((pattern_for(&base, glob), project(BackupAction::NoBackup)));
        }
        for glob in &match_globs {
            patterns.push((pattern_for(&base, glob), project(action)));
        }
    }

    for root in warn_roots {
        let base = join_dir(root, "");
        patterns.push((
            pattern_for(&base, "*"),
            Project {
                action: BackupAction::Warn,
                name: String::new(),
                root: base.clone(),
                requestor: String::new(),
                faculty: String::new(),
            },
        ));
    }

    PathGrouper::compile(patterns)
}

fn glob_list(field: &str, default: &str) -> Vec<String> {
    let trimmed = field.trim();
    let source = if trimmed.is_empty() { default } else { trimmed };
    source
        .split_ascii_whitespace()
        .map(str::to_string)
        .collect()
}

/// Join a root and a relative directory into a `/`-terminated base.
pub fn join_dir(root: &str, directory: &str) -> String {
    let mut base = root.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let directory = directory.trim().trim_matches('/');
    if !directory.is_empty() {
        base.push_str(directory);
        base.push('/');
    }
    base
}

fn pattern_for(base: &str, glob: &str) -> Vec<u8> {
    let mut pattern = Vec::with_capacity(base.len() + glob.len());
    pattern.extend_from_slice(base.as_bytes());
    pattern.extend_from_slice(glob.as_bytes());
    pattern
}

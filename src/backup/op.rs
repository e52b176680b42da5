// src/backup/op.rs
//
// Stream-side of the backup plan: each directory frame holds the
// matcher state for its path, files fork that state with their
// basename. Matching records route to manifests and the summary.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::backup::manifest::ManifestWriter;
use crate::backup::plan::{BackupAction, Project};
use crate::backup::summary::SummaryAccumulator;
use crate::error::Result;
use crate::pathtree::{PathArena, PathId};
use crate::stats::{EntryType, FileInfo};
use crate::summarise::{Operation, OperationGenerator};
use crate::wildcard::{MatchState, PathGrouper};

/// Owner of one backup run: hand the generator to the driver, then
/// close the manifests and write the summary.
pub struct Backup {
    grouper: Rc<PathGrouper<Project>>,
    manifests: Rc<RefCell<ManifestWriter>>,
    summary: Rc<RefCell<SummaryAccumulator>>,
}

impl Backup {
    pub fn new(grouper: PathGrouper<Project>, manifest_dir: &Path) -> Result<Self> {
        Ok(Self {
            grouper: Rc::new(grouper),
            manifests: Rc::new(RefCell::new(ManifestWriter::new(manifest_dir)?)),
            summary: Rc::new(RefCell::new(SummaryAccumulator::new())),
        })
    }

    pub fn generator(&self) -> Box<dyn OperationGenerator> {
        Box::new(BackupGenerator {
            grouper: self.grouper.clone(),
            manifests: self.manifests.clone(),
            summary: self.summary.clone(),
        })
    }

    /// Close every manifest opened during the run.
    pub fn finish(&self) -> Result<()> {
        self.manifests.borrow_mut().close()
    }

    pub fn manifest_names(&self) -> Vec<String> {
        self.manifests.borrow().manifest_names()
    }

    pub fn write_summary<W: std::io::Write>(&self, writer: W) -> Result<()> {
        self.summary.borrow().write_json(writer)
    }
}

struct BackupGenerator {
    grouper: Rc<PathGrouper<Project>>,
    manifests: Rc<RefCell<ManifestWriter>>,
    summary: Rc<RefCell<SummaryAccumulator>>,
}

impl OperationGenerator for BackupGenerator {
    fn new_operation(
        &mut self,
        arena: &PathArena,
        dir: PathId,
    ) -> Result<Option<Box<dyn Operation>>> {
        let dir_state = self.grouper.feed(self.grouper.start(), &arena.path_of(dir));
        if self.grouper.is_dead(dir_state) {
            return Ok(None);
        }
        Ok(Some(Box::new(BackupOperation {
            grouper: self.grouper.clone(),
            manifests: self.manifests.clone(),
            summary: self.summary.clone(),
            dir,
            dir_state,
        })))
    }

    fn close(&mut self) -> Result<()> {
        self.manifests.borrow_mut().close()
    }
}

struct BackupOperation {
    grouper: Rc<PathGrouper<Project>>,
    manifests: Rc<RefCell<ManifestWriter>>,
    summary: Rc<RefCell<SummaryAccumulator>>,
    dir: PathId,
    dir_state: MatchState,
}

impl Operation for BackupOperation {
    fn add(&mut self, arena: &PathArena, info: &FileInfo) -> Result<()> {
        // only this directory's own files; descendants fork their own
        // frame's state
        if info.path != self.dir
            || !matches!(info.entry_type, EntryType::File | EntryType::Symlink)
        {
            return Ok(());
        }

        let state = self.grouper.feed(self.dir_state, &info.name);
        let Some(project) = self.grouper.group(state) else {
            return Ok(());
        };

        match project.action {
            BackupAction::NoBackup => Ok(()),
            BackupAction::Backup | BackupAction::TempBackup => {
                let mut path = arena.path_of(self.dir);
                path.extend_from_slice(&info.name);
                self.manifests
                    .borrow_mut()
                    .write(&project.requestor, &project.name, &path)?;
                self.record(arena, project, info);
                Ok(())
            }
            BackupAction::Warn => {
                self.record(arena, project, info);
                Ok(())
            }
        }
    }

    fn output(&mut self, _arena: &PathArena) -> Result<()> {
        Ok(())
    }
}

impl BackupOperation {
    fn record(&self, arena: &PathArena, project: &Project, info: &FileInfo) {
        let base = base_below_root(arena, info.path, &project.root);
        self.summary.borrow_mut().add(
            project,
            info.uid,
            base,
            info.size,
            info.mtime,
        );
    }
}

/// First directory level below the project root holding the record,
/// or the root itself for files sitting directly in it.
fn base_below_root(arena: &PathArena, dir: PathId, root: &str) -> String {
    let root_depth = root.split('/').filter(|s| !s.is_empty()).count();
    match arena.ancestor_at_depth(dir, root_depth + 1) {
        Some(base) => String::from_utf8_lossy(&arena.path_of(base)).into_owned(),
        None => {
            let mut base = root.to_string();
            if !base.ends_with('/') {
                base.push('/');
            }
            base
        }
    }
}

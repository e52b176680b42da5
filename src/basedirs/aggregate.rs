// src/basedirs/aggregate.rs
//
// Base-directory accounting: per (gid/uid, base dir, age) usage with
// per-subdirectory breakdown, plus one history contribution per
// (gid, mount) per run. Directories at the configured min_dirs depth
// get the full treatment; levels below it (up to min_dirs+splits-1)
// carry subdir accounting for ids they were first to claim.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::info;

use crate::basedirs::config::{Config, Role};
use crate::basedirs::db::BaseDirDb;
use crate::basedirs::model::{History, SubDir, Usage};
use crate::basedirs::owners::OwnersTable;
use crate::basedirs::quota::{QuotaTable, DEFAULT_TREND_WINDOW};
use crate::error::Result;
use crate::fileclass::{AgeSet, FileType, FileTypeClassifier, AGE_COUNT};
use crate::pathtree::{PathArena, PathId};
use crate::stats::{EntryType, FileInfo};
use crate::summarise::{Operation, OperationGenerator};
use crate::util::NameCache;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
enum IdKind {
    Group,
    User,
}

#[derive(Debug, Copy, Clone, Default)]
struct UsageTotals {
    count: u64,
    size: u64,
    mtime: i64,
}

#[derive(Debug, Clone, Default)]
struct SubDirTotals {
    num_files: u64,
    size_files: u64,
    last_modified: i64,
    file_usage: HashMap<FileType, u64>,
}

#[derive(Debug, Default)]
struct IdAgg {
    /// uids seen for group rows, gids seen for user rows.
    others: HashSet<u32>,
    ages: [UsageTotals; AGE_COUNT],
    subdirs: HashMap<Vec<u8>, Vec<SubDirTotals>>,
}

struct BaseDirsState {
    config: Config,
    mounts: Vec<String>,
    quotas: QuotaTable,
    owners: OwnersTable,
    names: NameCache,
    classifier: FileTypeClassifier,
    db: BaseDirDb,
    snapshot_date: i64,
    now: i64,
    trend_window: usize,
    history_acc: HashMap<(u32, String), (u64, u64)>,
    first_claims: HashMap<(IdKind, u32, usize), PathId>,
}

/// Owner of one base-dir summarise run: hand its generator to the
/// driver, then call finish() to write history and commit.
pub struct BaseDirs {
    inner: Rc<RefCell<BaseDirsState>>,
}

impl BaseDirs {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut db: BaseDirDb,
        config: Config,
        mounts: Vec<String>,
        quotas: QuotaTable,
        owners: OwnersTable,
        snapshot_date: i64,
        now: i64,
    ) -> Result<Self> {
        db.begin_run()?;

        let mounts = mounts
            .into_iter()
            .map(|mut m| {
                if !m.ends_with('/') {
                    m.push('/');
                }
                m
            })
            .collect();

        Ok(Self {
            inner: Rc::new(RefCell::new(BaseDirsState {
                config,
                mounts,
                quotas,
                owners,
                names: NameCache::new(),
                classifier: FileTypeClassifier::new(),
                db,
                snapshot_date,
                now,
                trend_window: DEFAULT_TREND_WINDOW,
                history_acc: HashMap::new(),
                first_claims: HashMap::new(),
            })),
        })
    }

    pub fn set_trend_window(&self, window: usize) {
        self.inner.borrow_mut().trend_window = window;
    }

    pub fn generator(&self) -> Box<dyn OperationGenerator> {
        Box::new(BaseDirsGenerator {
            inner: self.inner.clone(),
        })
    }

    /// Append the accumulated history, fill in quota projections and
    /// commit the run.
    pub fn finish(&self) -> Result<()> {
        let mut st = self.inner.borrow_mut();
        let st = &mut *st;

        let mut contributions: Vec<((u32, String), (u64, u64))> =
            st.history_acc.drain().collect();
        contributions.sort_by(|a, b| a.0.cmp(&b.0));

        let mut appended = 0usize;
        for ((gid, mount), (usage_size, usage_inodes)) in contributions {
            let (quota_size, quota_inodes) = st.quotas.quotas_for(gid, &mount);
            let kept = st.db.append_history(
                gid,
                &mount,
                History {
                    date: st.snapshot_date,
                    usage_size,
                    quota_size,
                    usage_inodes,
                    quota_inodes,
                },
            )?;
            if kept {
                appended += 1;
            }
        }

        st.db.finalise(st.trend_window)?;
        info!(history_points = appended, "base-dirs run finished");
        Ok(())
    }

    /// Release the store. A no-op (deferred to drop) while operation
    /// handles are still alive.
    pub fn close(self) -> Result<()> {
        match Rc::try_unwrap(self.inner) {
            Ok(cell) => cell.into_inner().db.close(),
            Err(_) => Ok(()),
        }
    }
}

struct BaseDirsGenerator {
    inner: Rc<RefCell<BaseDirsState>>,
}

impl OperationGenerator for BaseDirsGenerator {
    fn new_operation(
        &mut self,
        arena: &PathArena,
        dir: PathId,
    ) -> Result<Option<Box<dyn Operation>>> {
        let role = {
            let st = self.inner.borrow();
            st.config.role_for(arena, dir).map(|(role, _)| role)
        };
        Ok(role.map(|role| {
            Box::new(BaseDirOperation {
                inner: self.inner.clone(),
                dir,
                role,
                per_id: HashMap::new(),
            }) as Box<dyn Operation>
        }))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.borrow_mut().db.close_uncommitted()
    }
}

struct BaseDirOperation {
    inner: Rc<RefCell<BaseDirsState>>,
    dir: PathId,
    role: Role,
    per_id: HashMap<(IdKind, u32), IdAgg>,
}

impl BaseDirOperation {
    fn subdir_bucket(&self, arena: &PathArena, record_dir: PathId) -> Vec<u8> {
        if record_dir == self.dir {
            return b".".to_vec();
        }
        let child_depth = arena.depth(self.dir) + 1;
        match arena.ancestor_at_depth(record_dir, child_depth) {
            Some(child) => arena.basename(child).to_vec(),
            None => b".".to_vec(),
        }
    }
}

impl Operation for BaseDirOperation {
    fn add(&mut self, arena: &PathArena, info: &FileInfo) -> Result<()> {
        if !matches!(info.entry_type, EntryType::File | EntryType::Symlink) {
            return Ok(());
        }

        let my_depth = arena.depth(self.dir);
        let bucket = self.subdir_bucket(arena, info.path);

        let (file_type, ages) = {
            let st = self.inner.borrow();
            let file_type = st.classifier.classify_name(&info.name, false);
            let eff_atime = info.atime.max(info.mtime).max(0);
            (file_type, AgeSet::compute(eff_atime, info.mtime, st.now))
        };

        for (kind, id, other) in [
            (IdKind::Group, info.gid, info.uid),
            (IdKind::User, info.uid, info.gid),
        ] {
            self.inner
                .borrow_mut()
                .first_claims
                .entry((kind, id, my_depth))
                .or_insert(self.dir);

            let agg = self.per_id.entry((kind, id)).or_default();
            agg.others.insert(other);

            for age in ages.iter() {
                let totals = &mut agg.ages[age as usize];
                totals.count += 1;
                totals.size = totals.size.saturating_add(info.size);
                if info.mtime > totals.mtime {
                    totals.mtime = info.mtime;
                }

                let subdirs = agg
                    .subdirs
                    .entry(bucket.clone())
                    .or_insert_with(|| vec![SubDirTotals::default(); AGE_COUNT]);
                let sub = &mut subdirs[age as usize];
                sub.num_files += 1;
                sub.size_files = sub.size_files.saturating_add(info.size);
                if info.mtime > sub.last_modified {
                    sub.last_modified = info.mtime;
                }
                *sub.file_usage.entry(file_type).or_insert(0) += info.size;
            }
        }

        Ok(())
    }

    fn output(&mut self, arena: &PathArena) -> Result<()> {
        let base_dir = String::from_utf8_lossy(&arena.path_of(self.dir)).into_owned();
        let my_depth = arena.depth(self.dir);

        let mut st = self.inner.borrow_mut();
        let st = &mut *st;

        for ((kind, id), agg) in self.per_id.drain() {
            let emit_subdirs = match self.role {
                Role::BaseDir => true,
                Role::SubDirLevel => {
                    st.first_claims.get(&(kind, id, my_depth)) == Some(&self.dir)
                }
            };

            for age in 0..AGE_COUNT as u8 {
                let totals = agg.ages[age as usize];
                if totals.count == 0 {
                    continue;
                }

                if emit_subdirs {
                    let mut subs: Vec<SubDir> = agg
                        .subdirs
                        .iter()
                        .filter(|(_, ages)| ages[age as usize].num_files > 0)
                        .map(|(name, ages)| {
                            let t = &ages[age as usize];
                            SubDir {
                                sub_dir: String::from_utf8_lossy(name).into_owned(),
                                num_files: t.num_files,
                                size_files: t.size_files,
                                last_modified: t.last_modified,
                                file_usage: t
                                    .file_usage
                                    .iter()
                                    .map(|(ft, bytes)| (*ft, *bytes))
                                    .collect(),
                            }
                        })
                        .collect();
                    subs.sort_by(|a, b| a.sub_dir.cmp(&b.sub_dir));

                    match kind {
                        IdKind::Group => {
                            st.db.put_group_subdirs(id, &base_dir, age, &subs)?
                        }
                        IdKind::User => st.db.put_user_subdirs(id, &base_dir, age, &subs)?,
                    }
                }

                if self.role != Role::BaseDir {
                    continue;
                }

                let mut other_ids: Vec<u32> = agg.others.iter().copied().collect();
                other_ids.sort_unstable();

                let usage = match kind {
                    IdKind::Group => {
                        let (quota_size, quota_inodes) =
                            st.quotas.quotas_for(id, &base_dir);
                        Usage {
                            gid: id,
                            uid: 0,
                            other_ids,
                            name: st.names.group(id),
                            owner: st.owners.owner(id).to_string(),
                            base_dir: base_dir.clone(),
                            usage_size: totals.size,
                            quota_size,
                            usage_inodes: totals.count,
                            quota_inodes,
                            mtime: totals.mtime,
                            date_no_space: 0,
                            date_no_files: 0,
                            age,
                        }
                    }
                    IdKind::User => Usage {
                        gid: 0,
                        uid: id,
                        other_ids,
                        name: st.names.user(id),
                        owner: String::new(),
                        base_dir: base_dir.clone(),
                        usage_size: totals.size,
                        quota_size: 0,
                        usage_inodes: totals.count,
                        quota_inodes: 0,
                        mtime: totals.mtime,
                        date_no_space: 0,
                        date_no_files: 0,
                        age,
                    },
                };
                match kind {
                    IdKind::Group => st.db.put_group_usage(&usage)?,
                    IdKind::User => st.db.put_user_usage(&usage)?,
                }
            }

            // one history contribution per (gid, mount) per run,
            // summed across base dirs before the single append
            if self.role == Role::BaseDir && kind == IdKind::Group {
                let all = agg.ages[0];
                if let Some(mount) = longest_mount(&st.mounts, &base_dir) {
                    let entry = st
                        .history_acc
                        .entry((id, mount.to_string()))
                        .or_insert((0, 0));
                    entry.0 += all.size;
                    entry.1 += all.count;
                }
            }
        }

        Ok(())
    }
}

fn longest_mount<'a>(mounts: &'a [String], base_dir: &str) -> Option<&'a str> {
    mounts
        .iter()
        .filter(|m| base_dir.starts_with(m.as_str()))
        .max_by_key(|m| m.len())
        .map(String::as_str)
}

// src/dguta/aggregate.rs
//
// Per-directory accumulation of (gid, uid, file type, age) stats.
// Every open frame receives its whole subtree, so each emitted row is
// cumulative over the directory's descendants.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::dguta::guta::{DgutaRow, Guta, GutaStats};
use crate::dguta::store::DgutaWriter;
use crate::error::Result;
use crate::fileclass::{AgeSet, FileType, FileTypeClassifier, TempDirCache};
use crate::pathtree::{PathArena, PathId};
use crate::stats::{EntryType, FileInfo};
use crate::summarise::{Operation, OperationGenerator};

pub struct DgutaGenerator {
    writer: Rc<RefCell<DgutaWriter>>,
    classifier: Rc<FileTypeClassifier>,
    temp: Rc<RefCell<TempDirCache>>,
    now: i64,
}

impl DgutaGenerator {
    pub fn new(writer: Rc<RefCell<DgutaWriter>>, now: i64) -> Self {
        Self {
            writer,
            classifier: Rc::new(FileTypeClassifier::new()),
            temp: Rc::new(RefCell::new(TempDirCache::new())),
            now,
        }
    }
}

impl OperationGenerator for DgutaGenerator {
    fn new_operation(
        &mut self,
        _arena: &PathArena,
        dir: PathId,
    ) -> Result<Option<Box<dyn Operation>>> {
        Ok(Some(Box::new(DgutaOperation {
            dir,
            writer: self.writer.clone(),
            classifier: self.classifier.clone(),
            temp: self.temp.clone(),
            now: self.now,
            children: Vec::new(),
            stats: HashMap::new(),
        })))
    }

    fn close(&mut self) -> Result<()> {
        self.writer.borrow_mut().close_uncommitted()
    }
}

struct DgutaOperation {
    dir: PathId,
    writer: Rc<RefCell<DgutaWriter>>,
    classifier: Rc<FileTypeClassifier>,
    temp: Rc<RefCell<TempDirCache>>,
    now: i64,
    children: Vec<Vec<u8>>,
    stats: HashMap<Guta, GutaStats>,
}

impl Operation for DgutaOperation {
    fn add(&mut self, arena: &PathArena, info: &FileInfo) -> Result<()> {
        if matches!(info.entry_type, EntryType::Other(_)) {
            return Ok(());
        }

        let is_dir = info.is_dir();
        if is_dir && arena.parent(info.path) == Some(self.dir) {
            self.children.push(arena.name(info.path).to_vec());
        }

        // long-unvisited directories must not masquerade as cold
        let atime = if is_dir { self.now } else { info.atime };
        let eff_atime = atime.max(info.mtime).max(0);

        let dir_temp = self
            .temp
            .borrow_mut()
            .is_temp(&self.classifier, arena, info.path);
        let (file_type, is_temp) = if is_dir {
            (FileType::Dir, dir_temp)
        } else {
            self.classifier.classify(&info.name, dir_temp, false)
        };

        let ages = AgeSet::compute(eff_atime, info.mtime, self.now);
        for age in ages.iter() {
            self.stats
                .entry(Guta {
                    gid: info.gid,
                    uid: info.uid,
                    file_type,
                    age,
                })
                .or_default()
                .add(info.size, eff_atime, info.mtime);

            if is_temp {
                self.stats
                    .entry(Guta {
                        gid: info.gid,
                        uid: info.uid,
                        file_type: FileType::Temp,
                        age,
                    })
                    .or_default()
                    .add(info.size, eff_atime, info.mtime);
            }
        }

        Ok(())
    }

    fn output(&mut self, arena: &PathArena) -> Result<()> {
        let mut entries: Vec<(Guta, GutaStats)> = self.stats.drain().collect();
        entries.sort_by_key(|(key, _)| *key);

        let row = DgutaRow {
            dir: arena.path_of(self.dir),
            children: std::mem::take(&mut self.children),
            entries,
        };
        self.writer.borrow_mut().add_row(&row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileclass::age;
    use crate::stats::StatsParser;
    use std::io::Cursor;
    use tempfile::tempdir;

    const NOW: i64 = 1_700_000_000;
    const YEAR: i64 = 31_536_000;

    /// Drive a stream through one hand-held operation for `/`.
    fn aggregate(stream: &[u8]) -> Vec<DgutaRow> {
        let tmp = tempdir().unwrap();
        let writer = Rc::new(RefCell::new(
            DgutaWriter::create(&tmp.path().join("dirguta.dbs")).unwrap(),
        ));
        let mut generator = DgutaGenerator::new(writer.clone(), NOW);

        let mut arena = PathArena::new();
        let mut parser = StatsParser::new(Cursor::new(stream.to_vec()));
        let mut op = generator
            .new_operation(&arena, crate::pathtree::PathId::ROOT)
            .unwrap()
            .unwrap();
        let mut rows = Vec::new();
        while let Some(info) = parser.next_record(&mut arena).unwrap() {
            op.add(&arena, &info).unwrap();
        }
        op.output(&arena).unwrap();

        // recover the row through the store
        {
            let mut w = writer.borrow_mut();
            w.finish().unwrap();
        }
        let reader =
            crate::dguta::store::StoreReader::open(&tmp.path().join("dirguta.dbs")).unwrap();
        for entry in reader.index.clone() {
            rows.push(reader.read_row(&entry).unwrap());
        }
        rows
    }

    fn line(path: &str, size: u64, uid: u32, gid: u32, atime: i64, mtime: i64, t: char) -> String {
        format!("{path} {size} {uid} {gid} {atime} {mtime} {mtime} {t}\n")
    }

    #[test]
    fn files_land_in_every_matching_age_bucket() {
        let stream = line("/f.bam", 100, 1, 2, NOW - 4 * YEAR, NOW - 4 * YEAR, 'f');
        let rows = aggregate(stream.as_bytes());
        let row = &rows[0];

        let bam_ages: Vec<u8> = row
            .entries
            .iter()
            .filter(|(k, _)| k.file_type == FileType::Bam)
            .map(|(k, _)| k.age)
            .collect();

        // all + atime 1m..3y + mtime 1m..3y
        assert!(bam_ages.contains(&age::AGE_ALL));
        assert!(bam_ages.contains(&age::AGE_A3Y));
        assert!(!bam_ages.contains(&age::AGE_A5Y));
        assert!(bam_ages.contains(&age::AGE_M3Y));
        assert_eq!(bam_ages.len(), 13);

        for (k, s) in &row.entries {
            assert_eq!(k.gid, 2);
            assert_eq!(k.uid, 1);
            assert_eq!(s.count, 1);
            assert_eq!(s.size, 100);
        }
    }

    #[test]
    fn entries_are_strictly_sorted_by_encoding() {
        let stream = [
            line("/a.bam", 10, 5, 9, NOW, NOW, 'f'),
            line("/b.txt", 20, 1, 9, NOW - 2 * YEAR, NOW, 'f'),
            line("/c.bam", 30, 5, 3, NOW, NOW - 8 * YEAR, 'f'),
        ]
        .concat();
        let rows = aggregate(stream.as_bytes());
        let entries = &rows[0].entries;
        assert!(entries.len() > 3);
        for pair in entries.windows(2) {
            assert!(pair[0].0.encode() < pair[1].0.encode());
        }
    }

    #[test]
    fn temp_overlay_never_exceeds_natural_rows() {
        let stream = [
            line("/tmp/", 0, 1, 1, NOW, NOW, 'd'),
            line("/tmp/x.bam", 50, 1, 1, NOW, NOW, 'f'),
            line("/keep.bam", 70, 1, 1, NOW, NOW, 'f'),
        ]
        .concat();
        let rows = aggregate(stream.as_bytes());
        let row = &rows[0];

        let temp_all: u64 = row
            .entries
            .iter()
            .filter(|(k, _)| k.file_type == FileType::Temp && k.age == age::AGE_ALL)
            .map(|(_, s)| s.size)
            .sum();
        let natural_all: u64 = row
            .entries
            .iter()
            .filter(|(k, _)| {
                k.file_type != FileType::Temp && k.age == age::AGE_ALL
            })
            .map(|(_, s)| s.size)
            .sum();

        assert_eq!(temp_all, 50);
        assert!(temp_all <= natural_all);

        // the bam rows carry both files
        let bam: u64 = row
            .entries
            .iter()
            .filter(|(k, _)| k.file_type == FileType::Bam && k.age == age::AGE_ALL)
            .map(|(_, s)| s.size)
            .sum();
        assert_eq!(bam, 120);
    }

    #[test]
    fn directories_use_now_for_atime() {
        // a directory untouched for 8 years must not appear cold
        let stream = line("/old/", 4096, 1, 1, NOW - 8 * YEAR, NOW - 8 * YEAR, 'd');
        let rows = aggregate(stream.as_bytes());
        let row = &rows[0];

        let dir_ages: Vec<u8> = row
            .entries
            .iter()
            .filter(|(k, _)| k.file_type == FileType::Dir)
            .map(|(k, _)| k.age)
            .collect();

        assert!(dir_ages.contains(&age::AGE_ALL));
        // atime buckets empty: effective access is `now`
        assert!(!dir_ages.contains(&age::AGE_A1M));
        // mtime buckets still real
        assert!(dir_ages.contains(&age::AGE_M7Y));
    }

    #[test]
    fn effective_access_uses_mtime_when_newer() {
        let stream = line("/f.txt", 1, 1, 1, NOW - 2 * YEAR, NOW, 'f');
        let rows = aggregate(stream.as_bytes());
        let row = &rows[0];

        // mtime = now pulls effective access to now
        assert!(!row
            .entries
            .iter()
            .any(|(k, _)| k.file_type == FileType::Text && k.age == age::AGE_A1M));
    }

    #[test]
    fn children_recorded_in_entry_order() {
        let stream = [
            line("/zeta/", 0, 1, 1, NOW, NOW, 'd'),
            line("/alpha/", 0, 1, 1, NOW, NOW, 'd'),
        ]
        .concat();
        let rows = aggregate(stream.as_bytes());
        let root = rows.iter().find(|r| r.dir == b"/").unwrap();
        assert_eq!(root.children, vec![b"zeta/".to_vec(), b"alpha/".to_vec()]);
    }

    #[test]
    fn unknown_entry_types_are_skipped() {
        let stream = [
            line("/sock", 9, 1, 1, NOW, NOW, 's'),
            line("/f.txt", 1, 1, 1, NOW, NOW, 'f'),
        ]
        .concat();
        let rows = aggregate(stream.as_bytes());
        let all: u64 = rows[0]
            .entries
            .iter()
            .filter(|(k, _)| k.age == age::AGE_ALL)
            .map(|(_, s)| s.count)
            .sum();
        assert_eq!(all, 1);
    }

    #[test]
    fn symlinks_count_as_files() {
        let stream = line("/link", 12, 1, 1, NOW, NOW, 'l');
        let rows = aggregate(stream.as_bytes());
        let (k, s) = rows[0]
            .entries
            .iter()
            .find(|(k, _)| k.age == age::AGE_ALL)
            .unwrap();
        assert_eq!(k.file_type, FileType::Other);
        assert_eq!(s.count, 1);
        assert_eq!(s.size, 12);
    }
}

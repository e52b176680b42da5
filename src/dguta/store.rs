// src/dguta/store.rs
//
// On-disk layout: a pair of files per dataset. The rows file holds
// length-framed payloads (GUTA entries then the children list) in
// arrival order; the keys file, written once at finish, holds the
// directory keys sorted lexicographically with the offset and length
// of their payload. Point lookups binary-search the loaded key table.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::dguta::guta::{DgutaRow, Guta, GutaStats, GUTA_KEY_LEN};
use crate::error::{Error, Result};

pub const KEYS_FILE: &str = "dirguta.keys";
pub const ROWS_FILE: &str = "dirguta.rows";

const KEYS_MAGIC: &[u8; 4] = b"DGKS";
const ROWS_MAGIC: &[u8; 4] = b"DGRW";
const FORMAT_VERSION: u32 = 1;

const WRITE_BUF_SIZE: usize = 8 * 1024 * 1024;
const ENTRY_BYTES: usize = GUTA_KEY_LEN + 8 + 8 + 8 + 8;

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub key: Box<[u8]>,
    pub offset: u64,
    pub len: u32,
}

pub struct DgutaWriter {
    dir: PathBuf,
    rows: BufWriter<File>,
    offset: u64,
    index: Vec<IndexEntry>,
    total_entries: u64,
    finished: bool,
}

impl DgutaWriter {
    /// Create a store under `dir` (the `dirguta.dbs` directory of a
    /// dataset version), truncating any previous pair.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut rows = BufWriter::with_capacity(
            WRITE_BUF_SIZE,
            File::create(dir.join(ROWS_FILE))?,
        );
        rows.write_all(ROWS_MAGIC)?;
        rows.write_all(&FORMAT_VERSION.to_le_bytes())?;

        Ok(Self {
            dir: dir.to_path_buf(),
            rows,
            offset: 8,
            index: Vec::new(),
            total_entries: 0,
            finished: false,
        })
    }

    pub fn add_row(&mut self, row: &DgutaRow) -> Result<()> {
        let payload = encode_payload(row);
        self.rows.write_all(&payload)?;
        self.index.push(IndexEntry {
            key: row.dir.clone().into_boxed_slice(),
            offset: self.offset,
            len: payload.len() as u32,
        });
        self.offset += payload.len() as u64;
        self.total_entries += row.entries.len() as u64;
        Ok(())
    }

    /// Sort the key table and commit it to disk. Until this runs the
    /// store is not readable.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.rows.flush()?;
        self.index.sort_by(|a, b| a.key.cmp(&b.key));

        let mut keys = BufWriter::with_capacity(
            WRITE_BUF_SIZE,
            File::create(self.dir.join(KEYS_FILE))?,
        );
        keys.write_all(KEYS_MAGIC)?;
        keys.write_all(&FORMAT_VERSION.to_le_bytes())?;
        keys.write_all(&(self.index.len() as u64).to_be_bytes())?;
        keys.write_all(&self.total_entries.to_be_bytes())?;

        for entry in &self.index {
            keys.write_all(&(entry.key.len() as u32).to_be_bytes())?;
            keys.write_all(&entry.key)?;
            keys.write_all(&entry.offset.to_be_bytes())?;
            keys.write_all(&entry.len.to_be_bytes())?;
        }
        keys.flush()?;

        debug!(
            directories = self.index.len(),
            entries = self.total_entries,
            "dguta store committed"
        );
        self.finished = true;
        Ok(())
    }

    /// Flush and drop handles without committing the key table.
    pub fn close_uncommitted(&mut self) -> Result<()> {
        self.rows.flush()?;
        self.finished = true;
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.index.len()
    }
}

fn encode_payload(row: &DgutaRow) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + row.entries.len() * ENTRY_BYTES);

    out.extend_from_slice(&(row.entries.len() as u32).to_le_bytes());
    for (key, stats) in &row.entries {
        out.extend_from_slice(&key.encode());
        out.extend_from_slice(&stats.count.to_le_bytes());
        out.extend_from_slice(&stats.size.to_le_bytes());
        out.extend_from_slice(&stats.oldest_atime.to_le_bytes());
        out.extend_from_slice(&stats.newest_mtime.to_le_bytes());
    }

    out.extend_from_slice(&(row.children.len() as u32).to_le_bytes());
    for child in &row.children {
        out.extend_from_slice(&(child.len() as u16).to_le_bytes());
        out.extend_from_slice(child);
    }

    out
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize, offset: u64) -> Result<&'a [u8]> {
    let end = pos
        .checked_add(n)
        .filter(|&end| end <= bytes.len())
        .ok_or(Error::CorruptStore { offset })?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

pub fn decode_payload(dir: &[u8], bytes: &[u8], offset: u64) -> Result<DgutaRow> {
    let mut pos = 0usize;

    let n_entries =
        u32::from_le_bytes(take(bytes, &mut pos, 4, offset)?.try_into().unwrap()) as usize;
    let mut entries = Vec::with_capacity(n_entries.min(1 << 16));
    for _ in 0..n_entries {
        let key = Guta::decode(take(bytes, &mut pos, GUTA_KEY_LEN, offset)?)
            .ok_or(Error::CorruptStore { offset })?;
        let count =
            u64::from_le_bytes(take(bytes, &mut pos, 8, offset)?.try_into().unwrap());
        let size =
            u64::from_le_bytes(take(bytes, &mut pos, 8, offset)?.try_into().unwrap());
        let oldest_atime =
            i64::from_le_bytes(take(bytes, &mut pos, 8, offset)?.try_into().unwrap());
        let newest_mtime =
            i64::from_le_bytes(take(bytes, &mut pos, 8, offset)?.try_into().unwrap());
        entries.push((
            key,
            GutaStats {
                count,
                size,
                oldest_atime,
                newest_mtime,
            },
        ));
    }

    let n_children =
        u32::from_le_bytes(take(bytes, &mut pos, 4, offset)?.try_into().unwrap()) as usize;
    let mut children = Vec::with_capacity(n_children.min(1 << 16));
    for _ in 0..n_children {
        let len =
            u16::from_le_bytes(take(bytes, &mut pos, 2, offset)?.try_into().unwrap()) as usize;
        children.push(take(bytes, &mut pos, len, offset)?.to_vec());
    }

    if pos != bytes.len() {
        return Err(Error::CorruptStore { offset });
    }

    Ok(DgutaRow {
        dir: dir.to_vec(),
        children,
        entries,
    })
}

/// Loaded key table plus the rows file, shared by concurrent readers.
pub struct StoreReader {
    pub index: Vec<IndexEntry>,
    pub total_entries: u64,
    rows: Mutex<File>,
}

impl StoreReader {
    pub fn open(dir: &Path) -> Result<Self> {
        let mut keys = File::open(dir.join(KEYS_FILE))?;
        let mut header = [0u8; 24];
        keys.read_exact(&mut header)
            .map_err(|_| Error::CorruptStore { offset: 0 })?;
        if &header[0..4] != KEYS_MAGIC
            || u32::from_le_bytes(header[4..8].try_into().unwrap()) != FORMAT_VERSION
        {
            return Err(Error::CorruptStore { offset: 0 });
        }
        let count = u64::from_be_bytes(header[8..16].try_into().unwrap()) as usize;
        let total_entries = u64::from_be_bytes(header[16..24].try_into().unwrap());

        let mut table = Vec::new();
        keys.read_to_end(&mut table)?;

        let corrupt = |pos: usize| Error::CorruptStore { offset: pos as u64 };
        let mut index = Vec::with_capacity(count);
        let mut pos = 0usize;
        for _ in 0..count {
            if pos + 4 > table.len() {
                return Err(corrupt(pos));
            }
            let klen =
                u32::from_be_bytes(table[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + klen + 12 > table.len() {
                return Err(corrupt(pos));
            }
            let key = table[pos..pos + klen].to_vec().into_boxed_slice();
            pos += klen;
            let offset = u64::from_be_bytes(table[pos..pos + 8].try_into().unwrap());
            pos += 8;
            let len = u32::from_be_bytes(table[pos..pos + 4].try_into().unwrap());
            pos += 4;
            index.push(IndexEntry { key, offset, len });
        }
        if pos != table.len() {
            return Err(corrupt(pos));
        }

        let mut rows = File::open(dir.join(ROWS_FILE))?;
        let mut magic = [0u8; 8];
        rows.read_exact(&mut magic)
            .map_err(|_| Error::CorruptStore { offset: 0 })?;
        if &magic[0..4] != ROWS_MAGIC {
            return Err(Error::CorruptStore { offset: 0 });
        }

        Ok(Self {
            index,
            total_entries,
            rows: Mutex::new(rows),
        })
    }

    pub fn lookup(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.index
            .binary_search_by(|e| e.key.as_ref().cmp(key))
            .ok()
            .map(|i| &self.index[i])
    }

    pub fn read_row(&self, entry: &IndexEntry) -> Result<DgutaRow> {
        let mut buf = vec![0u8; entry.len as usize];
        {
            let mut rows = self.rows.lock().expect("rows file lock poisoned");
            rows.seek(SeekFrom::Start(entry.offset))?;
            rows.read_exact(&mut buf).map_err(|_| Error::CorruptStore {
                offset: entry.offset,
            })?;
        }
        decode_payload(&entry.key, &buf, entry.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileclass::FileType;
    use tempfile::tempdir;

    fn sample_row(dir: &[u8]) -> DgutaRow {
        let mut entries = vec![
            (
                Guta { gid: 1, uid: 1, file_type: FileType::Bam, age: 0 },
                GutaStats { count: 2, size: 300, oldest_atime: 10, newest_mtime: 90 },
            ),
            (
                Guta { gid: 1, uid: 2, file_type: FileType::Other, age: 3 },
                GutaStats { count: 1, size: 7, oldest_atime: 5, newest_mtime: 6 },
            ),
        ];
        entries.sort_by_key(|(k, _)| *k);
        DgutaRow {
            dir: dir.to_vec(),
            children: vec![b"sub1/".to_vec(), b"sub2/".to_vec()],
            entries,
        }
    }

    #[test]
    fn payload_round_trip() {
        let row = sample_row(b"/a/b/");
        let encoded = encode_payload(&row);
        let decoded = decode_payload(b"/a/b/", &encoded, 0).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn truncated_payload_is_corrupt() {
        let row = sample_row(b"/a/");
        let encoded = encode_payload(&row);
        for cut in [1, 5, encoded.len() - 1] {
            match decode_payload(b"/a/", &encoded[..cut], 77) {
                Err(Error::CorruptStore { offset: 77 }) => {}
                other => panic!("cut {cut}: expected corrupt, got {other:?}"),
            }
        }
    }

    #[test]
    fn trailing_garbage_is_corrupt() {
        let row = sample_row(b"/a/");
        let mut encoded = encode_payload(&row);
        encoded.push(0);
        assert!(decode_payload(b"/a/", &encoded, 0).is_err());
    }

    #[test]
    fn write_then_read_store() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("dirguta.dbs");

        let mut writer = DgutaWriter::create(&dir).unwrap();
        // rows arrive deepest-first, the key table must come out sorted
        writer.add_row(&sample_row(b"/a/b/")).unwrap();
        writer.add_row(&sample_row(b"/a/")).unwrap();
        writer.add_row(&sample_row(b"/")).unwrap();
        writer.finish().unwrap();

        let reader = StoreReader::open(&dir).unwrap();
        assert_eq!(reader.index.len(), 3);
        assert_eq!(reader.total_entries, 6);

        let keys: Vec<&[u8]> = reader.index.iter().map(|e| e.key.as_ref()).collect();
        assert_eq!(keys, vec![&b"/"[..], b"/a/", b"/a/b/"]);

        let entry = reader.lookup(b"/a/b/").unwrap();
        let row = reader.read_row(entry).unwrap();
        assert_eq!(row, sample_row(b"/a/b/"));

        assert!(reader.lookup(b"/missing/").is_none());
    }

    #[test]
    fn unfinished_store_is_unreadable() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("dirguta.dbs");

        let mut writer = DgutaWriter::create(&dir).unwrap();
        writer.add_row(&sample_row(b"/a/")).unwrap();
        writer.close_uncommitted().unwrap();
        drop(writer);

        assert!(StoreReader::open(&dir).is_err());
    }

    #[test]
    fn corrupt_key_file_detected() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("dirguta.dbs");

        let mut writer = DgutaWriter::create(&dir).unwrap();
        writer.add_row(&sample_row(b"/a/")).unwrap();
        writer.finish().unwrap();

        let keys_path = dir.join(KEYS_FILE);
        let data = fs::read(&keys_path).unwrap();
        fs::write(&keys_path, &data[..data.len() - 3]).unwrap();

        assert!(matches!(
            StoreReader::open(&dir),
            Err(Error::CorruptStore { .. })
        ));
    }

    #[test]
    fn empty_store_round_trips() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("dirguta.dbs");
        DgutaWriter::create(&dir).unwrap().finish().unwrap();

        let reader = StoreReader::open(&dir).unwrap();
        assert!(reader.index.is_empty());
        assert_eq!(reader.total_entries, 0);
    }
}

// src/stats.rs
//
// Parser for the line-oriented file-stats stream:
//   path size uid gid atime mtime ctime entry_type ...
// Paths are bytes and may arrive in the producer's quoted form when
// they embed whitespace. Records arrive in depth-first directory
// order, directories before their contents.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use crossbeam::channel::{bounded, Receiver};
use memchr::memchr;

use crate::error::{Error, Result};
use crate::pathtree::{PathArena, PathId};
use crate::util::{last_slash, parse_int_strict, quote};

pub const READ_BUF_SIZE: usize = 2 * 1024 * 1024;
const DECODE_CHUNK: usize = 1024 * 1024;
const DECODE_QUEUE: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
    Symlink,
    Other(u8),
}

impl EntryType {
    pub fn from_byte(b: u8) -> EntryType {
        match b {
            b'f' => EntryType::File,
            b'd' => EntryType::Dir,
            b'l' => EntryType::Symlink,
            other => EntryType::Other(other),
        }
    }
}

/// One parsed stats record. `path` is the containing directory for
/// files and the directory itself for dir entries.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathId,
    pub name: Vec<u8>,
    pub entry_type: EntryType,
    pub size: u64,
    pub uid: u32,
    pub gid: u32,
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.entry_type == EntryType::Dir
    }
}

pub struct StatsParser<R: BufRead> {
    reader: R,
    line: u64,
    buf: Vec<u8>,
}

impl<R: BufRead> StatsParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: 0,
            buf: Vec::with_capacity(512),
        }
    }

    pub fn line_number(&self) -> u64 {
        self.line
    }

    fn malformed(&self, cause: &str) -> Error {
        Error::MalformedRecord {
            line: self.line,
            cause: cause.to_string(),
        }
    }

    /// Next record, interning its directory into `arena`.
    /// Blank lines are skipped; `None` at end of stream.
    pub fn next_record(&mut self, arena: &mut PathArena) -> Result<Option<FileInfo>> {
        loop {
            if !self.fill_line()? {
                return Ok(None);
            }
            self.line += 1;
            if self.buf.is_empty() {
                continue;
            }

            let line: &[u8] = &self.buf;
            return self.parse_line(line, arena).map(Some);
        }
    }

    /// Pull the next line into the scratch buffer with the line
    /// ending stripped. False once the stream is exhausted.
    fn fill_line(&mut self) -> Result<bool> {
        self.buf.clear();
        loop {
            let chunk = self.reader.fill_buf()?;
            if chunk.is_empty() {
                // a final line may arrive without a newline
                return Ok(!self.buf.is_empty());
            }

            match memchr(b'\n', chunk) {
                Some(pos) => {
                    self.buf.extend_from_slice(&chunk[..pos]);
                    self.reader.consume(pos + 1);
                    if self.buf.ends_with(b"\r") {
                        self.buf.pop();
                    }
                    return Ok(true);
                }
                None => {
                    self.buf.extend_from_slice(chunk);
                    let consumed = chunk.len();
                    self.reader.consume(consumed);
                }
            }
        }
    }

    fn parse_line(&self, line: &[u8], arena: &mut PathArena) -> Result<FileInfo> {
        let (path_field, rest) = split_path_field(line)
            .ok_or_else(|| self.malformed("unterminated quoted path"))?;
        let path_bytes =
            quote::unquote(path_field).ok_or_else(|| self.malformed("bad path escape"))?;
        if path_bytes.is_empty() {
            return Err(self.malformed("empty path"));
        }

        let mut fields = rest
            .split(|&b| b == b' ' || b == b'\t')
            .filter(|f| !f.is_empty());

        let size: u64 = self.numeric(fields.next(), "size")?;
        let uid: u32 = self.numeric(fields.next(), "uid")?;
        let gid: u32 = self.numeric(fields.next(), "gid")?;
        let atime: i64 = self.numeric(fields.next(), "atime")?;
        let mtime: i64 = self.numeric(fields.next(), "mtime")?;
        let ctime: i64 = self.numeric(fields.next(), "ctime")?;
        let type_field = fields
            .next()
            .ok_or_else(|| self.malformed("missing entry_type"))?;
        let entry_type = EntryType::from_byte(type_field[0]);

        let (path, name) = match entry_type {
            EntryType::Dir => {
                let id = arena.intern(&path_bytes);
                (id, arena.basename(id).to_vec())
            }
            _ => match last_slash(&path_bytes) {
                Some(pos) => {
                    let id = arena.intern(&path_bytes[..pos + 1]);
                    (id, path_bytes[pos + 1..].to_vec())
                }
                None => (PathId::ROOT, path_bytes.clone()),
            },
        };

        if name.is_empty() && path != PathId::ROOT {
            return Err(self.malformed("empty basename"));
        }

        Ok(FileInfo {
            path,
            name,
            entry_type,
            size,
            uid,
            gid,
            atime,
            mtime,
            ctime,
        })
    }

    fn numeric<T>(&self, field: Option<&[u8]>, what: &str) -> Result<T>
    where
        T: atoi::FromRadix10SignedChecked,
    {
        let field = field.ok_or_else(|| self.malformed(&format!("missing {what}")))?;
        parse_int_strict(field).ok_or_else(|| self.malformed(&format!("bad {what}")))
    }
}

/// Split the path field off the front of a line. Quoted paths may
/// embed whitespace; unquoted paths end at the first space or tab.
fn split_path_field(line: &[u8]) -> Option<(&[u8], &[u8])> {
    if line[0] == b'"' {
        let mut i = 1;
        while i < line.len() {
            match line[i] {
                b'\\' => i += 2,
                b'"' => return Some((&line[..i + 1], &line[i + 1..])),
                _ => i += 1,
            }
        }
        None
    } else {
        let end = line
            .iter()
            .position(|&b| b == b' ' || b == b'\t')
            .unwrap_or(line.len());
        Some((&line[..end], &line[end..]))
    }
}

/// Open a stats file, transparently decoding `.zst` input on a
/// background thread so decompression overlaps parsing.
pub fn open_stats(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;
    if path.extension().is_some_and(|e| e == "zst") {
        let rx = spawn_decoder(file)?;
        Ok(Box::new(BufReader::with_capacity(
            READ_BUF_SIZE,
            ChannelReader::new(rx),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(READ_BUF_SIZE, file)))
    }
}

fn spawn_decoder(file: File) -> Result<Receiver<io::Result<Vec<u8>>>> {
    let mut decoder = zstd::stream::read::Decoder::new(file)?;
    let (tx, rx) = bounded(DECODE_QUEUE);

    std::thread::spawn(move || {
        loop {
            let mut chunk = vec![0u8; DECODE_CHUNK];
            match decoder.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    chunk.truncate(n);
                    if tx.send(Ok(chunk)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });

    Ok(rx)
}

/// Read side of the background decoder channel.
pub struct ChannelReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    cur: Vec<u8>,
    pos: usize,
    done: bool,
}

impl ChannelReader {
    fn new(rx: Receiver<io::Result<Vec<u8>>>) -> Self {
        Self {
            rx,
            cur: Vec::new(),
            pos: 0,
            done: false,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.cur.len() {
            if self.done {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Ok(chunk)) => {
                    self.cur = chunk;
                    self.pos = 0;
                }
                Ok(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                Err(_) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }

        let n = (self.cur.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.cur[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Serialize one record back to the stream format, quoting the path
/// when needed. Used by tests and stream-producing tooling.
pub fn write_record(out: &mut Vec<u8>, path: &[u8], info: &FileInfo) {
    fn field(out: &mut Vec<u8>, value: impl itoa::Integer) {
        let mut digits = itoa::Buffer::new();
        out.push(b' ');
        out.extend_from_slice(digits.format(value).as_bytes());
    }

    if quote::needs_quoting(path) {
        quote::quote_into(path, out);
    } else {
        out.extend_from_slice(path);
    }
    field(out, info.size);
    field(out, info.uid);
    field(out, info.gid);
    field(out, info.atime);
    field(out, info.mtime);
    field(out, info.ctime);
    out.push(b' ');
    out.push(match info.entry_type {
        EntryType::File => b'f',
        EntryType::Dir => b'd',
        EntryType::Symlink => b'l',
        EntryType::Other(b) => b,
    });
    out.push(b'\n');
}

// src/fileclass/filetype.rs
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::fileclass::dfa::ByteDfa;
use crate::pathtree::{PathArena, PathId};

/// Fixed file-type taxonomy. `Temp` is an overlay: recorded in
/// addition to the natural type, never instead of it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum FileType {
    #[serde(rename = "other")]
    Other = 0,
    #[serde(rename = "temp")]
    Temp = 1,
    #[serde(rename = "vcf")]
    Vcf = 2,
    #[serde(rename = "vcf.gz")]
    VcfGz = 3,
    #[serde(rename = "bcf")]
    Bcf = 4,
    #[serde(rename = "sam")]
    Sam = 5,
    #[serde(rename = "bam")]
    Bam = 6,
    #[serde(rename = "cram")]
    Cram = 7,
    #[serde(rename = "fasta")]
    Fasta = 8,
    #[serde(rename = "fastq")]
    Fastq = 9,
    #[serde(rename = "fastq.gz")]
    FastqGz = 10,
    #[serde(rename = "ped/bed")]
    PedBed = 11,
    #[serde(rename = "compressed")]
    Compressed = 12,
    #[serde(rename = "text")]
    Text = 13,
    #[serde(rename = "log")]
    Log = 14,
    #[serde(rename = "dir")]
    Dir = 15,
}

pub const FILE_TYPE_COUNT: usize = 16;

impl FileType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(v: u8) -> Option<FileType> {
        use FileType::*;
        Some(match v {
            0 => Other,
            1 => Temp,
            2 => Vcf,
            3 => VcfGz,
            4 => Bcf,
            5 => Sam,
            6 => Bam,
            7 => Cram,
            8 => Fasta,
            9 => Fastq,
            10 => FastqGz,
            11 => PedBed,
            12 => Compressed,
            13 => Text,
            14 => Log,
            15 => Dir,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use FileType::*;
        match self {
            Other => "other",
            Temp => "temp",
            Vcf => "vcf",
            VcfGz => "vcf.gz",
            Bcf => "bcf",
            Sam => "sam",
            Bam => "bam",
            Cram => "cram",
            Fasta => "fasta",
            Fastq => "fastq",
            FastqGz => "fastq.gz",
            PedBed => "ped/bed",
            Compressed => "compressed",
            Text => "text",
            Log => "log",
            Dir => "dir",
        }
    }

    pub fn iter_all() -> impl Iterator<Item = FileType> {
        (0..FILE_TYPE_COUNT as u8).filter_map(FileType::from_u8)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const TEMP_TOKEN: u8 = 1;

/// Suffix/prefix DFA bundle classifying basenames into FileTypes and
/// spotting temporary files.
pub struct FileTypeClassifier {
    suffix: ByteDfa,
    temp_suffix: ByteDfa,
    temp_prefix: ByteDfa,
}

impl Default for FileTypeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTypeClassifier {
    pub fn new() -> Self {
        let suffixes: [(&[u8], FileType); 31] = [
            (b".vcf", FileType::Vcf),
            (b".vcf.gz", FileType::VcfGz),
            (b".bcf", FileType::Bcf),
            (b".sam", FileType::Sam),
            (b".bam", FileType::Bam),
            (b".cram", FileType::Cram),
            (b".fa", FileType::Fasta),
            (b".fasta", FileType::Fasta),
            (b".fq", FileType::Fastq),
            (b".fastq", FileType::Fastq),
            (b".fq.gz", FileType::FastqGz),
            (b".fastq.gz", FileType::FastqGz),
            (b".ped", FileType::PedBed),
            (b".map", FileType::PedBed),
            (b".bed", FileType::PedBed),
            (b".bim", FileType::PedBed),
            (b".fam", FileType::PedBed),
            (b".bzip2", FileType::Compressed),
            (b".gz", FileType::Compressed),
            (b".tgz", FileType::Compressed),
            (b".zip", FileType::Compressed),
            (b".xz", FileType::Compressed),
            (b".bgz", FileType::Compressed),
            (b".csv", FileType::Text),
            (b".tsv", FileType::Text),
            (b".txt", FileType::Text),
            (b".text", FileType::Text),
            (b".md", FileType::Text),
            (b".dat", FileType::Text),
            (b"readme", FileType::Text),
            (b".log", FileType::Log),
        ];
        // .out/.o/.err/.e/.oe share suffix bytes with nothing above
        let log_suffixes: [&[u8]; 5] = [b".out", b".o", b".err", b".e", b".oe"];

        let mut reversed: Vec<(Vec<u8>, u8)> = suffixes
            .iter()
            .map(|(s, t)| (s.iter().rev().copied().collect(), t.as_u8()))
            .collect();
        for s in log_suffixes {
            reversed.push((s.iter().rev().copied().collect(), FileType::Log.as_u8()));
        }
        let entries: Vec<(&[u8], u8)> = reversed
            .iter()
            .map(|(s, t)| (s.as_slice(), *t))
            .collect();

        let temp_suffixes: [&[u8]; 2] = [b".tmp", b".temp"];
        let temp_rev: Vec<Vec<u8>> = temp_suffixes
            .iter()
            .map(|s| s.iter().rev().copied().collect())
            .collect();
        let temp_suffix_entries: Vec<(&[u8], u8)> =
            temp_rev.iter().map(|s| (s.as_slice(), TEMP_TOKEN)).collect();

        let temp_prefix_entries: [(&[u8], u8); 4] = [
            (b"tmp.", TEMP_TOKEN),
            (b"temp.", TEMP_TOKEN),
            (b".tmp.", TEMP_TOKEN),
            (b".temp.", TEMP_TOKEN),
        ];

        Self {
            suffix: ByteDfa::new(&entries),
            temp_suffix: ByteDfa::new(&temp_suffix_entries),
            temp_prefix: ByteDfa::new(&temp_prefix_entries),
        }
    }

    /// Natural type of a basename, ignoring the temp overlay.
    pub fn classify_name(&self, name: &[u8], is_dir: bool) -> FileType {
        if is_dir {
            return FileType::Dir;
        }
        self.suffix
            .longest_suffix_token(name)
            .and_then(FileType::from_u8)
            .unwrap_or(FileType::Other)
    }

    /// True when the basename alone marks a temporary file.
    pub fn is_temp_name(&self, name: &[u8]) -> bool {
        self.temp_suffix.longest_suffix_token(name).is_some()
            || self.temp_prefix.longest_prefix_token(name).is_some()
    }

    /// True for directory segment names that mark their subtree
    /// temporary: exactly tmp/temp, or the usual temp affixes.
    pub fn is_temp_dirname(&self, name: &[u8]) -> bool {
        name.eq_ignore_ascii_case(b"tmp")
            || name.eq_ignore_ascii_case(b"temp")
            || self.is_temp_name(name)
    }

    /// Full classification of one record.
    pub fn classify(&self, name: &[u8], dir_is_temp: bool, is_dir: bool) -> (FileType, bool) {
        let file_type = self.classify_name(name, is_dir);
        let is_temp = dir_is_temp || self.is_temp_name(name);
        (file_type, is_temp)
    }
}

/// Per-run memo of "is this directory inside a temp subtree".
#[derive(Default)]
pub struct TempDirCache {
    map: HashMap<PathId, bool>,
}

impl TempDirCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_temp(
        &mut self,
        classifier: &FileTypeClassifier,
        arena: &PathArena,
        dir: PathId,
    ) -> bool {
        if let Some(&hit) = self.map.get(&dir) {
            return hit;
        }
        let result = match arena.parent(dir) {
            None => false,
            Some(parent) => {
                self.is_temp(classifier, arena, parent)
                    || classifier.is_temp_dirname(arena.basename(dir))
            }
        };
        self.map.insert(dir, result);
        result
    }
}

// src/dguta/guta.rs
//
// The per-directory aggregation key: (gid, uid, file type, age
// bucket), with a canonical 10-byte big-endian encoding whose byte
// order equals the tuple order.

use crate::fileclass::FileType;

pub const GUTA_KEY_LEN: usize = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guta {
    pub gid: u32,
    pub uid: u32,
    pub file_type: FileType,
    pub age: u8,
}

impl Guta {
    pub fn encode(self) -> [u8; GUTA_KEY_LEN] {
        let mut out = [0u8; GUTA_KEY_LEN];
        out[0..4].copy_from_slice(&self.gid.to_be_bytes());
        out[4..8].copy_from_slice(&self.uid.to_be_bytes());
        out[8] = self.file_type.as_u8();
        out[9] = self.age;
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Guta> {
        if bytes.len() != GUTA_KEY_LEN {
            return None;
        }
        let gid = u32::from_be_bytes(bytes[0..4].try_into().ok()?);
        let uid = u32::from_be_bytes(bytes[4..8].try_into().ok()?);
        let file_type = FileType::from_u8(bytes[8])?;
        let age = bytes[9];
        if !crate::fileclass::age::is_valid_age(age) {
            return None;
        }
        Some(Guta {
            gid,
            uid,
            file_type,
            age,
        })
    }
}

/// Accumulated numbers for one GUTA key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GutaStats {
    pub count: u64,
    pub size: u64,
    pub oldest_atime: i64,
    pub newest_mtime: i64,
}

impl Default for GutaStats {
    fn default() -> Self {
        Self {
            count: 0,
            size: 0,
            oldest_atime: i64::MAX,
            newest_mtime: i64::MIN,
        }
    }
}

impl GutaStats {
    pub fn add(&mut self, size: u64, atime: i64, mtime: i64) {
        self.count += 1;
        self.size = self.size.saturating_add(size);
        if atime < self.oldest_atime {
            self.oldest_atime = atime;
        }
        if mtime > self.newest_mtime {
            self.newest_mtime = mtime;
        }
    }

    pub fn merge(&mut self, other: &GutaStats) {
        self.count += other.count;
        self.size = self.size.saturating_add(other.size);
        self.oldest_atime = self.oldest_atime.min(other.oldest_atime);
        self.newest_mtime = self.newest_mtime.max(other.newest_mtime);
    }
}

/// One emitted row: a directory, its direct child directory names (in
/// entry order, with trailing slash) and its GUTA entries sorted by
/// canonical key encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct DgutaRow {
    pub dir: Vec<u8>,
    pub children: Vec<Vec<u8>>,
    pub entries: Vec<(Guta, GutaStats)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fileclass::age;

    #[test]
    fn encode_decode_round_trip() {
        let key = Guta {
            gid: 0xdead_beef,
            uid: 42,
            file_type: FileType::Bam,
            age: age::AGE_M2Y,
        };
        let bytes = key.encode();
        assert_eq!(bytes.len(), GUTA_KEY_LEN);
        assert_eq!(Guta::decode(&bytes), Some(key));
    }

    #[test]
    fn encoding_order_matches_tuple_order() {
        let keys = [
            Guta { gid: 1, uid: 9, file_type: FileType::Dir, age: 16 },
            Guta { gid: 2, uid: 0, file_type: FileType::Other, age: 0 },
            Guta { gid: 2, uid: 0, file_type: FileType::Other, age: 1 },
            Guta { gid: 2, uid: 0, file_type: FileType::Temp, age: 0 },
            Guta { gid: 2, uid: 1, file_type: FileType::Other, age: 0 },
        ];
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].encode() < pair[1].encode(), "{:?}", pair);
        }
    }

    #[test]
    fn decode_rejects_bad_input() {
        assert_eq!(Guta::decode(&[0; 9]), None);
        assert_eq!(Guta::decode(&[0; 11]), None);

        // invalid file type
        let mut bytes = [0u8; GUTA_KEY_LEN];
        bytes[8] = 200;
        assert_eq!(Guta::decode(&bytes), None);

        // invalid age
        let mut bytes = [0u8; GUTA_KEY_LEN];
        bytes[9] = 17;
        assert_eq!(Guta::decode(&bytes), None);
    }

    #[test]
    fn stats_accumulate() {
        let mut stats = GutaStats::default();
        stats.add(100, 50, 60);
        stats.add(200, 10, 90);
        stats.add(0, 70, 20);

        assert_eq!(stats.count, 3);
        assert_eq!(stats.size, 300);
        assert_eq!(stats.oldest_atime, 10);
        assert_eq!(stats.newest_mtime, 90);
    }

    #[test]
    fn stats_merge() {
        let mut a = GutaStats::default();
        a.add(10, 5, 5);
        let mut b = GutaStats::default();
        b.add(20, 2, 9);
        a.merge(&b);

        assert_eq!(a.count, 2);
        assert_eq!(a.size, 30);
        assert_eq!(a.oldest_atime, 2);
        assert_eq!(a.newest_mtime, 9);
    }
}

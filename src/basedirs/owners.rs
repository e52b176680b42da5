// src/basedirs/owners.rs
use std::collections::HashMap;
use std::io::Read;

use crate::error::{Error, Result};

/// `gid,owner` lookup table, loaded from a two-column headerless CSV.
#[derive(Debug, Clone, Default)]
pub struct OwnersTable {
    owners: HashMap<u32, String>,
}

impl OwnersTable {
    pub fn new(owners: HashMap<u32, String>) -> Self {
        Self { owners }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut owners = HashMap::new();
        for (i, record) in csv_reader.records().enumerate() {
            let malformed = |cause: &str| Error::MalformedRecord {
                line: (i + 1) as u64,
                cause: cause.to_string(),
            };

            let record = record.map_err(|e| malformed(&e.to_string()))?;
            if record.len() != 2 {
                return Err(malformed("expected 2 columns"));
            }
            let gid: u32 = record[0].trim().parse().map_err(|_| malformed("bad gid"))?;
            owners.insert(gid, record[1].trim().to_string());
        }
        Ok(Self { owners })
    }

    pub fn owner(&self, gid: u32) -> &str {
        self.owners.get(&gid).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

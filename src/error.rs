// src/error.rs
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong across the summarise/store/query surface.
#[derive(Debug, Error)]
pub enum Error {
    /// A stats-stream line could not be parsed. Fatal to the run.
    #[error("malformed record at line {line}: {cause}")]
    MalformedRecord { line: u64, cause: String },

    /// Two wildcard patterns converge on the same terminal state with
    /// different groups and equal specificity.
    #[error("ambiguous patterns: {first:?} and {second:?} match the same inputs")]
    AmbiguousPattern { first: String, second: String },

    /// An on-disk payload failed structural checks.
    #[error("corrupt store payload at offset {offset}")]
    CorruptStore { offset: u64 },

    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("no history for gid {gid} under {path}")]
    HistoryNotFound { gid: u32, path: String },

    #[error("required column {0:?} missing from header")]
    HeaderNotFound(String),

    #[error("unknown backup instruction {0:?}")]
    InvalidAction(String),

    #[error("bad quotas csv at line {line}: {cause}")]
    BadQuotaCsv { line: u64, cause: String },

    #[error("summarise cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Db(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Aggregate of close errors gathered while aborting a run.
    #[error("{0}")]
    Multi(MultiError),
}

#[derive(Debug, Default)]
pub struct MultiError(pub Vec<Error>);

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors:", self.0.len())?;
        for e in &self.0 {
            write!(f, " [{}]", e)?;
        }
        Ok(())
    }
}

impl MultiError {
    pub fn push(&mut self, err: Error) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collapse into a single error: none, the only one, or Multi.
    pub fn into_result(mut self) -> Result<()> {
        match self.0.len() {
            0 => Ok(()),
            1 => Err(self.0.remove(0)),
            _ => Err(Error::Multi(self)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_record_mentions_line() {
        let e = Error::MalformedRecord {
            line: 42,
            cause: "bad uid".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("bad uid"));
    }

    #[test]
    fn multi_error_collapses() {
        assert!(MultiError::default().into_result().is_ok());

        let mut m = MultiError::default();
        m.push(Error::Cancelled);
        match m.into_result() {
            Err(Error::Cancelled) => {}
            other => panic!("expected Cancelled, got {:?}", other),
        }

        let mut m = MultiError::default();
        m.push(Error::Cancelled);
        m.push(Error::DirectoryNotFound("/a".into()));
        match m.into_result() {
            Err(Error::Multi(inner)) => {
                assert_eq!(inner.0.len(), 2);
            }
            other => panic!("expected Multi, got {:?}", other),
        }
    }

    #[test]
    fn multi_error_display_lists_parts() {
        let mut m = MultiError::default();
        m.push(Error::Cancelled);
        m.push(Error::CorruptStore { offset: 7 });
        let msg = Error::Multi(m).to_string();
        assert!(msg.starts_with("2 errors:"));
        assert!(msg.contains("cancelled"));
        assert!(msg.contains("offset 7"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e: Error = io.into();
        assert!(matches!(e, Error::Io(_)));
    }
}

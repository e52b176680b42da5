// src/basedirs/quota.rs
//
// Per-(gid, disk) quota table and the linear trend projection of
// when a history series will exhaust its quotas.

use std::io::Read;

use crate::basedirs::model::History;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct QuotaRow {
    pub gid: u32,
    pub disk: String,
    pub quota_size: u64,
    pub quota_inodes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct QuotaTable {
    rows: Vec<QuotaRow>,
}

impl QuotaTable {
    pub fn new(mut rows: Vec<QuotaRow>) -> Self {
        for row in &mut rows {
            if !row.disk.ends_with('/') {
                row.disk.push('/');
            }
        }
        Self { rows }
    }

    /// Parse `gid,disk,quota_size,quota_inodes` lines: exactly four
    /// columns, no header.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut rows = Vec::new();
        for (i, record) in csv_reader.records().enumerate() {
            let bad = |cause: &str| Error::BadQuotaCsv {
                line: (i + 1) as u64,
                cause: cause.to_string(),
            };

            let record = record.map_err(|e| bad(&e.to_string()))?;
            if record.len() != 4 {
                return Err(bad(&format!("expected 4 columns, got {}", record.len())));
            }

            let gid: u32 = record[0].trim().parse().map_err(|_| bad("bad gid"))?;
            let disk = record[1].trim();
            if disk.is_empty() {
                return Err(bad("empty disk"));
            }
            let quota_size: u64 =
                record[2].trim().parse().map_err(|_| bad("bad quota size"))?;
            let quota_inodes: u64 =
                record[3].trim().parse().map_err(|_| bad("bad quota inodes"))?;

            rows.push(QuotaRow {
                gid,
                disk: disk.to_string(),
                quota_size,
                quota_inodes,
            });
        }

        Ok(Self::new(rows))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Quotas of the first row for `gid` whose disk prefixes
    /// `path + "/"`; (0, 0) when none do.
    pub fn quotas_for(&self, gid: u32, path: &str) -> (u64, u64) {
        let mut probe = path.to_string();
        if !probe.ends_with('/') {
            probe.push('/');
        }
        self.rows
            .iter()
            .find(|row| row.gid == gid && probe.starts_with(&row.disk))
            .map(|row| (row.quota_size, row.quota_inodes))
            .unwrap_or((0, 0))
    }
}

/// Window (in points) the projection looks back over.
pub const DEFAULT_TREND_WINDOW: usize = 3;

const FIVE_YEARS_SECS: i64 = 5 * 365 * 86_400;

/// Project when the series hits its size and inode quotas. Returns
/// (date_no_space, date_no_files) as unix seconds; 0 means never on
/// the current trend (flat, declining, or over five years out).
pub fn date_quota_full(history: &[History], window: usize) -> (i64, i64) {
    if history.is_empty() {
        return (0, 0);
    }

    let window = window.max(2);
    let latest = history[history.len() - 1];
    let oldest = history[history.len() - window.min(history.len())];

    let no_space = project(
        oldest.date,
        oldest.usage_size,
        latest.date,
        latest.usage_size,
        latest.quota_size,
    );
    let no_files = project(
        oldest.date,
        oldest.usage_inodes,
        latest.date,
        latest.usage_inodes,
        latest.quota_inodes,
    );
    (no_space, no_files)
}

fn project(t0: i64, y0: u64, t1: i64, y1: u64, quota: u64) -> i64 {
    if quota == 0 {
        return 0;
    }
    if y1 >= quota {
        return t1;
    }
    if t1 == t0 || y1 <= y0 {
        return 0;
    }

    let slope = (y1 - y0) as f64 / (t1 - t0) as f64;
    let remaining = (quota - y1) as f64;
    let full = t1 + (remaining / slope) as i64;

    if full > t1 + FIVE_YEARS_SECS {
        0
    } else {
        full
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DAY: i64 = 86_400;
    const D0: i64 = 1_700_000_000;

    fn h(date: i64, size: u64, inodes: u64) -> History {
        History {
            date,
            usage_size: size,
            quota_size: 1_000,
            usage_inodes: inodes,
            quota_inodes: 100,
        }
    }

    #[test]
    fn parse_quotas_csv() {
        let input = "1,/lustre,1000,100\n2,/nfs/,500,50\n";
        let table = QuotaTable::from_reader(Cursor::new(input)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.quotas_for(1, "/lustre/proj"), (1000, 100));
        assert_eq!(table.quotas_for(2, "/nfs/x/y"), (500, 50));
    }

    #[test]
    fn disk_prefix_gets_trailing_slash() {
        let table = QuotaTable::from_reader(Cursor::new("1,/lustre,10,1\n")).unwrap();
        // "/lustrex" must not match the "/lustre/" prefix
        assert_eq!(table.quotas_for(1, "/lustrex"), (0, 0));
        assert_eq!(table.quotas_for(1, "/lustre"), (10, 1));
    }

    #[test]
    fn lookup_misses_return_zero() {
        let table = QuotaTable::from_reader(Cursor::new("1,/lustre,10,1\n")).unwrap();
        assert_eq!(table.quotas_for(2, "/lustre/x"), (0, 0));
        assert_eq!(table.quotas_for(1, "/other/x"), (0, 0));
    }

    #[test]
    fn first_matching_row_wins() {
        let input = "1,/lustre/a,111,11\n1,/lustre,222,22\n";
        let table = QuotaTable::from_reader(Cursor::new(input)).unwrap();
        assert_eq!(table.quotas_for(1, "/lustre/a/x"), (111, 11));
        assert_eq!(table.quotas_for(1, "/lustre/b/x"), (222, 22));
    }

    #[test]
    fn bad_csv_shapes_are_rejected() {
        for input in ["1,/lustre,1000\n", "1,/lustre,1000,100,extra\n", "x,/l,1,1\n", "1,,1,1\n"] {
            assert!(
                matches!(
                    QuotaTable::from_reader(Cursor::new(input)),
                    Err(Error::BadQuotaCsv { .. })
                ),
                "input {input:?}"
            );
        }
    }

    #[test]
    fn projection_matches_linear_growth() {
        let history = vec![
            h(D0, 100, 10),
            h(D0 + DAY, 200, 20),
            h(D0 + 2 * DAY, 300, 30),
        ];
        let (no_space, no_files) = date_quota_full(&history, DEFAULT_TREND_WINDOW);

        let expected = D0 + 9 * DAY;
        let tolerance = 300;
        assert!((no_space - expected).abs() <= tolerance, "{no_space} vs {expected}");
        assert!((no_files - expected).abs() <= tolerance, "{no_files} vs {expected}");
    }

    #[test]
    fn window_limits_lookback() {
        // an early spike outside the 3-point window is ignored
        let history = vec![
            h(D0, 900, 90),
            h(D0 + DAY, 100, 10),
            h(D0 + 2 * DAY, 200, 20),
            h(D0 + 3 * DAY, 300, 30),
        ];
        let (no_space, _) = date_quota_full(&history, 3);
        let expected = D0 + 10 * DAY;
        assert!((no_space - expected).abs() <= 300);
    }

    #[test]
    fn empty_history_is_never_full() {
        assert_eq!(date_quota_full(&[], DEFAULT_TREND_WINDOW), (0, 0));
    }

    #[test]
    fn already_over_quota_returns_latest_date() {
        let mut point = h(D0, 2_000, 10);
        point.quota_size = 1_000;
        let (no_space, _) = date_quota_full(&[point], DEFAULT_TREND_WINDOW);
        assert_eq!(no_space, D0);
    }

    #[test]
    fn flat_or_declining_usage_is_never_full() {
        let history = vec![h(D0, 300, 30), h(D0 + DAY, 300, 20)];
        assert_eq!(date_quota_full(&history, 3), (0, 0));

        let history = vec![h(D0, 300, 30), h(D0 + DAY, 200, 40)];
        let (no_space, no_files) = date_quota_full(&history, 3);
        assert_eq!(no_space, 0);
        assert!(no_files > 0);
    }

    #[test]
    fn single_point_cannot_project() {
        let (no_space, no_files) = date_quota_full(&[h(D0, 100, 10)], 3);
        assert_eq!((no_space, no_files), (0, 0));
    }

    #[test]
    fn distant_projections_are_treated_as_never() {
        // 1 byte/day toward a huge quota
        let mut a = h(D0, 100, 10);
        let mut b = h(D0 + DAY, 101, 11);
        a.quota_size = u64::MAX / 2;
        b.quota_size = u64::MAX / 2;
        let (no_space, _) = date_quota_full(&[a, b], 3);
        assert_eq!(no_space, 0);
    }

    #[test]
    fn zero_quota_is_never_full() {
        let mut a = h(D0, 100, 10);
        let mut b = h(D0 + DAY, 200, 20);
        a.quota_size = 0;
        b.quota_size = 0;
        let (no_space, no_files) = date_quota_full(&[a, b], 3);
        assert_eq!(no_space, 0);
        assert!(no_files > 0);
    }
}

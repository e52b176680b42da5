// src/basedirs/mod.rs

pub mod aggregate;
pub mod config;
pub mod db;
pub mod keys;
pub mod model;
pub mod owners;
pub mod quota;
pub mod reader;

pub use aggregate::BaseDirs;
pub use config::{Config, ConfigEntry};
pub use db::BaseDirDb;
pub use model::{History, SubDir, Usage};
pub use owners::OwnersTable;
pub use quota::{date_quota_full, QuotaTable, DEFAULT_TREND_WINDOW};
pub use reader::{BaseDirReader, DbInfo};

// src/dguta/mod.rs

pub mod aggregate;
pub mod guta;
pub mod store;
pub mod tree;

pub use aggregate::DgutaGenerator;
pub use guta::{DgutaRow, Guta, GutaStats, GUTA_KEY_LEN};
pub use store::{DgutaWriter, StoreReader};
pub use tree::{depth_splits, filter_all, DirInfo, DirSummary, Filter, Tree, TreeInfo};

// src/util/mod.rs

pub mod bytes;
pub mod names;
pub mod quote;
pub mod snapshot;

pub use bytes::{last_slash, parse_int_strict};
pub use names::NameCache;
pub use snapshot::Snapshot;

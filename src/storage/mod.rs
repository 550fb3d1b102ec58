//! The archive binding: header, pointer tables, lookups and caches

mod zim_storage;

pub use zim_storage::ZimStorage;

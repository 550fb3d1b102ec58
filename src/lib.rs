//! Read-side core for ZIM content archives
//!
//! ZIM packages a static web-like corpus (articles, media, indices)
//! into one self-contained binary file, optionally split across
//! multiple physical parts. This crate opens such archives, locates
//! entries by URL path or by title, and extracts their content from
//! compressed clusters. A single opened archive is safe to share
//! across threads; dirents and clusters are cached, and concurrent
//! misses for the same cluster decompress it only once.
//!
//! ```no_run
//! use zim_storage::ZimStorage;
//!
//! # fn main() -> zim_storage::Result<()> {
//! let storage = ZimStorage::open("wiki.zim")?;
//! let (found, index) = storage.find_by_url('A', "Main_Page")?;
//! if found {
//!     let dirent = storage.dirent(index)?;
//!     if let (Some(cluster), Some(blob)) = (dirent.cluster_number(), dirent.blob_number()) {
//!         let content = storage.cluster(cluster)?.blob(blob)?;
//!         println!("{} bytes", content.size());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cluster;
pub mod compound;
pub mod compression;
pub mod config;
pub mod dirent;
pub mod error;
pub mod header;
pub mod reader;
pub mod storage;
pub mod types;

pub use cache::{CacheStats, ConcurrentCache, DirentCache};
pub use cluster::Cluster;
pub use compound::{FileCompound, FilePart, PartRange};
pub use compression::CompressionType;
pub use config::ZimConfig;
pub use dirent::Dirent;
pub use error::{Result, ZimError};
pub use header::ZimHeader;
pub use reader::{Blob, Buffer, BufferReader, FileReader, Reader};
pub use storage::ZimStorage;
pub use types::{BlobIndex, ClusterIndex, EntryIndex, TitleIndex};

//! Runtime configuration for opened archives
//!
//! Cache sizes and caching behavior can be overridden through the
//! environment. Values are read once at open time and frozen into the
//! storage instance.

use std::env;

const ENV_DIRENT_CACHE: &str = "ZIM_DIRENTCACHE";
const ENV_CLUSTER_CACHE: &str = "ZIM_CLUSTERCACHE";
const ENV_CACHE_UNCOMPRESSED: &str = "ZIM_CACHEUNCOMPRESSEDCLUSTER";

/// Default capacity of the dirent LRU cache.
pub const DEFAULT_DIRENT_CACHE_SIZE: usize = 512;

/// Default capacity of the cluster cache.
pub const DEFAULT_CLUSTER_CACHE_SIZE: usize = 16;

/// Configuration for an opened archive.
#[derive(Debug, Clone)]
pub struct ZimConfig {
    /// Capacity of the dirent LRU cache.
    pub dirent_cache_size: usize,

    /// Capacity of the cluster cache.
    pub cluster_cache_size: usize,

    /// When false, uncompressed clusters are not kept in the cluster
    /// cache; their blobs are cheap views into the file anyway.
    pub cache_uncompressed_clusters: bool,

    /// Load the three pointer tables into memory at open instead of
    /// reading them from the file on demand.
    pub preload_pointer_tables: bool,
}

impl Default for ZimConfig {
    fn default() -> Self {
        Self {
            dirent_cache_size: DEFAULT_DIRENT_CACHE_SIZE,
            cluster_cache_size: DEFAULT_CLUSTER_CACHE_SIZE,
            cache_uncompressed_clusters: false,
            preload_pointer_tables: false,
        }
    }
}

impl ZimConfig {
    /// Configuration with environment overrides applied.
    pub fn from_env() -> Self {
        Self {
            dirent_cache_size: env_usize(ENV_DIRENT_CACHE, DEFAULT_DIRENT_CACHE_SIZE),
            cluster_cache_size: env_usize(ENV_CLUSTER_CACHE, DEFAULT_CLUSTER_CACHE_SIZE),
            cache_uncompressed_clusters: env_bool(ENV_CACHE_UNCOMPRESSED, false),
            preload_pointer_tables: false,
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| parse_usize(&v))
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse().ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "on" => Some(true),
        "0" | "false" | "FALSE" | "no" | "off" => Some(false),
        _ => None,
    }
}

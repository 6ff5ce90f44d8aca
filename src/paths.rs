//! Cache directory layout and defaults

use std::path::{Path, PathBuf};

/// Snapshots subdirectory name
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Name of the latest-snapshot pointer (symlink or plain file)
pub const LATEST_LINK: &str = "latest";

/// Metadata file name inside a snapshot directory
pub const METADATA_FILE: &str = "metadata.json";

/// IPv4 index file name inside a snapshot directory
pub const INDEX_V4_FILE: &str = "index_v4.bin";

/// IPv6 index file name inside a snapshot directory
pub const INDEX_V6_FILE: &str = "index_v6.bin";

/// Raw source-response subdirectory inside a snapshot directory
pub const RAW_DIR: &str = "raw";

/// Provider cache file name under the cache root
pub const PROVIDER_CACHE_FILE: &str = "provider_cache.json";

/// Default download concurrency
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Maximum allowed concurrency (registry API courtesy limit)
pub const MAX_CONCURRENCY: usize = 8;

/// `sourceapp` identifier sent to the RIPEstat API
pub const SOURCE_APP: &str = "ip2cc";

/// Default cache root: `~/.ip2cc/cache`, or `./.ip2cc/cache` when the home
/// directory cannot be determined.
pub fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ip2cc")
        .join("cache")
}

/// The snapshots directory under a cache root
pub fn snapshots_dir(cache_root: &Path) -> PathBuf {
    cache_root.join(SNAPSHOTS_DIR)
}

/// Metadata path inside a snapshot directory
pub fn metadata_path(snapshot_dir: &Path) -> PathBuf {
    snapshot_dir.join(METADATA_FILE)
}

/// IPv4 index path inside a snapshot directory
pub fn index_v4_path(snapshot_dir: &Path) -> PathBuf {
    snapshot_dir.join(INDEX_V4_FILE)
}

/// IPv6 index path inside a snapshot directory
pub fn index_v6_path(snapshot_dir: &Path) -> PathBuf {
    snapshot_dir.join(INDEX_V6_FILE)
}

/// Raw response directory inside a snapshot directory
pub fn raw_dir(snapshot_dir: &Path) -> PathBuf {
    snapshot_dir.join(RAW_DIR)
}

/// Provider cache path under a cache root
pub fn provider_cache_path(cache_root: &Path) -> PathBuf {
    cache_root.join(PROVIDER_CACHE_FILE)
}

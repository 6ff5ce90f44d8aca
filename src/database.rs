//! Snapshot-backed lookup surface
//!
//! Loads the index pair of one snapshot directory into memory and answers
//! address lookups against it. A loaded [`SnapshotIndex`] is frozen: it is
//! safe to share across threads for concurrent lookups.

use crate::error::Error;
use crate::index_format::load_index;
use crate::paths;
use crate::prefix::Family;
use crate::snapshot::{Metadata, SnapshotStore};
use crate::trie::{PrefixRecord, Trie};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Both tries of a snapshot plus its metadata, ready for lookups
pub struct SnapshotIndex {
    dir: PathBuf,
    metadata: Metadata,
    v4: Trie,
    v6: Trie,
}

impl SnapshotIndex {
    /// Load the index pair from a snapshot directory.
    ///
    /// `metadata` is the record already resolved through the store; the
    /// pair invariant (metadata present implies both index files load)
    /// makes missing index files a corruption error, not a lookup miss.
    pub fn open(dir: &Path, metadata: Metadata) -> Result<Self, Error> {
        let v4 = load_index(&paths::index_v4_path(dir), Family::V4)?;
        let v6 = load_index(&paths::index_v6_path(dir), Family::V6)?;
        Ok(SnapshotIndex {
            dir: dir.to_path_buf(),
            metadata,
            v4,
            v6,
        })
    }

    /// Resolve a snapshot through the store and load it: a specific date,
    /// or the latest when `date` is `None`.
    pub fn open_from_store(store: &SnapshotStore, date: Option<&str>) -> Result<Self, Error> {
        let (dir, metadata) = match date {
            Some(date) => store.get_by_date(date)?,
            None => store.get_latest()?,
        };
        Self::open(&dir, metadata)
    }

    /// Snapshot directory this index was loaded from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Look up a parsed address in the trie of its family
    pub fn lookup_ip(&self, ip: IpAddr) -> Option<&PrefixRecord> {
        match ip {
            IpAddr::V4(_) => self.v4.lookup(ip),
            IpAddr::V6(_) => self.v6.lookup(ip),
        }
    }

    /// Parse an address string and look it up.
    ///
    /// `Ok(None)` means the address parsed but no stored prefix contains
    /// it; malformed text is an error.
    pub fn lookup(&self, address: &str) -> Result<Option<&PrefixRecord>, Error> {
        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_string()))?;
        Ok(self.lookup_ip(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_format::save_index;

    fn write_snapshot(store: &SnapshotStore, date: &str) -> PathBuf {
        let dir = store.create(date).unwrap();

        let mut v4 = Trie::new(Family::V4);
        v4.insert_cidr("8.8.8.0/24", "US").unwrap();
        save_index(&paths::index_v4_path(&dir), &v4).unwrap();

        let mut v6 = Trie::new(Family::V6);
        v6.insert_cidr("2001:4860::/32", "US").unwrap();
        save_index(&paths::index_v6_path(&dir), &v6).unwrap();

        let mut meta = Metadata::new();
        meta.requested_date = date.to_string();
        meta.prefixes_v4 = 1;
        meta.prefixes_v6 = 1;
        meta.save(&paths::metadata_path(&dir)).unwrap();

        dir
    }

    #[test]
    fn test_open_and_lookup_both_families() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        write_snapshot(&store, "2025-01-15");

        let index = SnapshotIndex::open_from_store(&store, Some("2025-01-15")).unwrap();
        assert_eq!(index.metadata().requested_date, "2025-01-15");

        let r = index.lookup("8.8.8.8").unwrap().unwrap();
        assert_eq!(r.country_code, "US");
        assert_eq!(r.cidr_text, "8.8.8.0/24");

        let r = index.lookup("2001:4860::1").unwrap().unwrap();
        assert_eq!(r.cidr_text, "2001:4860::/32");

        assert!(index.lookup("9.9.9.9").unwrap().is_none());
        assert!(index.lookup("2a00::1").unwrap().is_none());
        assert!(matches!(
            index.lookup("nonsense"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_open_latest() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        write_snapshot(&store, "2025-01-15");
        store.set_latest("2025-01-15").unwrap();

        let index = SnapshotIndex::open_from_store(&store, None).unwrap();
        assert_eq!(index.metadata().requested_date, "2025-01-15");
    }

    #[test]
    fn test_open_missing_date() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        assert!(matches!(
            SnapshotIndex::open_from_store(&store, Some("2025-01-15")),
            Err(Error::SnapshotNotFound(_))
        ));
        assert!(matches!(
            SnapshotIndex::open_from_store(&store, None),
            Err(Error::NoSnapshots)
        ));
    }
}

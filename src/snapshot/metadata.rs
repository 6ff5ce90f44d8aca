//! Snapshot metadata record

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Current metadata schema version
pub const METADATA_SCHEMA_VERSION: u32 = 1;

/// Per-snapshot metadata, stored as `metadata.json` in the date directory.
///
/// A date directory without this file is not a snapshot; the builder writes
/// it last, so its presence implies both index files exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Metadata schema version
    pub schema_version: u32,
    /// When the snapshot was built
    pub created_at: DateTime<Utc>,
    /// The date the build was requested for (`YYYY-MM-DD`)
    pub requested_date: String,
    /// Query time reported by the registry source
    pub actual_query_time: String,
    /// Number of countries requested
    pub country_count: u32,
    /// Lower-case country codes requested
    pub countries: Vec<String>,
    /// IPv4 prefix records stored
    pub prefixes_v4: u32,
    /// IPv6 prefix records stored
    pub prefixes_v6: u32,
    /// Binary index format version of the index files
    pub index_format_version: u32,
    /// Free-form description of the data source
    pub source: String,
    /// Whether this snapshot was the latest when built
    pub is_latest: bool,
}

impl Metadata {
    /// Fresh metadata with version fields and source filled in
    pub fn new() -> Self {
        Metadata {
            schema_version: METADATA_SCHEMA_VERSION,
            created_at: Utc::now(),
            requested_date: String::new(),
            actual_query_time: String::new(),
            country_count: 0,
            countries: Vec::new(),
            prefixes_v4: 0,
            prefixes_v6: 0,
            index_format_version: crate::index_format::INDEX_FORMAT_VERSION,
            source: "RIPEstat country-resource-list".to_string(),
            is_latest: false,
        }
    }

    /// Write metadata as indented JSON, atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(self)?;

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(path)
            .map_err(|e| Error::Io(format!("persist {}: {}", path.display(), e.error)))?;
        Ok(())
    }

    /// Load metadata from a file. Compact and indented JSON both parse.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = std::fs::read(path)
            .map_err(|e| Error::Io(format!("read {}: {}", path.display(), e)))?;
        Ok(serde_json::from_slice(&data)?)
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let mut meta = Metadata::new();
        meta.requested_date = "2025-01-15".to_string();
        meta.actual_query_time = "2025-01-15T00:00:00".to_string();
        meta.country_count = 2;
        meta.countries = vec!["us".to_string(), "de".to_string()];
        meta.prefixes_v4 = 1234;
        meta.prefixes_v6 = 567;
        meta.is_latest = true;
        meta.save(&path).unwrap();

        let loaded = Metadata::load(&path).unwrap();
        assert_eq!(loaded.schema_version, METADATA_SCHEMA_VERSION);
        assert_eq!(loaded.requested_date, "2025-01-15");
        assert_eq!(loaded.countries, vec!["us", "de"]);
        assert_eq!(loaded.prefixes_v4, 1234);
        assert_eq!(loaded.prefixes_v6, 567);
        assert!(loaded.is_latest);
    }

    #[test]
    fn test_load_compact_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let meta = Metadata::new();
        let compact = serde_json::to_string(&meta).unwrap();
        std::fs::write(&path, compact).unwrap();

        let loaded = Metadata::load(&path).unwrap();
        assert_eq!(loaded.schema_version, meta.schema_version);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Metadata::load(&dir.path().join("nope.json")),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_load_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(Metadata::load(&path), Err(Error::Json(_))));
    }
}

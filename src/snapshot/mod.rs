//! Snapshot directory model
//!
//! A snapshot is an immutable dated bundle: two index files plus a
//! metadata file in a dedicated directory under
//! `<cache_root>/snapshots/<YYYY-MM-DD>/`. A `latest` pointer names the
//! most recently built date.

mod metadata;
mod store;

pub use metadata::{Metadata, METADATA_SCHEMA_VERSION};
pub use store::SnapshotStore;

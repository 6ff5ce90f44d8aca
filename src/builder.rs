//! Snapshot build pipeline
//!
//! Drives a [`PrefixSource`] across a country list with bounded
//! concurrency, compiles the returned prefix lists into one IPv4 and one
//! IPv6 trie, and persists both indexes plus metadata as an immutable
//! snapshot.
//!
//! Per-country fetch failures never abort a build; they are collected into
//! the report and the country simply contributes nothing. Write failures
//! after the fetch phase are fatal. Inserts all happen on the calling
//! thread, in input order, after fan-in, so two builds over identical
//! source data produce byte-identical index files.

use crate::error::Error;
use crate::index_format::save_index;
use crate::paths;
use crate::prefix::Family;
use crate::snapshot::{Metadata, SnapshotStore};
use crate::source::{CountryResult, PrefixSource};
use crate::trie::Trie;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

/// Build options
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// In-flight fetch limit, clamped to `1..=8`
    pub concurrency: usize,
    /// Keep raw source responses under `raw/` in the snapshot directory
    pub keep_raw: bool,
    /// Rebuild even when a snapshot for the date already exists
    pub force: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            concurrency: paths::DEFAULT_CONCURRENCY,
            keep_raw: false,
            force: false,
        }
    }
}

/// What a completed (or skipped) build produced
#[derive(Debug)]
pub enum BuildOutcome {
    /// A snapshot for the date already exists and `force` was off;
    /// nothing was touched
    AlreadyBuilt {
        /// The existing snapshot's date
        date: String,
    },
    /// A snapshot was built
    Built(BuildReport),
}

/// Summary of a finished build
#[derive(Debug)]
pub struct BuildReport {
    /// Snapshot date
    pub date: String,
    /// Snapshot directory
    pub dir: PathBuf,
    /// IPv4 prefix records stored
    pub prefixes_v4: u32,
    /// IPv6 prefix records stored
    pub prefixes_v6: u32,
    /// CIDR strings that failed to parse and were skipped
    pub skipped_cidrs: u32,
    /// Per-country fetch failures ([`Error::SourceFailure`] entries)
    pub country_errors: Vec<Error>,
    /// Whether the `latest` pointer was updated (failure there is
    /// non-fatal; the snapshot stays reachable by date)
    pub latest_updated: bool,
}

/// Build a snapshot for `date` from the given source.
///
/// `cancel` is checked between phases and by the fetch workers; a
/// cancelled build removes what it created, writes no metadata, and
/// returns [`Error::BuildAborted`]. `progress` is called with
/// `(completed, total)` every 10 completed fetches and at the end of the
/// fetch phase.
pub fn build_snapshot(
    source: &dyn PrefixSource,
    country_codes: &[String],
    date: &str,
    store: &SnapshotStore,
    options: &BuildOptions,
    cancel: &AtomicBool,
    mut progress: impl FnMut(usize, usize),
) -> Result<BuildOutcome, Error> {
    if store.exists(date) && !options.force {
        return Ok(BuildOutcome::AlreadyBuilt {
            date: date.to_string(),
        });
    }

    // Whether the date directory held a finished snapshot before we
    // started; decides whether cleanup after failure removes the directory.
    let fresh = !store.exists(date);

    let dir = store.create(date)?;
    if options.keep_raw {
        std::fs::create_dir_all(paths::raw_dir(&dir))?;
    }

    let total = country_codes.len();
    let mut results: Vec<Option<Result<CountryResult, Error>>> = Vec::new();
    results.resize_with(total, || None);

    // Fan out: `concurrency` workers pull country indexes from a shared
    // cursor and send `(index, result)` back; the driver collects into
    // per-country slots so later inserts follow the input order exactly.
    let concurrency = options.concurrency.clamp(1, paths::MAX_CONCURRENCY);
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..concurrency.min(total.max(1)) {
            let tx = tx.clone();
            let next = &next;
            scope.spawn(move || loop {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let i = next.fetch_add(1, Ordering::Relaxed);
                if i >= total {
                    break;
                }
                let result = source.fetch(&country_codes[i], date);
                if tx.send((i, result)).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut completed = 0usize;
        for (i, result) in rx {
            completed += 1;
            results[i] = Some(result);
            if completed % 10 == 0 || completed == total {
                progress(completed, total);
            }
        }
    });

    if cancel.load(Ordering::Relaxed) {
        cleanup(store, date, fresh);
        return Err(Error::BuildAborted("cancelled".to_string()));
    }

    // Fan-in done; split successes from failures in input order.
    let mut fetched: Vec<Option<CountryResult>> = Vec::with_capacity(total);
    let mut country_errors = Vec::new();
    for (i, slot) in results.into_iter().enumerate() {
        match slot {
            Some(Ok(result)) => fetched.push(Some(result)),
            Some(Err(e)) => {
                country_errors.push(Error::SourceFailure {
                    country: country_codes[i].clone(),
                    cause: e.to_string(),
                });
                fetched.push(None);
            }
            // A worker died before claiming this slot; treat as a fetch
            // failure rather than losing the country silently.
            None => {
                country_errors.push(Error::SourceFailure {
                    country: country_codes[i].clone(),
                    cause: "fetch did not complete".to_string(),
                });
                fetched.push(None);
            }
        }
    }

    if options.keep_raw {
        for (i, result) in fetched.iter().enumerate() {
            if let Some(result) = result {
                if let Some(raw) = &result.raw {
                    let path = paths::raw_dir(&dir).join(format!("{}.json", country_codes[i]));
                    std::fs::write(path, raw)?;
                }
            }
        }
    }

    // Populate both tries serially. Malformed CIDRs are counted and
    // skipped, never fatal.
    let mut v4_trie = Trie::new(Family::V4);
    let mut v6_trie = Trie::new(Family::V6);
    let mut skipped_cidrs = 0u32;
    for result in fetched.iter().flatten() {
        for cidr in &result.ipv4 {
            if v4_trie.insert_cidr(cidr, &result.country_code).is_err() {
                skipped_cidrs += 1;
            }
        }
        for cidr in &result.ipv6 {
            if v6_trie.insert_cidr(cidr, &result.country_code).is_err() {
                skipped_cidrs += 1;
            }
        }
    }

    if cancel.load(Ordering::Relaxed) {
        cleanup(store, date, fresh);
        return Err(Error::BuildAborted("cancelled".to_string()));
    }

    // From here on failures are fatal: a snapshot without both indexes and
    // metadata must not exist.
    if let Err(e) = save_index(&paths::index_v4_path(&dir), &v4_trie) {
        cleanup(store, date, fresh);
        return Err(Error::BuildAborted(format!("write IPv4 index: {}", e)));
    }
    if let Err(e) = save_index(&paths::index_v6_path(&dir), &v6_trie) {
        cleanup(store, date, fresh);
        return Err(Error::BuildAborted(format!("write IPv6 index: {}", e)));
    }

    let mut meta = Metadata::new();
    meta.requested_date = date.to_string();
    meta.actual_query_time = fetched
        .iter()
        .flatten()
        .map(|r| r.query_time.as_str())
        .find(|t| !t.is_empty())
        .unwrap_or(date)
        .to_string();
    meta.country_count = total as u32;
    meta.countries = country_codes
        .iter()
        .map(|c| c.to_ascii_lowercase())
        .collect();
    meta.prefixes_v4 = v4_trie.count();
    meta.prefixes_v6 = v6_trie.count();
    meta.is_latest = true;

    if let Err(e) = meta.save(&paths::metadata_path(&dir)) {
        cleanup(store, date, fresh);
        return Err(Error::BuildAborted(format!("write metadata: {}", e)));
    }

    let latest_updated = store.set_latest(date).is_ok();

    Ok(BuildOutcome::Built(BuildReport {
        date: date.to_string(),
        dir,
        prefixes_v4: v4_trie.count(),
        prefixes_v6: v6_trie.count(),
        skipped_cidrs,
        country_errors,
        latest_updated,
    }))
}

/// Remove build leftovers after cancellation or a fatal write failure.
///
/// A freshly created date directory is removed entirely; a directory that
/// already held a snapshot (force rebuild) is left as found, since its
/// previous index pair and metadata are still intact until the final
/// renames.
fn cleanup(store: &SnapshotStore, date: &str, fresh: bool) {
    if fresh {
        let _ = store.delete(date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory source with canned answers per country
    struct StubSource {
        answers: HashMap<String, CountryResult>,
        failures: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl StubSource {
        fn new() -> Self {
            StubSource {
                answers: HashMap::new(),
                failures: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn with(mut self, cc: &str, ipv4: &[&str], ipv6: &[&str]) -> Self {
            self.answers.insert(
                cc.to_string(),
                CountryResult {
                    country_code: cc.to_ascii_uppercase(),
                    ipv4: ipv4.iter().map(|s| s.to_string()).collect(),
                    ipv6: ipv6.iter().map(|s| s.to_string()).collect(),
                    query_time: "2025-01-15T00:00:00".to_string(),
                    raw: None,
                },
            );
            self
        }

        fn failing(mut self, cc: &str) -> Self {
            self.failures.push(cc.to_string());
            self
        }
    }

    impl PrefixSource for StubSource {
        fn fetch(&self, country_code: &str, _date: &str) -> Result<CountryResult, Error> {
            self.calls.lock().unwrap().push(country_code.to_string());
            if self.failures.iter().any(|c| c == country_code) {
                return Err(Error::Http("boom".to_string()));
            }
            self.answers
                .get(country_code)
                .cloned()
                .ok_or_else(|| Error::Http("unknown country".to_string()))
        }
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn report(outcome: BuildOutcome) -> BuildReport {
        match outcome {
            BuildOutcome::Built(r) => r,
            BuildOutcome::AlreadyBuilt { date } => panic!("unexpected AlreadyBuilt({})", date),
        }
    }

    #[test]
    fn test_build_and_skip_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let source = StubSource::new().with("us", &["8.8.8.0/24"], &[]);
        let cancel = AtomicBool::new(false);

        let outcome = build_snapshot(
            &source,
            &codes(&["us"]),
            "2025-01-15",
            &store,
            &BuildOptions::default(),
            &cancel,
            |_, _| {},
        )
        .unwrap();

        let r = report(outcome);
        assert_eq!(r.prefixes_v4, 1);
        assert_eq!(r.prefixes_v6, 0);
        assert!(r.country_errors.is_empty());
        assert!(store.exists("2025-01-15"));

        let (_, meta) = store.get_latest().unwrap();
        assert_eq!(meta.requested_date, "2025-01-15");
        assert_eq!(meta.prefixes_v4, 1);
        assert_eq!(meta.prefixes_v6, 0);

        // Second build without force is a no-op
        let outcome = build_snapshot(
            &source,
            &codes(&["us"]),
            "2025-01-15",
            &store,
            &BuildOptions::default(),
            &cancel,
            |_, _| {},
        )
        .unwrap();
        assert!(matches!(outcome, BuildOutcome::AlreadyBuilt { .. }));
        assert_eq!(source.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_force_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let cancel = AtomicBool::new(false);

        let source = StubSource::new().with("us", &["8.8.8.0/24"], &[]);
        build_snapshot(
            &source,
            &codes(&["us"]),
            "2025-01-15",
            &store,
            &BuildOptions::default(),
            &cancel,
            |_, _| {},
        )
        .unwrap();

        let source = StubSource::new().with("us", &["8.8.8.0/24", "1.0.0.0/8"], &[]);
        let options = BuildOptions {
            force: true,
            ..Default::default()
        };
        let r = report(
            build_snapshot(
                &source,
                &codes(&["us"]),
                "2025-01-15",
                &store,
                &options,
                &cancel,
                |_, _| {},
            )
            .unwrap(),
        );
        assert_eq!(r.prefixes_v4, 2);

        let (_, meta) = store.get_by_date("2025-01-15").unwrap();
        assert_eq!(meta.prefixes_v4, 2);
    }

    #[test]
    fn test_per_country_failure_is_isolated() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let cancel = AtomicBool::new(false);

        let source = StubSource::new()
            .with("us", &["8.8.8.0/24"], &["2001:4860::/32"])
            .failing("de");

        let r = report(
            build_snapshot(
                &source,
                &codes(&["us", "de"]),
                "2025-01-15",
                &store,
                &BuildOptions::default(),
                &cancel,
                |_, _| {},
            )
            .unwrap(),
        );

        assert_eq!(r.prefixes_v4, 1);
        assert_eq!(r.prefixes_v6, 1);
        assert_eq!(r.country_errors.len(), 1);
        assert!(matches!(
            &r.country_errors[0],
            Error::SourceFailure { country, .. } if country == "de"
        ));

        let (_, meta) = store.get_by_date("2025-01-15").unwrap();
        assert_eq!(meta.prefixes_v4, 1);
        assert_eq!(meta.country_count, 2);
    }

    #[test]
    fn test_malformed_cidrs_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let cancel = AtomicBool::new(false);

        let source = StubSource::new().with(
            "us",
            &["8.8.8.0/24", "not-a-cidr", "1.2.3.4/40"],
            &["bad::cidr/200"],
        );

        let r = report(
            build_snapshot(
                &source,
                &codes(&["us"]),
                "2025-01-15",
                &store,
                &BuildOptions::default(),
                &cancel,
                |_, _| {},
            )
            .unwrap(),
        );
        assert_eq!(r.prefixes_v4, 1);
        assert_eq!(r.prefixes_v6, 0);
        assert_eq!(r.skipped_cidrs, 3);
    }

    #[test]
    fn test_cancelled_build_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let cancel = AtomicBool::new(true);

        let source = StubSource::new().with("us", &["8.8.8.0/24"], &[]);
        let result = build_snapshot(
            &source,
            &codes(&["us"]),
            "2025-01-15",
            &store,
            &BuildOptions::default(),
            &cancel,
            |_, _| {},
        );

        assert!(matches!(result, Err(Error::BuildAborted(_))));
        assert!(!store.exists("2025-01-15"));
        assert!(!store.dir_for("2025-01-15").exists());
    }

    #[test]
    fn test_progress_intervals() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let cancel = AtomicBool::new(false);

        let mut source = StubSource::new();
        let mut list = Vec::new();
        for i in 0..25 {
            let cc = format!("c{:02}", i); // not real codes, the stub doesn't care
            source = source.with(&cc, &[], &[]);
            list.push(cc);
        }

        let mut seen = Vec::new();
        report(
            build_snapshot(
                &source,
                &list,
                "2025-01-15",
                &store,
                &BuildOptions::default(),
                &cancel,
                |done, total| seen.push((done, total)),
            )
            .unwrap(),
        );

        assert_eq!(seen, vec![(10, 25), (20, 25), (25, 25)]);
    }

    #[test]
    fn test_deterministic_indexes() {
        // Same countries, same order, same source data: identical bytes.
        let cancel = AtomicBool::new(false);
        let mut blobs = Vec::new();

        for _ in 0..2 {
            let tmp = tempfile::tempdir().unwrap();
            let store = SnapshotStore::new(tmp.path());
            let source = StubSource::new()
                .with("us", &["8.8.8.0/24", "8.8.0.0/16"], &["2001:4860::/32"])
                .with("au", &["1.0.0.0/8"], &[]);

            let r = report(
                build_snapshot(
                    &source,
                    &codes(&["au", "us"]),
                    "2025-01-15",
                    &store,
                    &BuildOptions {
                        concurrency: 2,
                        ..Default::default()
                    },
                    &cancel,
                    |_, _| {},
                )
                .unwrap(),
            );

            let v4 = std::fs::read(paths::index_v4_path(&r.dir)).unwrap();
            let v6 = std::fs::read(paths::index_v6_path(&r.dir)).unwrap();
            blobs.push((v4, v6));
        }

        assert_eq!(blobs[0], blobs[1]);
    }

    #[test]
    fn test_keep_raw_writes_responses() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(tmp.path());
        let cancel = AtomicBool::new(false);

        let mut source = StubSource::new().with("us", &["8.8.8.0/24"], &[]);
        if let Some(r) = source.answers.get_mut("us") {
            r.raw = Some(b"{\"resources\":{}}".to_vec());
        }

        let r = report(
            build_snapshot(
                &source,
                &codes(&["us"]),
                "2025-01-15",
                &store,
                &BuildOptions {
                    keep_raw: true,
                    ..Default::default()
                },
                &cancel,
                |_, _| {},
            )
            .unwrap(),
        );

        let raw = paths::raw_dir(&r.dir).join("us.json");
        assert_eq!(std::fs::read(raw).unwrap(), b"{\"resources\":{}}");
    }
}

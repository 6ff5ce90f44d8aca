//! Network operator (provider) resolution
//!
//! Optionally enriches a successful lookup with the operator behind the
//! matched address: either BGP-derived (network-info + as-overview) or
//! whois-derived. ASN holder names change rarely, so they are cached on
//! disk with a TTL.
//!
//! The indexing core never calls this; the CLI wires it in after a lookup.

use crate::error::Error;
use crate::paths;
use crate::ripestat::RipeStatClient;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

/// Default provider-cache TTL in days
pub const DEFAULT_CACHE_TTL_DAYS: i64 = 7;

/// Provider resolution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// network-info + as-overview (default)
    Bgp,
    /// whois records for the matched prefix
    Whois,
    /// No provider lookups
    Off,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "bgp" | "" => Ok(Mode::Bgp),
            "whois" => Ok(Mode::Whois),
            "off" => Ok(Mode::Off),
            other => Err(format!(
                "invalid provider mode: {} (use bgp, whois, or off)",
                other
            )),
        }
    }
}

/// Provider information for a looked-up address
#[derive(Debug, Clone, Serialize)]
pub struct ProviderInfo {
    /// Resolution mode used
    pub mode: Mode,
    /// ASNs announcing the address
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub asns: Vec<u32>,
    /// Holder names, one per resolved ASN
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub holders: Vec<String>,
    /// Where the answer came from
    pub source: String,
    /// Whether every holder came from the cache
    pub cached: bool,
    /// Soft failure description; the lookup result is still usable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderInfo {
    /// First holder name, or `unknown`
    pub fn holder_string(&self) -> &str {
        self.holders.first().map(String::as_str).unwrap_or("unknown")
    }
}

/// Resolves provider information for already-matched addresses.
///
/// Resolution failures are soft: they land in [`ProviderInfo::error`]
/// rather than failing the lookup that triggered them.
pub trait ProviderResolver {
    /// Resolve the operator for an address and the CIDR it matched
    fn resolve(&self, address: &str, matched_cidr: &str) -> ProviderInfo;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    holder: String,
    cached_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Persistent ASN-to-holder cache with a TTL
struct ProviderCache {
    path: PathBuf,
    ttl: ChronoDuration,
    state: Mutex<CacheState>,
}

struct CacheState {
    entries: FxHashMap<u32, CacheEntry>,
    dirty: bool,
}

impl ProviderCache {
    fn open(path: PathBuf, ttl_days: i64) -> Self {
        let entries = std::fs::read(&path)
            .ok()
            .and_then(|data| serde_json::from_slice(&data).ok())
            .unwrap_or_default();

        ProviderCache {
            path,
            ttl: ChronoDuration::days(ttl_days),
            state: Mutex::new(CacheState {
                entries,
                dirty: false,
            }),
        }
    }

    fn get(&self, asn: u32) -> Option<String> {
        let state = self.state.lock().ok()?;
        let entry = state.entries.get(&asn)?;
        if Utc::now() > entry.expires_at {
            return None;
        }
        Some(entry.holder.clone())
    }

    fn set(&self, asn: u32, holder: String) {
        if let Ok(mut state) = self.state.lock() {
            let now = Utc::now();
            state.entries.insert(
                asn,
                CacheEntry {
                    holder,
                    cached_at: now,
                    expires_at: now + self.ttl,
                },
            );
            state.dirty = true;
        }
    }

    fn save(&self) -> Result<(), Error> {
        let Ok(mut state) = self.state.lock() else {
            return Ok(());
        };
        if !state.dirty {
            return Ok(());
        }

        let json = serde_json::to_vec_pretty(&state.entries)?;
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&self.path, json)?;
        state.dirty = false;
        Ok(())
    }
}

/// RIPEstat-backed provider resolver
pub struct RipeResolver {
    client: RipeStatClient,
    cache: Option<ProviderCache>,
    mode: Mode,
}

impl RipeResolver {
    /// Resolver with a persistent cache under the given cache root
    pub fn new(mode: Mode, cache_root: &Path) -> Self {
        let cache = (mode != Mode::Off).then(|| {
            ProviderCache::open(
                paths::provider_cache_path(cache_root),
                DEFAULT_CACHE_TTL_DAYS,
            )
        });

        RipeResolver {
            client: RipeStatClient::new(),
            cache,
            mode,
        }
    }

    /// Resolver without any on-disk cache
    pub fn without_cache(mode: Mode, client: RipeStatClient) -> Self {
        RipeResolver {
            client,
            cache: None,
            mode,
        }
    }

    /// Persist the cache if anything changed
    pub fn save_cache(&self) -> Result<(), Error> {
        match &self.cache {
            Some(cache) => cache.save(),
            None => Ok(()),
        }
    }

    fn resolve_bgp(&self, address: &str) -> ProviderInfo {
        let mut info = ProviderInfo {
            mode: Mode::Bgp,
            asns: Vec::new(),
            holders: Vec::new(),
            source: "RIPEstat network-info + as-overview".to_string(),
            cached: false,
            error: None,
        };

        let net = match self.client.network_info(address) {
            Ok(net) => net,
            Err(e) => {
                info.error = Some(e.to_string());
                return info;
            }
        };

        if net.asns.is_empty() {
            info.error = Some("no ASN found (not routed)".to_string());
            return info;
        }
        info.asns = net.asns.clone();

        let mut all_cached = true;
        for asn in net.asns {
            if let Some(holder) = self.cache.as_ref().and_then(|c| c.get(asn)) {
                info.holders.push(holder);
                continue;
            }
            all_cached = false;

            let Ok(overview) = self.client.as_overview(asn) else {
                continue;
            };
            if let Some(cache) = &self.cache {
                cache.set(asn, overview.holder.clone());
            }
            info.holders.push(overview.holder);
        }

        info.cached = all_cached && !info.holders.is_empty();
        info
    }

    fn resolve_whois(&self, matched_cidr: &str) -> ProviderInfo {
        let mut info = ProviderInfo {
            mode: Mode::Whois,
            asns: Vec::new(),
            holders: Vec::new(),
            source: "RIPEstat whois".to_string(),
            cached: false,
            error: None,
        };

        match self.client.provider_from_whois(matched_cidr) {
            Ok(holder) => info.holders.push(holder),
            Err(e) => info.error = Some(e.to_string()),
        }
        info
    }
}

impl ProviderResolver for RipeResolver {
    fn resolve(&self, address: &str, matched_cidr: &str) -> ProviderInfo {
        match self.mode {
            Mode::Bgp => self.resolve_bgp(address),
            Mode::Whois => self.resolve_whois(matched_cidr),
            Mode::Off => ProviderInfo {
                mode: Mode::Off,
                asns: Vec::new(),
                holders: Vec::new(),
                source: "disabled".to_string(),
                cached: false,
                error: None,
            },
        }
    }
}

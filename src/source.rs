//! Prefix source capability boundary
//!
//! The builder does not know where prefix lists come from; anything that
//! can answer "which prefixes did this country hold on this date" works.
//! The production implementation is [`crate::ripestat::RipeStatClient`];
//! tests substitute stubs.

use crate::error::Error;

/// Per-country prefix lists returned by a source
#[derive(Debug, Clone, Default)]
pub struct CountryResult {
    /// Upper-case ISO-3166 alpha-2 code
    pub country_code: String,
    /// IPv4 CIDR strings; lexically invalid entries are skipped downstream
    pub ipv4: Vec<String>,
    /// IPv6 CIDR strings
    pub ipv6: Vec<String>,
    /// Query time reported by the source (free-form)
    pub query_time: String,
    /// Raw response bytes, kept when the build asks for them
    pub raw: Option<Vec<u8>>,
}

/// Supplier of per-country prefix lists.
///
/// `Sync` because the builder fans fetches out across worker threads.
/// Retries and backoff are the implementation's concern, not the builder's.
pub trait PrefixSource: Sync {
    /// Fetch prefix lists for a lower-case country code.
    ///
    /// `date` is `YYYY-MM-DD`, or empty for the latest available data.
    fn fetch(&self, country_code: &str, date: &str) -> Result<CountryResult, Error>;
}

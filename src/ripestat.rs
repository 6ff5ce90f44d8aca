//! RIPEstat Data API client
//!
//! Blocking HTTP client for the handful of RIPEstat endpoints ip2cc uses:
//! `country-resource-list` to build snapshots, and
//! `network-info` / `as-overview` / `whois` for provider enrichment.
//! Failed requests are retried with exponential backoff plus jitter.

use crate::error::Error;
use crate::paths;
use crate::source::{CountryResult, PrefixSource};
use serde::Deserialize;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// RIPEstat Data API base URL
pub const BASE_URL: &str = "https://stat.ripe.net/data";

/// Per-request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retries after the initial attempt
const MAX_RETRIES: u32 = 3;

/// First backoff step
const BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Client for the RIPEstat Data API
pub struct RipeStatClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

/// Generic RIPEstat response envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    messages: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CountryResourceListData {
    #[serde(default)]
    resources: CountryResources,
    #[serde(default)]
    query_time: String,
}

#[derive(Debug, Default, Deserialize)]
struct CountryResources {
    #[serde(default)]
    ipv4: Vec<String>,
    #[serde(default)]
    ipv6: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NetworkInfoData {
    #[serde(default)]
    asns: Vec<serde_json::Value>,
    #[serde(default)]
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct AsOverviewData {
    #[serde(default)]
    holder: String,
    #[serde(default)]
    announced: bool,
}

#[derive(Debug, Deserialize)]
struct WhoisData {
    #[serde(default)]
    records: Vec<Vec<WhoisRecord>>,
}

#[derive(Debug, Deserialize)]
struct WhoisRecord {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

/// BGP routing information for an address
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    /// ASNs announcing the covering prefix
    pub asns: Vec<u32>,
    /// The announced prefix
    pub prefix: String,
}

/// Holder information for an ASN
#[derive(Debug, Clone)]
pub struct AsOverview {
    /// The ASN asked about
    pub asn: u32,
    /// Registered holder name
    pub holder: String,
    /// Whether the ASN is announced
    pub announced: bool,
}

impl RipeStatClient {
    /// Client with default timeout against the public API
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Client against a different base URL (tests point this at a stub)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        RipeStatClient {
            http: reqwest::blocking::Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .user_agent(concat!("ip2cc/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    /// GET an endpoint with retries; validates the response envelope.
    fn get(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Envelope, Error> {
        let url = format!("{}/{}/data.json", self.base_url, endpoint);

        let mut last_err = Error::Http("no attempts made".to_string());
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                thread::sleep(backoff(attempt));
            }
            match self.do_request(&url, params) {
                Ok(envelope) => return Ok(envelope),
                Err(e) => last_err = e,
            }
        }

        Err(Error::Http(format!(
            "after {} retries: {}",
            MAX_RETRIES, last_err
        )))
    }

    fn do_request(&self, url: &str, params: &[(&str, &str)]) -> Result<Envelope, Error> {
        let response = self
            .http
            .get(url)
            .query(params)
            .query(&[("sourceapp", paths::SOURCE_APP)])
            .header("Accept", "application/json")
            .send()
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Http(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let envelope: Envelope = response
            .json()
            .map_err(|e| Error::Http(format!("decode response: {}", e)))?;

        if envelope.status != "ok" {
            return Err(Error::Http(format!(
                "API error: status={}, messages={}",
                envelope.status, envelope.messages
            )));
        }

        Ok(envelope)
    }

    /// Fetch IPv4 and IPv6 prefixes delegated to a country.
    ///
    /// `country_code` is a lower-case ISO-3166 alpha-2 code; `date` is
    /// `YYYY-MM-DD` or empty for the latest data.
    pub fn country_resource_list(
        &self,
        country_code: &str,
        date: &str,
    ) -> Result<CountryResult, Error> {
        let resource = country_code.to_ascii_lowercase();
        let mut params = vec![("resource", resource.as_str()), ("v4_format", "prefix")];
        if !date.is_empty() {
            params.push(("time", date));
        }

        let envelope = self.get("country-resource-list", &params)?;
        let raw = serde_json::to_vec(&envelope.data)?;
        let data: CountryResourceListData = serde_json::from_value(envelope.data)?;

        Ok(CountryResult {
            country_code: country_code.to_ascii_uppercase(),
            ipv4: data.resources.ipv4,
            ipv6: data.resources.ipv6,
            query_time: data.query_time,
            raw: Some(raw),
        })
    }

    /// BGP routing information for an IP address
    pub fn network_info(&self, ip: &str) -> Result<NetworkInfo, Error> {
        let envelope = self.get("network-info", &[("resource", ip)])?;
        let data: NetworkInfoData = serde_json::from_value(envelope.data)?;

        // The API has returned ASNs both as numbers and as strings.
        let mut asns = Vec::with_capacity(data.asns.len());
        for v in data.asns {
            let parsed = match &v {
                serde_json::Value::Number(n) => n.as_u64().map(|n| n as u32),
                serde_json::Value::String(s) => s.parse::<u32>().ok(),
                _ => None,
            };
            if let Some(asn) = parsed {
                asns.push(asn);
            }
        }

        Ok(NetworkInfo {
            asns,
            prefix: data.prefix,
        })
    }

    /// Holder information for an ASN
    pub fn as_overview(&self, asn: u32) -> Result<AsOverview, Error> {
        let resource = format!("AS{}", asn);
        let envelope = self.get("as-overview", &[("resource", resource.as_str())])?;
        let data: AsOverviewData = serde_json::from_value(envelope.data)?;

        Ok(AsOverview {
            asn,
            holder: data.holder,
            announced: data.announced,
        })
    }

    /// Best-effort provider name from whois records for a prefix.
    ///
    /// Tries `org-name`, then `descr`, then `netname`.
    pub fn provider_from_whois(&self, resource: &str) -> Result<String, Error> {
        let envelope = self.get("whois", &[("resource", resource)])?;
        let data: WhoisData = serde_json::from_value(envelope.data)?;

        let mut org_name = None;
        let mut description = None;
        let mut net_name = None;

        for record in data.records.iter().flatten() {
            let slot = match record.key.to_ascii_lowercase().as_str() {
                "org-name" | "orgname" => &mut org_name,
                "descr" | "description" => &mut description,
                "netname" | "net-name" => &mut net_name,
                _ => continue,
            };
            if slot.is_none() && !record.value.is_empty() {
                *slot = Some(record.value.clone());
            }
        }

        org_name
            .or(description)
            .or(net_name)
            .ok_or_else(|| Error::Http(format!("no provider information in whois for {}", resource)))
    }
}

impl Default for RipeStatClient {
    fn default() -> Self {
        Self::new()
    }
}

impl PrefixSource for RipeStatClient {
    fn fetch(&self, country_code: &str, date: &str) -> Result<CountryResult, Error> {
        self.country_resource_list(country_code, date)
    }
}

/// Exponential backoff with up to 25% jitter
fn backoff(attempt: u32) -> Duration {
    let base = BASE_BACKOFF
        .saturating_mul(1u32 << (attempt - 1).min(16))
        .min(MAX_BACKOFF);
    // Cheap jitter from the subsecond clock; no RNG dependency needed.
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0) as u64;
    let quarter = base.as_millis() as u64 / 4;
    let jitter = if quarter > 0 { nanos % quarter } else { 0 };
    base + Duration::from_millis(jitter)
}

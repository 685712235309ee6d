//! Environment classification.
//!
//! Decides once, when the worker is created, whether it runs on a local or
//! development host. On such hosts the worker removes itself instead of
//! caching anything.

use std::sync::OnceLock;

use regex::RegexSet;
use url::Url;

/// Hostnames that always count as local.
const LOCAL_HOSTS: [&str; 4] = ["localhost", "127.0.0.1", "::1", "0.0.0.0"];

/// Private-network prefixes: `192.168.x.x`, `10.x.x.x`, `172.16.x.x` to `172.31.x.x`.
const PRIVATE_PREFIXES: [&str; 3] = [r"^192\.168\.", r"^10\.", r"^172\.(1[6-9]|2[0-9]|3[01])\."];

static PRIVATE_NETWORKS: OnceLock<Option<RegexSet>> = OnceLock::new();

fn private_networks() -> Option<&'static RegexSet> {
    PRIVATE_NETWORKS.get_or_init(|| RegexSet::new(PRIVATE_PREFIXES).ok()).as_ref()
}

/// Where the worker is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Local or private-network host: pass-through and self-destruct.
    Development,
    /// Anything else: full caching.
    Production,
}

impl Environment {
    /// Classify a hostname.
    pub fn classify(host: &str) -> Self {
        if is_local_host(host) {
            Environment::Development
        } else {
            Environment::Production
        }
    }

    /// Classify the host of a URL. URLs without a host are production.
    pub fn from_url(url: &Url) -> Self {
        url.host_str().map(Self::classify).unwrap_or(Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        *self == Environment::Development
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

/// Whether `host` is on the local allow-list or starts with a private-network
/// prefix. Prefixes match any hostname, so `10.internal` is local too.
pub fn is_local_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if LOCAL_HOSTS.iter().any(|local| local.eq_ignore_ascii_case(host)) {
        return true;
    }
    private_networks().is_some_and(|set| set.is_match(host))
}

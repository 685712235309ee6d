//! Request routing.
//!
//! Every intercepted request is matched against an ordered rule list; the
//! first rule that matches decides whether the request bypasses the worker
//! or which strategy and cache namespace serve it. The last rule always
//! matches.

use std::fmt;

use agrimarket_common::AgriError;
use agrimarket_net::{Request, RequestDestination, UrlPart, UrlPattern};
use http::Method;
use tracing::trace;

use crate::config::{CacheCategory, WorkerConfig};
use crate::Result;

/// Caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request goes straight to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    NonGetMethod,
    NoCachePattern,
}

/// Outcome of routing one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Let the network handle the request untouched.
    Bypass(BypassReason),
    /// Serve through a strategy backed by a cache category.
    Cache {
        strategy: Strategy,
        category: CacheCategory,
    },
}

impl RouteDecision {
    fn cache(strategy: Strategy, category: CacheCategory) -> Self {
        RouteDecision::Cache { strategy, category }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, RouteDecision::Bypass(_))
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteDecision::Bypass(BypassReason::NonGetMethod) => f.write_str("bypass(method)"),
            RouteDecision::Bypass(BypassReason::NoCachePattern) => f.write_str("bypass(no-cache)"),
            RouteDecision::Cache { strategy, category } => write!(f, "{strategy}({category})"),
        }
    }
}

/// What a rule tests.
#[derive(Debug, Clone)]
pub enum Condition {
    /// Method other than GET.
    NonGet,
    /// Any of the URL patterns matches.
    AnyPattern(Vec<UrlPattern>),
    /// The request destination is one of these.
    Destination(Vec<RequestDestination>),
    /// The path is one of these exact paths.
    Path(Vec<String>),
    /// Any of the nested conditions holds.
    Either(Vec<Condition>),
    Always,
}

impl Condition {
    pub fn matches(&self, request: &Request) -> bool {
        match self {
            Condition::NonGet => request.method != Method::GET,
            Condition::AnyPattern(patterns) => patterns.iter().any(|p| p.matches(&request.url)),
            Condition::Destination(destinations) => destinations.contains(&request.destination),
            Condition::Path(paths) => paths.iter().any(|p| p == request.url.path()),
            Condition::Either(conditions) => conditions.iter().any(|c| c.matches(request)),
            Condition::Always => true,
        }
    }
}

/// A named routing rule.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub name: &'static str,
    pub condition: Condition,
    pub decision: RouteDecision,
}

/// Ordered routing table.
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<RouteRule>,
}

impl Router {
    /// Build the routing table for a configuration.
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let mut no_cache: Vec<UrlPattern> = config
            .no_cache_path_markers
            .iter()
            .map(|marker| UrlPattern::path_contains(marker))
            .collect();
        no_cache.extend(
            config
                .no_cache_host_markers
                .iter()
                .map(|marker| UrlPattern::host_contains(marker)),
        );
        for pattern in &config.extra_no_cache_patterns {
            let pattern = UrlPattern::regex(UrlPart::Full, pattern)
                .map_err(|e| AgriError::config_with_source("invalid no-cache pattern", e))?;
            no_cache.push(pattern);
        }

        let rules = vec![
            RouteRule {
                name: "non-get",
                condition: Condition::NonGet,
                decision: RouteDecision::Bypass(BypassReason::NonGetMethod),
            },
            RouteRule {
                name: "no-cache",
                condition: Condition::AnyPattern(no_cache),
                decision: RouteDecision::Bypass(BypassReason::NoCachePattern),
            },
            RouteRule {
                name: "images",
                condition: Condition::Destination(vec![RequestDestination::Image]),
                decision: RouteDecision::cache(Strategy::CacheFirst, CacheCategory::Images),
            },
            RouteRule {
                name: "data",
                condition: Condition::AnyPattern(vec![
                    UrlPattern::path_prefix(&config.data_path_prefix),
                    UrlPattern::host_contains(&config.backend_host_marker),
                ]),
                decision: RouteDecision::cache(Strategy::NetworkFirst, CacheCategory::Data),
            },
            RouteRule {
                name: "static-assets",
                condition: Condition::Either(vec![
                    Condition::Path(config.precache_manifest.clone()),
                    Condition::Destination(vec![RequestDestination::Script, RequestDestination::Style]),
                ]),
                decision: RouteDecision::cache(Strategy::CacheFirst, CacheCategory::Static),
            },
            RouteRule {
                name: "fallback",
                condition: Condition::Always,
                decision: RouteDecision::cache(Strategy::StaleWhileRevalidate, CacheCategory::Static),
            },
        ];

        Ok(Self { rules })
    }

    /// The first rule matching `request`.
    pub fn matching_rule(&self, request: &Request) -> Option<&RouteRule> {
        self.rules.iter().find(|rule| rule.condition.matches(request))
    }

    /// Route a request.
    pub fn route(&self, request: &Request) -> RouteDecision {
        let decision = self
            .matching_rule(request)
            .map(|rule| {
                trace!(url = %request.url, rule = rule.name, "Route matched");
                rule.decision
            })
            .unwrap_or(RouteDecision::cache(
                Strategy::StaleWhileRevalidate,
                CacheCategory::Static,
            ));
        trace!(url = %request.url, %decision, "Routed");
        decision
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

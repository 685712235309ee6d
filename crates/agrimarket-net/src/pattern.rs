//! URL patterns used to classify requests.

use crate::{NetError, Url};
use regex::Regex;

/// Which part of the URL a pattern is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlPart {
    /// The whole serialized URL.
    Full,
    /// The host only (`market.example`).
    Host,
    /// The path only (`/api/products`).
    Path,
}

/// How a pattern matches.
#[derive(Debug, Clone)]
pub enum PatternKind {
    Exact,
    Prefix,
    Suffix,
    Contains,
    Regex(Regex),
}

/// URL pattern for matching.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    /// Part of the URL inspected.
    pub part: UrlPart,
    /// Match type.
    pub kind: PatternKind,
    /// Pattern source text.
    pub pattern: String,
}

impl UrlPattern {
    fn literal(part: UrlPart, kind: PatternKind, pattern: &str) -> Self {
        Self {
            part,
            kind,
            pattern: pattern.to_string(),
        }
    }

    /// Exact match on the full URL.
    pub fn exact(url: &str) -> Self {
        Self::literal(UrlPart::Full, PatternKind::Exact, url)
    }

    /// Prefix match on the full URL.
    pub fn prefix(prefix: &str) -> Self {
        Self::literal(UrlPart::Full, PatternKind::Prefix, prefix)
    }

    /// Suffix match on the full URL.
    pub fn suffix(suffix: &str) -> Self {
        Self::literal(UrlPart::Full, PatternKind::Suffix, suffix)
    }

    /// Substring match on the path.
    pub fn path_contains(substring: &str) -> Self {
        Self::literal(UrlPart::Path, PatternKind::Contains, substring)
    }

    /// Prefix match on the path.
    pub fn path_prefix(prefix: &str) -> Self {
        Self::literal(UrlPart::Path, PatternKind::Prefix, prefix)
    }

    /// Substring match on the host.
    pub fn host_contains(substring: &str) -> Self {
        Self::literal(UrlPart::Host, PatternKind::Contains, substring)
    }

    /// Regular expression over the given URL part.
    pub fn regex(part: UrlPart, pattern: &str) -> Result<Self, NetError> {
        let regex = Regex::new(pattern)
            .map_err(|e| NetError::InvalidPattern(format!("{pattern}: {e}")))?;
        Ok(Self {
            part,
            kind: PatternKind::Regex(regex),
            pattern: pattern.to_string(),
        })
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let subject = match self.part {
            UrlPart::Full => url.as_str(),
            UrlPart::Host => url.host_str().unwrap_or(""),
            UrlPart::Path => url.path(),
        };

        match &self.kind {
            PatternKind::Exact => subject == self.pattern,
            PatternKind::Prefix => subject.starts_with(&self.pattern),
            PatternKind::Suffix => subject.ends_with(&self.pattern),
            PatternKind::Contains => subject.contains(&self.pattern),
            PatternKind::Regex(regex) => regex.is_match(subject),
        }
    }
}

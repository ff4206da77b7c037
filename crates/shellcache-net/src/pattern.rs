//! URL patterns for classifying requests.
//!
//! The gateway uses a pattern to decide whether a request targets the
//! backend API. Host, domain and origin patterns compare parsed URL
//! components; [`PatternKind::Contains`] matches anywhere in the URL string
//! and is kept only for compatibility with older configurations.

use serde::{Deserialize, Serialize};
use tracing::trace;
use url::{Origin, Url};

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PatternKind {
    /// Exact host match (`abc.supabase.co`).
    Host(String),
    /// Host equal to the domain or a subdomain of it (`supabase.co`).
    Domain(String),
    /// Exact origin match (`https://api.example.com`).
    Origin(String),
    /// Substring of the full URL.
    Contains(String),
}

/// A URL pattern together with helpers to build and evaluate it.
///
/// Deserialized patterns are normalized the same way as the builders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PatternKind", into = "PatternKind")]
pub struct UrlPattern {
    pub kind: PatternKind,
}

impl UrlPattern {
    /// Match a single host exactly.
    pub fn host(host: &str) -> Self {
        Self {
            kind: PatternKind::Host(host.to_ascii_lowercase()),
        }
    }

    /// Match a domain and all of its subdomains.
    pub fn domain(domain: &str) -> Self {
        Self {
            kind: PatternKind::Domain(domain.trim_start_matches('.').to_ascii_lowercase()),
        }
    }

    /// Match an origin (scheme, host and port).
    pub fn origin(origin: &str) -> Self {
        Self {
            kind: PatternKind::Origin(origin.trim_end_matches('/').to_string()),
        }
    }

    /// Match a substring anywhere in the URL.
    pub fn contains(substring: &str) -> Self {
        Self {
            kind: PatternKind::Contains(substring.to_string()),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let matched = match &self.kind {
            PatternKind::Host(host) => url.host_str().is_some_and(|h| h.eq_ignore_ascii_case(host)),
            PatternKind::Domain(domain) => url.host_str().is_some_and(|h| {
                let h = h.to_ascii_lowercase();
                h == *domain
                    || h.strip_suffix(domain.as_str())
                        .is_some_and(|rest| rest.ends_with('.'))
            }),
            PatternKind::Origin(origin) => Url::parse(origin)
                .map(|o| same_origin(&o.origin(), &url.origin()))
                .unwrap_or(false),
            PatternKind::Contains(substring) => url.as_str().contains(substring.as_str()),
        };
        trace!(url = %url, pattern = ?self.kind, matched, "Pattern evaluated");
        matched
    }
}

impl From<PatternKind> for UrlPattern {
    fn from(kind: PatternKind) -> Self {
        match kind {
            PatternKind::Host(host) => Self::host(&host),
            PatternKind::Domain(domain) => Self::domain(&domain),
            PatternKind::Origin(origin) => Self::origin(&origin),
            PatternKind::Contains(substring) => Self::contains(&substring),
        }
    }
}

impl From<UrlPattern> for PatternKind {
    fn from(pattern: UrlPattern) -> Self {
        pattern.kind
    }
}

fn same_origin(a: &Origin, b: &Origin) -> bool {
    a.is_tuple() && a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_host_pattern() {
        let pattern = UrlPattern::host("api.example.com");
        assert!(pattern.matches(&url("https://api.example.com/rows")));
        assert!(pattern.matches(&url("https://API.example.com/rows")));
        assert!(!pattern.matches(&url("https://cdn.example.com/rows")));
    }

    #[test]
    fn test_domain_pattern_respects_label_boundary() {
        let pattern = UrlPattern::domain("supabase.co");
        assert!(pattern.matches(&url("https://qnts.supabase.co/rest/v1/shifts")));
        assert!(pattern.matches(&url("https://supabase.co/")));
        assert!(!pattern.matches(&url("https://notsupabase.co/")));
        // Path or query mentions do not count.
        assert!(!pattern.matches(&url("https://app.example.com/?next=supabase.co")));
    }

    #[test]
    fn test_origin_pattern() {
        let pattern = UrlPattern::origin("https://api.example.com/");
        assert!(pattern.matches(&url("https://api.example.com/rows?id=1")));
        assert!(!pattern.matches(&url("http://api.example.com/rows")));
        assert!(!pattern.matches(&url("https://api.example.com:8443/rows")));
    }

    #[test]
    fn test_contains_pattern_is_substring() {
        let pattern = UrlPattern::contains("supabase.co");
        assert!(pattern.matches(&url("https://app.example.com/?next=supabase.co")));
        assert!(pattern.matches(&url("https://notsupabase.co/")));
    }

    #[test]
    fn test_pattern_serde_shape() {
        let pattern: UrlPattern =
            serde_json::from_str(r#"{"type":"domain","value":"supabase.co"}"#).unwrap();
        assert_eq!(pattern, UrlPattern::domain("supabase.co"));
        assert_eq!(
            serde_json::to_string(&pattern).unwrap(),
            r#"{"type":"domain","value":"supabase.co"}"#
        );
    }

    #[test]
    fn test_deserialized_patterns_are_normalized() {
        let shifts = url("https://qnts.supabase.co/rest/v1/shifts");
        for raw in [
            r#"{"type":"domain","value":"Supabase.co"}"#,
            r#"{"type":"domain","value":".supabase.co"}"#,
            r#"{"type":"host","value":"QNTS.supabase.co"}"#,
            r#"{"type":"origin","value":"https://qnts.supabase.co/"}"#,
        ] {
            let pattern: UrlPattern = serde_json::from_str(raw).unwrap();
            assert!(pattern.matches(&shifts), "{raw} should match");
        }

        let pattern: UrlPattern =
            serde_json::from_str(r#"{"type":"domain","value":".Supabase.CO"}"#).unwrap();
        assert_eq!(pattern, UrlPattern::domain("supabase.co"));
        let pattern: UrlPattern =
            serde_json::from_str(r#"{"type":"origin","value":"https://api.example.com/"}"#).unwrap();
        assert_eq!(pattern.kind, PatternKind::Origin("https://api.example.com".to_string()));
    }
}

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ParseError;

static DNS_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").unwrap());
static DNS_SUBDOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap());
static QUALIFIED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap());
static LABEL_VALUE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").unwrap());

/// Which naming rule a literal segment must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
    /// RFC 1123 label, used for namespaces.
    Namespace,
    /// RFC 1123 subdomain, used for object names.
    Name,
    /// Label value: may be empty, alphanumeric at both ends.
    LabelValue,
}

impl Segment {
    fn what(&self) -> &'static str {
        match self {
            Segment::Namespace => "namespace",
            Segment::Name => "name",
            Segment::LabelValue => "label value",
        }
    }

    fn max_len(&self) -> usize {
        match self {
            Segment::Namespace | Segment::LabelValue => 63,
            Segment::Name => 253,
        }
    }

    fn full(&self) -> &'static Regex {
        match self {
            Segment::Namespace => &DNS_LABEL,
            Segment::Name => &DNS_SUBDOMAIN,
            Segment::LabelValue => &LABEL_VALUE,
        }
    }

    fn allowed(&self, c: char) -> bool {
        match self {
            Segment::Namespace => c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-',
            Segment::Name => c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.',
            Segment::LabelValue => c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'),
        }
    }

    fn invalid(&self, value: &str, reason: &'static str) -> ParseError {
        ParseError::InvalidDns { what: self.what(), value: value.to_string(), reason }
    }

    /// Literal text must satisfy the full rule; with wildcards only the static pieces
    /// are checked (allowed characters, alphanumeric where they touch either end).
    fn validate(&self, raw: &str) -> Result<(), ParseError> {
        if raw.len() > self.max_len() {
            return Err(self.invalid(raw, "too long"));
        }
        if !raw.contains(['*', '?']) {
            return if self.full().is_match(raw) {
                Ok(())
            } else {
                Err(self.invalid(raw, "must be lowercase alphanumeric or '-', starting and ending alphanumeric"))
            };
        }
        if raw.chars().any(|c| c != '*' && c != '?' && !self.allowed(c)) {
            return Err(self.invalid(raw, "contains characters outside the allowed set"));
        }
        let first = raw.chars().next();
        let last = raw.chars().last();
        let edge_ok = |c: Option<char>| match c {
            Some('*') | Some('?') | None => true,
            Some(c) => c.is_ascii_alphanumeric(),
        };
        if !edge_ok(first) || !edge_ok(last) {
            return Err(self.invalid(raw, "must start and end alphanumeric"));
        }
        Ok(())
    }
}

/// Shell-style wildcard pattern: `*` matches any run of characters, `?` exactly one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    raw: String,
}

impl Pattern {
    /// Wrap `raw` without applying any naming rule.
    pub fn new(raw: &str) -> Self {
        Self { raw: raw.to_string() }
    }

    pub fn validated(raw: &str, segment: Segment) -> Result<Self, ParseError> {
        segment.validate(raw)?;
        Ok(Self::new(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_literal(&self) -> bool {
        !self.raw.contains(['*', '?'])
    }

    /// Iterative wildcard match; on mismatch, backtracks to the most recent `*` only.
    pub fn matches(&self, value: &str) -> bool {
        let pat: Vec<char> = self.raw.chars().collect();
        let val: Vec<char> = value.chars().collect();
        let (mut p, mut v) = (0usize, 0usize);
        let mut star: Option<(usize, usize)> = None;
        while v < val.len() {
            if p < pat.len() && (pat[p] == '?' || pat[p] == val[v]) {
                p += 1;
                v += 1;
            } else if p < pat.len() && pat[p] == '*' {
                star = Some((p, v));
                p += 1;
            } else if let Some((sp, sv)) = star {
                p = sp + 1;
                v = sv + 1;
                star = Some((sp, sv + 1));
            } else {
                return false;
            }
        }
        pat[p..].iter().all(|c| *c == '*')
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Label keys are literal qualified names with an optional DNS subdomain prefix.
pub fn validate_label_key(key: &str) -> Result<(), ParseError> {
    let invalid = |reason| ParseError::InvalidDns { what: "label key", value: key.to_string(), reason };
    let (prefix, name) = match key.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, key),
    };
    if let Some(p) = prefix {
        if p.is_empty() || p.len() > 253 || !DNS_SUBDOMAIN.is_match(p) {
            return Err(invalid("prefix must be a DNS subdomain"));
        }
    }
    if name.is_empty() || name.len() > 63 || !QUALIFIED_NAME.is_match(name) {
        return Err(invalid("name must be alphanumeric, '-', '_' or '.', starting and ending alphanumeric"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_run() {
        let p = Pattern::new("*");
        assert!(p.matches(""));
        assert!(p.matches("anything-at-all"));
    }

    #[test]
    fn prefix_and_suffix_wildcards() {
        let p = Pattern::new("web-*");
        assert!(p.matches("web-1"));
        assert!(p.matches("web-"));
        assert!(!p.matches("api-web-1"));

        let s = Pattern::new("*-db");
        assert!(s.matches("orders-db"));
        assert!(!s.matches("orders-db-0"));
    }

    #[test]
    fn question_mark_matches_exactly_one() {
        let p = Pattern::new("pod-?");
        assert!(p.matches("pod-a"));
        assert!(!p.matches("pod-"));
        assert!(!p.matches("pod-ab"));
    }

    #[test]
    fn literal_dots_are_not_regex() {
        let p = Pattern::new("a.b");
        assert!(p.matches("a.b"));
        assert!(!p.matches("axb"));
    }

    #[test]
    fn literal_names_follow_rfc1123() {
        assert!(Pattern::validated("my-app.v2", Segment::Name).is_ok());
        assert!(Pattern::validated("bad-name-", Segment::Name).is_err());
        assert!(Pattern::validated("Upper", Segment::Name).is_err());
        assert!(Pattern::validated("has.dot", Segment::Namespace).is_err());
        assert!(Pattern::validated(&"a".repeat(64), Segment::Namespace).is_err());
    }

    #[test]
    fn wildcard_patterns_validate_static_pieces() {
        assert!(Pattern::validated("web-*", Segment::Name).is_ok());
        assert!(Pattern::validated("*", Segment::Namespace).is_ok());
        assert!(Pattern::validated("-web*", Segment::Name).is_err());
        assert!(Pattern::validated("we_b*", Segment::Name).is_err());
        assert!(Pattern::validated("v1_*", Segment::LabelValue).is_ok());
    }

    #[test]
    fn label_keys() {
        assert!(validate_label_key("app").is_ok());
        assert!(validate_label_key("app.kubernetes.io/name").is_ok());
        assert!(validate_label_key("/name").is_err());
        assert!(validate_label_key("bad_").is_err());
    }
}

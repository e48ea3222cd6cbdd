//! Request patterns
//!
//! A pattern names the requests a handler cares about: an optional set of
//! methods, an optional set of ports, and an optional pathname glob, all
//! packed into one string such as `GET|HEAD:80|443 /assets/**`.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::pattern::glob::GlobMatcher;

/// Grammar for the single-string pattern form: methods, then `:ports`,
/// then a path that starts with a non-word character.
fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(r"^([A-Za-z]+(?:\|[A-Za-z]+)*)?\s*(?::(\d+(?:\|\d+)*))?\s*(\W[\s\S]*)?$")
            .expect("pattern grammar is a valid regex")
    })
}

/// Which requests a handler should see.
///
/// Each dimension left empty matches every request: an empty method list
/// accepts any method, an empty port list any port, and a missing glob
/// any path.
///
/// Method and port lists are stored sorted and deduplicated, so two
/// patterns naming the same sets compare equal no matter the order they
/// were written in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestPattern {
    methods: Vec<String>,
    ports: Vec<u16>,
    glob: Option<GlobMatcher>,
}

impl RequestPattern {
    /// A pattern that matches every request.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Parse a pattern string, rejecting anything the grammar or the port
    /// range does not allow.
    pub fn parse(pattern: &str) -> Result<Self> {
        let captures = grammar()
            .captures(pattern)
            .ok_or_else(|| Error::Pattern(pattern.to_string()))?;

        let methods = captures
            .get(1)
            .map(|m| parse_methods(m.as_str()))
            .unwrap_or_default();

        let ports = match captures.get(2) {
            Some(m) => parse_ports(m.as_str())?,
            None => Vec::new(),
        };

        let glob = captures.get(3).map(|m| GlobMatcher::new(m.as_str()));

        Ok(Self {
            methods,
            ports,
            glob,
        })
    }

    /// Parse a pattern string, degrading anything unparseable to "match
    /// any" instead of failing.
    #[must_use]
    pub fn parse_lenient(pattern: &str) -> Self {
        let Some(captures) = grammar().captures(pattern) else {
            return Self::any();
        };

        let methods = captures
            .get(1)
            .map(|m| parse_methods(m.as_str()))
            .unwrap_or_default();

        // Out-of-range port tokens are dropped rather than rejected.
        let ports = captures
            .get(2)
            .map(|m| {
                normalized_ports(
                    m.as_str()
                        .split('|')
                        .filter_map(|token| token.parse::<u16>().ok())
                        .filter(|port| *port != 0)
                        .collect(),
                )
            })
            .unwrap_or_default();

        let glob = captures.get(3).map(|m| GlobMatcher::new(m.as_str()));

        Self {
            methods,
            ports,
            glob,
        }
    }

    /// Restrict the pattern to the given methods.
    #[must_use]
    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.methods = normalized_methods(
            methods
                .into_iter()
                .map(|m| m.as_ref().to_uppercase())
                .collect(),
        );
        self
    }

    /// Restrict the pattern to the given ports.
    #[must_use]
    pub fn with_ports<I>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        self.ports = normalized_ports(ports.into_iter().filter(|port| *port != 0).collect());
        self
    }

    /// Restrict the pattern to paths matching a glob string.
    #[must_use]
    pub fn with_path(self, glob: &str) -> Self {
        self.with_glob(GlobMatcher::new(glob))
    }

    /// Restrict the pattern to paths matching a precompiled glob.
    #[must_use]
    pub fn with_glob(mut self, glob: GlobMatcher) -> Self {
        self.glob = Some(glob);
        self
    }

    /// Methods this pattern accepts; empty means any.
    #[must_use]
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Ports this pattern accepts; empty means any.
    #[must_use]
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// The pathname glob, if the pattern has one.
    #[must_use]
    pub const fn glob(&self) -> Option<&GlobMatcher> {
        self.glob.as_ref()
    }

    /// Check a request's method, accepting port, and path against this
    /// pattern. Every empty dimension accepts.
    #[must_use]
    pub fn matches(&self, method: &str, port: u16, path: &str) -> bool {
        if !self.methods.is_empty() && !self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
        {
            return false;
        }
        if !self.ports.is_empty() && !self.ports.contains(&port) {
            return false;
        }
        match &self.glob {
            Some(glob) => glob.is_match(path),
            None => true,
        }
    }
}

fn parse_methods(raw: &str) -> Vec<String> {
    normalized_methods(raw.split('|').map(str::to_uppercase).collect())
}

fn parse_ports(raw: &str) -> Result<Vec<u16>> {
    let mut ports = Vec::new();
    for token in raw.split('|') {
        let port: u16 = token
            .parse()
            .map_err(|_| Error::Pattern(format!("port {token} is out of range")))?;
        if port == 0 {
            return Err(Error::Pattern("port 0 is not routable".to_string()));
        }
        ports.push(port);
    }
    Ok(normalized_ports(ports))
}

fn normalized_methods(mut methods: Vec<String>) -> Vec<String> {
    methods.sort();
    methods.dedup();
    methods
}

fn normalized_ports(mut ports: Vec<u16>) -> Vec<u16> {
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_pattern() {
        let pattern = RequestPattern::parse("GET|POST:80|443 /api/**").unwrap();
        assert_eq!(pattern.methods(), ["GET", "POST"]);
        assert_eq!(pattern.ports(), [80, 443]);
        assert_eq!(pattern.glob().unwrap().source(), "/api/**");
    }

    #[test]
    fn test_parse_methods_are_uppercased() {
        let pattern = RequestPattern::parse("get|head").unwrap();
        assert_eq!(pattern.methods(), ["GET", "HEAD"]);
    }

    #[test]
    fn test_parse_ports_only() {
        let pattern = RequestPattern::parse(":8080").unwrap();
        assert!(pattern.methods().is_empty());
        assert_eq!(pattern.ports(), [8080]);
        assert!(pattern.glob().is_none());
    }

    #[test]
    fn test_parse_path_only() {
        let pattern = RequestPattern::parse("**.css").unwrap();
        assert!(pattern.methods().is_empty());
        assert!(pattern.ports().is_empty());
        assert_eq!(pattern.glob().unwrap().source(), "**.css");
    }

    #[test]
    fn test_parse_empty_matches_everything() {
        let pattern = RequestPattern::parse("").unwrap();
        assert!(pattern.matches("GET", 80, "/"));
        assert!(pattern.matches("DELETE", 65535, "/anything/at/all"));
    }

    #[test]
    fn test_parse_no_space_before_path() {
        let pattern = RequestPattern::parse("GET/api").unwrap();
        assert_eq!(pattern.methods(), ["GET"]);
        assert_eq!(pattern.glob().unwrap().source(), "/api");
    }

    #[test]
    fn test_parse_rejects_out_of_range_port() {
        assert!(RequestPattern::parse(":70000").is_err());
        assert!(RequestPattern::parse(":0").is_err());
    }

    #[test]
    fn test_parse_rejects_word_path() {
        // A path must start with a non-word character.
        assert!(RequestPattern::parse("GET 123abc").is_err());
    }

    #[test]
    fn test_lenient_degrades_to_any() {
        let pattern = RequestPattern::parse_lenient("GET 123abc");
        assert_eq!(pattern, RequestPattern::any());

        let pattern = RequestPattern::parse_lenient(":70000|8080");
        assert_eq!(pattern.ports(), [8080]);
    }

    #[test]
    fn test_matches_filters_each_dimension() {
        let pattern = RequestPattern::parse("GET:8080 /files/*").unwrap();
        assert!(pattern.matches("GET", 8080, "/files/a.txt"));
        assert!(!pattern.matches("POST", 8080, "/files/a.txt"));
        assert!(!pattern.matches("GET", 8081, "/files/a.txt"));
        assert!(!pattern.matches("GET", 8080, "/files/sub/a.txt"));
    }

    #[test]
    fn test_matches_method_case_insensitive() {
        let pattern = RequestPattern::any().with_methods(["get"]);
        assert!(pattern.matches("GET", 80, "/"));
    }

    #[test]
    fn test_builder_equivalent_to_parsed() {
        let parsed = RequestPattern::parse("GET|PUT:443 /api/*").unwrap();
        let built = RequestPattern::any()
            .with_methods(["GET", "PUT"])
            .with_ports([443])
            .with_path("/api/*");
        assert_eq!(parsed, built);
    }

    #[test]
    fn test_equality_ignores_segment_order() {
        let a = RequestPattern::parse("GET|POST:80|443 /api/*").unwrap();
        let b = RequestPattern::parse("POST|GET:443|80 /api/*").unwrap();
        assert_eq!(a, b);

        let built_a = RequestPattern::any().with_methods(["POST", "GET"]).with_ports([443, 80]);
        let built_b = RequestPattern::any().with_methods(["GET", "POST"]).with_ports([80, 443]);
        assert_eq!(built_a, built_b);
    }

    #[test]
    fn test_duplicate_segments_collapse() {
        let pattern = RequestPattern::parse("GET|GET:80|80 /x").unwrap();
        assert_eq!(pattern.methods(), ["GET"]);
        assert_eq!(pattern.ports(), [80]);
    }

    #[test]
    fn test_structural_equality_ignores_construction_route() {
        let a = RequestPattern::parse("GET /x").unwrap();
        let b = RequestPattern::parse_lenient("GET /x");
        assert_eq!(a, b);
    }
}

use crate::request::HttpRequest;
use http::Method;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

type KeyFn = dyn Fn(&Method, &str, &BTreeMap<String, String>) -> String + Send + Sync;

/// Host-supplied replacement for the default `{METHOD}:{URL}` key.
#[derive(Clone)]
pub struct KeyGenerator(Arc<KeyFn>);

impl KeyGenerator {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Method, &str, &BTreeMap<String, String>) -> String + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl fmt::Debug for KeyGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyGenerator(..)")
    }
}

/// Derives cache keys from requests.
///
/// Two requests with the same method, URL and parameters always produce the
/// same key. With `exclude_query` the query string (inline or from params) is
/// dropped, so `/users?page=1` and `/users?page=2` share one entry.
#[derive(Clone, Debug, Default)]
pub struct CacheKeying {
    exclude_query: bool,
    generator: Option<KeyGenerator>,
}

impl CacheKeying {
    pub fn new(exclude_query: bool) -> Self {
        Self {
            exclude_query,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: KeyGenerator) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn key(&self, method: &Method, url: &str, params: &BTreeMap<String, String>) -> String {
        if let Some(generator) = &self.generator {
            return (generator.0)(method, url, params);
        }
        if self.exclude_query {
            return format!("{}:{}", method, strip_query(url));
        }
        // Params live in a BTreeMap, so their order is already canonical.
        let mut request = HttpRequest::new(method.clone(), url);
        request.params = params.clone();
        format!("{}:{}", method, request.full_url())
    }

    pub fn key_for(&self, request: &HttpRequest) -> String {
        self.key(&request.method, &request.url, &request.params)
    }
}

fn strip_query(url: &str) -> &str {
    match url.find(['?', '#']) {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Requests that never touch the cache.
#[derive(Clone, Debug)]
pub struct ExcludeRules {
    methods: HashSet<Method>,
    paths: Vec<Regex>,
}

impl ExcludeRules {
    pub fn new(methods: impl IntoIterator<Item = Method>, paths: Vec<Regex>) -> Self {
        Self {
            methods: methods.into_iter().collect(),
            paths,
        }
    }

    /// Unanchored match of each path pattern against the full URL.
    pub fn is_excluded(&self, method: &Method, url: &str) -> bool {
        self.methods.contains(method) || self.paths.iter().any(|re| re.is_match(url))
    }

    pub fn is_excluded_request(&self, request: &HttpRequest) -> bool {
        self.is_excluded(&request.method, &request.full_url())
    }
}

impl Default for ExcludeRules {
    fn default() -> Self {
        Self::new(
            [Method::POST, Method::PUT, Method::DELETE, Method::PATCH],
            Vec::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_key_is_method_and_url() {
        let keying = CacheKeying::default();
        assert_eq!(
            keying.key(&Method::GET, "https://api.test/users/1", &BTreeMap::new()),
            "GET:https://api.test/users/1"
        );
    }

    #[test]
    fn params_are_order_independent() {
        let keying = CacheKeying::default();
        let mut a = HttpRequest::get("https://api.test/users");
        a.params = params(&[("page", "2"), ("limit", "10")]);
        let b = HttpRequest::get("https://api.test/users")
            .with_param("limit", "10")
            .with_param("page", "2");

        assert_eq!(keying.key_for(&a), keying.key_for(&b));
        assert_eq!(
            keying.key_for(&a),
            "GET:https://api.test/users?limit=10&page=2"
        );
    }

    #[test]
    fn method_is_part_of_key() {
        let keying = CacheKeying::default();
        let url = "https://api.test/users";
        assert_ne!(
            keying.key(&Method::GET, url, &BTreeMap::new()),
            keying.key(&Method::HEAD, url, &BTreeMap::new())
        );
    }

    #[test]
    fn exclude_query_collapses_variants() {
        let keying = CacheKeying::new(true);
        let a = keying.key(&Method::GET, "https://api.test/users?page=1", &BTreeMap::new());
        let b = keying.key(
            &Method::GET,
            "https://api.test/users",
            &params(&[("page", "2")]),
        );
        assert_eq!(a, "GET:https://api.test/users");
        assert_eq!(a, b);
    }

    #[test]
    fn custom_generator_wins() {
        let keying = CacheKeying::new(true).with_generator(KeyGenerator::new(|m, u, p| {
            format!("{m}|{u}|{}", p.len())
        }));
        assert_eq!(
            keying.key(&Method::GET, "/a?x=1", &params(&[("y", "2")])),
            "GET|/a?x=1|1"
        );
    }

    #[test]
    fn default_excludes_mutating_methods() {
        let rules = ExcludeRules::default();
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH] {
            assert!(rules.is_excluded(&method, "https://api.test/users"));
        }
        assert!(!rules.is_excluded(&Method::GET, "https://api.test/users"));
        assert!(!rules.is_excluded(&Method::HEAD, "https://api.test/users"));
    }

    #[test]
    fn path_patterns_exclude_matching_urls() {
        let rules = ExcludeRules::new([], vec![Regex::new("/auth/").unwrap()]);
        assert!(rules.is_excluded(&Method::GET, "https://api.test/auth/token"));
        assert!(!rules.is_excluded(&Method::GET, "https://api.test/users"));
    }
}

//! Per-path route configuration and matching, for protecting an entire
//! [`axum::Router`] with a single layer instead of attaching
//! [`crate::layer::X402Middleware`] route by route.
//!
//! A [`RouteMap`] is keyed by `"[VERB ]path"` (verb optional, defaults to
//! matching any method) and compiled once into a [`CompiledRouteMap`] that
//! [`RouteGate`] consults per request.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum_core::{extract::Request, response::Response};
use regex::Regex;
use tokio::sync::RwLock;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;

use crate::facilitator::Facilitator;
use crate::layer::{CachedSupported, X402Paygate, build_payment_requirements_no_resource};
use crate::price::PriceTag;

use std::time::Duration;

/// Configuration for one protected route.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub price_tag: PriceTag,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub max_timeout_seconds: u64,
    /// Whether this route should be advertised by an eventual discovery
    /// endpoint. Not consumed by the gate itself.
    pub discoverable: bool,
    /// Custom HTML served to browser requesters in place of the generated
    /// opaque paywall blob.
    pub paywall_html: Option<String>,
}

impl RouteConfig {
    pub fn new(price_tag: PriceTag) -> Self {
        Self {
            price_tag,
            description: None,
            mime_type: None,
            max_timeout_seconds: 300,
            discoverable: true,
            paywall_html: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_max_timeout_seconds(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds;
        self
    }

    pub fn with_paywall_html(mut self, html: impl Into<String>) -> Self {
        self.paywall_html = Some(html.into());
        self
    }
}

/// Uncompiled route table, keyed by `"[VERB ]path"`, e.g. `"GET /weather"` or
/// just `"/weather"` to match any method.
#[derive(Debug, Clone, Default)]
pub struct RouteMap(HashMap<String, RouteConfig>);

impl RouteMap {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, config: RouteConfig) -> &mut Self {
        self.0.insert(key.into(), config);
        self
    }

    pub fn route(mut self, key: impl Into<String>, config: RouteConfig) -> Self {
        self.insert(key, config);
        self
    }

    fn compile(&self) -> CompiledRouteMap {
        let mut routes = self
            .0
            .iter()
            .filter_map(|(key, config)| CompiledRoute::compile(key, config.clone()))
            .collect::<Vec<_>>();
        // Longest regex source wins on ambiguity.
        routes.sort_by(|a, b| b.regex.as_str().len().cmp(&a.regex.as_str().len()));
        CompiledRouteMap { routes }
    }
}

struct CompiledRoute {
    verb: Option<String>,
    regex: Regex,
    config: RouteConfig,
}

impl CompiledRoute {
    fn compile(key: &str, config: RouteConfig) -> Option<Self> {
        let (verb, pattern) = split_verb(key);
        let normalized = normalize_path(pattern);
        let regex = pattern_to_regex(&normalized).ok()?;
        Some(Self { verb, regex, config })
    }

    fn matches(&self, method: &str, path: &str) -> bool {
        let verb_matches = self.verb.as_deref().is_none_or(|v| v.eq_ignore_ascii_case(method));
        verb_matches && self.regex.is_match(path)
    }
}

/// Compiled form of a [`RouteMap`], ready to be matched against incoming requests.
pub struct CompiledRouteMap {
    routes: Vec<CompiledRoute>,
}

impl CompiledRouteMap {
    /// Finds the best match for `method`/`path`, applying the route's own
    /// normalization rules to `path` first.
    fn find(&self, method: &str, path: &str) -> Option<&RouteConfig> {
        let normalized = normalize_path(path);
        self.routes
            .iter()
            .find(|route| route.matches(method, &normalized))
            .map(|route| &route.config)
    }
}

/// Splits a route key into an optional verb and the path pattern.
/// `"GET /weather"` -> `(Some("GET"), "/weather")`; `"/weather"` -> `(None, "/weather")`.
fn split_verb(key: &str) -> (Option<String>, &str) {
    match key.split_once(' ') {
        Some((verb, path)) if !verb.is_empty() => (Some(verb.to_string()), path),
        _ => (None, key),
    }
}

/// URL-decodes, normalizes separators, collapses slashes, and strips
/// query/hash and trailing slashes from a path, per the route-matching rules.
pub(crate) fn normalize_path(path: &str) -> String {
    let without_query = path.split(['?', '#']).next().unwrap_or("");
    let decoded = percent_encoding::percent_decode_str(without_query)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| without_query.to_string());
    let slashes_only = decoded.replace('\\', "/");
    let mut collapsed = String::with_capacity(slashes_only.len());
    let mut last_was_slash = false;
    for c in slashes_only.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(c);
    }
    if collapsed.len() > 1 {
        while collapsed.ends_with('/') {
            collapsed.pop();
        }
    }
    if collapsed.is_empty() {
        collapsed.push('/');
    }
    collapsed
}

/// Compiles a route pattern (`[name]` for one segment, `*` for a non-greedy
/// wildcard) into a case-insensitive, fully anchored [`Regex`].
fn pattern_to_regex(normalized_pattern: &str) -> Result<Regex, regex::Error> {
    let mut source = String::from("(?i)^");
    for (i, segment) in normalized_pattern.split('/').enumerate() {
        if i > 0 {
            source.push('/');
        }
        if segment.starts_with('[') && segment.ends_with(']') && segment.len() > 1 {
            source.push_str("[^/]+");
        } else if segment == "*" {
            source.push_str(".*?");
        } else {
            source.push_str(&regex::escape(segment));
        }
    }
    source.push('$');
    Regex::new(&source)
}

/// A [`Layer`] that protects every route of the wrapped service according to
/// a compiled [`RouteMap`], unlike [`crate::layer::X402Middleware`] which
/// protects a single route it's attached to.
#[derive(Clone)]
pub struct RouteGate<F> {
    facilitator: Arc<F>,
    routes: Arc<CompiledRouteMap>,
    base_url: Url,
    supported_cache: Arc<RwLock<Option<CachedSupported>>>,
    supported_cache_ttl: Duration,
}

impl<F> RouteGate<F> {
    pub fn new(facilitator: F, routes: RouteMap) -> Self {
        Self {
            facilitator: Arc::new(facilitator),
            routes: Arc::new(routes.compile()),
            base_url: Url::parse("http://localhost/").expect("static URL always parses"),
            supported_cache: Arc::new(RwLock::new(None)),
            supported_cache_ttl: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_supported_cache_ttl(mut self, seconds: u64) -> Self {
        self.supported_cache_ttl = Duration::from_secs(seconds);
        self
    }
}

impl<S, F> Layer<S> for RouteGate<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone,
{
    type Service = RouteGateService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        RouteGateService {
            facilitator: self.facilitator.clone(),
            routes: self.routes.clone(),
            base_url: self.base_url.clone(),
            supported_cache: self.supported_cache.clone(),
            supported_cache_ttl: self.supported_cache_ttl,
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

#[derive(Clone)]
pub struct RouteGateService<F> {
    facilitator: Arc<F>,
    routes: Arc<CompiledRouteMap>,
    base_url: Url,
    supported_cache: Arc<RwLock<Option<CachedSupported>>>,
    supported_cache_ttl: Duration,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<F> Service<Request> for RouteGateService<F>
where
    F: Facilitator + Clone + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let matched = self.routes.find(method.as_str(), &path).cloned();
        let Some(config) = matched else {
            let mut inner = self.inner.clone();
            return Box::pin(async move { inner.call(req).await });
        };

        let resource = {
            let mut resource_url = self.base_url.clone();
            resource_url.set_path(req.uri().path());
            resource_url.set_query(req.uri().query());
            resource_url
        };
        let description = config.description.clone().unwrap_or_default();
        let mime_type = config.mime_type.clone().unwrap_or_else(|| "application/json".to_string());
        let payment_requirements = build_payment_requirements_no_resource(
            &config.price_tag,
            &description,
            &mime_type,
            config.max_timeout_seconds,
        )
        .map(|partial| vec![partial.to_payment_requirements(resource)])
        .unwrap_or_default();

        let gate = X402Paygate {
            facilitator: self.facilitator.clone(),
            payment_requirements: Arc::new(payment_requirements),
            supported_cache: self.supported_cache.clone(),
            supported_cache_ttl: self.supported_cache_ttl,
            paywall_html: config.paywall_html.map(Arc::from),
        };
        let inner = self.inner.clone();
        Box::pin(gate.call(inner, req))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_percent_and_backslash_and_duplicate_slashes() {
        let expected = normalize_path("/api/test");
        assert_eq!(normalize_path("/api//test"), expected);
        assert_eq!(normalize_path("/API/test/").to_lowercase(), expected.to_lowercase());
        assert_eq!(normalize_path("/api/%74est"), expected);
        assert_eq!(normalize_path("/api\\test"), expected);
    }

    #[test]
    fn compiled_route_map_matches_normalized_paths() {
        let mut routes = RouteMap::new();
        routes.insert(
            "GET /api/test",
            RouteConfig::new(PriceTag::usd("solana-devnet", "0.01", "PAYTO1111111111111111111111111111111111111")),
        );
        let compiled = routes.compile();
        for path in ["/api/test", "/api//test", "/API/test/", "/api/%74est", "/api\\test"] {
            assert!(compiled.find("GET", path).is_some(), "expected match for {path}");
        }
        assert!(compiled.find("POST", "/api/test").is_none());
    }

    #[test]
    fn param_and_wildcard_patterns_compile() {
        let mut routes = RouteMap::new();
        routes.insert(
            "/users/[id]/*",
            RouteConfig::new(PriceTag::usd("solana-devnet", "0.01", "PAYTO1111111111111111111111111111111111111")),
        );
        let compiled = routes.compile();
        assert!(compiled.find("GET", "/users/42/anything/here").is_some());
        assert!(compiled.find("GET", "/users").is_none());
    }

    #[test]
    fn longest_pattern_wins_on_ambiguity() {
        let mut routes = RouteMap::new();
        routes.insert(
            "/*",
            RouteConfig::new(PriceTag::usd("solana-devnet", "0.01", "PAYTO1111111111111111111111111111111111111"))
                .with_description("catch-all"),
        );
        routes.insert(
            "/api/specific",
            RouteConfig::new(PriceTag::usd("solana-devnet", "0.02", "PAYTO1111111111111111111111111111111111111"))
                .with_description("specific"),
        );
        let compiled = routes.compile();
        let matched = compiled.find("GET", "/api/specific").unwrap();
        assert_eq!(matched.description.as_deref(), Some("specific"));
    }
}

//! Axum middleware for enforcing [x402](https://www.x402.org) payments on protected routes.
//!
//! This middleware validates incoming `X-Payment` headers using a configured x402 facilitator,
//! and settles valid payments before allowing the request to proceed (but after your business logic!).
//!
//! Returns a `402 Payment Required` JSON response if the request lacks a valid payment.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::get, Json};
//! use axum::response::IntoResponse;
//! use http::StatusCode;
//! use serde_json::json;
//! use x402_axum::layer::X402Middleware;
//! use x402_axum::price::PriceTag;
//!
//! let x402 = X402Middleware::try_from("https://facilitator.example/").unwrap();
//! let usdc = PriceTag::usd("solana-devnet", "0.025", "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");
//!
//! let app: Router = Router::new().route(
//!     "/protected",
//!     get(my_handler).layer(
//!         x402.with_description("Access to /protected")
//!             .with_price_tag(usdc)
//!     ),
//! );
//!
//! async fn my_handler() -> impl IntoResponse {
//!     (StatusCode::OK, Json(json!({ "hello": "world" })))
//! }
//! ```
//!
//! ## Configuration Notes
//!
//! - **[`X402Middleware::with_price_tag`]** sets the assets and amounts accepted for payment.
//! - **[`X402Middleware::with_description`]** and **[`X402Middleware::with_mime_type`]** are optional but help the payer understand what is being paid for.
//! - **[`X402Middleware::with_resource`]** explicitly sets the full URI of the protected resource.
//!   This avoids recomputing [`PaymentRequirements`] on every request and should be preferred when possible.
//! - If `with_resource` is **not** used, the middleware will compute the resource URI dynamically from the request
//!   and a base URL set via **[`X402Middleware::with_base_url`]**.
//! - If no base URL is provided, the default is `http://localhost/` (⚠️ avoid this in production).
//!
//! ## Best Practices (Production)
//!
//! - Use [`X402Middleware::with_resource`] when the full resource URL is known.
//! - Set [`X402Middleware::with_base_url`] to support dynamic resource resolution.
//! - ⚠️ Avoid relying on fallback `resource` value in production.

use axum_core::body::Body;
use axum_core::{
    extract::Request,
    response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderValue, StatusCode, Uri};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{
    convert::Infallible,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::RwLock;
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service};
use url::Url;
use x402_types::EXACT_SCHEME;
use x402_types::proto::{
    ErrorKind, PaymentPayload, PaymentRequired, PaymentRequirements, PaymentRequirementsExtra, SettleRequest,
    SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse,
};
use x402_types::util::Base64Bytes;

#[cfg(feature = "telemetry")]
use tracing::{Instrument, Level, instrument};

use crate::facilitator::Facilitator;
use crate::facilitator_client::{FacilitatorClient, FacilitatorClientError};
use crate::price::PriceTag;

/// Middleware layer that enforces x402 payment verification and settlement.
///
/// Wraps an Axum service, intercepts incoming HTTP requests, verifies the payment
/// using the configured facilitator, and performs settlement after a successful response.
/// Adds a `X-Payment-Response` header to the final HTTP response.
#[derive(Clone, Debug)]
pub struct X402Middleware<F> {
    /// The facilitator used to verify and settle payments.
    facilitator: Arc<F>,
    /// Optional description string passed along with payment requirements. Empty string by default.
    description: Option<String>,
    /// Optional MIME type of the protected resource. `application/json` by default.
    mime_type: Option<String>,
    /// Optional resource URL. If not set, it will be derived from a request URI.
    resource: Option<Url>,
    /// Optional base URL for computing full resource URLs if `resource` is not set, see [`X402Middleware::resource`].
    base_url: Option<Url>,
    /// List of price tags accepted for this endpoint.
    price_tag: Vec<PriceTag>,
    /// Timeout in seconds for payment settlement.
    max_timeout_seconds: u64,
    /// Cached set of payment offers for this middleware instance.
    ///
    /// This field holds either:
    /// - a fully constructed list of [`PaymentRequirements`] (if [`X402Middleware::with_resource`] was used),
    /// - or a partial list without `resource`, in which case the resource URL will be computed dynamically per request.
    ///   In this case, please add `base_url` via [`X402Middleware::with_base_url`].
    payment_offers: Arc<PaymentOffers>,
    /// Shared across clones of this middleware so the cache survives builder chaining.
    supported_cache: Arc<RwLock<Option<CachedSupported>>>,
    /// How long a cached `/supported` response stays fresh before it's refetched.
    supported_cache_ttl: Duration,
}

/// A `/supported` response along with when it was fetched, for TTL expiry.
#[derive(Clone, Debug)]
pub(crate) struct CachedSupported {
    fetched_at: Instant,
    response: SupportedResponse,
}

impl TryFrom<&str> for X402Middleware<FacilitatorClient> {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let facilitator = FacilitatorClient::try_from(value)?;
        Ok(X402Middleware::new(facilitator))
    }
}

impl TryFrom<String> for X402Middleware<FacilitatorClient> {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        X402Middleware::try_from(value.as_str())
    }
}

impl<F> X402Middleware<F>
where
    F: Clone,
{
    pub fn new(facilitator: F) -> Self {
        Self {
            facilitator: Arc::new(facilitator),
            description: None,
            mime_type: None,
            resource: None,
            base_url: None,
            max_timeout_seconds: 300,
            price_tag: Vec::new(),
            payment_offers: Arc::new(PaymentOffers::Ready(Arc::new(Vec::new()))),
            supported_cache: Arc::new(RwLock::new(None)),
            supported_cache_ttl: Duration::from_secs(60),
        }
    }

    pub fn base_url(&self) -> Url {
        self.base_url.clone().unwrap_or(Url::parse("http://localhost/").unwrap())
    }

    /// Sets the description field on all generated payment requirements.
    pub fn with_description(&self, description: &str) -> Self {
        let mut this = self.clone();
        this.description = Some(description.to_string());
        this.recompute_offers()
    }

    /// Sets the MIME type of the protected resource.
    /// This is exposed as a part of [`PaymentRequirements`] passed to the client.
    pub fn with_mime_type(&self, mime: &str) -> Self {
        let mut this = self.clone();
        this.mime_type = Some(mime.to_string());
        this.recompute_offers()
    }

    /// Sets the resource URL directly, avoiding fragile auto-detection from the request.
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn with_resource(&self, resource: Url) -> Self {
        let mut this = self.clone();
        this.resource = Some(resource);
        this.recompute_offers()
    }

    /// Sets the base URL used to construct resource URLs dynamically.
    ///
    /// Note: If [`X402Middleware::with_resource`] is not called, this base URL is combined with
    /// each request's path/query to compute the resource. If not set, defaults to `http://localhost/`.
    ///
    /// ⚠️ In production, prefer calling `with_resource` or setting a precise `base_url` to avoid accidental localhost fallback.
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn with_base_url(&self, base_url: Url) -> Self {
        let mut this = self.clone();
        this.base_url = Some(base_url);
        this.recompute_offers()
    }

    /// Sets the maximum allowed payment timeout, in seconds.
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn with_max_timeout_seconds(&self, seconds: u64) -> Self {
        let mut this = self.clone();
        this.max_timeout_seconds = seconds;
        this.recompute_offers()
    }

    /// Sets the TTL for the cached `/supported` response. Default 60 seconds.
    ///
    /// Keep this well under the facilitator's fee-payer key rotation interval,
    /// since a stale cache entry can hand out a retired fee payer address.
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn with_supported_cache_ttl(&self, seconds: u64) -> Self {
        let mut this = self.clone();
        this.supported_cache_ttl = Duration::from_secs(seconds);
        this
    }

    /// Replaces all price tags with the provided value(s).
    pub fn with_price_tag<T: crate::price::IntoPriceTag>(&self, price_tag: T) -> Self {
        let mut this = self.clone();
        this.price_tag = price_tag.into_price_tags();
        this.recompute_offers()
    }

    /// Adds new price tags to the existing list, avoiding duplicates.
    #[allow(dead_code)] // Public for consumption by downstream crates.
    pub fn or_price_tag<T: crate::price::IntoPriceTag>(&self, price_tag: T) -> Self {
        let mut this = self.clone();
        let mut seen: HashSet<PriceTag> = this.price_tag.iter().cloned().collect();
        for tag in price_tag.into_price_tags() {
            if seen.insert(tag.clone()) {
                this.price_tag.push(tag);
            }
        }
        this.recompute_offers()
    }

    fn recompute_offers(mut self) -> Self {
        let base_url = self.base_url();
        let description = self.description.clone().unwrap_or_default();
        let mime_type = self.mime_type.clone().unwrap_or("application/json".to_string());
        let max_timeout_seconds = self.max_timeout_seconds;
        let partial = self
            .price_tag
            .iter()
            .filter_map(|price_tag| build_payment_requirements_no_resource(price_tag, &description, &mime_type, max_timeout_seconds))
            .collect::<Vec<_>>();
        let payment_offers = if let Some(resource) = self.resource.clone() {
            let payment_requirements = partial
                .iter()
                .map(|partial| partial.to_payment_requirements(resource.clone()))
                .collect::<Vec<_>>();
            PaymentOffers::Ready(Arc::new(payment_requirements))
        } else {
            PaymentOffers::NoResource { partial, base_url }
        };
        self.payment_offers = Arc::new(payment_offers);
        self
    }
}

impl X402Middleware<FacilitatorClient> {
    pub fn facilitator_url(&self) -> &Url {
        self.facilitator.base_url()
    }
}

/// Wraps a cloned inner Axum service and augments it with payment enforcement logic.
#[derive(Clone, Debug)]
pub struct X402MiddlewareService<F> {
    /// Payment facilitator (local or remote)
    facilitator: Arc<F>,
    /// Payment requirements either with static or dynamic resource URLs
    payment_offers: Arc<PaymentOffers>,
    /// Shared cache of the facilitator's `/supported` response.
    supported_cache: Arc<RwLock<Option<CachedSupported>>>,
    /// TTL for entries in `supported_cache`.
    supported_cache_ttl: Duration,
    /// The inner Axum service being wrapped
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl<S, F> Layer<S> for X402Middleware<F>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
    F: Facilitator + Clone,
{
    type Service = X402MiddlewareService<F>;

    fn layer(&self, inner: S) -> Self::Service {
        if self.base_url.is_none() && self.resource.is_none() {
            #[cfg(feature = "telemetry")]
            tracing::warn!(
                "X402Middleware base_url is not configured; defaulting to http://localhost/ for resource resolution"
            );
        }
        X402MiddlewareService {
            facilitator: self.facilitator.clone(),
            payment_offers: self.payment_offers.clone(),
            supported_cache: self.supported_cache.clone(),
            supported_cache_ttl: self.supported_cache_ttl,
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

impl<F> Service<Request> for X402MiddlewareService<F>
where
    F: Facilitator + Clone + Send + Sync + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    /// Delegates readiness polling to the wrapped inner service.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    /// Intercepts the request, injects payment enforcement logic, and forwards to the wrapped service.
    fn call(&mut self, req: Request) -> Self::Future {
        let payment_requirements = gather_payment_requirements(self.payment_offers.as_ref(), req.uri());
        let gate = X402Paygate {
            facilitator: self.facilitator.clone(),
            payment_requirements,
            supported_cache: self.supported_cache.clone(),
            supported_cache_ttl: self.supported_cache_ttl,
            paywall_html: None,
        };
        let inner = self.inner.clone();
        Box::pin(gate.call(inner, req))
    }
}

#[derive(Debug)]
/// Wrapper for producing a `402 Payment Required` response with context.
///
/// `negotiable` marks the responses the middleware is allowed to render as an
/// opaque HTML paywall for browser requesters instead of JSON — only the
/// initial "no payment yet" challenge, per the content-negotiation rule.
pub struct X402Error(PaymentRequired, bool);

impl Display for X402Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "402 Payment Required: {}", self.0.error)
    }
}

static ERR_PAYMENT_HEADER_REQUIRED: Lazy<String> = Lazy::new(|| "X-PAYMENT header is required".to_string());
static ERR_INVALID_PAYMENT_HEADER: Lazy<String> = Lazy::new(|| "Invalid or malformed payment header".to_string());
static ERR_NO_PAYMENT_MATCHING: Lazy<String> =
    Lazy::new(|| "Unable to find matching payment requirements".to_string());
static ERR_FACILITATOR_MISCONFIGURED: Lazy<String> =
    Lazy::new(|| "Facilitator did not report a fee payer for this network".to_string());

/// Middleware application error with detailed context.
///
/// Encapsulates a `402 Payment Required` response that can be returned
/// when payment verification or settlement fails.
impl X402Error {
    pub fn payment_header_required(payment_requirements: Vec<PaymentRequirements>) -> Self {
        Self(
            PaymentRequired {
                error: ERR_PAYMENT_HEADER_REQUIRED.clone(),
                accepts: payment_requirements,
                x402_version: x402_types::X402_VERSION,
                payer: None,
            },
            true,
        )
    }

    pub fn invalid_payment_header(payment_requirements: Vec<PaymentRequirements>) -> Self {
        Self(
            PaymentRequired {
                error: ERR_INVALID_PAYMENT_HEADER.clone(),
                accepts: payment_requirements,
                x402_version: x402_types::X402_VERSION,
                payer: None,
            },
            false,
        )
    }

    pub fn no_payment_matching(payment_requirements: Vec<PaymentRequirements>) -> Self {
        Self(
            PaymentRequired {
                error: ERR_NO_PAYMENT_MATCHING.clone(),
                accepts: payment_requirements,
                x402_version: x402_types::X402_VERSION,
                payer: None,
            },
            false,
        )
    }

    pub fn facilitator_misconfigured(payment_requirements: Vec<PaymentRequirements>) -> Self {
        Self(
            PaymentRequired {
                error: ERR_FACILITATOR_MISCONFIGURED.clone(),
                accepts: payment_requirements,
                x402_version: x402_types::X402_VERSION,
                payer: None,
            },
            true,
        )
    }

    pub fn verification_failed<E2: Display>(error: E2, payment_requirements: Vec<PaymentRequirements>) -> Self {
        Self::verification_failed_with_payer(error, payment_requirements, None)
    }

    /// Same as [`X402Error::verification_failed`], but carries the payer the
    /// facilitator identified before rejecting the payload.
    pub fn verification_failed_with_payer<E2: Display>(
        error: E2,
        payment_requirements: Vec<PaymentRequirements>,
        payer: Option<String>,
    ) -> Self {
        Self(
            PaymentRequired {
                error: format!("Verification Failed: {error}"),
                accepts: payment_requirements,
                x402_version: x402_types::X402_VERSION,
                payer,
            },
            false,
        )
    }

    pub fn settlement_failed<E2: Display>(error: E2, payment_requirements: Vec<PaymentRequirements>) -> Self {
        Self::settlement_failed_with_payer(error, payment_requirements, None)
    }

    /// Same as [`X402Error::settlement_failed`], but carries the payer the
    /// facilitator identified before rejecting settlement.
    pub fn settlement_failed_with_payer<E2: Display>(
        error: E2,
        payment_requirements: Vec<PaymentRequirements>,
        payer: Option<String>,
    ) -> Self {
        Self(
            PaymentRequired {
                error: format!("Settlement Failed: {error}"),
                accepts: payment_requirements,
                x402_version: x402_types::X402_VERSION,
                payer,
            },
            false,
        )
    }

    /// Renders the 402 response, negotiating content type for requests this
    /// error is marked eligible for: a browser-like `Accept`/`User-Agent`
    /// gets an opaque HTML paywall instead of JSON.
    pub fn into_response_for(self, headers: &HeaderMap) -> Response {
        self.into_response_for_custom(headers, None)
    }

    /// Same as [`X402Error::into_response_for`], but serves `paywall_html`
    /// verbatim instead of the generated blob when one is configured for the
    /// matched route.
    pub fn into_response_for_custom(self, headers: &HeaderMap, paywall_html: Option<&str>) -> Response {
        if !(self.1 && is_browser_request(headers)) {
            return self.into_response();
        }
        match paywall_html {
            Some(html) => Response::builder()
                .status(StatusCode::PAYMENT_REQUIRED)
                .header("Content-Type", "text/html; charset=utf-8")
                .body(Body::from(html.to_string()))
                .expect("Fail to construct response"),
            None => self.into_html_response(),
        }
    }

    /// Renders this error as an opaque HTML paywall instead of JSON, for
    /// browser-like requesters. The requirements are embedded verbatim as a
    /// JSON blob; no wallet-connect UI is generated.
    fn into_html_response(self) -> Response {
        let json = serde_json::to_string(&self.0).expect("serialization failed");
        let html = format!(
            "<!doctype html><html><head><meta charset=\"utf-8\"><title>Payment Required</title></head>\
             <body><p>This resource requires payment. {}</p>\
             <script type=\"application/json\" id=\"x402-payment-required\">{json}</script>\
             </body></html>",
            html_escape(&self.0.error),
        );
        Response::builder()
            .status(StatusCode::PAYMENT_REQUIRED)
            .header("Content-Type", "text/html; charset=utf-8")
            .body(Body::from(html))
            .expect("Fail to construct response")
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// True if the request's `Accept` header names `text/html` and its
/// `User-Agent` looks like a browser rather than a wallet/API client.
fn is_browser_request(headers: &HeaderMap) -> bool {
    let accept = headers.get(http::header::ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("");
    let user_agent = headers.get(http::header::USER_AGENT).and_then(|v| v.to_str().ok()).unwrap_or("");
    accept.contains("text/html") && user_agent.contains("Mozilla")
}

impl IntoResponse for X402Error {
    fn into_response(self) -> Response {
        let payment_required_bytes = serde_json::to_vec(&self.0).expect("serialization failed");
        let body = Body::from(payment_required_bytes);
        Response::builder()
            .status(StatusCode::PAYMENT_REQUIRED)
            .header("Content-Type", "application/json")
            .body(body)
            .expect("Fail to construct response")
    }
}

/// A service-level helper struct responsible for verifying and settling
/// x402 payments based on request headers and known payment requirements.
pub struct X402Paygate<F> {
    pub facilitator: Arc<F>,
    pub payment_requirements: Arc<Vec<PaymentRequirements>>,
    pub supported_cache: Arc<RwLock<Option<CachedSupported>>>,
    pub supported_cache_ttl: Duration,
    /// Custom HTML to serve browser requesters instead of the generated
    /// paywall blob, set when a [`crate::route::RouteConfig`] supplies one.
    pub paywall_html: Option<Arc<str>>,
}

impl<F> X402Paygate<F>
where
    F: Facilitator + Clone + Send + Sync,
{
    /// Returns the facilitator's `/supported` response, serving a cached copy
    /// if it's younger than `supported_cache_ttl`.
    async fn cached_supported(&self) -> Result<SupportedResponse, F::Error> {
        if let Some(cached) = self.supported_cache.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.supported_cache_ttl {
                return Ok(cached.response.clone());
            }
        }
        let response = self.facilitator.supported().await?;
        *self.supported_cache.write().await = Some(CachedSupported {
            fetched_at: Instant::now(),
            response: response.clone(),
        });
        Ok(response)
    }

    /// Parses the `X-Payment` header and returns a decoded [`PaymentPayload`], or constructs a 402 error if missing or malformed as [`X402Error`].
    pub async fn extract_payment_payload(&self, headers: &HeaderMap) -> Result<PaymentPayload, X402Error> {
        let payment_header = headers.get("X-Payment");
        let supported = self.cached_supported().await.map_err(|e| {
            X402Error(
                PaymentRequired {
                    x402_version: x402_types::X402_VERSION,
                    error: format!("Unable to retrieve supported payment schemes: {e}"),
                    accepts: vec![],
                    payer: None,
                },
                false,
            )
        })?;
        match payment_header {
            None => {
                let requirements = self
                    .payment_requirements
                    .as_ref()
                    .iter()
                    .map(|r| {
                        let mut r = r.clone();
                        let fee_payer = supported
                            .kinds
                            .iter()
                            .find(|k| k.network == r.network && k.scheme == EXACT_SCHEME)
                            .and_then(|k| k.extra.as_ref())
                            .and_then(|extra| extra.get("feePayer"))
                            .and_then(|v| v.as_str())
                            .map(|s| s.to_string());
                        if let Some(fee_payer) = fee_payer {
                            r.extra.fee_payer = fee_payer;
                        }
                        r
                    })
                    .collect::<Vec<_>>();
                if requirements.iter().any(|r| r.extra.fee_payer.is_empty()) {
                    return Err(X402Error::facilitator_misconfigured(requirements));
                }
                Err(X402Error::payment_header_required(requirements))
            }
            Some(payment_header) => match decode_payment_payload(payment_header.as_bytes()) {
                Ok(payment_payload) => Ok(payment_payload),
                Err(_) => Err(X402Error::invalid_payment_header(self.payment_requirements.as_ref().clone())),
            },
        }
    }

    /// Finds the payment requirement entry matching the given payload's scheme and network.
    fn find_matching_payment_requirements(&self, payment_payload: &PaymentPayload) -> Option<PaymentRequirements> {
        self.payment_requirements
            .iter()
            .find(|requirement| {
                requirement.scheme == payment_payload.scheme && requirement.network == payment_payload.network
            })
            .cloned()
    }

    /// Verifies the provided payment using the facilitator and known requirements. Returns a [`VerifyRequest`] if the payment is valid.
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.verify_payment", skip_all, err))]
    pub async fn verify_payment(&self, payment_payload: PaymentPayload) -> Result<VerifyRequest, X402Error> {
        let selected = self
            .find_matching_payment_requirements(&payment_payload)
            .ok_or(X402Error::no_payment_matching(self.payment_requirements.as_ref().clone()))?;
        let verify_request = VerifyRequest {
            x402_version: payment_payload.x402_version,
            payment_payload,
            payment_requirements: selected,
        };
        let verify_response: VerifyResponse = self
            .facilitator
            .verify(&verify_request)
            .await
            .map_err(|e| X402Error::verification_failed(e, self.payment_requirements.as_ref().clone()))?;
        if verify_response.is_valid {
            Ok(verify_request)
        } else {
            let reason = verify_response.invalid_reason.unwrap_or(ErrorKind::UnexpectedVerifyError);
            Err(X402Error::verification_failed_with_payer(
                reason,
                self.payment_requirements.as_ref().clone(),
                verify_response.payer,
            ))
        }
    }

    /// Attempts to settle a verified payment on-chain. Returns [`SettleResponse`] on success or emits a 402 error.
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.settle_payment", skip_all, err))]
    pub async fn settle_payment(&self, settle_request: &SettleRequest) -> Result<SettleResponse, X402Error> {
        let settlement = self
            .facilitator
            .settle(settle_request)
            .await
            .map_err(|e| X402Error::settlement_failed(e, self.payment_requirements.as_ref().clone()))?;
        if settlement.success {
            Ok(settlement)
        } else {
            let error_reason = settlement.error_reason.unwrap_or(ErrorKind::UnexpectedSettleError);
            Err(X402Error::settlement_failed_with_payer(
                error_reason,
                self.payment_requirements.as_ref().clone(),
                settlement.payer,
            ))
        }
    }

    /// Processes an incoming request through the middleware:
    /// determines payment requirements, verifies the payment,
    /// and invokes the inner Axum handler if the payment is valid.
    /// Adds a `X-Payment-Response` header to the response on success.
    pub async fn call<ReqBody, ResBody, S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>>(
        self,
        inner: S,
        req: http::Request<ReqBody>,
    ) -> Result<Response, Infallible>
    where
        S::Response: IntoResponse,
        S::Error: IntoResponse,
    {
        Ok(self.handle_request(inner, req).await)
    }

    /// Orchestrates the full payment lifecycle: verifies the request, calls to the inner handler, and settles the payment, returns proper HTTP response.
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.handle_request", skip_all))]
    pub async fn handle_request<ReqBody, ResBody, S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>>>(
        self,
        mut inner: S,
        req: http::Request<ReqBody>,
    ) -> Response
    where
        S::Response: IntoResponse,
        S::Error: IntoResponse,
    {
        let payment_payload = match self.extract_payment_payload(req.headers()).await {
            Ok(payment_payload) => payment_payload,
            Err(err) => {
                #[cfg(feature = "telemetry")]
                tracing::event!(Level::INFO, status = "failed", "No valid payment provided");
                return err.into_response_for_custom(req.headers(), self.paywall_html.as_deref());
            }
        };
        let verify_request = match self.verify_payment(payment_payload).await {
            Ok(verify_request) => verify_request,
            Err(err) => return err.into_response(),
        };
        let inner_fut = {
            #[cfg(feature = "telemetry")]
            {
                inner.call(req).instrument(tracing::info_span!("inner"))
            }
            #[cfg(not(feature = "telemetry"))]
            {
                inner.call(req)
            }
        };
        let response = match inner_fut.await {
            Ok(response) => response,
            Err(err) => return err.into_response(),
        };
        // Skip settlement on downstream error: the handler rejected the
        // request for reasons unrelated to payment, so don't spend the payer's money.
        if response.status().is_client_error() || response.status().is_server_error() {
            return response.into_response();
        }
        let settlement = match self.settle_payment(&verify_request).await {
            Ok(settlement) => settlement,
            Err(err) => return err.into_response(),
        };
        let payment_header = match encode_settle_response(&settlement) {
            Ok(payment_header) => payment_header,
            Err(err) => {
                return X402Error::settlement_failed(err, self.payment_requirements.as_ref().clone()).into_response();
            }
        };
        let header_value = match HeaderValue::from_bytes(payment_header.as_ref()) {
            Ok(header_value) => header_value,
            Err(err) => {
                return X402Error::settlement_failed(err, self.payment_requirements.as_ref().clone()).into_response();
            }
        };
        let mut res = response;
        res.headers_mut().insert("X-Payment-Response", header_value);
        res.into_response()
    }
}

/// Builds a resource-less [`PaymentRequirements`] from a [`PriceTag`], or
/// `None` if the price can't be resolved (e.g. an unknown network for a USD tag).
///
/// `extra.fee_payer` is left blank: the real fee payer address is filled in
/// per-request from the facilitator's `/supported` response.
pub(crate) fn build_payment_requirements_no_resource(
    price_tag: &PriceTag,
    description: &str,
    mime_type: &str,
    max_timeout_seconds: u64,
) -> Option<PaymentRequirementsNoResource> {
    let (max_amount_required, asset) = price_tag.resolve().ok()?;
    Some(PaymentRequirementsNoResource {
        scheme: EXACT_SCHEME.to_string(),
        network: price_tag.network.clone(),
        max_amount_required,
        description: description.to_string(),
        mime_type: mime_type.to_string(),
        pay_to: price_tag.pay_to.clone(),
        max_timeout_seconds,
        asset: asset.address,
        extra: PaymentRequirementsExtra { fee_payer: String::new() },
        output_schema: None,
    })
}

/// Decodes an `X-Payment` header value: base64(JSON([`PaymentPayload`])).
fn decode_payment_payload(header_bytes: &[u8]) -> Result<PaymentPayload, serde_json::Error> {
    let decoded = Base64Bytes::from(header_bytes)
        .decode()
        .map_err(|e| serde::de::Error::custom(e.to_string()))?;
    let payload: PaymentPayload = serde_json::from_slice(&decoded)?;
    if !x402_types::util::validate::is_base64_field(&payload.payload.transaction) {
        return Err(serde::de::Error::custom("transaction is not valid base64"));
    }
    Ok(payload)
}

/// Encodes a [`SettleResponse`] as an `X-Payment-Response` header value: base64(JSON(...)).
fn encode_settle_response(settlement: &SettleResponse) -> Result<Base64Bytes<'static>, serde_json::Error> {
    let bytes = serde_json::to_vec(settlement)?;
    Ok(Base64Bytes::encode(bytes))
}

/// A variant of [`PaymentRequirements`] without the `resource` field.
/// This allows resources to be dynamically inferred per request.
#[derive(Clone, Debug, PartialEq)]
pub struct PaymentRequirementsNoResource {
    pub scheme: String,
    pub network: String,
    pub max_amount_required: String,
    // no resource: Url,
    pub description: String,
    pub mime_type: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    pub extra: PaymentRequirementsExtra,
    pub output_schema: Option<serde_json::Value>,
}

impl PaymentRequirementsNoResource {
    /// Converts this partial requirement into a full [`PaymentRequirements`]
    /// using the provided resource URL.
    pub fn to_payment_requirements(&self, resource: Url) -> PaymentRequirements {
        PaymentRequirements {
            scheme: self.scheme.clone(),
            network: self.network.clone(),
            max_amount_required: self.max_amount_required.clone(),
            resource: resource.to_string(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
            pay_to: self.pay_to.clone(),
            max_timeout_seconds: self.max_timeout_seconds,
            asset: self.asset.clone(),
            extra: self.extra.clone(),
            output_schema: self.output_schema.clone(),
        }
    }
}

/// Enum capturing either fully constructed [`PaymentRequirements`] (with `resource`)
/// or resource-less variants that must be completed at runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum PaymentOffers {
    /// [`PaymentRequirements`] with static `resource` field.
    Ready(Arc<Vec<PaymentRequirements>>),
    /// [`PaymentRequirements`] lacking `resource`, to be added per request.
    NoResource {
        partial: Vec<PaymentRequirementsNoResource>,
        base_url: Url,
    },
}

/// Constructs a full list of [`PaymentRequirements`] for a request.
///
/// - If `payment_offers` is [`PaymentOffers::Ready`], it returns an Arc clone of the precomputed requirements.
/// - If `payment_offers` is [`PaymentOffers::NoResource`], it dynamically constructs the `resource` URI
///   by combining the `base_url` with the request's path and query, and completes each
///   partial `PaymentRequirementsNoResource` into a full `PaymentRequirements`.
fn gather_payment_requirements(payment_offers: &PaymentOffers, req_uri: &Uri) -> Arc<Vec<PaymentRequirements>> {
    match payment_offers {
        PaymentOffers::Ready(requirements) => Arc::clone(requirements),
        PaymentOffers::NoResource { partial, base_url } => {
            let resource = {
                let mut resource_url = base_url.clone();
                resource_url.set_path(req_uri.path());
                resource_url.set_query(req_uri.query());
                resource_url
            };
            let payment_requirements = partial
                .iter()
                .map(|partial| partial.to_payment_requirements(resource.clone()))
                .collect::<Vec<_>>();
            Arc::new(payment_requirements)
        }
    }
}

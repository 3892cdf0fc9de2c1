//! Client-side x402 payment handling for reqwest.
//!
//! This module provides [`X402Client`], a [`reqwest_middleware::Middleware`]
//! that retries a `402 Payment Required` response once: it parses the
//! response body, picks a requirement to pay, builds and signs the payment
//! transaction, and retries with an `X-Payment` header attached.

use http::{Extensions, HeaderValue, StatusCode};
use reqwest::{Request, Response};
use reqwest_middleware as rqm;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
#[cfg(feature = "telemetry")]
use solana_signer::Signer as _;
use std::str::FromStr;
use std::sync::Arc;
use x402_chain_solana::chain::Address;
use x402_chain_solana::exact::{BuildError, build_signed_transfer_transaction};
use x402_types::proto::{EXACT_SCHEME, ExactSolanaPayload, PaymentPayload, PaymentRequired, PaymentRequirements, X402_VERSION};
use x402_types::util::Base64Bytes;

#[cfg(feature = "telemetry")]
use tracing::{debug, info, instrument, trace};

/// The default cap on what [`X402Client`] will pay without being told
/// otherwise: 0.1 USDC (100_000 atomic units at 6 decimals).
pub const DEFAULT_MAX_ATOMIC_AMOUNT: u64 = 100_000;

/// Picks one [`PaymentRequirements`] to pay out of a server's `accepts` list.
pub trait PaymentRequirementsSelector {
    fn select(&self, accepts: &[PaymentRequirements]) -> Option<PaymentRequirements>;
}

/// Default selector: prefers the requirement whose asset is the network's
/// canonical USDC mint, falling back to the first accepted requirement.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreferUsdc;

impl PaymentRequirementsSelector for PreferUsdc {
    fn select(&self, accepts: &[PaymentRequirements]) -> Option<PaymentRequirements> {
        let usdc = accepts.iter().find(|req| {
            x402_types::networks::usdc_for_network(&req.network)
                .is_some_and(|usdc| usdc.address == req.asset)
        });
        usdc.or_else(|| accepts.first()).cloned()
    }
}

/// Errors that can occur while building and attaching an x402 payment.
#[derive(Debug, thiserror::Error)]
pub enum X402ClientError {
    #[error("failed to parse 402 response body: {0}")]
    ParseError(#[source] reqwest::Error),
    #[error("no accepted payment requirement matched")]
    NoMatchingPaymentOption,
    #[error("payment amount {requested} exceeds maximum allowed {allowed}")]
    AmountExceedsMaximum { requested: u64, allowed: u64 },
    #[error("maxAmountRequired {0:?} is not a valid decimal integer")]
    InvalidAmount(String),
    #[error("asset {0:?} is not a valid Solana address")]
    InvalidAsset(String),
    #[error("payTo {0:?} is not a valid Solana address")]
    InvalidPayTo(String),
    #[error("extra.feePayer {0:?} is not a valid Solana address")]
    InvalidFeePayer(String),
    #[error("failed to build payment transaction: {0}")]
    Build(#[from] BuildError),
    #[error("failed to encode payment payload to json: {0}")]
    JsonEncodeError(#[source] serde_json::Error),
    #[error("failed to encode payment header: {0}")]
    HeaderValueEncodeError(#[source] http::header::InvalidHeaderValue),
    #[error("request object is not cloneable; is the body a stream?")]
    RequestNotCloneable,
}

impl From<X402ClientError> for rqm::Error {
    fn from(error: X402ClientError) -> Self {
        rqm::Error::Middleware(error.into())
    }
}

/// Reqwest middleware that pays for `402` responses with signed Solana
/// transactions.
#[derive(Clone)]
pub struct X402Client<TSelector = PreferUsdc> {
    signer: Arc<Keypair>,
    rpc_client: Arc<RpcClient>,
    max_atomic_amount: u64,
    selector: TSelector,
}

impl X402Client<PreferUsdc> {
    /// Creates a new client that signs payments with `signer`, fetching mint
    /// and blockhash data from `rpc_client`.
    ///
    /// Defaults to [`PreferUsdc`] selection and a [`DEFAULT_MAX_ATOMIC_AMOUNT`]
    /// spending cap.
    pub fn new(signer: Keypair, rpc_client: RpcClient) -> Self {
        Self {
            signer: Arc::new(signer),
            rpc_client: Arc::new(rpc_client),
            max_atomic_amount: DEFAULT_MAX_ATOMIC_AMOUNT,
            selector: PreferUsdc,
        }
    }
}

impl<TSelector> X402Client<TSelector> {
    /// Sets the maximum atomic amount this client will pay without erroring out.
    pub fn with_max_atomic_amount(mut self, max_atomic_amount: u64) -> Self {
        self.max_atomic_amount = max_atomic_amount;
        self
    }

    /// Replaces the requirement selector.
    pub fn with_selector<S: PaymentRequirementsSelector>(self, selector: S) -> X402Client<S> {
        X402Client {
            signer: self.signer,
            rpc_client: self.rpc_client,
            max_atomic_amount: self.max_atomic_amount,
            selector,
        }
    }
}

impl<TSelector> X402Client<TSelector>
where
    TSelector: PaymentRequirementsSelector,
{
    /// Builds the `X-Payment` header value for a `402` response.
    ///
    /// Selects a requirement, enforces the configured spending cap, builds
    /// and signs the payment transaction, and base64-encodes the resulting
    /// [`PaymentPayload`].
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.reqwest.make_payment_header", skip_all, err))]
    pub async fn make_payment_header(&self, res: Response) -> Result<HeaderValue, X402ClientError> {
        let payment_required = res.json::<PaymentRequired>().await.map_err(X402ClientError::ParseError)?;
        let selected = self
            .selector
            .select(&payment_required.accepts)
            .ok_or(X402ClientError::NoMatchingPaymentOption)?;

        #[cfg(feature = "telemetry")]
        debug!(network = %selected.network, asset = %selected.asset, "Selected payment requirement");

        let amount: u64 = selected
            .max_amount_required
            .parse()
            .map_err(|_| X402ClientError::InvalidAmount(selected.max_amount_required.clone()))?;
        if amount > self.max_atomic_amount {
            return Err(X402ClientError::AmountExceedsMaximum {
                requested: amount,
                allowed: self.max_atomic_amount,
            });
        }

        let asset = Pubkey::from_str(&selected.asset)
            .map(Address::new)
            .map_err(|_| X402ClientError::InvalidAsset(selected.asset.clone()))?;
        let pay_to = Pubkey::from_str(&selected.pay_to)
            .map(Address::new)
            .map_err(|_| X402ClientError::InvalidPayTo(selected.pay_to.clone()))?;
        let fee_payer = Pubkey::from_str(&selected.extra.fee_payer)
            .map_err(|_| X402ClientError::InvalidFeePayer(selected.extra.fee_payer.clone()))?;

        let transaction = build_signed_transfer_transaction(
            self.signer.as_ref(),
            self.rpc_client.as_ref(),
            &fee_payer,
            &pay_to,
            &asset,
            amount,
        )
        .await?;

        #[cfg(feature = "telemetry")]
        debug!(payer = %self.signer.pubkey(), "Signed payment transaction");

        let payment_payload = PaymentPayload {
            x402_version: X402_VERSION,
            scheme: EXACT_SCHEME.to_string(),
            network: selected.network,
            payload: ExactSolanaPayload { transaction },
        };
        let json = serde_json::to_vec(&payment_payload).map_err(X402ClientError::JsonEncodeError)?;
        let b64 = Base64Bytes::encode(json);
        HeaderValue::from_bytes(b64.as_ref()).map_err(X402ClientError::HeaderValueEncodeError)
    }
}

#[async_trait::async_trait]
impl<TSelector> rqm::Middleware for X402Client<TSelector>
where
    TSelector: PaymentRequirementsSelector + Send + Sync + 'static,
{
    #[cfg_attr(feature = "telemetry", instrument(name = "x402.reqwest.handle", skip_all, err))]
    async fn handle(&self, req: Request, extensions: &mut Extensions, next: rqm::Next<'_>) -> rqm::Result<Response> {
        let retry_req = req.try_clone();
        let res = next.clone().run(req, extensions).await?;

        if res.status() != StatusCode::PAYMENT_REQUIRED {
            #[cfg(feature = "telemetry")]
            trace!(status = ?res.status(), "No payment required, returning response");
            return Ok(res);
        }

        #[cfg(feature = "telemetry")]
        info!(url = ?res.url(), "Received 402 Payment Required, processing payment");

        let header = self.make_payment_header(res).await.map_err(Into::<rqm::Error>::into)?;

        let mut retry = retry_req.ok_or(rqm::Error::from(X402ClientError::RequestNotCloneable))?;
        let headers = retry.headers_mut();
        headers.insert("X-Payment", header);
        headers.insert("Access-Control-Expose-Headers", HeaderValue::from_static("X-Payment-Response"));

        #[cfg(feature = "telemetry")]
        trace!(url = ?retry.url(), "Retrying request with payment header");

        next.run(retry, extensions).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(network: &str, asset: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: EXACT_SCHEME.to_string(),
            network: network.to_string(),
            max_amount_required: "1000".to_string(),
            resource: "https://example.com/resource".to_string(),
            description: String::new(),
            mime_type: String::new(),
            pay_to: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
            max_timeout_seconds: 60,
            asset: asset.to_string(),
            extra: x402_types::proto::PaymentRequirementsExtra { fee_payer: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string() },
            output_schema: None,
        }
    }

    #[test]
    fn prefer_usdc_picks_the_compiled_in_usdc_mint() {
        let usdc = x402_types::networks::usdc_for_network("solana-devnet").unwrap();
        let other = requirement("solana-devnet", "So11111111111111111111111111111111111111112");
        let usdc_req = requirement("solana-devnet", usdc.address);
        let accepts = vec![other, usdc_req.clone()];
        let selected = PreferUsdc.select(&accepts).unwrap();
        assert_eq!(selected.asset, usdc_req.asset);
    }

    #[test]
    fn prefer_usdc_falls_back_to_first_when_no_usdc_present() {
        let only = requirement("solana-devnet", "So11111111111111111111111111111111111111112");
        let accepts = vec![only.clone()];
        let selected = PreferUsdc.select(&accepts).unwrap();
        assert_eq!(selected.asset, only.asset);
    }

    #[test]
    fn selecting_from_empty_accepts_yields_none() {
        assert!(PreferUsdc.select(&[]).is_none());
    }
}

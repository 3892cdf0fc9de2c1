//! HTTP endpoints implemented by the x402 facilitator.
//!
//! These are the server-side handlers for processing client-submitted x402
//! payments against the Solana chain. All payloads follow the wire types
//! defined in `x402-types` and are compatible with the official x402 client
//! SDKs.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router, response::IntoResponse};
use serde_json::json;
use tracing::instrument;
use x402_chain_solana::chain::provider::SolanaChainProviderLike;
use x402_facilitator_local::FacilitatorLocal;
use x402_types::chain::ChainProviderOps;
use x402_types::proto;

pub fn routes<P>() -> Router<Arc<FacilitatorLocal<P>>>
where
    P: SolanaChainProviderLike + ChainProviderOps + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify::<P>))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle::<P>))
        .route("/health", get(get_supported::<P>))
        .route("/supported", get(get_supported::<P>))
}

/// `GET /`: a simple greeting from the facilitator.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /verify`: describes the shape of a valid `/verify` request body.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify an x402 payment",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: describes the shape of a valid `/settle` request body.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle an x402 payment",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: the payment kinds and signer addresses this facilitator serves.
#[instrument(skip_all)]
pub async fn get_supported<P>(State(facilitator): State<Arc<FacilitatorLocal<P>>>) -> impl IntoResponse
where
    P: SolanaChainProviderLike + ChainProviderOps + Send + Sync + 'static,
{
    Json(facilitator.supported().await)
}

/// `POST /verify`: verifies a proposed payment without submitting it.
#[instrument(skip_all)]
pub async fn post_verify<P>(
    State(facilitator): State<Arc<FacilitatorLocal<P>>>,
    Json(body): Json<proto::VerifyRequest>,
) -> impl IntoResponse
where
    P: SolanaChainProviderLike + ChainProviderOps + Send + Sync + 'static,
{
    Json(facilitator.verify(&body).await)
}

/// `POST /settle`: submits a verified payment transaction to the chain.
#[instrument(skip_all)]
pub async fn post_settle<P>(
    State(facilitator): State<Arc<FacilitatorLocal<P>>>,
    Json(body): Json<proto::SettleRequest>,
) -> impl IntoResponse
where
    P: SolanaChainProviderLike + ChainProviderOps + Send + Sync + 'static,
{
    Json(facilitator.settle(&body).await)
}

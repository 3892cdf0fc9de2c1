//! Local facilitator implementation for x402 payments.
//!
//! [`FacilitatorLocal`] wraps a Solana chain provider with
//! [`SolanaExactFacilitator`] and adds structured logging around the
//! verify/settle/supported calls the facilitator binary exposes over HTTP.

use tracing::instrument;
use x402_chain_solana::chain::provider::SolanaChainProviderLike;
use x402_chain_solana::exact::SolanaExactFacilitator;
use x402_types::chain::ChainProviderOps;
use x402_types::proto::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};

/// A local facilitator backed by a Solana chain provider.
///
/// Unlike a remote facilitator client, this type talks to the chain directly:
/// `verify` simulates the client's transaction, `settle` submits it.
pub struct FacilitatorLocal<P> {
    inner: SolanaExactFacilitator<P>,
}

impl<P> FacilitatorLocal<P> {
    pub fn new(provider: P) -> Self {
        FacilitatorLocal {
            inner: SolanaExactFacilitator::new(provider),
        }
    }
}

impl<P> FacilitatorLocal<P>
where
    P: SolanaChainProviderLike + ChainProviderOps + Send + Sync,
{
    #[instrument(skip_all, fields(network = %request.payment_payload.network))]
    pub async fn verify(&self, request: &VerifyRequest) -> VerifyResponse {
        let response = self.inner.verify(request).await;
        if !response.is_valid {
            tracing::warn!(reason = ?response.invalid_reason, payer = ?response.payer, "payment rejected");
        }
        response
    }

    #[instrument(skip_all, fields(network = %request.payment_payload.network))]
    pub async fn settle(&self, request: &SettleRequest) -> SettleResponse {
        let response = self.inner.settle(request).await;
        if !response.success {
            tracing::warn!(reason = ?response.error_reason, payer = ?response.payer, "settlement failed");
        }
        response
    }

    pub async fn supported(&self) -> SupportedResponse {
        self.inner.supported().await
    }
}

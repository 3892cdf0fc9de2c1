//! The interface [`crate::layer::X402Middleware`] needs from a facilitator,
//! local or remote.

use std::future::Future;
use x402_types::proto::{SettleRequest, SettleResponse, SupportedResponse, VerifyRequest, VerifyResponse};

/// Verifies and settles x402 payments.
///
/// Unlike an RPC-call trait, failure here is split in two: `Error` covers
/// transport-level failure (the facilitator could not be reached, or replied
/// with garbage), while a rejected payment is a normal `Ok` value with
/// `is_valid`/`success` set to `false`.
pub trait Facilitator {
    type Error: std::error::Error + Send + Sync + 'static;

    fn verify(
        &self,
        request: &VerifyRequest,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    fn settle(
        &self,
        request: &SettleRequest,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    fn supported(&self) -> impl Future<Output = Result<SupportedResponse, Self::Error>> + Send;
}

//! Verification and settlement for the `exact` scheme on Solana.

use std::collections::HashMap;
use std::str::FromStr;

use solana_pubkey::Pubkey;
use x402_types::chain::ChainProviderOps;
use x402_types::networks::chain_id_by_network_name;
use x402_types::proto::{
    self, ErrorKind, PaymentRequirements, SettleRequest, SettleResponse, SupportedPaymentKind,
    SupportedResponse, VerifyRequest, VerifyResponse,
};

use crate::chain::Address;
use crate::chain::provider::SolanaChainProviderLike;
use crate::exact::introspector::{TransferRequirement, VerifiedTransfer, verify_transaction};
use crate::exact::types::TransactionInt;

/// Verifies and settles `exact`-scheme Solana payments against a chain provider.
///
/// `verify` and `settle` never return `Err` for a malformed or rejected
/// payment — that's represented by `is_valid: false` / `success: false` with
/// an [`ErrorKind`]. `Err` is reserved for failures that have nothing to do
/// with the payment itself (provider construction, serialization bugs).
pub struct SolanaExactFacilitator<P> {
    provider: P,
}

impl<P> SolanaExactFacilitator<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

fn parse_requirement<'a>(
    requirements: &'a PaymentRequirements,
) -> Result<(Address, Address, u64), ErrorKind> {
    if !x402_types::util::validate::is_base58_address(&requirements.pay_to)
        || !x402_types::util::validate::is_base58_address(&requirements.asset)
    {
        return Err(ErrorKind::InvalidPaymentRequirements);
    }
    let pay_to: Pubkey = requirements
        .pay_to
        .parse()
        .map_err(|_| ErrorKind::InvalidPaymentRequirements)?;
    let asset: Pubkey = requirements
        .asset
        .parse()
        .map_err(|_| ErrorKind::InvalidPaymentRequirements)?;
    let amount = u64::from_str(&requirements.max_amount_required)
        .map_err(|_| ErrorKind::InvalidPaymentRequirements)?;
    Ok((Address::new(pay_to), Address::new(asset), amount))
}

impl<P> SolanaExactFacilitator<P>
where
    P: SolanaChainProviderLike + ChainProviderOps + Send + Sync,
{
    fn check_network(&self, network: &str) -> Result<(), ErrorKind> {
        let chain_id = self.provider.chain_id();
        let request_chain_id = chain_id_by_network_name(network).ok_or(ErrorKind::InvalidNetwork)?;
        if *request_chain_id != chain_id {
            return Err(ErrorKind::InvalidNetwork);
        }
        Ok(())
    }

    async fn verify_inner(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifiedTransfer, (Option<String>, ErrorKind)> {
        self.check_network(&request.payment_payload.network)
            .map_err(|e| (None, e))?;
        self.check_network(&request.payment_requirements.network)
            .map_err(|e| (None, e))?;
        if request.payment_payload.scheme != proto::EXACT_SCHEME
            || request.payment_requirements.scheme != proto::EXACT_SCHEME
        {
            return Err((None, ErrorKind::UnsupportedScheme));
        }

        let (pay_to, asset, amount) =
            parse_requirement(&request.payment_requirements).map_err(|e| (None, e))?;
        let requirement = TransferRequirement {
            pay_to: &pay_to,
            asset: &asset,
            amount,
        };

        verify_transaction(
            &self.provider,
            &request.payment_payload.payload.transaction,
            &requirement,
        )
        .await
        .map_err(|(payer, kind)| (payer.map(|p| p.to_string()), kind))
    }

    pub async fn verify(&self, request: &VerifyRequest) -> VerifyResponse {
        match self.verify_inner(request).await {
            Ok(verified) => VerifyResponse::valid(verified.payer.to_string()),
            Err((payer, reason)) => VerifyResponse::invalid(payer, reason),
        }
    }

    pub async fn settle(&self, request: &SettleRequest) -> SettleResponse {
        let network = self
            .provider
            .chain_id()
            .as_network_name()
            .unwrap_or_default()
            .to_string();
        let verified = match self.verify_inner(request).await {
            Ok(v) => v,
            Err((payer, reason)) => return SettleResponse::failure(reason, payer, network),
        };
        let payer = verified.payer.to_string();

        // Already signed as fee payer during verification's simulation pass.
        let tx = TransactionInt::new(verified.transaction);
        if !tx.is_fully_signed() {
            return SettleResponse::failure(
                ErrorKind::InvalidTransactionState,
                Some(payer),
                network,
            );
        }

        match tx.send_and_confirm(&self.provider).await {
            Ok(signature) => SettleResponse::success(payer, signature.to_string(), network),
            Err(err) => SettleResponse::failure((&err).into(), Some(payer), network),
        }
    }

    pub async fn supported(&self) -> SupportedResponse {
        let chain_id = self.provider.chain_id();
        let fee_payer = self.provider.fee_payer();
        let mut kinds = Vec::with_capacity(1);
        if let Some(network) = chain_id.as_network_name() {
            kinds.push(SupportedPaymentKind {
                x402_version: proto::X402_VERSION,
                scheme: proto::EXACT_SCHEME.to_string(),
                network: network.to_string(),
                extra: Some(serde_json::json!({ "feePayer": fee_payer.to_string() })),
            });
        }
        let mut signers = HashMap::with_capacity(1);
        signers.insert(chain_id, self.provider.signer_addresses());
        SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(pay_to: &str, asset: &str, amount: &str) -> PaymentRequirements {
        PaymentRequirements {
            scheme: proto::EXACT_SCHEME.to_string(),
            network: "solana".to_string(),
            max_amount_required: amount.to_string(),
            resource: "https://example.com/resource".to_string(),
            description: String::new(),
            mime_type: String::new(),
            pay_to: pay_to.to_string(),
            max_timeout_seconds: 60,
            asset: asset.to_string(),
            extra: proto::PaymentRequirementsExtra {
                fee_payer: "11111111111111111111111111111111".to_string(),
            },
            output_schema: None,
        }
    }

    #[test]
    fn parse_requirement_accepts_valid_addresses() {
        let requirements = requirements(
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "1000000",
        );
        let (pay_to, asset, amount) = parse_requirement(&requirements).unwrap();
        assert_eq!(pay_to, asset);
        assert_eq!(amount, 1_000_000);
    }

    #[test]
    fn parse_requirement_rejects_bad_pubkey() {
        let requirements = requirements("not-a-pubkey", "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v", "1");
        assert!(matches!(
            parse_requirement(&requirements),
            Err(ErrorKind::InvalidPaymentRequirements)
        ));
    }

    #[test]
    fn parse_requirement_rejects_non_numeric_amount() {
        let requirements = requirements(
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
            "not-a-number",
        );
        assert!(matches!(
            parse_requirement(&requirements),
            Err(ErrorKind::InvalidPaymentRequirements)
        ));
    }
}

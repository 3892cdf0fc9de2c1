//! Wire format types for the x402 protocol, version 1, scheme `exact`, Solana only.
//!
//! The protocol is intentionally small: a client asks for a resource, gets a
//! `402` with [`PaymentRequirements`], retries with an `X-PAYMENT` header
//! carrying a base64-encoded [`PaymentPayload`], and a facilitator verifies
//! and settles that payload against the requirements.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::chain::ChainId;

/// The only x402 protocol version this crate speaks.
pub const X402_VERSION: u8 = 1;

/// The only payment scheme this crate speaks.
pub const EXACT_SCHEME: &str = "exact";

/// Terms under which a resource may be purchased, issued by the seller in a `402` response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Decimal integer string, e.g. `"1800"`. Never scientific notation.
    pub max_amount_required: String,
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    /// Base58 address of the recipient's token owner (not the ATA).
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    /// Base58 mint address.
    pub asset: String,
    pub extra: PaymentRequirementsExtra,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

/// Scheme-specific extras carried alongside [`PaymentRequirements`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirementsExtra {
    /// Base58 address the facilitator will pay fees from. Required on Solana:
    /// the facilitator is always the transaction's fee payer.
    pub fee_payer: String,
}

/// What the client returns via the `X-PAYMENT` header: a signed, base64-encoded transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    pub payload: ExactSolanaPayload,
}

/// The `exact` scheme's Solana payload: a partially-signed versioned transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExactSolanaPayload {
    /// Base64 wire form of a `VersionedTransaction`. Client's signature present,
    /// the fee-payer slot empty.
    pub transaction: String,
}

/// Request sent by a seller (or its middleware) to a facilitator's `/verify` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub x402_version: u8,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// `/settle` takes the same shape as `/verify`.
pub type SettleRequest = VerifyRequest;

/// Result of a `/verify` call.
///
/// `payer` is populated whenever the transaction decodes, even if it is
/// otherwise invalid, so that rejected payloads can still be attributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl VerifyResponse {
    pub fn valid(payer: String) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            payer: Some(payer),
        }
    }

    pub fn invalid(payer: Option<String>, reason: ErrorKind) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason),
            payer,
        }
    }
}

/// Result of a `/settle` call. `transaction` is the base58 signature on success
/// or on any post-submission failure, and the empty string before submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    pub transaction: String,
    pub network: String,
}

impl SettleResponse {
    pub fn success(payer: String, transaction: String, network: String) -> Self {
        Self {
            success: true,
            error_reason: None,
            payer: Some(payer),
            transaction,
            network,
        }
    }

    pub fn failure(reason: ErrorKind, payer: Option<String>, network: String) -> Self {
        Self {
            success: false,
            error_reason: Some(reason),
            payer,
            transaction: String::new(),
            network,
        }
    }
}

/// One payment method a facilitator is willing to process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response body of a facilitator's `/supported` endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedPaymentKind>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub signers: HashMap<ChainId, Vec<String>>,
}

/// Body of a `402 Payment Required` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: u8,
    pub error: String,
    pub accepts: Vec<PaymentRequirements>,
    /// Present only once verify has identified the offending payer, e.g. a
    /// payload that decoded and parsed but was rejected for another reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// The closed set of reasons a verify or settle call can fail.
///
/// EVM-specific variants are kept for wire compatibility with the broader
/// x402 ecosystem even though this facilitator never constructs them; a
/// Solana-only deployment may still receive them from a mixed-chain client
/// library and needs to round-trip them without losing information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPayload,
    InvalidPaymentRequirements,
    UnsupportedScheme,
    InvalidX402Version,
    InvalidScheme,
    InvalidNetwork,
    InvalidPayment,
    PaymentExpired,

    InsufficientFunds,

    InvalidExactSvmPayloadTransaction,
    InvalidExactSvmPayloadTransactionAmountMismatch,
    InvalidExactSvmPayloadTransactionInstructions,
    InvalidExactSvmPayloadTransactionInstructionsLength,
    InvalidExactSvmPayloadTransactionInstructionsComputeLimitInstruction,
    InvalidExactSvmPayloadTransactionInstructionsComputeLimitInstructionTooHigh,
    InvalidExactSvmPayloadTransactionInstructionsComputePriceInstruction,
    InvalidExactSvmPayloadTransactionInstructionsComputePriceInstructionTooHigh,
    InvalidExactSvmPayloadTransactionInstructionNotSplTokenTransferChecked,
    InvalidExactSvmPayloadTransactionInstructionNotToken2022TransferChecked,
    InvalidExactSvmPayloadTransactionNotATransferInstruction,
    InvalidExactSvmPayloadTransactionTransferToIncorrectAta,
    InvalidExactSvmPayloadTransactionReceiverAtaNotFound,
    InvalidExactSvmPayloadTransactionSenderAtaNotFound,
    InvalidExactSvmPayloadTransactionCreateAtaInstruction,
    InvalidExactSvmPayloadTransactionCreateAtaInstructionIncorrectPayee,
    InvalidExactSvmPayloadTransactionCreateAtaInstructionIncorrectAsset,
    InvalidExactSvmPayloadTransactionSimulationFailed,

    SettleExactSvmBlockHeightExceeded,
    SettleExactSvmTransactionConfirmationTimedOut,
    UnexpectedSettleError,

    UnexpectedVerifyError,

    InvalidTransactionState,

    // EVM-compat: never produced by the Solana path, kept for wire round-trips.
    MissingEip712Domain,
    InvalidExactEvmPayloadSignature,
    InvalidExactEvmPayloadRecipientMismatch,
    InvalidExactEvmPayloadAuthorizationValidBefore,
    InvalidExactEvmPayloadAuthorizationValidAfter,
    InvalidExactEvmPayloadAuthorizationValue,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let json = serde_json::to_string(self).expect("ErrorKind always serializes");
        write!(f, "{}", json.trim_matches('"'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_renders_snake_case() {
        assert_eq!(
            ErrorKind::InvalidExactSvmPayloadTransactionInstructionsLength.to_string(),
            "invalid_exact_svm_payload_transaction_instructions_length"
        );
        assert_eq!(
            ErrorKind::SettleExactSvmBlockHeightExceeded.to_string(),
            "settle_exact_svm_block_height_exceeded"
        );
    }

    #[test]
    fn verify_response_round_trips() {
        let response = VerifyResponse::invalid(
            Some("abc".to_string()),
            ErrorKind::InvalidExactSvmPayloadTransactionAmountMismatch,
        );
        let json = serde_json::to_string(&response).unwrap();
        let back: VerifyResponse = serde_json::from_str(&json).unwrap();
        assert!(!back.is_valid);
        assert_eq!(back.payer.as_deref(), Some("abc"));
    }

    #[test]
    fn settle_response_success_omits_error_reason() {
        let response = SettleResponse::success(
            "payer".to_string(),
            "sig".to_string(),
            "solana-devnet".to_string(),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("errorReason").is_none());
        assert_eq!(json["success"], true);
    }
}

//! Instruction/transaction introspection helpers and the closed error set
//! the `exact` scheme maps onto the wire [`ErrorKind`](x402_types::proto::ErrorKind).

use solana_pubkey::{Pubkey, pubkey};
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use x402_types::proto::ErrorKind;
use x402_types::util::b64::Base64Bytes;

use crate::chain::provider::{SolanaChainProviderError, SolanaChainProviderLike};

/// The Associated Token Account program.
pub const ATA_PROGRAM_PUBKEY: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// A single instruction within a [`TransactionInt`], resolved against the
/// transaction's static account keys.
pub struct InstructionInt {
    index: usize,
    program_id: Pubkey,
    accounts: Vec<Pubkey>,
    data: Vec<u8>,
}

/// A borrowed view over a [`VersionedTransaction`] with convenience accessors
/// used by the introspector and settlement engine.
pub struct TransactionInt {
    inner: VersionedTransaction,
}

impl TransactionInt {
    pub fn new(transaction: VersionedTransaction) -> Self {
        Self { inner: transaction }
    }

    pub fn inner(&self) -> &VersionedTransaction {
        &self.inner
    }

    pub fn into_inner(self) -> VersionedTransaction {
        self.inner
    }

    pub fn instruction_count(&self) -> usize {
        self.inner.message.instructions().len()
    }

    pub fn instruction(&self, index: usize) -> Result<InstructionInt, SolanaExactError> {
        let instruction = self
            .inner
            .message
            .instructions()
            .get(index)
            .ok_or(SolanaExactError::NoInstructionAtIndex(index))?;
        let account_keys = self.inner.message.static_account_keys();
        let program_id = *instruction.program_id(account_keys);
        let accounts = instruction
            .accounts
            .iter()
            .map(|&idx| {
                account_keys
                    .get(idx as usize)
                    .copied()
                    .ok_or(SolanaExactError::NoAccountAtIndex(idx))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(InstructionInt {
            index,
            program_id,
            accounts,
            data: instruction.data.clone(),
        })
    }

    pub fn static_account_keys(&self) -> &[Pubkey] {
        self.inner.message.static_account_keys()
    }

    pub fn is_fully_signed(&self) -> bool {
        let num_required = self.inner.message.header().num_required_signatures as usize;
        if self.inner.signatures.len() < num_required {
            return false;
        }
        let default = Signature::default();
        self.inner.signatures[..num_required]
            .iter()
            .all(|sig| *sig != default)
    }

    /// Places the facilitator's fee-payer signature by its position in the
    /// transaction's static account keys (not appended, since the signature
    /// vector is already shaped by the message's signer count).
    pub fn sign<P: SolanaChainProviderLike>(
        self,
        provider: &P,
    ) -> Result<Self, SolanaChainProviderError> {
        let tx = provider.sign(self.inner)?;
        Ok(Self { inner: tx })
    }

    /// Signs with an arbitrary keypair, used client-side before the
    /// transaction is handed to the facilitator.
    pub fn sign_with_keypair<S: Signer>(self, signer: &S) -> Result<Self, TransactionSignError> {
        let mut tx = self.inner;
        let msg_bytes = tx.message.serialize();
        let signature = signer
            .try_sign_message(msg_bytes.as_slice())
            .map_err(|e| TransactionSignError(format!("{e}")))?;

        let num_required = tx.message.header().num_required_signatures as usize;
        let static_keys = tx.message.static_account_keys();
        let pos = static_keys[..num_required]
            .iter()
            .position(|k| *k == signer.pubkey())
            .ok_or(TransactionSignError(
                "signer not found in required signers".to_string(),
            ))?;
        if tx.signatures.len() < num_required {
            tx.signatures.resize(num_required, Signature::default());
        }
        tx.signatures[pos] = signature;
        Ok(Self { inner: tx })
    }

    pub async fn send_and_confirm<P: SolanaChainProviderLike>(
        &self,
        provider: &P,
    ) -> Result<Signature, SolanaChainProviderError> {
        provider.send_and_confirm(&self.inner).await
    }

    pub fn as_base64(&self) -> Result<String, TransactionToB64Error> {
        let bytes =
            bincode::serialize(&self.inner).map_err(|e| TransactionToB64Error(format!("{e}")))?;
        let base64_bytes = Base64Bytes::encode(bytes);
        String::from_utf8(base64_bytes.0.into_owned())
            .map_err(|e| TransactionToB64Error(format!("{e}")))
    }

    pub fn from_base64(s: &str) -> Result<Self, SolanaExactError> {
        let raw = Base64Bytes::from(s.as_bytes())
            .decode()
            .map_err(|e| SolanaExactError::TransactionDecoding(e.to_string()))?;
        let tx: VersionedTransaction = bincode::deserialize(&raw)
            .map_err(|e| SolanaExactError::TransactionDecoding(e.to_string()))?;
        Ok(Self::new(tx))
    }
}

impl InstructionInt {
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn has_accounts(&self) -> bool {
        !self.accounts.is_empty()
    }

    pub fn data_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn assert_not_empty(&self) -> Result<(), SolanaExactError> {
        if !self.has_data() || !self.has_accounts() {
            return Err(SolanaExactError::EmptyInstructionAtIndex(self.index));
        }
        Ok(())
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn account(&self, index: u8) -> Result<Pubkey, SolanaExactError> {
        self.accounts
            .get(index as usize)
            .copied()
            .ok_or(SolanaExactError::NoAccountAtIndex(index))
    }

    pub fn accounts(&self) -> &[Pubkey] {
        &self.accounts
    }
}

#[derive(Debug, thiserror::Error)]
#[error("can not encode transaction to base64: {0}")]
pub struct TransactionToB64Error(pub String);

#[derive(Debug, thiserror::Error)]
#[error("can not sign transaction: {0}")]
pub struct TransactionSignError(pub String);

/// The errors the `exact` introspector and settlement engine can raise while
/// validating a payload, prior to mapping onto the wire [`ErrorKind`].
#[derive(Debug, thiserror::Error)]
pub enum SolanaExactError {
    #[error("can not decode transaction: {0}")]
    TransactionDecoding(String),
    #[error("compute unit price exceeds facilitator maximum")]
    MaxComputeUnitPriceExceeded,
    #[error("transaction has {0} instructions, expected 3 or 4")]
    WrongInstructionCount(usize),
    #[error("fee payer is listed as an account in an instruction")]
    FeePayerIncludedInInstructionAccounts,
    #[error("instruction at index {0} not found")]
    NoInstructionAtIndex(usize),
    #[error("no account at index {0}")]
    NoAccountAtIndex(u8),
    #[error("empty instruction at index {0}")]
    EmptyInstructionAtIndex(usize),
    #[error("invalid compute limit instruction")]
    InvalidComputeLimitInstruction,
    #[error("compute unit limit exceeds facilitator maximum")]
    ComputeUnitLimitExceeded,
    #[error("invalid compute price instruction")]
    InvalidComputePriceInstruction,
    #[error("instruction is not an SPL Token TransferChecked")]
    NotSplTokenTransferChecked,
    #[error("instruction is not a Token-2022 TransferChecked")]
    NotToken2022TransferChecked,
    #[error("instruction program is neither SPL Token nor Token-2022")]
    NotATransferInstruction,
    #[error("transfer amount does not match the required amount")]
    AmountMismatch,
    #[error("transfer destination is not the payee's associated token account")]
    TransferToIncorrectAta,
    #[error("receiver associated token account does not exist")]
    ReceiverAtaNotFound,
    #[error("sender associated token account does not exist")]
    SenderAtaNotFound,
    #[error("create-ATA instruction is not a valid CreateAssociatedTokenAccount instruction")]
    InvalidCreateAtaInstruction,
    #[error("create-ATA instruction targets the wrong payee")]
    CreateAtaIncorrectPayee,
    #[error("create-ATA instruction targets the wrong asset")]
    CreateAtaIncorrectAsset,
    #[error("transaction simulation failed: {0}")]
    SimulationFailed(String),
}

impl From<&SolanaExactError> for ErrorKind {
    fn from(e: &SolanaExactError) -> Self {
        use SolanaExactError::*;
        match e {
            TransactionDecoding(_) => ErrorKind::InvalidExactSvmPayloadTransaction,
            MaxComputeUnitPriceExceeded => {
                ErrorKind::InvalidExactSvmPayloadTransactionInstructionsComputePriceInstructionTooHigh
            }
            WrongInstructionCount(_) => {
                ErrorKind::InvalidExactSvmPayloadTransactionInstructionsLength
            }
            FeePayerIncludedInInstructionAccounts => {
                ErrorKind::InvalidExactSvmPayloadTransaction
            }
            NoInstructionAtIndex(_) | NoAccountAtIndex(_) | EmptyInstructionAtIndex(_) => {
                ErrorKind::InvalidExactSvmPayloadTransactionInstructions
            }
            InvalidComputeLimitInstruction => {
                ErrorKind::InvalidExactSvmPayloadTransactionInstructionsComputeLimitInstruction
            }
            ComputeUnitLimitExceeded => {
                ErrorKind::InvalidExactSvmPayloadTransactionInstructionsComputeLimitInstructionTooHigh
            }
            InvalidComputePriceInstruction => {
                ErrorKind::InvalidExactSvmPayloadTransactionInstructionsComputePriceInstruction
            }
            NotSplTokenTransferChecked => {
                ErrorKind::InvalidExactSvmPayloadTransactionInstructionNotSplTokenTransferChecked
            }
            NotToken2022TransferChecked => {
                ErrorKind::InvalidExactSvmPayloadTransactionInstructionNotToken2022TransferChecked
            }
            NotATransferInstruction => {
                ErrorKind::InvalidExactSvmPayloadTransactionNotATransferInstruction
            }
            AmountMismatch => ErrorKind::InvalidExactSvmPayloadTransactionAmountMismatch,
            TransferToIncorrectAta => {
                ErrorKind::InvalidExactSvmPayloadTransactionTransferToIncorrectAta
            }
            ReceiverAtaNotFound => ErrorKind::InvalidExactSvmPayloadTransactionReceiverAtaNotFound,
            SenderAtaNotFound => ErrorKind::InvalidExactSvmPayloadTransactionSenderAtaNotFound,
            InvalidCreateAtaInstruction => {
                ErrorKind::InvalidExactSvmPayloadTransactionCreateAtaInstruction
            }
            CreateAtaIncorrectPayee => {
                ErrorKind::InvalidExactSvmPayloadTransactionCreateAtaInstructionIncorrectPayee
            }
            CreateAtaIncorrectAsset => {
                ErrorKind::InvalidExactSvmPayloadTransactionCreateAtaInstructionIncorrectAsset
            }
            SimulationFailed(_) => {
                ErrorKind::InvalidExactSvmPayloadTransactionSimulationFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_compute_budget_interface::ComputeBudgetInstruction;
    use solana_keypair::Keypair;
    use solana_message::v0::Message as MessageV0;
    use solana_message::{Hash, VersionedMessage};

    fn sample_transaction() -> VersionedTransaction {
        let payer = Keypair::new();
        let ix = ComputeBudgetInstruction::set_compute_unit_limit(200_000);
        let message =
            MessageV0::try_compile(&payer.pubkey(), &[ix], &[], Hash::default()).unwrap();
        VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::V0(message),
        }
    }

    #[test]
    fn base64_roundtrip() {
        let tx = sample_transaction();
        let transaction_int = TransactionInt::new(tx);
        let encoded = transaction_int.as_base64().unwrap();
        let decoded = TransactionInt::from_base64(&encoded).unwrap();
        assert_eq!(decoded.instruction_count(), transaction_int.instruction_count());
    }

    #[test]
    fn from_base64_rejects_garbage() {
        assert!(TransactionInt::from_base64("not valid base64!!").is_err());
    }

    #[test]
    fn instruction_accessors_resolve_accounts() {
        let tx = TransactionInt::new(sample_transaction());
        let instruction = tx.instruction(0).unwrap();
        assert!(instruction.has_data());
        assert_eq!(instruction.program_id(), solana_compute_budget_interface::ID);
    }

    #[test]
    fn no_instruction_at_index_is_reported() {
        let tx = TransactionInt::new(sample_transaction());
        assert!(matches!(
            tx.instruction(5),
            Err(SolanaExactError::NoInstructionAtIndex(5))
        ));
    }

    #[test]
    fn fresh_transaction_is_not_fully_signed() {
        let tx = TransactionInt::new(sample_transaction());
        assert!(!tx.is_fully_signed());
    }
}

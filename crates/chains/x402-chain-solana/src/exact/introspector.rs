//! Transaction introspection: validates that a client-submitted transaction
//! is exactly the SPL Token transfer the resource server asked for.

use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_compute_budget_interface::ID as COMPUTE_BUDGET_PROGRAM_ID;
use solana_pubkey::Pubkey;
use solana_transaction::versioned::VersionedTransaction;
use x402_types::chain::ChainId;
use x402_types::networks::chain_id_by_network_name;
use x402_types::proto::ErrorKind;

use crate::chain::Address;
use crate::chain::provider::SolanaChainProviderLike;
use crate::exact::types::{ATA_PROGRAM_PUBKEY, SolanaExactError, TransactionInt};

/// Hard cap on the compute unit price the facilitator will sign for, regardless
/// of what an individual chain's configuration allows.
pub const MAX_COMPUTE_UNIT_PRICE_MICROLAMPORTS: u64 = 5_000_000;

pub struct TransferRequirement<'a> {
    pub pay_to: &'a Address,
    pub asset: &'a Address,
    pub amount: u64,
}

#[derive(Debug)]
pub struct TransferCheckedInstruction {
    pub amount: u64,
    pub source: Pubkey,
    pub mint: Pubkey,
    pub destination: Pubkey,
    pub authority: Pubkey,
    pub token_program: Pubkey,
}

pub struct VerifiedTransfer {
    pub payer: Address,
    pub transaction: VersionedTransaction,
}

/// Parses and validates the `SetComputeUnitLimit` instruction at `index`.
pub fn verify_compute_limit_instruction(
    tx: &TransactionInt,
    index: usize,
) -> Result<u32, SolanaExactError> {
    let instruction = tx.instruction(index)?;
    let data = instruction.data_slice();
    if instruction.program_id() != COMPUTE_BUDGET_PROGRAM_ID
        || data.first().copied().unwrap_or(0) != 2
        || data.len() != 5
    {
        return Err(SolanaExactError::InvalidComputeLimitInstruction);
    }
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[1..5]);
    Ok(u32::from_le_bytes(buf))
}

/// Parses and validates the `SetComputeUnitPrice` instruction at `index`,
/// rejecting anything above [`MAX_COMPUTE_UNIT_PRICE_MICROLAMPORTS`].
pub fn verify_compute_price_instruction(
    tx: &TransactionInt,
    index: usize,
) -> Result<u64, SolanaExactError> {
    let instruction = tx.instruction(index)?;
    let data = instruction.data_slice();
    if instruction.program_id() != COMPUTE_BUDGET_PROGRAM_ID
        || data.first().copied().unwrap_or(0) != 3
        || data.len() != 9
    {
        return Err(SolanaExactError::InvalidComputePriceInstruction);
    }
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[1..9]);
    let microlamports = u64::from_le_bytes(buf);
    if microlamports > MAX_COMPUTE_UNIT_PRICE_MICROLAMPORTS {
        return Err(SolanaExactError::MaxComputeUnitPriceExceeded);
    }
    Ok(microlamports)
}

/// Validates the optional create-ATA instruction at `index`: it must create
/// the payee's associated token account for the required asset.
fn verify_create_ata_instruction(
    tx: &TransactionInt,
    index: usize,
    transfer_requirement: &TransferRequirement<'_>,
) -> Result<(), SolanaExactError> {
    let instruction = tx.instruction(index)?;
    if instruction.program_id() != ATA_PROGRAM_PUBKEY {
        return Err(SolanaExactError::InvalidCreateAtaInstruction);
    }
    let discriminator = instruction.data_slice().first().copied();
    if !matches!(discriminator, Some(0) | Some(1)) {
        return Err(SolanaExactError::InvalidCreateAtaInstruction);
    }
    // Account order: funding_account, associated_token_account, wallet_address, token_mint, ...
    let owner = instruction.account(2)?;
    if Address::new(owner) != *transfer_requirement.pay_to {
        return Err(SolanaExactError::CreateAtaIncorrectPayee);
    }
    let mint = instruction.account(3)?;
    if Address::new(mint) != *transfer_requirement.asset {
        return Err(SolanaExactError::CreateAtaIncorrectAsset);
    }
    Ok(())
}

fn parse_transfer_checked(
    tx: &TransactionInt,
    index: usize,
) -> Result<TransferCheckedInstruction, SolanaExactError> {
    let instruction = tx.instruction(index)?;
    instruction.assert_not_empty()?;
    let program_id = instruction.program_id();

    let (amount, token_program) = if program_id == spl_token::ID {
        let parsed = spl_token::instruction::TokenInstruction::unpack(instruction.data_slice())
            .map_err(|_| SolanaExactError::NotSplTokenTransferChecked)?;
        match parsed {
            spl_token::instruction::TokenInstruction::TransferChecked { amount, .. } => {
                (amount, spl_token::ID)
            }
            _ => return Err(SolanaExactError::NotSplTokenTransferChecked),
        }
    } else if program_id == spl_token_2022::ID {
        let parsed =
            spl_token_2022::instruction::TokenInstruction::unpack(instruction.data_slice())
                .map_err(|_| SolanaExactError::NotToken2022TransferChecked)?;
        match parsed {
            spl_token_2022::instruction::TokenInstruction::TransferChecked { amount, .. } => {
                (amount, spl_token_2022::ID)
            }
            _ => return Err(SolanaExactError::NotToken2022TransferChecked),
        }
    } else {
        return Err(SolanaExactError::NotATransferInstruction);
    };

    Ok(TransferCheckedInstruction {
        amount,
        source: instruction.account(0)?,
        mint: instruction.account(1)?,
        destination: instruction.account(2)?,
        authority: instruction.account(3)?,
        token_program,
    })
}

/// Runs the full instruction-shape and transfer validation described by the
/// transaction introspector, then signs and simulates the result.
///
/// The payer is only derivable once the TransferChecked authority account is
/// parsed; errors before that point carry `None`, errors after it carry the
/// now-known payer so a rejected payload can still be attributed.
pub async fn verify_transaction<P: SolanaChainProviderLike>(
    provider: &P,
    transaction_b64: &str,
    transfer_requirement: &TransferRequirement<'_>,
) -> Result<VerifiedTransfer, (Option<Address>, ErrorKind)> {
    let tx = TransactionInt::from_base64(transaction_b64).map_err(|e| (None, ErrorKind::from(&e)))?;

    let instruction_count = tx.instruction_count();
    if instruction_count != 3 && instruction_count != 4 {
        return Err((None, ErrorKind::from(&SolanaExactError::WrongInstructionCount(instruction_count))));
    }
    let has_create_ata = instruction_count == 4;

    let compute_units = verify_compute_limit_instruction(&tx, 0).map_err(|e| (None, ErrorKind::from(&e)))?;
    if compute_units > provider.max_compute_unit_limit() {
        return Err((None, ErrorKind::from(&SolanaExactError::ComputeUnitLimitExceeded)));
    }
    verify_compute_price_instruction(&tx, 1).map_err(|e| (None, ErrorKind::from(&e)))?;

    let transfer_index = if has_create_ata { 3 } else { 2 };
    if has_create_ata {
        verify_create_ata_instruction(&tx, 2, transfer_requirement).map_err(|e| (None, ErrorKind::from(&e)))?;
    }

    let transfer = parse_transfer_checked(&tx, transfer_index).map_err(|e| (None, ErrorKind::from(&e)))?;
    let payer = Address::new(transfer.authority);

    let fee_payer_pubkey = provider.pubkey();
    for account in tx.static_account_keys() {
        if *account == fee_payer_pubkey {
            return Err((
                Some(payer),
                ErrorKind::from(&SolanaExactError::FeePayerIncludedInInstructionAccounts),
            ));
        }
    }

    if Address::new(transfer.mint) != *transfer_requirement.asset {
        return Err((Some(payer), ErrorKind::InvalidPaymentRequirements));
    }

    let (expected_ata, _) = Pubkey::find_program_address(
        &[
            transfer_requirement.pay_to.as_ref(),
            transfer.token_program.as_ref(),
            transfer_requirement.asset.as_ref(),
        ],
        &ATA_PROGRAM_PUBKEY,
    );
    if transfer.destination != expected_ata {
        return Err((Some(payer), ErrorKind::InvalidExactSvmPayloadTransactionTransferToIncorrectAta));
    }

    let accounts = provider
        .get_multiple_accounts(&[transfer.source, expected_ata])
        .await
        .map_err(|_| (Some(payer), ErrorKind::InvalidExactSvmPayloadTransactionSimulationFailed))?;
    let sender_missing = accounts.first().is_none_or(|a| a.is_none());
    if sender_missing {
        return Err((Some(payer), ErrorKind::InvalidExactSvmPayloadTransactionSenderAtaNotFound));
    }
    let receiver_missing = accounts.get(1).is_none_or(|a| a.is_none());
    if receiver_missing && !has_create_ata {
        return Err((Some(payer), ErrorKind::InvalidExactSvmPayloadTransactionReceiverAtaNotFound));
    }

    if transfer.amount != transfer_requirement.amount {
        return Err((Some(payer), ErrorKind::InvalidExactSvmPayloadTransactionAmountMismatch));
    }

    let tx = tx.sign(provider).map_err(|_| (Some(payer), ErrorKind::UnexpectedVerifyError))?;
    let sim_cfg = RpcSimulateTransactionConfig {
        sig_verify: false,
        replace_recent_blockhash: false,
        commitment: Some(CommitmentConfig::confirmed()),
        encoding: None,
        accounts: None,
        inner_instructions: false,
        min_context_slot: None,
    };
    provider
        .simulate_transaction_with_config(tx.inner(), sim_cfg)
        .await
        .map_err(|_| (Some(payer), ErrorKind::InvalidExactSvmPayloadTransactionSimulationFailed))?;

    Ok(VerifiedTransfer {
        payer,
        transaction: tx.into_inner(),
    })
}

/// Resolves the chain ID encoded by an x402 v1 network name, checked against
/// the provider's own chain.
pub fn network_matches_chain(network: &str, chain_id: &ChainId) -> bool {
    chain_id_by_network_name(network) == Some(chain_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_compute_budget_interface::ComputeBudgetInstruction;
    use solana_keypair::Keypair;
    use solana_message::v0::Message as MessageV0;
    use solana_message::{Hash, VersionedMessage};
    use solana_signer::Signer as _;

    fn tx_with_instructions(instructions: &[solana_transaction::Instruction]) -> TransactionInt {
        let payer = Keypair::new();
        let message = MessageV0::try_compile(&payer.pubkey(), instructions, &[], Hash::default())
            .unwrap();
        TransactionInt::new(VersionedTransaction {
            signatures: vec![solana_signature::Signature::default()],
            message: VersionedMessage::V0(message),
        })
    }

    #[test]
    fn compute_limit_instruction_parses_value() {
        let ix = ComputeBudgetInstruction::set_compute_unit_limit(350_000);
        let tx = tx_with_instructions(&[ix]);
        assert_eq!(verify_compute_limit_instruction(&tx, 0).unwrap(), 350_000);
    }

    #[test]
    fn compute_price_instruction_rejects_above_cap() {
        let ix = ComputeBudgetInstruction::set_compute_unit_price(
            MAX_COMPUTE_UNIT_PRICE_MICROLAMPORTS + 1,
        );
        let tx = tx_with_instructions(&[ix]);
        assert!(matches!(
            verify_compute_price_instruction(&tx, 0),
            Err(SolanaExactError::MaxComputeUnitPriceExceeded)
        ));
    }

    #[test]
    fn compute_price_instruction_accepts_at_cap() {
        let ix = ComputeBudgetInstruction::set_compute_unit_price(
            MAX_COMPUTE_UNIT_PRICE_MICROLAMPORTS,
        );
        let tx = tx_with_instructions(&[ix]);
        assert_eq!(
            verify_compute_price_instruction(&tx, 0).unwrap(),
            MAX_COMPUTE_UNIT_PRICE_MICROLAMPORTS
        );
    }

    #[test]
    fn compute_limit_instruction_rejects_wrong_program() {
        let ix = spl_memo_instruction();
        let tx = tx_with_instructions(&[ix]);
        assert!(matches!(
            verify_compute_limit_instruction(&tx, 0),
            Err(SolanaExactError::InvalidComputeLimitInstruction)
        ));
    }

    fn spl_memo_instruction() -> solana_transaction::Instruction {
        solana_transaction::Instruction::new_with_bytes(
            solana_pubkey::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr"),
            b"hi",
            Vec::new(),
        )
    }

    #[test]
    fn network_matches_chain_known_network() {
        let chain_id = chain_id_by_network_name("solana").unwrap();
        assert!(network_matches_chain("solana", chain_id));
        assert!(!network_matches_chain("solana-devnet", chain_id));
    }

    #[test]
    fn parse_transfer_checked_rejects_unrelated_program() {
        let ix = spl_memo_instruction();
        let tx = tx_with_instructions(&[ix]);
        assert!(matches!(
            parse_transfer_checked(&tx, 0),
            Err(SolanaExactError::NotATransferInstruction)
        ));
    }
}

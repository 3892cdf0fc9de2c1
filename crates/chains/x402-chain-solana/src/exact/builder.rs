//! Client-side construction of the payment transaction described in a
//! [`PaymentRequirements`] — the transfer, its compute-budget instructions,
//! and (when needed) the create-ATA instruction for the payee.

use solana_client::rpc_config::RpcSimulateTransactionConfig;
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_message::v0::Message as MessageV0;
use solana_message::{Hash, VersionedMessage};
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::Instruction;
use solana_transaction::versioned::VersionedTransaction;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use spl_token::solana_program::program_pack::Pack;

use crate::chain::Address;
use crate::chain::rpc::RpcClientLike;
use crate::exact::types::{ATA_PROGRAM_PUBKEY, TransactionInt};

/// Fixed compute unit price, in micro-lamports, that every client-built
/// transaction uses. Priority-fee bidding is not part of this scheme; the
/// facilitator caps what it will sign for at a much higher ceiling so this
/// fixed price always clears.
pub const COMPUTE_UNIT_PRICE_MICROLAMPORTS: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("failed to unpack mint account: {0}")]
    InvalidMint(String),
    #[error("failed to build instruction: {0}")]
    Instruction(String),
    #[error("failed to sign transaction: {0}")]
    Sign(String),
}

#[derive(Debug)]
enum Mint {
    Token { decimals: u8 },
    Token2022 { decimals: u8 },
}

impl Mint {
    fn decimals(&self) -> u8 {
        match self {
            Mint::Token { decimals } | Mint::Token2022 { decimals } => *decimals,
        }
    }

    fn token_program(&self) -> Pubkey {
        match self {
            Mint::Token { .. } => spl_token::id(),
            Mint::Token2022 { .. } => spl_token_2022::id(),
        }
    }
}

async fn fetch_mint<R: RpcClientLike>(mint: &Address, rpc: &R) -> Result<Mint, BuildError> {
    let account = rpc
        .get_account(mint.pubkey())
        .await
        .map_err(|e| BuildError::Rpc(e.to_string()))?;
    if account.owner == spl_token::id() {
        let parsed = spl_token::state::Mint::unpack(&account.data)
            .map_err(|e| BuildError::InvalidMint(e.to_string()))?;
        Ok(Mint::Token {
            decimals: parsed.decimals,
        })
    } else if account.owner == spl_token_2022::id() {
        let parsed = spl_token_2022::state::Mint::unpack(&account.data)
            .map_err(|e| BuildError::InvalidMint(e.to_string()))?;
        Ok(Mint::Token2022 {
            decimals: parsed.decimals,
        })
    } else {
        Err(BuildError::InvalidMint(format!(
            "mint {} owned by unrecognized program {}",
            mint.pubkey(),
            account.owner
        )))
    }
}

fn associated_token_account(owner: &Pubkey, token_program: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    )
    .0
}

async fn estimate_compute_units<R: RpcClientLike>(
    rpc: &R,
    fee_payer: &Pubkey,
    instructions: &[Instruction],
    recent_blockhash: Hash,
) -> Result<u32, BuildError> {
    let message = MessageV0::try_compile(fee_payer, instructions, &[], recent_blockhash)
        .map_err(|e| BuildError::Instruction(format!("{e:?}")))?;
    let message = VersionedMessage::V0(message);
    let num_required_signatures = message.header().num_required_signatures;
    let tx = VersionedTransaction {
        signatures: vec![Signature::default(); num_required_signatures as usize],
        message,
    };
    let sim = rpc
        .simulate_transaction_with_config(
            &tx,
            RpcSimulateTransactionConfig {
                sig_verify: false,
                replace_recent_blockhash: true,
                ..RpcSimulateTransactionConfig::default()
            },
        )
        .await
        .map_err(|e| BuildError::Rpc(format!("{e:?}")))?;
    let units = sim
        .value
        .units_consumed
        .ok_or_else(|| BuildError::Rpc("simulation returned no units_consumed".to_string()))?;
    Ok(units as u32)
}

/// Builds and signs the payment transaction for a transfer of `amount` atomic
/// units of `asset` from `signer` to `pay_to`'s associated token account,
/// with `fee_payer` as the transaction's fee payer.
///
/// Prepends a create-ATA instruction when the destination account doesn't
/// exist yet, producing the 4-instruction shape the introspector accepts
/// alongside the 3-instruction shape used when it already exists.
pub async fn build_signed_transfer_transaction<S: Signer, R: RpcClientLike>(
    signer: &S,
    rpc_client: &R,
    fee_payer: &Pubkey,
    pay_to: &Address,
    asset: &Address,
    amount: u64,
) -> Result<String, BuildError> {
    let mint = fetch_mint(asset, rpc_client).await?;
    let token_program = mint.token_program();

    let source_ata = associated_token_account(&signer.pubkey(), &token_program, asset.pubkey());
    let destination_ata = associated_token_account(pay_to.pubkey(), &token_program, asset.pubkey());

    let destination_exists = rpc_client
        .get_account(&destination_ata)
        .await
        .is_ok();

    let transfer_ix = if mint.token_program() == spl_token::id() {
        spl_token::instruction::transfer_checked(
            &token_program,
            &source_ata,
            asset.pubkey(),
            &destination_ata,
            &signer.pubkey(),
            &[],
            amount,
            mint.decimals(),
        )
        .map_err(|e| BuildError::Instruction(e.to_string()))?
    } else {
        spl_token_2022::instruction::transfer_checked(
            &token_program,
            &source_ata,
            asset.pubkey(),
            &destination_ata,
            &signer.pubkey(),
            &[],
            amount,
            mint.decimals(),
        )
        .map_err(|e| BuildError::Instruction(e.to_string()))?
    };

    let mut transfer_instructions = Vec::with_capacity(2);
    if !destination_exists {
        transfer_instructions.push(create_associated_token_account_idempotent(
            fee_payer,
            pay_to.pubkey(),
            asset.pubkey(),
            &token_program,
        ));
    }
    transfer_instructions.push(transfer_ix);

    let recent_blockhash = rpc_client
        .get_latest_blockhash()
        .await
        .map_err(|e| BuildError::Rpc(format!("{e:?}")))?;

    let price_ix = ComputeBudgetInstruction::set_compute_unit_price(COMPUTE_UNIT_PRICE_MICROLAMPORTS);
    let mut sim_instructions = Vec::with_capacity(2 + transfer_instructions.len());
    sim_instructions.push(price_ix.clone());
    sim_instructions.extend(transfer_instructions.iter().cloned());
    let estimated_cu =
        estimate_compute_units(rpc_client, fee_payer, &sim_instructions, recent_blockhash).await?;
    let limit_ix = ComputeBudgetInstruction::set_compute_unit_limit(estimated_cu);

    let mut final_instructions = Vec::with_capacity(2 + transfer_instructions.len());
    final_instructions.push(limit_ix);
    final_instructions.push(price_ix);
    final_instructions.extend(transfer_instructions);

    let message = MessageV0::try_compile(fee_payer, &final_instructions, &[], recent_blockhash)
        .map_err(|e| BuildError::Instruction(format!("{e:?}")))?;
    let tx = VersionedTransaction {
        signatures: vec![],
        message: VersionedMessage::V0(message),
    };

    let signed = TransactionInt::new(tx)
        .sign_with_keypair(signer)
        .map_err(|e| BuildError::Sign(e.to_string()))?;
    signed.as_base64().map_err(|e| BuildError::Sign(e.to_string()))
}

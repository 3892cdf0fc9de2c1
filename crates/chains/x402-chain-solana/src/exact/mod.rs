//! The `exact` payment scheme: a client signs a transfer transaction, a
//! facilitator validates its shape against the resource server's
//! requirements, co-signs it as fee payer, and submits it to the cluster.

mod builder;
mod facilitator;
mod introspector;
mod types;

pub use builder::{BuildError, COMPUTE_UNIT_PRICE_MICROLAMPORTS, build_signed_transfer_transaction};
pub use facilitator::SolanaExactFacilitator;
pub use introspector::{
    MAX_COMPUTE_UNIT_PRICE_MICROLAMPORTS, TransferCheckedInstruction, TransferRequirement,
    VerifiedTransfer, network_matches_chain, verify_compute_limit_instruction,
    verify_compute_price_instruction, verify_transaction,
};
pub use types::{
    ATA_PROGRAM_PUBKEY, InstructionInt, SolanaExactError, TransactionInt, TransactionSignError,
    TransactionToB64Error,
};

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Solana chain support for the x402 payment protocol.
//!
//! Implements protocol version 1, scheme `exact`, for SPL Token and
//! Token-2022 transfers authorized by a pre-signed Solana transaction.
//!
//! # Architecture
//!
//! - [`chain`] - Core Solana chain types, the RPC provider, and configuration
//! - [`exact`] - The `exact` scheme: transaction builder, introspector, and
//!   settlement engine
//!
//! # Usage
//!
//! ## Client: Building a Payment Transaction
//!
//! ```ignore
//! use x402_chain_solana::exact::build_signed_transfer_transaction;
//!
//! let payload =
//!     build_signed_transfer_transaction(&keypair, &rpc, &fee_payer, &pay_to, &asset, amount)
//!         .await?;
//! ```
//!
//! ## Facilitator: Verifying and Settling
//!
//! ```ignore
//! use x402_chain_solana::exact::SolanaExactFacilitator;
//!
//! let facilitator = SolanaExactFacilitator::new(provider);
//! let verify_response = facilitator.verify(&verify_request).await;
//! let settle_response = facilitator.settle(&settle_request).await;
//! ```

pub mod chain;
pub mod exact;

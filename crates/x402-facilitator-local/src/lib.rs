#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Local facilitator implementation for the x402 payment protocol.
//!
//! This crate provides [`FacilitatorLocal`], a thin wrapper around
//! [`x402_chain_solana::exact::SolanaExactFacilitator`] that adds logging
//! around the verify/settle/supported operations the facilitator binary
//! exposes over HTTP.
//!
//! # Modules
//!
//! - [`facilitator_local`] - Core facilitator implementation
//! - [`util`] - Graceful shutdown helper
//!
//! # Example
//!
//! ```ignore
//! use x402_chain_solana::chain::SolanaChainProvider;
//! use x402_facilitator_local::FacilitatorLocal;
//!
//! let provider = SolanaChainProvider::from_config(&config).await?;
//! let facilitator = FacilitatorLocal::new(provider);
//! let response = facilitator.verify(&verify_request).await;
//! ```

pub mod facilitator_local;
pub mod util;

pub use facilitator_local::*;

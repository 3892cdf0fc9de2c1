#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for the x402 payment protocol, scoped to protocol version 1,
//! scheme `exact`, on Solana.
//!
//! This crate provides the foundational types for implementing HTTP 402
//! Payment Required flows: CAIP-2 chain identifiers, the wire format for
//! verify/settle messages, price-to-atomic-unit conversion, and the
//! supporting ambient config/base64/validation helpers.
//!
//! # Modules
//!
//! - [`chain`] - Blockchain identifiers (CAIP-2 chain IDs)
//! - [`config`] - Environment variable resolution for config values
//! - [`networks`] - Registry of well-known Solana networks and USDC
//! - [`proto`] - Wire format types for verify/settle/supported messages
//! - [`util`] - Helper types (base64, money amounts)

pub mod chain;
pub mod config;
pub mod networks;
pub mod proto;
pub mod util;

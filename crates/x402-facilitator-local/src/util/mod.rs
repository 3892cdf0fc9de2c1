//! Helper types used throughout the x402-facilitator-local crate:
//!
//! - [`sig_down`] - Graceful shutdown signal handling

pub mod sig_down;

pub use sig_down::*;

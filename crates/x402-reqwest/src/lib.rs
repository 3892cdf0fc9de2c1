#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Reqwest middleware for automatic [x402](https://www.x402.org) payment handling on Solana.
//!
//! This crate provides [`X402Client`], a `reqwest-middleware` [`Middleware`](reqwest_middleware::Middleware)
//! that automatically handles `402 Payment Required` responses. When a request receives a 402
//! response, the middleware parses the accepted payment requirements, selects one, builds and
//! signs a Solana payment transaction, and retries the request with an `X-Payment` header.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use x402_reqwest::{ReqwestWithPayments, ReqwestWithPaymentsBuild, X402Client};
//! use solana_client::nonblocking::rpc_client::RpcClient;
//! use solana_keypair::Keypair;
//! use reqwest::Client;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let signer = Keypair::new();
//! let rpc = RpcClient::new("https://api.devnet.solana.com".to_string());
//! let x402_client = X402Client::new(signer, rpc).with_max_atomic_amount(1_000_000);
//!
//! let http_client = Client::new().with_payments(x402_client).build();
//!
//! let response = http_client
//!     .get("https://api.example.com/protected")
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Payment Selection
//!
//! When a 402 response accepts multiple payment requirements, [`X402Client`] picks one via a
//! [`PaymentRequirementsSelector`]. By default it uses [`PreferUsdc`], which prefers the
//! requirement denominated in the network's canonical USDC mint. Supply a different selector
//! via [`X402Client::with_selector`].

mod builder;
mod client;

pub use builder::*;
pub use client::*;

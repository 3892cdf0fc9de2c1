#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Axum middleware for enforcing [x402](https://www.x402.org) payments on protected routes.
//!
//! This middleware validates incoming `X-Payment` headers using a configured x402 facilitator,
//! and settles valid payments after the downstream handler runs.
//!
//! Returns a `402 Payment Required` response if the request lacks a valid payment.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::get};
//! use axum::response::IntoResponse;
//! use http::StatusCode;
//! use x402_axum::X402Middleware;
//! use x402_axum::price::PriceTag;
//!
//! let x402 = X402Middleware::try_from("https://facilitator.example/").unwrap();
//! let price = PriceTag::usd("solana-devnet", "0.01", "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin");
//!
//! let app: Router = Router::new().route(
//!     "/protected",
//!     get(my_handler).layer(x402.with_price_tag(price)),
//! );
//!
//! async fn my_handler() -> impl IntoResponse {
//!     (StatusCode::OK, "This is VIP content!")
//! }
//! ```
//!
//! See [`X402Middleware`] for full configuration options.
//! For low-level interaction with the facilitator, see [`facilitator_client::FacilitatorClient`].
//!
//! ## Configuration Notes
//!
//! - **[`X402Middleware::with_price_tag`]** sets the assets and amounts accepted for payment.
//! - **[`X402Middleware::with_description`]** and **[`X402Middleware::with_mime_type`]** are optional but help the payer understand what is being paid for.
//! - **[`X402Middleware::with_resource`]** explicitly sets the full URI of the protected resource.
//! - **[`X402Middleware::with_base_url`]** sets the base URL for computing full resource URLs dynamically.
//!   If not set, defaults to `http://localhost/` (avoid in production).

pub mod facilitator;
pub mod facilitator_client;
pub mod layer;
pub mod price;
pub mod route;

pub use layer::X402Middleware;

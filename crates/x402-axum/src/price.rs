//! Price specification for a protected route.
//!
//! A route is protected by one or more [`PriceTag`]s: either a plain USD price,
//! resolved against the compiled-in USDC deployment for the tag's network, or
//! an explicit token amount and asset. [`PriceTag::resolve`] turns either form
//! into the `(max_amount_required, asset)` pair [`crate::layer`] needs to build
//! [`x402_types::proto::PaymentRequirements`].

use x402_types::networks;
use x402_types::util::money_amount::{MoneyAmount, MoneyAmountParseError};

/// An explicit token asset: mint address, decimals, and a display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asset {
    pub address: String,
    pub decimals: u8,
    pub name: String,
}

/// A price, either a USD amount (resolved against the network's default USDC
/// deployment) or an explicit token amount and asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Price {
    Usd(String),
    Token { amount: String, asset: Asset },
}

/// One price a protected route accepts, scoped to a single Solana network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceTag {
    pub network: String,
    pub price: Price,
    pub pay_to: String,
}

/// Error resolving a [`PriceTag`] into an atomic amount and asset.
#[derive(Debug, thiserror::Error)]
pub enum PriceTagError {
    #[error("invalid money amount: {0}")]
    Money(#[from] MoneyAmountParseError),
    #[error("no compiled-in default token for network {0}")]
    NoDefaultToken(String),
}

impl PriceTag {
    /// Builds a price tag for an explicit USD amount, resolved to USDC at settlement.
    pub fn usd(network: impl Into<String>, amount: impl Into<String>, pay_to: impl Into<String>) -> Self {
        PriceTag {
            network: network.into(),
            price: Price::Usd(amount.into()),
            pay_to: pay_to.into(),
        }
    }

    /// Builds a price tag for an explicit token amount and asset.
    pub fn token(
        network: impl Into<String>,
        amount: impl Into<String>,
        asset: Asset,
        pay_to: impl Into<String>,
    ) -> Self {
        PriceTag {
            network: network.into(),
            price: Price::Token {
                amount: amount.into(),
                asset,
            },
            pay_to: pay_to.into(),
        }
    }

    /// Resolves this tag into the `(max_amount_required, asset)` pair used to
    /// fill out [`x402_types::proto::PaymentRequirements`].
    pub fn resolve(&self) -> Result<(String, Asset), PriceTagError> {
        match &self.price {
            Price::Token { amount, asset } => Ok((amount.clone(), asset.clone())),
            Price::Usd(raw) => {
                let money = MoneyAmount::parse(raw)?;
                let default_token = networks::usdc_for_network(&self.network)
                    .ok_or_else(|| PriceTagError::NoDefaultToken(self.network.clone()))?;
                let atomic = money.to_atomic(default_token.decimals as u32)?;
                Ok((
                    atomic.to_string(),
                    Asset {
                        address: default_token.address.to_string(),
                        decimals: default_token.decimals,
                        name: default_token.name.to_string(),
                    },
                ))
            }
        }
    }
}

/// Converts a value into a list of [`PriceTag`]s, so builder methods on
/// [`crate::layer::X402Middleware`] can accept either a single tag or a collection.
pub trait IntoPriceTag {
    fn into_price_tags(self) -> Vec<PriceTag>;
}

impl IntoPriceTag for PriceTag {
    fn into_price_tags(self) -> Vec<PriceTag> {
        vec![self]
    }
}

impl IntoPriceTag for Vec<PriceTag> {
    fn into_price_tags(self) -> Vec<PriceTag> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_price_resolves_to_compiled_in_usdc() {
        let tag = PriceTag::usd("solana-devnet", "0.01", "PAYTO1111111111111111111111111111111111111");
        let (amount, asset) = tag.resolve().unwrap();
        assert_eq!(amount, "10000");
        assert_eq!(asset.name, "USDC");
    }

    #[test]
    fn usd_price_rejects_unknown_network() {
        let tag = PriceTag::usd("solana-nonesuch", "0.01", "pay");
        assert!(matches!(tag.resolve(), Err(PriceTagError::NoDefaultToken(_))));
    }

    #[test]
    fn token_price_passes_through_unchanged() {
        let asset = Asset {
            address: "mint".to_string(),
            decimals: 9,
            name: "WIF".to_string(),
        };
        let tag = PriceTag::token("solana-devnet", "500", asset.clone(), "pay");
        let (amount, resolved_asset) = tag.resolve().unwrap();
        assert_eq!(amount, "500");
        assert_eq!(resolved_asset, asset);
    }
}

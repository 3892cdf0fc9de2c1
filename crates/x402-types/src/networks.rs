//! Known Solana networks and the compiled-in USDC default asset.
//!
//! x402 protocol v1 identifies networks by short names (e.g. `"solana"`,
//! `"solana-devnet"`) rather than raw CAIP-2 chain IDs. This module keeps
//! that mapping, plus the USDC mint/decimals table the price-to-atomic-unit
//! conversion falls back to when a request doesn't name an explicit asset.
//!
//! # CAIP-2 Standard
//!
//! A CAIP-2 chain ID consists of two parts separated by a colon:
//! - **Namespace**: the blockchain ecosystem (here, always `"solana"`)
//! - **Reference**: the chain-specific identifier — for Solana, the first
//!   32 characters of the genesis block hash.
//!
//! See <https://chainagnostic.org/CAIPs/caip-2>.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::chain::ChainId;

/// A known network definition with its chain ID and human-readable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    /// Human-readable network name (e.g., "solana", "solana-devnet")
    pub name: &'static str,
    /// CAIP-2 namespace, always `"solana"` in this crate.
    pub namespace: &'static str,
    /// Chain reference: the first 32 characters of the genesis block hash.
    pub reference: &'static str,
}

impl NetworkInfo {
    /// Create a ChainId from this network info
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.namespace, self.reference)
    }
}

/// The Solana networks this facilitator recognizes.
pub static KNOWN_NETWORKS: &[NetworkInfo] = &[
    NetworkInfo {
        name: "solana",
        namespace: "solana",
        reference: "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp",
    },
    NetworkInfo {
        name: "solana-devnet",
        namespace: "solana",
        reference: "EtWTRABZaYq6iMfeYKouRu166VU2xqa1",
    },
];

static NAME_TO_CHAIN_ID: LazyLock<HashMap<&'static str, ChainId>> = LazyLock::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.name, n.chain_id()))
        .collect()
});

static CHAIN_ID_TO_NAME: LazyLock<HashMap<ChainId, &'static str>> = LazyLock::new(|| {
    KNOWN_NETWORKS
        .iter()
        .map(|n| (n.chain_id(), n.name))
        .collect()
});

/// Looks up a [`ChainId`] by its x402 v1 network name (e.g. `"solana-devnet"`).
pub fn chain_id_by_network_name(name: &str) -> Option<&ChainId> {
    NAME_TO_CHAIN_ID.get(name)
}

/// Reverse of [`chain_id_by_network_name`].
pub fn network_name_by_chain_id(chain_id: &ChainId) -> Option<&'static str> {
    CHAIN_ID_TO_NAME.get(chain_id).copied()
}

/// A compiled-in default token, used when a price is given in USD and the
/// caller did not supply a `defaultToken` asset descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultTokenInfo {
    /// Base58 mint address.
    pub address: &'static str,
    pub decimals: u8,
    pub name: &'static str,
}

/// USDC mint addresses, keyed by Solana network name.
///
/// Used by the price-to-atomic-unit conversion (§4.2) when a route specifies
/// a plain USD amount rather than an explicit asset.
pub static USDC: LazyLock<HashMap<&'static str, DefaultTokenInfo>> = LazyLock::new(|| {
    HashMap::from([
        (
            "solana",
            DefaultTokenInfo {
                address: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
                decimals: 6,
                name: "USDC",
            },
        ),
        (
            "solana-devnet",
            DefaultTokenInfo {
                address: "4zMMC9srt5Ri5X14GAgXhaHii3GnPAEERYPJgZ5nc4pb",
                decimals: 6,
                name: "USDC",
            },
        ),
    ])
});

/// Looks up the compiled-in USDC deployment for a network name.
pub fn usdc_for_network(network: &str) -> Option<DefaultTokenInfo> {
    USDC.get(network).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_from_network_name() {
        let solana = chain_id_by_network_name("solana").unwrap();
        assert_eq!(solana.namespace, "solana");
        assert_eq!(solana.reference, "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp");

        let devnet = chain_id_by_network_name("solana-devnet").unwrap();
        assert_eq!(devnet.reference, "EtWTRABZaYq6iMfeYKouRu166VU2xqa1");

        assert!(chain_id_by_network_name("unknown").is_none());
    }

    #[test]
    fn test_network_name_by_chain_id() {
        let chain_id = ChainId::new("solana", "5eykt4UsFv8P8NJdTREpY1vzqKqZKvdp");
        assert_eq!(network_name_by_chain_id(&chain_id), Some("solana"));

        let unknown = ChainId::new("solana", "unknown-reference-000000000000");
        assert!(network_name_by_chain_id(&unknown).is_none());
    }

    #[test]
    fn test_usdc_lookup() {
        let usdc = usdc_for_network("solana").unwrap();
        assert_eq!(usdc.decimals, 6);
        assert_eq!(usdc.address, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
        assert!(usdc_for_network("solana-mainnet-typo").is_none());
    }
}

//! Chains the pay-per-view contracts are deployed on.

use alloy_primitives::{Address, address};

/// Base Mainnet chain ID.
pub const BASE_MAINNET: u64 = 8453;

/// Base Sepolia (testnet) chain ID.
pub const BASE_SEPOLIA: u64 = 84532;

/// Ethereum Mainnet chain ID.
pub const ETHEREUM_MAINNET: u64 = 1;

/// USDC contract address on Base Mainnet.
pub const USDC_BASE: Address = address!("833589fCD6eDb6E08f4c7C32D4f71b54bdA02913");

/// USDC contract address on Base Sepolia.
pub const USDC_BASE_SEPOLIA: Address = address!("036CbD53842c5426634e7929541eC2318f3dCF7e");

/// USDC contract address on Ethereum Mainnet.
pub const USDC_ETHEREUM: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// A supported chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownNetwork {
    /// Short name used in configuration and logs.
    pub name: &'static str,
    /// EIP-155 chain ID.
    pub chain_id: u64,
    /// USDC deployment the listing prices refer to.
    pub usdc: Address,
    /// Whether the chain is a testnet.
    pub testnet: bool,
}

/// All supported chains.
pub const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        name: "base",
        chain_id: BASE_MAINNET,
        usdc: USDC_BASE,
        testnet: false,
    },
    KnownNetwork {
        name: "base-sepolia",
        chain_id: BASE_SEPOLIA,
        usdc: USDC_BASE_SEPOLIA,
        testnet: true,
    },
    KnownNetwork {
        name: "ethereum",
        chain_id: ETHEREUM_MAINNET,
        usdc: USDC_ETHEREUM,
        testnet: false,
    },
];

/// Looks a chain up by ID.
#[must_use]
pub fn network_by_chain_id(chain_id: u64) -> Option<&'static KnownNetwork> {
    KNOWN_NETWORKS.iter().find(|n| n.chain_id == chain_id)
}

/// Looks a chain up by its short name.
#[must_use]
pub fn network_by_name(name: &str) -> Option<&'static KnownNetwork> {
    KNOWN_NETWORKS
        .iter()
        .find(|n| n.name.eq_ignore_ascii_case(name))
}

// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain types, constants and unit conversions.

/// EVM network configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: &'static str,
    /// Chain ID
    pub chain_id: u64,
    /// RPC endpoint URL
    pub rpc_url: &'static str,
    /// Block explorer URL
    pub explorer_url: &'static str,
}

/// Avalanche C-Chain Mainnet configuration.
pub const AVAX_MAINNET: NetworkConfig = NetworkConfig {
    name: "Avalanche C-Chain",
    chain_id: 43114,
    rpc_url: "https://api.avax.network/ext/bc/C/rpc",
    explorer_url: "https://snowtrace.io",
};

/// Avalanche Fuji Testnet configuration.
pub const AVAX_FUJI: NetworkConfig = NetworkConfig {
    name: "Avalanche Fuji Testnet",
    chain_id: 43113,
    rpc_url: "https://api.avax-test.network/ext/bc/C/rpc",
    explorer_url: "https://testnet.snowtrace.io",
};

/// ERC-20 token descriptor.
#[derive(Debug, Clone)]
pub struct Erc20Token {
    pub symbol: &'static str,
    pub name: &'static str,
    pub decimals: u8,
    /// Mainnet contract address
    pub mainnet_address: Option<&'static str>,
    /// Fuji testnet contract address
    pub fuji_address: Option<&'static str>,
}

/// Euro settlement token (`rEUR`) deployed on Fuji. On-ramps pay this token
/// out of the reserve, off-ramps collect it back.
pub const SETTLEMENT_TOKEN: Erc20Token = Erc20Token {
    symbol: "rEUR",
    name: "Relational Euro",
    decimals: 6,
    mainnet_address: None,
    fuji_address: Some("0x76568BEd5Acf1A5Cd888773C8cAe9ea2a9131A63"),
};

/// Scale factor between euro cents (2 decimals) and settlement token units
/// (6 decimals).
pub const MINOR_TO_TOKEN_SCALE: u128 = 10_000;

/// Convert euro cents to settlement token units.
pub fn minor_to_token_units(amount_minor: u64) -> u128 {
    amount_minor as u128 * MINOR_TO_TOKEN_SCALE
}

/// Format settlement token units as a euro decimal string ("25.50").
pub fn format_token_units(amount: u128) -> String {
    let minor = amount / MINOR_TO_TOKEN_SCALE;
    format!("{}.{:02}", minor / 100, minor % 100)
}

/// Errors that can occur during chain operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Chain unavailable: {0}")]
    Unavailable(String),

    #[error("Insufficient reserve balance: have {available}, need {required}")]
    InsufficientReserve { available: u128, required: u128 },

    #[error("Transaction failed: {0}")]
    TxFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_units_scale_to_six_decimals() {
        // 25.50 EUR = 2550 cents = 25_500_000 token units
        assert_eq!(minor_to_token_units(2550), 25_500_000);
        assert_eq!(minor_to_token_units(0), 0);
        assert_eq!(minor_to_token_units(1), 10_000);
    }

    #[test]
    fn token_units_format_as_euro_string() {
        assert_eq!(format_token_units(25_500_000), "25.50");
        assert_eq!(format_token_units(10_000), "0.01");
        assert_eq!(format_token_units(0), "0.00");
        assert_eq!(format_token_units(10_000_000_000), "10000.00");
    }

    #[test]
    fn settlement_token_targets_fuji() {
        assert_eq!(SETTLEMENT_TOKEN.decimals, 6);
        assert!(SETTLEMENT_TOKEN.fuji_address.is_some());
    }
}

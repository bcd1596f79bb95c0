//! Supported payout tokens

use super::SettlementError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSpec {
    pub symbol: String,
    /// Contract address on the transfer network
    pub contract: String,
    pub decimals: u32,
}

impl TokenSpec {
    pub fn new(symbol: &str, contract: &str, decimals: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            contract: contract.to_string(),
            decimals,
        }
    }

    /// Convert a decimal amount to integer base units.
    ///
    /// Rejects non-positive amounts and amounts finer than the token's precision.
    pub fn to_base_units(&self, amount: Decimal) -> Result<u128, SettlementError> {
        let invalid = |reason: &str| SettlementError::InvalidAmount {
            amount,
            token: self.symbol.clone(),
            reason: reason.to_string(),
        };

        if amount <= Decimal::ZERO {
            return Err(invalid("amount must be positive"));
        }
        if amount.normalize().scale() > self.decimals {
            return Err(invalid("more precision than the token supports"));
        }

        let factor = Decimal::from_i128_with_scale(10i128.pow(self.decimals), 0);
        amount
            .checked_mul(factor)
            .and_then(|units| units.to_u128())
            .ok_or_else(|| invalid("amount out of range"))
    }

    /// True when `units / units_per_token` always fits this token's precision
    pub fn divides_evenly(&self, units_per_token: u64) -> bool {
        units_per_token > 0
            && 10u128
                .checked_pow(self.decimals)
                .is_some_and(|scale| scale % u128::from(units_per_token) == 0)
    }
}

/// Fixed registry of tokens payouts may use
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    tokens: HashMap<String, TokenSpec>,
}

impl TokenRegistry {
    pub fn new(tokens: Vec<TokenSpec>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|t| (t.symbol.to_uppercase(), t))
                .collect(),
        }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            TokenSpec::new("USDC", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
            TokenSpec::new("USDT", "0xdAC17F958D2ee523a2206206994597C13D831ec7", 6),
        ])
    }

    pub fn get(&self, symbol: &str) -> Result<&TokenSpec, SettlementError> {
        self.tokens
            .get(&symbol.trim().to_uppercase())
            .ok_or_else(|| SettlementError::UnsupportedToken(symbol.to_string()))
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.tokens.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

/// `0x` followed by 40 hex digits
pub fn is_valid_address(address: &str) -> bool {
    match address.strip_prefix("0x") {
        Some(body) => body.len() == 40 && hex::decode(body).is_ok(),
        None => false,
    }
}

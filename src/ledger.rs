//! Participant balances
//!
//! Every movement of wager currency goes through [`Ledger::apply`], which
//! stages a batch of debits and credits and commits them only if every entry
//! succeeds. Escrow on accept, payout on confirm and refunds on void are each
//! a single batch, so a balance can never be left half-moved.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Account that receives quick-match house fees
pub const HOUSE_ACCOUNT: &str = "house";

/// A single balance movement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    Debit { account: String, amount: u64 },
    Credit { account: String, amount: u64 },
}

impl LedgerEntry {
    pub fn debit(account: impl Into<String>, amount: u64) -> Self {
        Self::Debit {
            account: account.into(),
            amount,
        }
    }

    pub fn credit(account: impl Into<String>, amount: u64) -> Self {
        Self::Credit {
            account: account.into(),
            amount,
        }
    }

    fn account(&self) -> &str {
        match self {
            Self::Debit { account, .. } | Self::Credit { account, .. } => account,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient balance for {account}: has {available}, needs {required}")]
    InsufficientBalance {
        account: String,
        available: u64,
        required: u64,
    },

    #[error("Balance overflow for {0}")]
    Overflow(String),

    #[error("Amount must be greater than zero")]
    ZeroAmount,
}

/// In-process balance book
#[derive(Debug, Default)]
pub struct Ledger {
    balances: Mutex<HashMap<String, u64>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.balances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current balance, zero for unknown accounts
    pub fn balance(&self, account: &str) -> u64 {
        self.lock().get(account).copied().unwrap_or(0)
    }

    /// Top up an account from outside the duel flow
    pub fn deposit(&self, account: &str, amount: u64) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        self.apply(&[LedgerEntry::credit(account, amount)])?;
        Ok(self.balance(account))
    }

    /// Apply all entries or none of them.
    pub fn apply(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        let mut balances = self.lock();
        let mut staged: HashMap<&str, u64> = HashMap::new();

        for entry in entries {
            let account = entry.account();
            let current = staged
                .get(account)
                .copied()
                .unwrap_or_else(|| balances.get(account).copied().unwrap_or(0));

            let next = match entry {
                LedgerEntry::Debit { amount, .. } => {
                    current
                        .checked_sub(*amount)
                        .ok_or_else(|| LedgerError::InsufficientBalance {
                            account: account.to_string(),
                            available: current,
                            required: *amount,
                        })?
                }
                LedgerEntry::Credit { amount, .. } => current
                    .checked_add(*amount)
                    .ok_or_else(|| LedgerError::Overflow(account.to_string()))?,
            };
            staged.insert(account, next);
        }

        for (account, balance) in staged {
            balances.insert(account.to_string(), balance);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escrow_is_all_or_nothing() {
        let ledger = Ledger::new();
        ledger.deposit("alice", 150).unwrap();
        ledger.deposit("bob", 50).unwrap();

        let result = ledger.apply(&[
            LedgerEntry::debit("alice", 100),
            LedgerEntry::debit("bob", 100),
        ]);

        assert_eq!(
            result,
            Err(LedgerError::InsufficientBalance {
                account: "bob".to_string(),
                available: 50,
                required: 100,
            })
        );
        assert_eq!(ledger.balance("alice"), 150);
        assert_eq!(ledger.balance("bob"), 50);
    }

    #[test]
    fn test_entries_on_same_account_accumulate() {
        let ledger = Ledger::new();
        ledger.deposit("alice", 100).unwrap();

        ledger
            .apply(&[
                LedgerEntry::debit("alice", 60),
                LedgerEntry::debit("alice", 40),
            ])
            .unwrap();
        assert_eq!(ledger.balance("alice"), 0);

        let overdraw = ledger.apply(&[
            LedgerEntry::credit("alice", 10),
            LedgerEntry::debit("alice", 20),
        ]);
        assert!(overdraw.is_err());
        assert_eq!(ledger.balance("alice"), 0);
    }

    #[test]
    fn test_overflow_rejected() {
        let ledger = Ledger::new();
        ledger.deposit("whale", u64::MAX).unwrap();
        assert_eq!(
            ledger.apply(&[LedgerEntry::credit("whale", 1)]),
            Err(LedgerError::Overflow("whale".to_string()))
        );
    }

    #[test]
    fn test_zero_deposit_rejected() {
        let ledger = Ledger::new();
        assert_eq!(ledger.deposit("alice", 0), Err(LedgerError::ZeroAmount));
    }
}

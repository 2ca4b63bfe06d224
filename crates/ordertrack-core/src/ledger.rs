//! Wallet ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LedgerType {
    Credit,
    Debit,
}

/// One balance-affecting cause, recorded after its wallet increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletLedgerEntry {
    pub tracker_id: String,
    pub user_id: String,
    pub credit: Decimal,
    pub deduction: Decimal,
    pub reason: String,
    pub invoker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    #[serde(rename = "type")]
    pub entry_type: LedgerType,
    pub timestamp: DateTime<Utc>,
}

impl WalletLedgerEntry {
    pub const INVOKER: &'static str = "order-tracker";

    /// Build the entry for a signed increment of `amount` that produced
    /// `balance_after`.
    pub fn for_increment(
        tracker_id: String,
        user_id: &str,
        amount: Decimal,
        reason: impl Into<String>,
        order_id: Option<String>,
        balance_after: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (credit, deduction, entry_type) = if amount.is_sign_negative() {
            (Decimal::ZERO, -amount, LedgerType::Debit)
        } else {
            (amount, Decimal::ZERO, LedgerType::Credit)
        };
        Self {
            tracker_id,
            user_id: user_id.to_string(),
            credit,
            deduction,
            reason: reason.into(),
            invoker: Self::INVOKER.to_string(),
            order_id,
            balance_before: balance_after - amount,
            balance_after,
            entry_type,
            timestamp,
        }
    }

    /// Signed effect of this entry on the balance.
    pub fn net(&self) -> Decimal {
        self.credit - self.deduction
    }
}

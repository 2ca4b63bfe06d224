//! Position settlement.
//!
//! Closes a triggered position in the store and applies its wallet effects:
//!
//! 1. Load the stored position
//! 2. Resolve and validate exit price, entry price and quantity
//! 3. Compute gross realized PnL
//! 4. Conditionally close the stored position (the idempotency gate)
//! 5. Stamp the originating order FILLED with the PnL
//! 6. Write the auto-close order
//! 7. Credit PnL and margin, debit the brokerage fee, one ledger entry each
//!
//! Steps 5 to 7 are individually best-effort: a failed write is logged and
//! the sequence moves on. The brokerage fee never reduces the realized PnL;
//! it is only ever its own debit.

use crate::error::{SettlementError, SettlementResult};
use chrono::{DateTime, Utc};
use ordertrack_core::{
    CloseOutcome, OrderMetadata, OrderOperation, OrderRecord, OrderStatus, PositionClose,
    PositionKind, PositionStatus, Price, Side, Size, StoredPosition, WalletLedgerEntry,
};
use ordertrack_persistence::DynGateway;
use ordertrack_telemetry::Metrics;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

const SYSTEM_SOURCE: &str = "system";
const AUTO_STRATEGY: &str = "auto";

/// Platform fee and default constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementConfig {
    /// Debited from the wallet on every close.
    pub brokerage_fee: Decimal,
    /// Fee in local currency, recorded on the auto-close order.
    pub fee_in_local: Decimal,
    /// Used when the stored position carries no leverage.
    pub default_leverage: Decimal,
    /// Used when the stored position carries no currency.
    pub currency: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            brokerage_fee: Decimal::new(23529412, 8),
            fee_in_local: Decimal::from(20),
            default_leverage: Decimal::from(200),
            currency: "USD".to_string(),
        }
    }
}

/// How a close was caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementContext {
    /// Level that fired; takes precedence over `exit_price`.
    pub trigger_price: Option<Price>,
    pub exit_price: Option<Price>,
    pub kind: PositionKind,
    /// Originating order, stamped FILLED on close.
    pub order_id: Option<String>,
}

/// Summary of a completed close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub pos_id: String,
    pub close_key: String,
    pub exit_price: Price,
    pub realized_pnl: Decimal,
    pub auto_order_id: String,
    /// Wallet mutations that succeeded, in order applied.
    pub wallet_mutations: Vec<Decimal>,
}

/// A single wallet effect with its ledger reason.
struct WalletEffect<'a> {
    cause: &'static str,
    amount: Decimal,
    reason: &'a str,
}

pub struct SettlementService {
    gateway: DynGateway,
    config: SettlementConfig,
    close_seq: AtomicU64,
}

impl SettlementService {
    pub fn new(gateway: DynGateway, config: SettlementConfig) -> Self {
        Self {
            gateway,
            config,
            close_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    /// Close `pos_id` with `status` (normally CLOSED) and settle it.
    pub async fn close_position(
        &self,
        user_id: &str,
        pos_id: &str,
        status: PositionStatus,
        ctx: SettlementContext,
    ) -> SettlementResult<SettlementReport> {
        let started = Instant::now();
        let result = self.settle(user_id, pos_id, status, &ctx).await;

        let outcome = match &result {
            Ok(_) => "closed",
            Err(SettlementError::AlreadyClosed { .. }) => "already_closed",
            Err(SettlementError::PositionNotFound(_)) => "not_found",
            Err(SettlementError::InvalidInput { .. }) => "invalid_input",
            Err(SettlementError::Persistence(_)) => "error",
        };
        Metrics::settlement(outcome);
        Metrics::settlement_duration(ctx.kind.as_str(), started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn settle(
        &self,
        user_id: &str,
        pos_id: &str,
        status: PositionStatus,
        ctx: &SettlementContext,
    ) -> SettlementResult<SettlementReport> {
        // 1. Load
        let stored = match self.gateway.fetch_position(pos_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                error!(pos_id = %pos_id, user_id = %user_id, "Position not found in store, cannot settle");
                return Err(SettlementError::PositionNotFound(pos_id.to_string()));
            }
            Err(e) => {
                error!(?e, pos_id = %pos_id, "Failed to load position for settlement");
                Metrics::persistence_error("fetch_position");
                return Err(e.into());
            }
        };
        if stored.user_id != user_id {
            warn!(
                pos_id = %pos_id,
                user_id = %user_id,
                stored_user_id = %stored.user_id,
                "Stored position belongs to a different user"
            );
        }

        // 2. Validate
        let exit_price = ctx
            .trigger_price
            .or(ctx.exit_price)
            .ok_or_else(|| invalid(pos_id, "exitPrice"))?;
        let entry_price = stored
            .entry_price
            .ok_or_else(|| invalid(pos_id, "entryPrice"))?;
        let quantity = stored
            .effective_quantity()
            .ok_or_else(|| invalid(pos_id, "quantity"))?;

        // 3. PnL, checked before anything is written
        let realized_pnl = realized_pnl(stored.position_type, entry_price, exit_price, quantity)
            .ok_or_else(|| invalid(pos_id, "realizedPnl"))?;
        let total_value = quantity
            .notional(exit_price)
            .ok_or_else(|| invalid(pos_id, "totalValue"))?;

        // 4. Conditional close
        let now = Utc::now();
        let close_key = self.next_close_key(pos_id);
        let close = PositionClose {
            status,
            exit_price,
            closed_at: now,
            realized_pnl,
            position_closed_type: ctx.kind.closed_type().to_string(),
            close_key: close_key.clone(),
        };
        match self.gateway.close_position(pos_id, close).await {
            Ok(CloseOutcome::Closed) => {
                info!(
                    pos_id = %pos_id,
                    user_id = %user_id,
                    close_key = %close_key,
                    exit_price = %exit_price,
                    realized_pnl = %realized_pnl,
                    closed_type = ctx.kind.closed_type(),
                    "Position closed"
                );
            }
            Ok(CloseOutcome::AlreadyClosed(current)) => {
                warn!(pos_id = %pos_id, status = %current, "Position already settled, skipping");
                return Err(SettlementError::AlreadyClosed {
                    pos_id: pos_id.to_string(),
                    status: current,
                });
            }
            Err(e) => {
                error!(?e, pos_id = %pos_id, "Failed to persist position close, continuing");
                Metrics::persistence_error("close_position");
            }
        }

        // 5. Originating order
        if let Some(order_id) = &ctx.order_id {
            if let Err(e) = self
                .gateway
                .mark_order_filled(order_id, realized_pnl, now)
                .await
            {
                warn!(?e, order_id = %order_id, pos_id = %pos_id, "Failed to stamp originating order");
                Metrics::persistence_error("mark_order_filled");
            }
        }

        // 6. Auto-close order
        let order = self.auto_close_order(
            &stored,
            user_id,
            exit_price,
            quantity,
            total_value,
            realized_pnl,
            &close_key,
            now,
        );
        let auto_order_id = order.order_id.clone();
        if let Err(e) = self.gateway.put_order(order).await {
            error!(?e, order_id = %auto_order_id, pos_id = %pos_id, "Failed to write auto-close order");
            Metrics::persistence_error("put_order");
        }

        // 7. Wallet
        let pnl_reason = format!("PnL for {}", ctx.kind.reason_label());
        let margin = stored.contribution_amount.unwrap_or_default();
        let mut effects = Vec::with_capacity(3);
        if !realized_pnl.is_zero() {
            effects.push(WalletEffect {
                cause: "pnl",
                amount: realized_pnl,
                reason: &pnl_reason,
            });
        }
        if margin > Decimal::ZERO {
            effects.push(WalletEffect {
                cause: "margin",
                amount: margin,
                reason: "Margin Returned",
            });
        }
        effects.push(WalletEffect {
            cause: "fee",
            amount: -self.config.brokerage_fee,
            reason: "Brokerage Fees",
        });

        let mut wallet_mutations = Vec::with_capacity(effects.len());
        for effect in effects {
            if self
                .apply_wallet_effect(user_id, &close_key, &auto_order_id, &effect, now)
                .await
            {
                wallet_mutations.push(effect.amount);
            }
        }

        Ok(SettlementReport {
            pos_id: pos_id.to_string(),
            close_key,
            exit_price,
            realized_pnl,
            auto_order_id,
            wallet_mutations,
        })
    }

    fn next_close_key(&self, pos_id: &str) -> String {
        let seq = self.close_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{pos_id}:{seq}")
    }

    #[allow(clippy::too_many_arguments)]
    fn auto_close_order(
        &self,
        stored: &StoredPosition,
        user_id: &str,
        exit_price: Price,
        quantity: Size,
        total_value: Decimal,
        realized_pnl: Decimal,
        close_key: &str,
        now: DateTime<Utc>,
    ) -> OrderRecord {
        let operation = OrderOperation::closing(stored.position_type);
        let currency = stored
            .currency
            .clone()
            .unwrap_or_else(|| self.config.currency.clone());

        OrderRecord {
            order_id: OrderRecord::auto_close_id(now),
            user_id: user_id.to_string(),
            stock_symbol: stored.asset_symbol.clone(),
            side: stored.position_type,
            operation,
            order_type: OrderRecord::MARKET.to_string(),
            status: OrderStatus::Filled,
            price: exit_price,
            size: quantity,
            lot: stored.lot.unwrap_or(quantity),
            fee: self.config.brokerage_fee,
            fee_in_local: self.config.fee_in_local,
            leverage: stored.leverage.unwrap_or(self.config.default_leverage),
            margin_amount: stored.contribution_amount.unwrap_or_default(),
            stop_loss: stored.stop_loss,
            take_profit: stored.take_profit,
            position_id: stored.position_id.clone(),
            currency: currency.clone(),
            order_message: OrderRecord::FILLED_AT_MARKET.to_string(),
            total_value,
            pnl: Some(realized_pnl),
            close_key: Some(close_key.to_string()),
            meta_data: OrderMetadata {
                source: SYSTEM_SOURCE.to_string(),
                strategy: AUTO_STRATEGY.to_string(),
                operation,
                order_type: OrderRecord::MARKET.to_string(),
                source_currency: currency,
                size: quantity,
            },
            created_at: now,
            updated_at: now,
        }
    }

    /// Increment the wallet and record the paired ledger entry. Returns
    /// whether the increment went through.
    async fn apply_wallet_effect(
        &self,
        user_id: &str,
        close_key: &str,
        order_id: &str,
        effect: &WalletEffect<'_>,
        now: DateTime<Utc>,
    ) -> bool {
        let balance_after = match self.gateway.increment_balance(user_id, effect.amount).await {
            Ok(balance) => balance,
            Err(e) => {
                error!(
                    ?e,
                    user_id = %user_id,
                    cause = effect.cause,
                    amount = %effect.amount,
                    "Wallet increment failed"
                );
                Metrics::persistence_error("increment_balance");
                return false;
            }
        };
        Metrics::wallet_mutation(effect.cause);
        debug!(
            user_id = %user_id,
            cause = effect.cause,
            amount = %effect.amount,
            balance_after = %balance_after,
            "Wallet updated"
        );

        let entry = WalletLedgerEntry::for_increment(
            format!("{close_key}:{}", effect.cause),
            user_id,
            effect.amount,
            effect.reason,
            Some(order_id.to_string()),
            balance_after,
            now,
        );
        if let Err(e) = self.gateway.put_ledger_entry(entry).await {
            error!(?e, user_id = %user_id, cause = effect.cause, "Failed to write ledger entry");
            Metrics::persistence_error("put_ledger_entry");
        }
        true
    }
}

fn invalid(pos_id: &str, field: &'static str) -> SettlementError {
    warn!(pos_id = %pos_id, field, "Invalid settlement input, aborting");
    SettlementError::InvalidInput {
        pos_id: pos_id.to_string(),
        field,
    }
}

/// Gross realized PnL, rounded to 8 decimal places. `None` on overflow.
pub fn realized_pnl(side: Side, entry: Price, exit: Price, quantity: Size) -> Option<Decimal> {
    let per_unit = match side {
        Side::Long => exit.inner().checked_sub(entry.inner())?,
        Side::Short => entry.inner().checked_sub(exit.inner())?,
    };
    per_unit
        .checked_mul(quantity.inner())
        .map(|pnl| pnl.round_dp(8))
}

//! Position registry actor.
//!
//! A single actor task owns both maps (tracked positions and pending limit
//! orders, each keyed symbol -> user -> position id), so every mutation is
//! serialized and a key lives in at most one map at a time.
//!
//! # Actor vs Handle
//!
//! - [`RegistryTask`] holds the authoritative maps and processes messages
//!   sequentially. It never awaits I/O.
//! - [`RegistryHandle`] is the cloneable front end. It classifies input,
//!   performs the store fallback for updates that miss memory, and exposes
//!   a DashMap interest cache (symbol -> entry count) for synchronous tick
//!   filtering on the dispatch path.
//!
//! # Subscription intents
//!
//! Every operation compares the symbol's interest before and after it ran.
//! The first entry for a symbol emits a subscribe intent, removal of the
//! last one an unsubscribe intent. An operation that removes and re-inserts
//! the same key therefore emits nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use ordertrack_core::{
    PendingOrder, PositionDraft, PositionKey, PositionKind, PositionPatch, PositionRecord, Price,
    SubscriptionTask, TrackedPosition, TriggerHit,
};
use ordertrack_persistence::DynGateway;
use ordertrack_telemetry::Metrics;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{PositionError, PositionResult};
use crate::evaluator::TriggerEvaluator;

// ============================================================================
// Book
// ============================================================================

/// Nested symbol -> user -> position id map that prunes empty levels.
#[derive(Debug)]
struct Book<T> {
    by_symbol: HashMap<String, BTreeMap<String, BTreeMap<String, T>>>,
    len: usize,
}

impl<T> Default for Book<T> {
    fn default() -> Self {
        Self {
            by_symbol: HashMap::new(),
            len: 0,
        }
    }
}

impl<T: Clone> Book<T> {
    fn insert(&mut self, key: &PositionKey, value: T) {
        let previous = self
            .by_symbol
            .entry(key.symbol.clone())
            .or_default()
            .entry(key.user_id.clone())
            .or_default()
            .insert(key.pos_id.clone(), value);
        if previous.is_none() {
            self.len += 1;
        }
    }

    fn remove(&mut self, key: &PositionKey) -> Option<T> {
        let users = self.by_symbol.get_mut(&key.symbol)?;
        let positions = users.get_mut(&key.user_id)?;
        let removed = positions.remove(&key.pos_id)?;
        self.len -= 1;

        if positions.is_empty() {
            users.remove(&key.user_id);
        }
        if users.is_empty() {
            self.by_symbol.remove(&key.symbol);
        }
        Some(removed)
    }

    fn get(&self, key: &PositionKey) -> Option<&T> {
        self.by_symbol
            .get(&key.symbol)?
            .get(&key.user_id)?
            .get(&key.pos_id)
    }

    fn symbol_count(&self, symbol: &str) -> usize {
        self.by_symbol
            .get(symbol)
            .map(|users| users.values().map(BTreeMap::len).sum())
            .unwrap_or(0)
    }

    /// Entries for `symbol` ordered by user then position id.
    fn values_for(&self, symbol: &str) -> Vec<T> {
        self.by_symbol
            .get(symbol)
            .map(|users| {
                users
                    .values()
                    .flat_map(|positions| positions.values().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.len
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// How a registered position is monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monitoring {
    Tracked(PositionKind),
    Pending,
    /// Accepted but not under trigger monitoring.
    Unmonitored,
}

impl Monitoring {
    fn of(record: Option<&PositionRecord>) -> Self {
        match record {
            Some(PositionRecord::Tracked(t)) => Self::Tracked(t.kind),
            Some(PositionRecord::Pending(_)) => Self::Pending,
            None => Self::Unmonitored,
        }
    }
}

/// A pending order filled on a tick. Already removed from the pending map
/// (and, when trackable, inserted into the tracked map).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitFill {
    pub order: PendingOrder,
    pub trackable: bool,
}

/// A tracked position that hit a level. Already removed from the tracked map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFired {
    pub position: TrackedPosition,
    pub hit: TriggerHit,
}

/// Everything one tick decided for its symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub symbol: String,
    pub mark_price: Price,
    pub fills: Vec<LimitFill>,
    pub hits: Vec<TriggerFired>,
}

impl TickOutcome {
    pub fn is_empty(&self) -> bool {
        self.fills.is_empty() && self.hits.is_empty()
    }
}

/// Registry contents for one symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolSnapshot {
    pub tracked: Vec<TrackedPosition>,
    pub pending: Vec<PendingOrder>,
}

// ============================================================================
// RegistryMsg
// ============================================================================

/// Messages for the registry actor.
#[derive(Debug)]
pub enum RegistryMsg {
    /// Insert a classified record, replacing any entry under its key.
    Upsert {
        record: PositionRecord,
        reply: oneshot::Sender<()>,
    },

    /// Merge a patch into an in-memory entry. Replies `None` when the key
    /// is in neither map.
    Update {
        key: PositionKey,
        patch: PositionPatch,
        reply: oneshot::Sender<Option<PositionResult<Monitoring>>>,
    },

    /// Remove from whichever map holds the key.
    Remove {
        key: PositionKey,
        reply: oneshot::Sender<Option<PositionRecord>>,
    },

    /// Run the fill and trigger passes for one mark price.
    EvaluateTick {
        symbol: String,
        mark_price: Price,
        reply: oneshot::Sender<TickOutcome>,
    },

    Get {
        key: PositionKey,
        reply: oneshot::Sender<Option<PositionRecord>>,
    },

    Snapshot {
        symbol: String,
        reply: oneshot::Sender<SymbolSnapshot>,
    },

    /// Graceful shutdown.
    Shutdown,
}

// ============================================================================
// RegistryTask
// ============================================================================

/// Registry actor task.
pub struct RegistryTask {
    rx: mpsc::Receiver<RegistryMsg>,
    tracked: Book<TrackedPosition>,
    pending: Book<PendingOrder>,
    /// symbol -> tracked + pending entries. Shared with the handle.
    interest: Arc<DashMap<String, usize>>,
    intents: mpsc::UnboundedSender<SubscriptionTask>,
}

impl RegistryTask {
    /// Run the registry actor until Shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("RegistryTask started");

        while let Some(msg) = self.rx.recv().await {
            if !self.handle_message(msg) {
                debug!("RegistryTask shutting down");
                break;
            }
        }

        debug!("RegistryTask terminated");
    }

    /// Returns `false` on Shutdown.
    fn handle_message(&mut self, msg: RegistryMsg) -> bool {
        match msg {
            RegistryMsg::Upsert { record, reply } => {
                self.on_upsert(record);
                let _ = reply.send(());
            }
            RegistryMsg::Update { key, patch, reply } => {
                let _ = reply.send(self.on_update(&key, &patch));
            }
            RegistryMsg::Remove { key, reply } => {
                let _ = reply.send(self.on_remove(&key));
            }
            RegistryMsg::EvaluateTick {
                symbol,
                mark_price,
                reply,
            } => {
                let _ = reply.send(self.on_tick(symbol, mark_price));
            }
            RegistryMsg::Get { key, reply } => {
                let _ = reply.send(self.get(&key));
            }
            RegistryMsg::Snapshot { symbol, reply } => {
                let _ = reply.send(SymbolSnapshot {
                    tracked: self.tracked.values_for(&symbol),
                    pending: self.pending.values_for(&symbol),
                });
            }
            RegistryMsg::Shutdown => return false,
        }
        true
    }

    fn on_upsert(&mut self, record: PositionRecord) {
        let key = record.key().clone();
        let before = self.has_interest(&key.symbol);

        self.take(&key);
        self.insert(record);

        self.signal_transition(&key.symbol, before);
    }

    fn on_update(
        &mut self,
        key: &PositionKey,
        patch: &PositionPatch,
    ) -> Option<PositionResult<Monitoring>> {
        let before = self.has_interest(&key.symbol);
        let existing = self.take(key)?;

        let mut draft = PositionDraft::from(&existing);
        draft.apply(patch);
        let result = match draft.classify() {
            Ok(record) => {
                let monitoring = Monitoring::of(record.as_ref());
                if let Some(record) = record {
                    self.insert(record);
                } else {
                    info!(key = %key, "Position no longer monitored after update");
                }
                Ok(monitoring)
            }
            Err(e) => {
                warn!(?e, key = %key, "Update produced an invalid position, keeping previous");
                self.insert(existing);
                Err(e.into())
            }
        };

        self.signal_transition(&key.symbol, before);
        Some(result)
    }

    fn on_remove(&mut self, key: &PositionKey) -> Option<PositionRecord> {
        let before = self.has_interest(&key.symbol);
        let removed = self.take(key);
        if removed.is_some() {
            debug!(key = %key, "Removed from registry");
        }
        self.signal_transition(&key.symbol, before);
        removed
    }

    /// Fill pass over pending orders, then trigger pass over the positions
    /// that were tracked before this tick. Positions promoted by a fill are
    /// inserted afterwards and first evaluated on the next tick.
    fn on_tick(&mut self, symbol: String, mark_price: Price) -> TickOutcome {
        let before = self.has_interest(&symbol);

        let mut fills = Vec::new();
        let mut promoted = Vec::new();
        for order in self.pending.values_for(&symbol) {
            if !TriggerEvaluator::fills(&order, mark_price) {
                continue;
            }
            // Re-check under the actor before mutating.
            let Some(order) = self.pending.remove(&order.key) else {
                continue;
            };
            let filled = order.clone().into_filled();
            let trackable = filled.is_some();
            Metrics::limit_fill(trackable);
            info!(
                key = %order.key,
                category = %order.category,
                limit = %order.entry_price,
                mark_price = %mark_price,
                trackable,
                "Limit order filled"
            );
            promoted.extend(filled);
            fills.push(LimitFill { order, trackable });
        }

        let mut hits = Vec::new();
        for position in self.tracked.values_for(&symbol) {
            let Some(hit) = TriggerEvaluator::check(&position, mark_price) else {
                continue;
            };
            // Out of the map before any settlement is scheduled.
            if self.tracked.remove(&position.key).is_none() {
                continue;
            }
            Metrics::trigger_hit(hit.kind.as_str(), hit.leg.as_str());
            info!(
                key = %position.key,
                kind = %hit.kind,
                leg = hit.leg.as_str(),
                level = %hit.price,
                mark_price = %mark_price,
                "Trigger hit"
            );
            hits.push(TriggerFired { position, hit });
        }

        for position in promoted {
            let key = position.key.clone();
            self.tracked.insert(&key, position);
        }

        self.signal_transition(&symbol, before);
        trace!(symbol = %symbol, fills = fills.len(), hits = hits.len(), "Tick evaluated");

        TickOutcome {
            symbol,
            mark_price,
            fills,
            hits,
        }
    }

    fn get(&self, key: &PositionKey) -> Option<PositionRecord> {
        self.tracked
            .get(key)
            .cloned()
            .map(PositionRecord::Tracked)
            .or_else(|| self.pending.get(key).cloned().map(PositionRecord::Pending))
    }

    fn take(&mut self, key: &PositionKey) -> Option<PositionRecord> {
        self.tracked
            .remove(key)
            .map(PositionRecord::Tracked)
            .or_else(|| self.pending.remove(key).map(PositionRecord::Pending))
    }

    fn insert(&mut self, record: PositionRecord) {
        match record {
            PositionRecord::Tracked(position) => {
                let key = position.key.clone();
                self.tracked.insert(&key, position);
            }
            PositionRecord::Pending(order) => {
                let key = order.key.clone();
                self.pending.insert(&key, order);
            }
        }
    }

    fn has_interest(&self, symbol: &str) -> bool {
        self.tracked.symbol_count(symbol) + self.pending.symbol_count(symbol) > 0
    }

    /// Refresh the interest cache for `symbol` and emit a subscription
    /// intent if its interest flipped.
    fn signal_transition(&mut self, symbol: &str, before: bool) {
        let count = self.tracked.symbol_count(symbol) + self.pending.symbol_count(symbol);
        if count == 0 {
            self.interest.remove(symbol);
        } else {
            self.interest.insert(symbol.to_string(), count);
        }
        Metrics::registry_size(self.tracked.len(), self.pending.len());

        let after = count > 0;
        let intent = match (before, after) {
            (false, true) => SubscriptionTask::Subscribe {
                symbol: symbol.to_string(),
            },
            (true, false) => SubscriptionTask::Unsubscribe {
                symbol: symbol.to_string(),
            },
            _ => return,
        };
        debug!(intent = %intent, "Subscription interest changed");
        if self.intents.send(intent).is_err() {
            warn!(symbol = %symbol, "Subscription coordinator gone, intent dropped");
        }
    }
}

// ============================================================================
// RegistryHandle
// ============================================================================

/// Cloneable handle to the registry actor.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryMsg>,
    interest: Arc<DashMap<String, usize>>,
    gateway: DynGateway,
}

impl RegistryHandle {
    /// Register a position.
    ///
    /// Drafts that classify to neither pending nor tracked are accepted but
    /// not monitored; an earlier entry under the same key is dropped.
    pub async fn add(&self, draft: &PositionDraft) -> PositionResult<Monitoring> {
        let record = draft.classify()?;
        let monitoring = Monitoring::of(record.as_ref());
        match record {
            Some(record) => self.add_record(record).await?,
            None => {
                let key = draft.key();
                let removed = self.remove(&key).await?;
                debug!(key = %key, removed, "Position has no triggers, not monitoring");
            }
        }
        Ok(monitoring)
    }

    pub async fn add_record(&self, record: PositionRecord) -> PositionResult<()> {
        self.request(|reply| RegistryMsg::Upsert { record, reply })
            .await
    }

    /// Merge `patch` into the position under `key` and re-register it.
    ///
    /// A key missing from memory is loaded from the store; a miss there too
    /// is [`PositionError::NotFound`].
    pub async fn update(
        &self,
        key: &PositionKey,
        patch: &PositionPatch,
    ) -> PositionResult<Monitoring> {
        let in_memory = self
            .request(|reply| RegistryMsg::Update {
                key: key.clone(),
                patch: patch.clone(),
                reply,
            })
            .await?;
        if let Some(result) = in_memory {
            return result;
        }

        let stored = self.gateway.fetch_position(&key.pos_id).await?;
        let Some(stored) = stored else {
            warn!(key = %key, "Update for unknown position dropped");
            return Err(PositionError::NotFound(key.to_string()));
        };
        info!(key = %key, status = %stored.status, "Position not in memory, recovered from store");

        let mut draft = stored.to_draft();
        draft.apply(patch);
        self.add(&draft).await
    }

    /// Remove the key from whichever map holds it. Returns whether it was
    /// present.
    pub async fn remove(&self, key: &PositionKey) -> PositionResult<bool> {
        let removed = self
            .request(|reply| RegistryMsg::Remove {
                key: key.clone(),
                reply,
            })
            .await?;
        Ok(removed.is_some())
    }

    /// Unconditional removal that reports a key absent from both maps.
    pub async fn force_delete(&self, key: &PositionKey) -> PositionResult<PositionRecord> {
        self.request(|reply| RegistryMsg::Remove {
            key: key.clone(),
            reply,
        })
        .await?
        .ok_or_else(|| PositionError::NotFound(key.to_string()))
    }

    pub async fn evaluate_tick(&self, symbol: &str, mark_price: Price) -> PositionResult<TickOutcome> {
        self.request(|reply| RegistryMsg::EvaluateTick {
            symbol: symbol.to_string(),
            mark_price,
            reply,
        })
        .await
    }

    pub async fn get(&self, key: &PositionKey) -> PositionResult<Option<PositionRecord>> {
        self.request(|reply| RegistryMsg::Get {
            key: key.clone(),
            reply,
        })
        .await
    }

    pub async fn snapshot(&self, symbol: &str) -> PositionResult<SymbolSnapshot> {
        self.request(|reply| RegistryMsg::Snapshot {
            symbol: symbol.to_string(),
            reply,
        })
        .await
    }

    /// Whether any tracked or pending entry references `symbol`.
    pub fn has_interest(&self, symbol: &str) -> bool {
        self.interest.contains_key(symbol)
    }

    /// Tracked plus pending entries for `symbol`.
    pub fn interest_count(&self, symbol: &str) -> usize {
        self.interest.get(symbol).map(|c| *c).unwrap_or(0)
    }

    pub fn interested_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<_> = self.interest.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(RegistryMsg::Shutdown).await;
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMsg,
    ) -> PositionResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| PositionError::RegistryClosed)?;
        rx.await.map_err(|_| PositionError::RegistryClosed)
    }
}

/// Spawn the registry actor.
///
/// Subscription intents are sent on `intents`; the actor never waits on
/// their consumer.
pub fn spawn_registry(
    capacity: usize,
    gateway: DynGateway,
    intents: mpsc::UnboundedSender<SubscriptionTask>,
) -> (RegistryHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity);
    let interest = Arc::new(DashMap::new());

    let task = RegistryTask {
        rx,
        tracked: Book::default(),
        pending: Book::default(),
        interest: interest.clone(),
        intents,
    };

    let handle = RegistryHandle {
        tx,
        interest,
        gateway,
    };

    let join_handle = tokio::spawn(task.run());

    (handle, join_handle)
}

// ============================================================================
// Tests
// ============================================================================

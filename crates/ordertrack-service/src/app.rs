//! Main application orchestration.
//!
//! Coordinates all components:
//! - Startup recovery of OPEN and PENDING positions into a fresh registry
//! - Registry intents forwarded to the subscription task queue
//! - Queue worker driving feed subscriptions
//! - Price feed connection
//! - Tick dispatch: registry evaluation, then fills and closes as tasks

use crate::config::AppConfig;
use crate::control::ControlService;
use crate::error::AppResult;
use ordertrack_persistence::{AuditWriter, DynGateway, MemoryGateway};
use ordertrack_position::{
    spawn_registry, ActionExecutor, DynPublisher, PositionError, RegistryHandle,
    SettlementService, TracingPublisher,
};
use ordertrack_queue::{spawn_coordinator, InMemoryTaskQueue, QueueWorker};
use ordertrack_telemetry::Metrics;
use ordertrack_ws::{ConnectionManager, DynRegistrar, FeedHandle, HttpRegistrar, PriceTick};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    gateway: DynGateway,
    publisher: DynPublisher,
}

impl Application {
    /// Create an application backed by the in-process store.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let mut gateway = match &config.persistence.seed_file {
            Some(path) => MemoryGateway::from_seed_file(path)?,
            None => MemoryGateway::new(),
        };
        if let Some(dir) = &config.persistence.audit_dir {
            info!(dir = %dir, "Audit trail enabled");
            gateway = gateway.with_audit(AuditWriter::new(dir, config.persistence.audit_buffer_size));
        }
        Ok(Self::with_gateway(config, Arc::new(gateway)))
    }

    pub fn with_gateway(config: AppConfig, gateway: DynGateway) -> Self {
        Self {
            config,
            gateway,
            publisher: Arc::new(TracingPublisher),
        }
    }

    /// Replace the event publisher (tracing by default).
    pub fn with_publisher(mut self, publisher: DynPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Run until ctrl-c.
    pub async fn run(self) -> AppResult<()> {
        let running = self.start().await?;
        info!("Entering main loop");

        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(?e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown signal received");

        running.stop().await;
        Ok(())
    }

    /// Recover positions, start every task and begin connecting to the feed.
    pub async fn start(self) -> AppResult<RunningApp> {
        let config = self.config;
        let gateway = self.gateway;
        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let (registry, registry_task) =
            spawn_registry(config.registry.channel_capacity, gateway.clone(), intents_tx);
        tasks.push(registry_task);

        let queue = Arc::new(InMemoryTaskQueue::new(config.queue.visibility_timeout()));
        tasks.push(spawn_coordinator(
            intents_rx,
            queue.clone(),
            shutdown.child_token(),
        ));

        let registrar: Option<DynRegistrar> = match &config.registrar.base_url {
            Some(url) => {
                let timeout = Duration::from_millis(config.registrar.timeout_ms);
                Some(Arc::new(HttpRegistrar::new(url.clone(), timeout)?))
            }
            None => {
                info!("No registrar configured, skipping symbol notifications");
                None
            }
        };

        let (tick_tx, tick_rx) = mpsc::channel(config.feed.tick_channel_capacity);
        let manager = Arc::new(ConnectionManager::new(
            config.connection(),
            tick_tx,
            registrar,
        ));
        let feed = manager.handle();

        let recovered = recover_positions(&gateway, &registry).await?;
        info!(
            recovered,
            symbols = registry.interested_symbols().len(),
            "Startup recovery complete"
        );

        let worker = QueueWorker::new(
            queue,
            gateway.clone(),
            Arc::new(feed.clone()),
            config.queue.worker(),
        );
        tasks.push(tokio::spawn(worker.run(shutdown.child_token())));

        let settlement = Arc::new(SettlementService::new(
            gateway.clone(),
            config.settlement(),
        ));
        let executor = ActionExecutor::new(gateway, settlement, self.publisher);
        tasks.push(tokio::spawn(dispatch_ticks(
            tick_rx,
            registry.clone(),
            executor.clone(),
            shutdown.child_token(),
        )));

        let connector = manager.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = connector.connect().await {
                error!(?e, "Price feed connection stopped");
            }
        }));

        Ok(RunningApp {
            control: ControlService::new(registry.clone()),
            registry,
            feed,
            manager,
            executor,
            shutdown,
            tasks,
        })
    }
}

/// Load every OPEN and PENDING position from the store into `registry`.
///
/// A record that fails to classify is skipped with a warning. Returns the
/// number of records added.
pub async fn recover_positions(
    gateway: &DynGateway,
    registry: &RegistryHandle,
) -> AppResult<usize> {
    let positions = gateway.load_active_positions().await?;
    let mut added = 0;
    for stored in &positions {
        let draft = stored.to_draft();
        match registry.add(&draft).await {
            Ok(monitoring) => {
                debug!(key = %draft.key(), ?monitoring, "Recovered position");
                added += 1;
            }
            Err(PositionError::Invalid(e)) => {
                warn!(?e, key = %draft.key(), "Skipping unrecoverable position");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(added)
}

/// Feed ticks to the registry one at a time, in arrival order, and hand
/// each non-empty outcome to the executor.
async fn dispatch_ticks(
    mut ticks: mpsc::Receiver<PriceTick>,
    registry: RegistryHandle,
    executor: ActionExecutor,
    shutdown: CancellationToken,
) {
    info!("Tick dispatcher started");
    loop {
        let tick = tokio::select! {
            () = shutdown.cancelled() => break,
            tick = ticks.recv() => match tick {
                Some(tick) => tick,
                None => break,
            },
        };

        if !registry.has_interest(&tick.symbol) {
            Metrics::tick_skipped("no_interest");
            continue;
        }
        Metrics::tick_dispatched();

        match registry.evaluate_tick(&tick.symbol, tick.mark_price).await {
            Ok(outcome) if !outcome.is_empty() => {
                debug!(
                    symbol = %outcome.symbol,
                    mark_price = %outcome.mark_price,
                    fills = outcome.fills.len(),
                    hits = outcome.hits.len(),
                    "Tick produced actions"
                );
                executor.execute(outcome);
            }
            Ok(_) => {}
            Err(PositionError::RegistryClosed) => {
                warn!("Registry closed, stopping tick dispatcher");
                break;
            }
            Err(e) => error!(?e, symbol = %tick.symbol, "Tick evaluation failed"),
        }
    }
    info!("Tick dispatcher stopped");
}

/// A started application.
pub struct RunningApp {
    control: ControlService,
    registry: RegistryHandle,
    feed: FeedHandle,
    manager: Arc<ConnectionManager>,
    executor: ActionExecutor,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningApp {
    pub fn control(&self) -> &ControlService {
        &self.control
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn feed(&self) -> &FeedHandle {
        &self.feed
    }

    /// Successful feed connections so far.
    pub fn feed_connections(&self) -> u64 {
        self.manager.connection_count()
    }

    /// Stop the feed, the queue loops and the registry, wait for them, then
    /// wait for fills and closes already handed to the executor.
    pub async fn stop(self) {
        info!("Shutting down");
        self.shutdown.cancel();
        self.manager.shutdown();
        self.registry.shutdown().await;

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(?e, "Task ended abnormally");
            }
        }
        self.executor.drain().await;
        info!("Shutdown complete");
    }
}

//! Service assembly
//!
//! Builds every subsystem from a `DuelgateConfig` and owns the background
//! workers (dispatcher, stale sweeper, settlement warm-up).

use crate::config::{DuelgateConfig, StorageBackend};
use crate::duels::{DuelService, DuelServiceParts, InMemoryDuelStore, Matchmaker, PayoutPolicy};
use crate::errors::DuelgateResult;
use crate::flags::{FeatureFlags, StaticFlagSource};
use crate::games::GameRegistry;
use crate::identity::IdentityDirectory;
use crate::ledger::Ledger;
use crate::metrics::Metrics;
use crate::notify::{
    register_notification_handlers, DispatchRefereeHandler, InMemoryGateway, NotifyContext,
    RefereeQueue,
};
use crate::servers::{ServerStatusBoard, StaticServerPool};
use crate::settlement::{
    InMemoryPayoutStore, PayoutService, PayoutStore, RetryPolicy, SettlePayoutHandler,
    SettlementService, SimulatedNetwork, TokenRegistry,
};
use crate::tasks::{
    HandlerRegistry, InMemoryTaskStore, RocksTaskStore, TaskDispatcher, TaskStore, TaskType,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Settlement pieces, present only when auto-payout is configured and usable
#[derive(Clone)]
pub struct SettlementParts {
    pub service: Arc<SettlementService>,
    pub payouts: Arc<PayoutService>,
    pub network: SimulatedNetwork,
}

/// Every long-lived component of the service
#[derive(Clone)]
pub struct App {
    pub config: DuelgateConfig,
    pub metrics: Arc<Metrics>,
    pub tasks: Arc<dyn TaskStore>,
    pub ledger: Arc<Ledger>,
    pub identities: Arc<IdentityDirectory>,
    pub flag_source: Arc<StaticFlagSource>,
    pub flags: Arc<FeatureFlags>,
    pub server_board: Arc<ServerStatusBoard>,
    pub duels: Arc<DuelService>,
    pub matchmaker: Arc<Matchmaker>,
    pub gateway: Arc<InMemoryGateway>,
    pub referee_queue: Arc<RefereeQueue>,
    pub settlement: Option<SettlementParts>,
    pub dispatcher: Arc<TaskDispatcher>,
}

/// Durable state shared across restarts
#[derive(Clone)]
pub struct Stores {
    pub tasks: Arc<dyn TaskStore>,
    pub payouts: Arc<dyn PayoutStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(InMemoryTaskStore::new()),
            payouts: Arc::new(InMemoryPayoutStore::new()),
        }
    }

    /// Tasks and payout records in one RocksDB database
    pub fn rocks(store: RocksTaskStore) -> Self {
        let store = Arc::new(store);
        Self {
            tasks: store.clone(),
            payouts: store,
        }
    }
}

/// Open the stores the configuration asks for
pub fn open_stores(config: &DuelgateConfig) -> DuelgateResult<Stores> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Stores::in_memory()),
        StorageBackend::Rocksdb => {
            let path = Path::new(&config.storage.data_dir).join("tasks");
            std::fs::create_dir_all(&path)?;
            info!(path = %path.display(), "Opening RocksDB store");
            Ok(Stores::rocks(RocksTaskStore::open(path)?))
        }
    }
}

/// Build the settlement subsystem. A missing credential disables settlement
/// only; the rest of the service keeps running with internal payouts.
fn build_settlement(
    config: &DuelgateConfig,
    payout_store: Arc<dyn PayoutStore>,
    metrics: &Arc<Metrics>,
) -> Option<SettlementParts> {
    let settlement = &config.settlement;
    if !settlement.enabled || !settlement.auto_payout {
        return None;
    }

    let signer = match settlement.require_credentials() {
        Ok(signer) => signer,
        Err(e) => {
            error!(error = %e, "Settlement disabled: credentials missing, pots stay internal");
            return None;
        }
    };

    let network = SimulatedNetwork::new(signer);
    let service = Arc::new(SettlementService::new(
        Arc::new(network.clone()),
        TokenRegistry::standard(),
        RetryPolicy::from(settlement),
        metrics.clone(),
    ));
    let payouts = Arc::new(PayoutService::new(service.clone(), payout_store, metrics.clone()));
    info!(endpoint = %settlement.network_endpoint, token = %settlement.token, "Settlement enabled");

    Some(SettlementParts {
        service,
        payouts,
        network,
    })
}

fn seed_gateway(gateway: &InMemoryGateway, config: &DuelgateConfig) {
    let channels = &config.gateway;
    for name in [
        &channels.results_channel,
        &channels.announcements_channel,
        &channels.ticket_transcript_channel,
    ] {
        gateway.seed_channel(name, name);
    }

    let regions: BTreeSet<String> = config
        .servers
        .pool
        .iter()
        .map(|entry| entry.region.to_lowercase())
        .collect();
    for region in regions {
        let channel = format!("{}{}", channels.status_channel_prefix, region);
        gateway.seed_channel(&channel, &channel);
    }
}

impl App {
    /// Build from configuration, opening the configured stores
    pub fn build(config: DuelgateConfig) -> DuelgateResult<Self> {
        let stores = open_stores(&config)?;
        Ok(Self::with_stores(config, stores))
    }

    /// Payout records are kept in memory
    pub fn with_task_store(config: DuelgateConfig, tasks: Arc<dyn TaskStore>) -> Self {
        Self::with_stores(
            config,
            Stores {
                tasks,
                payouts: Arc::new(InMemoryPayoutStore::new()),
            },
        )
    }

    pub fn with_stores(config: DuelgateConfig, stores: Stores) -> Self {
        let Stores {
            tasks,
            payouts: payout_store,
        } = stores;
        let metrics = Arc::new(Metrics::new());
        let ledger = Arc::new(Ledger::new());
        let identities = Arc::new(IdentityDirectory::new(tasks.clone()));
        let flag_source = Arc::new(StaticFlagSource::new());
        let flags = Arc::new(FeatureFlags::new(flag_source.clone()));
        let server_board = Arc::new(ServerStatusBoard::new(tasks.clone()));
        let servers = Arc::new(StaticServerPool::new(&config.servers.pool, server_board.clone()));

        let settlement = build_settlement(&config, payout_store, &metrics);
        let payout_policy = if settlement.is_some() {
            PayoutPolicy {
                auto_payout: true,
                token: config.settlement.token.clone(),
                units_per_token: config.settlement.units_per_token,
            }
        } else {
            PayoutPolicy::internal_only()
        };

        let duels = Arc::new(DuelService::new(DuelServiceParts {
            store: Arc::new(InMemoryDuelStore::new()),
            tasks: tasks.clone(),
            ledger: ledger.clone(),
            games: GameRegistry::standard(),
            identities: identities.clone(),
            servers,
            flags: flags.clone(),
            metrics: metrics.clone(),
            config: config.duels.clone(),
            payouts: payout_policy,
        }));
        let matchmaker = Arc::new(Matchmaker::new(duels.clone()));

        let gateway = Arc::new(InMemoryGateway::new());
        seed_gateway(&gateway, &config);
        let referee_queue = Arc::new(RefereeQueue::new());

        let mut handlers = HandlerRegistry::new();
        register_notification_handlers(
            &mut handlers,
            NotifyContext {
                gateway: gateway.clone(),
                channels: config.gateway.clone(),
                action_base_url: config.duels.action_base_url.clone(),
            },
        );
        handlers.register(
            TaskType::DispatchReferee,
            Arc::new(DispatchRefereeHandler::new(duels.clone(), referee_queue.clone())),
        );
        if let Some(parts) = &settlement {
            handlers.register(
                TaskType::SettlePayout,
                Arc::new(SettlePayoutHandler::new(parts.payouts.clone())),
            );
        }

        let dispatcher = Arc::new(TaskDispatcher::new(
            tasks.clone(),
            handlers,
            config.dispatcher.clone(),
            metrics.clone(),
        ));

        Self {
            config,
            metrics,
            tasks,
            ledger,
            identities,
            flag_source,
            flags,
            server_board,
            duels,
            matchmaker,
            gateway,
            referee_queue,
            settlement,
            dispatcher,
        }
    }

    /// Start background workers; they stop when `shutdown` flips to true.
    pub async fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        if let Err(e) = self.flags.refresh().await {
            warn!(error = %e, "Initial flag load failed, every flag reads as enabled");
        }

        let mut workers = Vec::new();
        if self.config.dispatcher.enabled {
            workers.push(self.dispatcher.clone().spawn(shutdown.clone()));
        } else {
            warn!("Task dispatcher disabled, queued side effects will not run");
        }

        if let Some(sweeper) = self
            .duels
            .clone()
            .spawn_stale_sweeper(self.config.duels.stale_sweep_interval(), shutdown)
        {
            workers.push(sweeper);
        }

        if let Some(parts) = &self.settlement {
            if self.config.settlement.warmup_on_start {
                workers.push(parts.service.clone().spawn_warmup());
            }
        }
        workers
    }
}

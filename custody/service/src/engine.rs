// Copyright (c) 2024 The Botho Foundation

//! Custody engine - wires the components together and drives the periodic
//! jobs until shutdown.

use custody_core::CustodyConfig;
use std::{fmt::Debug, future::Future, sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    task::{JoinHandle, JoinSet},
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

use crate::{
    codec::{WalletCodec, WalletV3Codec},
    confirm::ConfirmationTracker,
    db::Database,
    error::Result,
    kyt::{HttpKytBackend, KytBackend, KytGate},
    notify::{NotificationDispatcher, NotifyBackend, WebhookNotifier},
    rpc::{ExplorerApi, HttpExplorer, HttpLedger, LedgerApi, RpcGateway},
    scanner::ChainScanner,
    sweep::SweepOrchestrator,
    wallet::WalletService,
};

/// Shutdown signal type.
pub type ShutdownSignal = broadcast::Receiver<()>;

/// External systems the engine talks to.
pub struct Backends {
    pub ledger: Arc<dyn LedgerApi>,
    pub explorer: Arc<dyn ExplorerApi>,
    pub kyt: Arc<dyn KytBackend>,
    pub notify: Arc<dyn NotifyBackend>,
    pub codec: Arc<dyn WalletCodec>,
}

impl Backends {
    /// HTTP backends from configuration.
    pub fn http(config: &CustodyConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.node.request_timeout_secs);
        Ok(Self {
            ledger: Arc::new(HttpLedger::new(&config.node.rpc_url, timeout)?),
            explorer: Arc::new(HttpExplorer::new(&config.node.explorer_url, timeout)?),
            kyt: Arc::new(HttpKytBackend::new(
                &config.kyt,
                &config.wallet.currency,
                &config.wallet.network,
            )?),
            notify: Arc::new(WebhookNotifier::new(&config.notify)?),
            codec: Arc::new(WalletV3Codec::new()?),
        })
    }
}

/// Everything except the chain scanner, which needs the chain to start.
pub struct Custody {
    pub db: Database,
    pub gateway: Arc<RpcGateway>,
    pub wallet: Arc<WalletService>,
    pub kyt: Arc<KytGate>,
    pub confirm: Arc<ConfirmationTracker>,
    pub sweep: Arc<SweepOrchestrator>,
    pub notifier: Arc<NotificationDispatcher>,
}

impl Custody {
    pub fn assemble(config: &CustodyConfig, db: Database, backends: Backends) -> Result<Self> {
        let gateway = Arc::new(RpcGateway::new(
            backends.ledger,
            backends.explorer,
            &config.gateway,
        ));
        let wallet = Arc::new(WalletService::bootstrap(
            db.clone(),
            gateway.clone(),
            backends.codec,
            config.wallet.clone(),
            config.node.testnet,
        )?);
        let kyt = Arc::new(KytGate::new(
            db.clone(),
            backends.kyt,
            wallet.clone(),
            config.wallet.compliance_min_version(),
        ));
        let confirm = Arc::new(ConfirmationTracker::new(db.clone(), gateway.clone()));
        let sweep = Arc::new(SweepOrchestrator::new(
            db.clone(),
            gateway.clone(),
            wallet.clone(),
            kyt.clone(),
            config.sweep.clone(),
            config.wallet.sweep_threshold,
        ));
        let notifier = Arc::new(NotificationDispatcher::new(
            db.clone(),
            backends.notify,
            &config.notify,
            &config.wallet.network,
            &config.wallet.currency,
        ));

        Ok(Self {
            db,
            gateway,
            wallet,
            kyt,
            confirm,
            sweep,
            notifier,
        })
    }
}

/// Run `job` every `period` until shutdown.
///
/// Each tick runs in its own task, so a slow cycle never delays the timer;
/// the components' own single-flight state turns overlapping ticks into
/// no-ops. On shutdown no new cycle starts and the returned handle resolves
/// once every running cycle has finished.
fn spawn_periodic<F, Fut, T>(
    name: &'static str,
    period: Duration,
    mut shutdown: ShutdownSignal,
    job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Debug + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cycles = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("{} shutting down", name);
                    break;
                }
                Some(_) = cycles.join_next(), if !cycles.is_empty() => {}
                _ = ticker.tick() => {
                    let cycle = job();
                    cycles.spawn(async move {
                        match cycle.await {
                            Ok(outcome) => debug!("{}: {:?}", name, outcome),
                            Err(e) => error!("{} error: {}", name, e),
                        }
                    });
                }
            }
        }

        if !cycles.is_empty() {
            info!("{} waiting for {} running cycle(s)", name, cycles.len());
        }
        while let Some(joined) = cycles.join_next().await {
            if let Err(e) = joined {
                error!("{} cycle aborted: {}", name, e);
            }
        }
    })
}

/// The main custody engine that coordinates all components.
pub struct CustodyEngine {
    config: CustodyConfig,
    custody: Custody,
    shutdown_tx: broadcast::Sender<()>,
}

impl CustodyEngine {
    pub fn new(config: CustodyConfig, custody: Custody) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            custody,
            shutdown_tx,
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Run until `shutdown` resolves.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!("Starting custody engine");
        info!(
            "Master wallet {}, quarantine wallet {}",
            self.custody.wallet.master_address().user_friendly,
            self.custody.wallet.quarantine_address().user_friendly
        );

        let scanner = Arc::new(
            ChainScanner::init(
                self.custody.db.clone(),
                self.custody.gateway.clone(),
                self.config.scanner.clone(),
                self.config.wallet.currency.clone(),
            )
            .await?,
        );

        let secs = Duration::from_secs;
        let mut handles = Vec::new();

        let job = scanner.clone();
        handles.push(spawn_periodic(
            "Chain scanner",
            secs(self.config.scanner.poll_interval_secs),
            self.shutdown_tx.subscribe(),
            move || {
                let job = job.clone();
                async move { job.tick().await }
            },
        ));

        let job = self.custody.confirm.clone();
        handles.push(spawn_periodic(
            "Confirmation tracker",
            secs(self.config.confirm.poll_interval_secs),
            self.shutdown_tx.subscribe(),
            move || {
                let job = job.clone();
                async move { job.tick().await }
            },
        ));

        let job = self.custody.notifier.clone();
        handles.push(spawn_periodic(
            "Notification dispatcher",
            secs(self.config.notify.poll_interval_secs),
            self.shutdown_tx.subscribe(),
            move || {
                let job = job.clone();
                async move { job.tick().await }
            },
        ));

        let job = self.custody.sweep.clone();
        handles.push(spawn_periodic(
            "Balance refresh",
            secs(self.config.sweep.balance_refresh_interval_secs),
            self.shutdown_tx.subscribe(),
            move || {
                let job = job.clone();
                async move { job.refresh_balances().await }
            },
        ));

        let job = self.custody.sweep.clone();
        handles.push(spawn_periodic(
            "Sweeper",
            secs(self.config.sweep.sweep_interval_secs),
            self.shutdown_tx.subscribe(),
            move || {
                let job = job.clone();
                async move { job.sweep().await }
            },
        ));

        shutdown.await;
        info!("Received shutdown signal");

        // Send shutdown signal to all components, then let running cycles
        // finish their batch.
        let _ = self.shutdown_tx.send(());
        futures::future::join_all(handles).await;

        info!("Custody engine stopped");
        Ok(())
    }
}

// Copyright (c) 2024 The Botho Foundation

//! Balance refresh and sweeping.
//!
//! Both jobs share one [`JobState`]: a refresh never runs while a sweep is in
//! flight and vice versa, since they touch the same balance rows.

use chrono::Utc;
use custody_core::{config::SweepConfig, Balance, Coins, JobState, SweepPhase};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    db::Database,
    error::Result,
    kyt::KytGate,
    rpc::RpcGateway,
    wallet::WalletService,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Busy,
    Refreshed { updated: usize, failed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    pub swept: usize,
    pub quarantined: usize,
    pub blocked: usize,
    pub failed: usize,
    pub purged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Busy,
    Done(SweepReport),
}

pub struct SweepOrchestrator {
    db: Database,
    gateway: Arc<RpcGateway>,
    wallet: Arc<WalletService>,
    kyt: Arc<KytGate>,
    config: SweepConfig,
    threshold: Coins,
    state: JobState<SweepPhase>,
}

impl SweepOrchestrator {
    pub fn new(
        db: Database,
        gateway: Arc<RpcGateway>,
        wallet: Arc<WalletService>,
        kyt: Arc<KytGate>,
        config: SweepConfig,
        threshold: Coins,
    ) -> Self {
        Self {
            db,
            gateway,
            wallet,
            kyt,
            config,
            threshold,
            state: JobState::new(),
        }
    }

    pub fn state(&self) -> SweepPhase {
        self.state.current()
    }

    /// Re-read every dirty balance from the chain.
    pub async fn refresh_balances(&self) -> Result<RefreshOutcome> {
        let Some(_guard) = self.state.try_begin(SweepPhase::Updating) else {
            debug!("Balance refresh skipped, state is {:?}", self.state.current());
            return Ok(RefreshOutcome::Busy);
        };

        let dirty = self.db.dirty_balances()?;
        let mut updated = 0;
        let mut failed = 0;

        for balance in &dirty {
            match self.gateway.balance(&balance.address).await {
                Ok(amount) => {
                    self.db
                        .update_balance(&balance.address, &balance.currency, amount)?;
                    debug!("Balance of {} is {}", balance.address, amount);
                    updated += 1;
                }
                Err(e) => {
                    warn!("Balance refresh of {} failed: {}", balance.address, e);
                    failed += 1;
                }
            }
        }

        if updated > 0 {
            info!("Refreshed {} balances ({} failed)", updated, failed);
        }
        Ok(RefreshOutcome::Refreshed { updated, failed })
    }

    /// Sweep every fresh balance above the dust threshold that clears
    /// screening, then prune old transfers.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        let Some(_guard) = self.state.try_begin(SweepPhase::Sweeping) else {
            debug!("Sweep skipped, state is {:?}", self.state.current());
            return Ok(SweepOutcome::Busy);
        };

        let mut report = SweepReport::default();
        for balance in self.db.sweepable_balances(self.threshold)? {
            self.sweep_balance(&balance, &mut report).await?;
        }

        let cutoff = Utc::now() - self.config.transfer_retention();
        report.purged = self.db.purge_transfers(cutoff)?;

        if report != SweepReport::default() {
            info!(
                "Sweep: {} swept, {} quarantined, {} blocked, {} failed, {} transfers purged",
                report.swept, report.quarantined, report.blocked, report.failed, report.purged
            );
        }
        Ok(SweepOutcome::Done(report))
    }

    async fn sweep_balance(&self, balance: &Balance, report: &mut SweepReport) -> Result<()> {
        let Some(address) = self.db.get_address(&balance.address)? else {
            warn!("Balance row for unknown address {}", balance.address);
            return Ok(());
        };

        if self.kyt.screens(&address) {
            let verdict = self.kyt.evaluate(&address).await?;
            if !verdict.can_sweep {
                report.blocked += 1;
                return Ok(());
            }
            if verdict.quarantine_hash.is_some() {
                // The remaining balance is unknown until the quarantine
                // transfer settles; the row is dirty again already.
                report.quarantined += 1;
                return Ok(());
            }
        }

        match self.wallet.sweep(&address).await {
            Ok(_) => report.swept += 1,
            Err(e) => {
                error!("Sweep of {} failed: {}", address.user_friendly_address, e);
                report.failed += 1;
            }
        }
        self.db
            .mark_balance_dirty(&balance.address, &balance.currency)?;
        Ok(())
    }
}

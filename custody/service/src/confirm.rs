// Copyright (c) 2024 The Botho Foundation

//! Deposit confirmation tracker.
//!
//! A pending deposit is confirmed once the receiving account reports the
//! transaction itself. There is no retry cap: absence only means "not yet".

use custody_core::{DepositStatus, JobState, RunPhase};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{db::Database, error::Result, rpc::RpcGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Busy,
    Checked { pending: usize, confirmed: usize },
}

pub struct ConfirmationTracker {
    db: Database,
    gateway: Arc<RpcGateway>,
    state: JobState<RunPhase>,
}

impl ConfirmationTracker {
    pub fn new(db: Database, gateway: Arc<RpcGateway>) -> Self {
        Self {
            db,
            gateway,
            state: JobState::new(),
        }
    }

    pub async fn tick(&self) -> Result<ConfirmOutcome> {
        let Some(_guard) = self.state.try_begin(RunPhase::Running) else {
            debug!("Confirmation tracker busy, skipping cycle");
            return Ok(ConfirmOutcome::Busy);
        };

        let pending = self.db.deposits_by_status(DepositStatus::Pending)?;
        let mut confirmed = 0;

        for deposit in &pending {
            match self
                .gateway
                .transaction(&deposit.from_address, &deposit.hash, deposit.lt)
                .await
            {
                Ok(Some(_)) => {
                    self.db.set_deposit_status(
                        &deposit.hash,
                        &deposit.from_address,
                        DepositStatus::Confirmed,
                    )?;
                    info!("Deposit {} confirmed", deposit.hash);
                    confirmed += 1;
                }
                Ok(None) => debug!("Deposit {} not observable yet", deposit.hash),
                Err(e) => warn!("Confirmation check of {} failed: {}", deposit.hash, e),
            }
        }

        Ok(ConfirmOutcome::Checked {
            pending: pending.len(),
            confirmed,
        })
    }
}

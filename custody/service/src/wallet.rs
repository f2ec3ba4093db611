// Copyright (c) 2024 The Botho Foundation

//! Wallet operations: address lookup, sweeps, quarantine moves and
//! withdrawals.
//!
//! This is the surface offered to the HTTP layer and the CLI. Business
//! rejections (`InvalidDestination`, `AmountBelowMinimum`) are raised before
//! any RPC call is made.

use chrono::Utc;
use custody_core::{
    config::WalletConfig, is_valid_address, Address, Coins, ParamName, Transfer, TransferType,
    WalletAddress,
};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::{
    allocator::AddressAllocator,
    codec::{TransferIntent, Wallet, WalletCodec},
    db::Database,
    error::{Error, Result},
    keys::SeedPhrase,
    rpc::RpcGateway,
};

/// Outcome of a submitted withdrawal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalReceipt {
    /// Transaction hash if the explorer found it, otherwise the message hash.
    pub hash: String,
    pub fee: Coins,
}

pub struct WalletService {
    db: Database,
    gateway: Arc<RpcGateway>,
    codec: Arc<dyn WalletCodec>,
    allocator: AddressAllocator,
    master: Wallet,
    quarantine: Wallet,
    config: WalletConfig,
}

/// Load a mnemonic param, generating and persisting one on first use.
fn load_or_generate(db: &Database, name: ParamName) -> Result<SeedPhrase> {
    let candidate = SeedPhrase::generate();
    let stored = Zeroizing::new(db.init_param(name, candidate.phrase())?);
    SeedPhrase::from_phrase(&stored)
}

impl WalletService {
    /// Open the master, quarantine and deposit wallets, creating their
    /// seeds on first start.
    pub fn bootstrap(
        db: Database,
        gateway: Arc<RpcGateway>,
        codec: Arc<dyn WalletCodec>,
        config: WalletConfig,
        testnet: bool,
    ) -> Result<Self> {
        let base_path = config.derivation_path()?;
        let root = base_path.child(0)?;
        let version = config.address_version();

        let hot = load_or_generate(&db, ParamName::HotMnemonic)?;
        let quarantine = load_or_generate(&db, ParamName::QuarantineMnemonic)?;
        let deposit_seed = load_or_generate(&db, ParamName::DepositSeed)?;

        let master = Wallet::open(codec.as_ref(), hot.derive(&root)?, version, testnet)?;
        let quarantine =
            Wallet::open(codec.as_ref(), quarantine.derive(&root)?, version, testnet)?;
        let allocator = AddressAllocator::new(
            db.clone(),
            codec.clone(),
            deposit_seed,
            base_path,
            version,
            testnet,
        );

        debug!(
            "Master wallet {}, quarantine wallet {}",
            master.address.user_friendly, quarantine.address.user_friendly
        );

        Ok(Self {
            db,
            gateway,
            codec,
            allocator,
            master,
            quarantine,
            config,
        })
    }

    pub fn allocator(&self) -> &AddressAllocator {
        &self.allocator
    }

    /// Allocate a fresh deposit address, returning its user-friendly form.
    pub async fn allocate_new_address(&self) -> Result<String> {
        Ok(self.allocator.allocate().await?.user_friendly_address)
    }

    pub fn master_address(&self) -> &WalletAddress {
        &self.master.address
    }

    pub fn quarantine_address(&self) -> &WalletAddress {
        &self.quarantine.address
    }

    pub async fn master_balance(&self) -> Result<Coins> {
        self.gateway.balance(&self.master.address.raw).await
    }

    pub fn is_valid_address_format(&self, address: &str) -> bool {
        is_valid_address(address)
    }

    pub fn currency(&self) -> &str {
        &self.config.currency
    }

    /// Move the whole balance of a deposit address to the master wallet.
    ///
    /// Legacy contracts are drained with a destroy-if-empty message from
    /// seqno 0; current contracts send a zero-value carry-all transfer.
    pub async fn sweep(&self, address: &Address) -> Result<String> {
        let wallet = self.allocator.wallet_for(address)?;
        let intent = if address.version.is_legacy() {
            TransferIntent::drain(&self.master.address.user_friendly, 0, true)
        } else {
            let seqno = self.gateway.seqno(&address.address).await?;
            TransferIntent::drain(&self.master.address.user_friendly, seqno, false)
        };

        let message = wallet.sign(self.codec.as_ref(), &intent)?;
        let hash = self.gateway.broadcast(&message).await?;
        info!(
            "Swept {} ({}) to master wallet: {}",
            address.user_friendly_address, address.version, hash
        );

        self.record_transfer(
            &hash,
            &wallet.address,
            &self.master.address,
            TransferType::Internal,
            None,
        )?;
        Ok(hash)
    }

    /// Move `amount` from a deposit address to the quarantine wallet.
    pub async fn move_to_quarantine(&self, address: &Address, amount: Coins) -> Result<String> {
        let wallet = self.allocator.wallet_for(address)?;
        let seqno = self.gateway.seqno(&address.address).await?;
        let intent =
            TransferIntent::exact(&self.quarantine.address.user_friendly, amount, seqno);

        let message = wallet.sign(self.codec.as_ref(), &intent)?;
        let hash = self.gateway.broadcast(&message).await?;
        warn!(
            "Moved {} from {} to quarantine: {}",
            amount, address.user_friendly_address, hash
        );

        let recorded = self
            .record_transfer(
                &hash,
                &wallet.address,
                &self.quarantine.address,
                TransferType::Internal,
                Some(amount),
            )
            .and_then(|_| {
                self.db
                    .mark_balance_dirty(&address.address, &self.config.currency)
            });
        if let Err(e) = recorded {
            // The funds moved; only the bookkeeping is missing.
            error!(
                "Quarantine message {} ({} from {}) was broadcast but not recorded: {}",
                hash, amount, address.user_friendly_address, e
            );
            return Err(e);
        }
        Ok(hash)
    }

    /// Send `amount` from the master wallet to `to`.
    pub async fn withdraw(&self, to: &str, amount: Coins) -> Result<WithdrawalReceipt> {
        if amount < self.config.min_withdrawal {
            return Err(Error::AmountBelowMinimum {
                amount,
                minimum: self.config.min_withdrawal,
            });
        }
        if !is_valid_address(to) {
            return Err(Error::InvalidDestination(to.to_string()));
        }

        let seqno = self.gateway.seqno(&self.master.address.raw).await?;
        let intent = TransferIntent::exact(to, amount, seqno);
        let message = self.master.sign(self.codec.as_ref(), &intent)?;
        let msg_hash = self.gateway.broadcast(&message).await?;
        info!("Withdrawal of {} to {} broadcast: {}", amount, to, msg_hash);

        tokio::time::sleep(Duration::from_secs(self.config.withdrawal_settle_secs)).await;
        let receipt = self.settle(&msg_hash).await;

        let destination = WalletAddress {
            raw: to.to_string(),
            user_friendly: to.to_string(),
        };
        self.record_transfer(
            &receipt.hash,
            &self.master.address,
            &destination,
            TransferType::External,
            Some(amount),
        )?;
        Ok(receipt)
    }

    /// Resolve a broadcast message to its transaction through the explorer.
    async fn settle(&self, msg_hash: &str) -> WithdrawalReceipt {
        let attempts = self.config.withdrawal_lookup_attempts.max(1);
        let interval = Duration::from_secs(self.config.withdrawal_lookup_interval_secs);

        for attempt in 1..=attempts {
            match self.gateway.lookup_by_message_hash(msg_hash).await {
                Ok(Some(tx)) => {
                    return WithdrawalReceipt {
                        hash: tx.hash,
                        fee: tx.fee,
                    }
                }
                Ok(None) => debug!("Message {} not indexed yet ({}/{})", msg_hash, attempt, attempts),
                Err(e) => warn!("Explorer lookup of {} failed: {}", msg_hash, e),
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        warn!(
            "Message {} not found after {} lookups, reporting message hash",
            msg_hash, attempts
        );
        WithdrawalReceipt {
            hash: msg_hash.to_string(),
            fee: Coins::ZERO,
        }
    }

    fn record_transfer(
        &self,
        hash: &str,
        from: &WalletAddress,
        to: &WalletAddress,
        transfer_type: TransferType,
        amount: Option<Coins>,
    ) -> Result<()> {
        let now = Utc::now();
        self.db.insert_transfer(&Transfer {
            hash: hash.to_string(),
            from_address: from.raw.clone(),
            from_user_friendly: from.user_friendly.clone(),
            to_user_friendly: to.user_friendly.clone(),
            transfer_type,
            currency: self.config.currency.clone(),
            amount,
            created_at: now,
            last_updated_at: now,
        })
    }
}

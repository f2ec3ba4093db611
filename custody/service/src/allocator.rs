// Copyright (c) 2024 The Botho Foundation

//! Deterministic deposit address allocation.

use chrono::Utc;
use custody_core::{Address, DerivationPath, WalletVersion};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    codec::{Wallet, WalletCodec},
    db::Database,
    error::Result,
    keys::SeedPhrase,
};

/// Hands out deposit addresses derived at `base_path/index`.
///
/// Allocation is serialised by a process-local lock around a single store
/// transaction, so an index is never issued twice by this process.
pub struct AddressAllocator {
    db: Database,
    codec: Arc<dyn WalletCodec>,
    seed: SeedPhrase,
    base_path: DerivationPath,
    version: WalletVersion,
    testnet: bool,
    lock: Mutex<()>,
}

impl AddressAllocator {
    pub fn new(
        db: Database,
        codec: Arc<dyn WalletCodec>,
        seed: SeedPhrase,
        base_path: DerivationPath,
        version: WalletVersion,
        testnet: bool,
    ) -> Self {
        Self {
            db,
            codec,
            seed,
            base_path,
            version,
            testnet,
            lock: Mutex::new(()),
        }
    }

    /// Derive and persist the next deposit address.
    pub async fn allocate(&self) -> Result<Address> {
        let _guard = self.lock.lock().await;

        let address = self.db.allocate_address(|index| {
            let path = self.base_path.child(index)?;
            let wallet = self.wallet_at(&path)?;
            Ok(Address {
                address: wallet.address.raw,
                user_friendly_address: wallet.address.user_friendly,
                derivation_path: path.to_string(),
                version: self.version,
                created_at: Utc::now(),
            })
        })?;

        info!(
            "Allocated deposit address {} at {}",
            address.user_friendly_address, address.derivation_path
        );
        Ok(address)
    }

    /// Wallet controlling a previously allocated address.
    pub fn wallet_for(&self, address: &Address) -> Result<Wallet> {
        let path: DerivationPath = address.derivation_path.parse()?;
        let key = self.seed.derive(&path)?;
        Wallet::open(self.codec.as_ref(), key, address.version, self.testnet)
    }

    fn wallet_at(&self, path: &DerivationPath) -> Result<Wallet> {
        let key = self.seed.derive(path)?;
        Wallet::open(self.codec.as_ref(), key, self.version, self.testnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WalletV3Codec;

    fn allocator(db: &Database) -> AddressAllocator {
        AddressAllocator::new(
            db.clone(),
            Arc::new(WalletV3Codec::new().unwrap()),
            SeedPhrase::generate(),
            "m/44'/607'/0'".parse().unwrap(),
            WalletVersion::CURRENT,
            false,
        )
    }

    #[tokio::test]
    async fn test_allocate_derives_from_path() {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let allocator = allocator(&db);

        let address = allocator.allocate().await.unwrap();
        assert_eq!(address.derivation_path, "m/44'/607'/0'/1'");
        assert!(custody_core::is_valid_address(&address.user_friendly_address));

        let wallet = allocator.wallet_for(&address).unwrap();
        assert_eq!(wallet.address.raw, address.address);
        let stored = db.get_address(&address.address).unwrap().unwrap();
        assert_eq!(stored.user_friendly_address, address.user_friendly_address);
        assert_eq!(stored.version, WalletVersion::CURRENT);
    }
}

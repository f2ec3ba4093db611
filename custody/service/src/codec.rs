// Copyright (c) 2024 The Botho Foundation

//! Wallet contract codec: address derivation and transfer signing.
//!
//! The service needs two things from the chain's wallet contracts: the
//! address a public key controls, and a signed external message carrying a
//! transfer. [`WalletCodec`] is that seam. [`WalletV3Codec`] implements it for
//! the standard v3 (revision 2) wallet, which every deposit, master and
//! quarantine address is.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use custody_core::{AccountAddress, Coins, SignedMessage, WalletAddress, WalletVersion};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    cell::{self, Cell, CellBuilder},
    error::{Error, Result},
    keys::{self, KeyPair},
};

/// Send-mode flags of an outbound internal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SendMode(pub u8);

impl SendMode {
    pub const PAY_FEES_SEPARATELY: SendMode = SendMode(1);
    pub const IGNORE_ERRORS: SendMode = SendMode(2);
    pub const DESTROY_IF_ZERO: SendMode = SendMode(32);
    pub const CARRY_ALL_BALANCE: SendMode = SendMode(128);

    pub const fn with(self, other: SendMode) -> SendMode {
        SendMode(self.0 | other.0)
    }

    pub fn contains(self, other: SendMode) -> bool {
        self.0 & other.0 == other.0
    }
}

/// A transfer to be signed by a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    /// Destination, user-friendly form.
    pub to: String,
    pub amount: Coins,
    pub seqno: u32,
    pub mode: SendMode,
    pub bounce: bool,
}

impl TransferIntent {
    /// Carry the whole balance to `to`.
    pub fn drain(to: impl Into<String>, seqno: u32, destroy: bool) -> Self {
        let mode = if destroy {
            SendMode::CARRY_ALL_BALANCE.with(SendMode::DESTROY_IF_ZERO)
        } else {
            SendMode::CARRY_ALL_BALANCE
        };
        Self {
            to: to.into(),
            amount: Coins::ZERO,
            seqno,
            mode,
            bounce: false,
        }
    }

    /// Send exactly `amount`, fees on top.
    pub fn exact(to: impl Into<String>, amount: Coins, seqno: u32) -> Self {
        Self {
            to: to.into(),
            amount,
            seqno,
            mode: SendMode::PAY_FEES_SEPARATELY.with(SendMode::IGNORE_ERRORS),
            bounce: false,
        }
    }
}

/// Wallet contract primitives.
pub trait WalletCodec: Send + Sync {
    /// Address controlled by `public_key` for an address of `version`.
    fn address(&self, public_key: &[u8; 32], version: WalletVersion) -> Result<AccountAddress>;

    fn sign_transfer(
        &self,
        key: &KeyPair,
        version: WalletVersion,
        intent: &TransferIntent,
    ) -> Result<SignedMessage>;
}

/// A key together with the wallet it controls.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub key: KeyPair,
    pub version: WalletVersion,
    pub address: WalletAddress,
}

impl Wallet {
    pub fn open(
        codec: &dyn WalletCodec,
        key: KeyPair,
        version: WalletVersion,
        testnet: bool,
    ) -> Result<Self> {
        let account = codec.address(&key.public_key(), version)?;
        Ok(Self {
            address: WalletAddress::from_account(&account, testnet),
            key,
            version,
        })
    }

    pub fn sign(&self, codec: &dyn WalletCodec, intent: &TransferIntent) -> Result<SignedMessage> {
        codec.sign_transfer(&self.key, self.version, intent)
    }
}

/// Wallet v3r2 contract code.
const WALLET_V3R2_CODE: &str = "te6cckEBAQEAcQAA3v8AIN0gggFMl7ohggEznLqxn3Gw7UTQ0x/THzHXC//jBOCk8mCDCNcYINMf0x/TH/gjE7vyY+1E0NMf0x/T/9FRMrryoVFEuvKiBPkBVBBV+RDyo/gAkyDXSpbTB9QC+wDo0QGkyMsfyx/L/8ntVBC9ba0=";

/// Subwallet id of the default wallet on workchain 0.
const DEFAULT_WALLET_ID: u32 = 698_983_191;

/// Workchain the wallets are deployed to.
const WALLET_WORKCHAIN: i8 = 0;

/// Lifetime of a signed message once the wallet is deployed.
const MESSAGE_TTL_SECS: i64 = 60;

/// Codec for the v3r2 wallet contract.
///
/// The contract is the same for every address version; the version only
/// selects the sweep and screening policy.
#[derive(Debug, Clone)]
pub struct WalletV3Codec {
    code: Arc<Cell>,
    wallet_id: u32,
}

/// A wallet transfer read back from its external message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTransfer {
    pub wallet: AccountAddress,
    /// Key from the attached state init, present while the seqno is zero.
    pub public_key: Option<[u8; 32]>,
    pub signature: [u8; 64],
    /// Hash of the signed part of the body.
    pub signed_hash: [u8; 32],
    pub wallet_id: u32,
    pub valid_until: u32,
    pub seqno: u32,
    pub mode: SendMode,
    pub destination: AccountAddress,
    pub amount: Coins,
    pub bounce: bool,
}

impl DecodedTransfer {
    pub fn verify(&self, public_key: &[u8; 32]) -> bool {
        keys::verify(public_key, &self.signed_hash, &self.signature)
    }
}

impl WalletV3Codec {
    pub fn new() -> Result<Self> {
        let boc = STANDARD
            .decode(WALLET_V3R2_CODE)
            .map_err(|e| Error::Cell(format!("bad wallet code: {}", e)))?;
        Ok(Self {
            code: cell::parse_boc(&boc)?,
            wallet_id: DEFAULT_WALLET_ID.wrapping_add(WALLET_WORKCHAIN as u32),
        })
    }

    /// Initial contract state: code plus `seqno | wallet id | public key`.
    fn state_init(&self, public_key: &[u8; 32]) -> Result<Arc<Cell>> {
        let data = CellBuilder::new()
            .store_uint(0, 32)?
            .store_uint(u64::from(self.wallet_id), 32)?
            .store_bytes(public_key)?
            .build();
        // No split depth, not special, code and data present, no library.
        Ok(CellBuilder::new()
            .store_uint(0b00110, 5)?
            .store_reference(self.code.clone())?
            .store_reference(data)?
            .build())
    }

    fn internal_message(intent: &TransferIntent) -> Result<Arc<Cell>> {
        let to: AccountAddress = intent
            .to
            .parse()
            .map_err(|_| Error::InvalidDestination(intent.to.clone()))?;
        Ok(CellBuilder::new()
            .store_bit(false)? // int_msg_info
            .store_bit(true)? // ihr disabled
            .store_bit(intent.bounce)?
            .store_bit(false)? // bounced
            .store_address(None)?
            .store_address(Some(&to))?
            .store_coins(intent.amount)?
            .store_bit(false)? // no extra currencies
            .store_coins(Coins::ZERO)? // ihr fee
            .store_coins(Coins::ZERO)? // forward fee
            .store_uint(0, 64)? // created lt
            .store_uint(0, 32)? // created at
            .store_bit(false)? // no state init
            .store_bit(false)? // empty inline body
            .build())
    }

    fn valid_until(seqno: u32) -> u32 {
        if seqno == 0 {
            return u32::MAX;
        }
        u32::try_from(Utc::now().timestamp() + MESSAGE_TTL_SECS).unwrap_or(u32::MAX)
    }

    /// Decode an external message produced by [`WalletCodec::sign_transfer`].
    pub fn decode_transfer(&self, message: &SignedMessage) -> Result<DecodedTransfer> {
        let bytes = STANDARD
            .decode(&message.boc)
            .map_err(|e| Error::Cell(format!("bad message encoding: {}", e)))?;
        let root = cell::parse_boc(&bytes)?;

        let mut msg = root.parser();
        if msg.load_uint(2)? != 0b10 {
            return Err(Error::Cell("not an inbound external message".to_string()));
        }
        msg.load_address()?;
        let wallet = msg
            .load_address()?
            .ok_or_else(|| Error::Cell("message has no destination".to_string()))?;
        msg.load_coins()?;

        let public_key = if msg.load_bit()? {
            if !msg.load_bit()? {
                return Err(Error::Cell("inline state init".to_string()));
            }
            let init = msg.load_reference()?;
            if init.hash() != wallet.account_id {
                return Err(Error::Cell(
                    "state init does not match the wallet address".to_string(),
                ));
            }
            let mut init_slice = init.parser();
            init_slice.load_uint(5)?;
            init_slice.load_reference()?;
            let mut data = init_slice.load_reference()?.parser();
            data.load_uint(64)?;
            Some(data.load_bytes::<32>()?)
        } else {
            None
        };

        if !msg.load_bit()? {
            return Err(Error::Cell("inline message body".to_string()));
        }
        let mut body = msg.load_reference()?.parser();
        let signature = body.load_bytes::<64>()?;
        let signed_hash = body.remainder()?.hash();
        let wallet_id = body.load_uint(32)? as u32;
        let valid_until = body.load_uint(32)? as u32;
        let seqno = body.load_uint(32)? as u32;
        let mode = SendMode(body.load_uint(8)? as u8);

        let mut internal = body.load_reference()?.parser();
        if internal.load_bit()? {
            return Err(Error::Cell("not an internal message".to_string()));
        }
        internal.load_bit()?;
        let bounce = internal.load_bit()?;
        internal.load_bit()?;
        internal.load_address()?;
        let destination = internal
            .load_address()?
            .ok_or_else(|| Error::Cell("transfer has no destination".to_string()))?;
        let amount = internal.load_coins()?;

        Ok(DecodedTransfer {
            wallet,
            public_key,
            signature,
            signed_hash,
            wallet_id,
            valid_until,
            seqno,
            mode,
            destination,
            amount,
            bounce,
        })
    }
}

impl WalletCodec for WalletV3Codec {
    fn address(&self, public_key: &[u8; 32], _version: WalletVersion) -> Result<AccountAddress> {
        let init = self.state_init(public_key)?;
        Ok(AccountAddress::new(WALLET_WORKCHAIN, init.hash()))
    }

    fn sign_transfer(
        &self,
        key: &KeyPair,
        version: WalletVersion,
        intent: &TransferIntent,
    ) -> Result<SignedMessage> {
        let public_key = key.public_key();
        let signing = CellBuilder::new()
            .store_uint(u64::from(self.wallet_id), 32)?
            .store_uint(u64::from(Self::valid_until(intent.seqno)), 32)?
            .store_uint(u64::from(intent.seqno), 32)?
            .store_uint(u64::from(intent.mode.0), 8)?
            .store_reference(Self::internal_message(intent)?)?
            .build();
        let signature = key.sign(&signing.hash());
        let body = CellBuilder::new()
            .store_bytes(&signature)?
            .append(&signing)?
            .build();

        let wallet = self.address(&public_key, version)?;
        let mut message = CellBuilder::new();
        message
            .store_uint(0b10, 2)? // ext_in_msg_info
            .store_address(None)?
            .store_address(Some(&wallet))?
            .store_coins(Coins::ZERO)?; // import fee
        if intent.seqno == 0 {
            // Deploys the wallet if it is not active yet.
            message
                .store_bit(true)?
                .store_bit(true)?
                .store_reference(self.state_init(&public_key)?)?;
        } else {
            message.store_bit(false)?;
        }
        message.store_bit(true)?.store_reference(body)?;

        Ok(SignedMessage {
            boc: STANDARD.encode(cell::serialize_boc(&message.build())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> WalletV3Codec {
        WalletV3Codec::new().unwrap()
    }

    fn key(byte: u8) -> KeyPair {
        KeyPair::from_secret(&[byte; 32])
    }

    #[test]
    fn test_contract_code_hash() {
        assert_eq!(
            hex::encode(codec().code.hash()),
            "84dafa449f98a6987789ba232358072bc0f76dc4524002a5d0918b9a75d2d599"
        );
    }

    #[test]
    fn test_address_from_state_init() {
        let codec = codec();
        let address = codec.address(&[7; 32], WalletVersion::CURRENT).unwrap();
        assert_eq!(address.workchain, 0);
        assert_eq!(
            hex::encode(address.account_id),
            "d20b8aa38e9c77902c130c8760bdbe407da810026dbad1b0f740e470a55f375f"
        );
        // Same contract for every address version.
        assert_eq!(
            codec.address(&[7; 32], WalletVersion::LEGACY).unwrap(),
            address
        );
        assert_ne!(
            codec.address(&[8; 32], WalletVersion::CURRENT).unwrap(),
            address
        );
    }

    #[test]
    fn test_wallet_addresses_are_valid() {
        let wallet = Wallet::open(&codec(), key(2), WalletVersion::CURRENT, false).unwrap();
        assert!(custody_core::is_valid_address(&wallet.address.raw));
        assert!(custody_core::is_valid_address(&wallet.address.user_friendly));
    }

    #[test]
    fn test_first_transfer_deploys_wallet() {
        let codec = codec();
        let wallet = Wallet::open(&codec, key(3), WalletVersion::LEGACY, false).unwrap();
        let destination = Wallet::open(&codec, key(4), WalletVersion::CURRENT, true).unwrap();
        let intent = TransferIntent::drain(destination.address.user_friendly.clone(), 0, true);
        let message = wallet.sign(&codec, &intent).unwrap();

        let decoded = codec.decode_transfer(&message).unwrap();
        assert_eq!(decoded.wallet.to_raw(), wallet.address.raw);
        assert_eq!(decoded.public_key, Some(wallet.key.public_key()));
        assert!(decoded.verify(&wallet.key.public_key()));
        assert!(!decoded.verify(&destination.key.public_key()));
        assert_eq!(decoded.wallet_id, DEFAULT_WALLET_ID);
        assert_eq!(decoded.valid_until, u32::MAX);
        assert_eq!(decoded.seqno, 0);
        assert_eq!(decoded.destination.to_raw(), destination.address.raw);
        assert_eq!(decoded.amount, Coins::ZERO);
        assert!(decoded.mode.contains(SendMode::CARRY_ALL_BALANCE));
        assert!(decoded.mode.contains(SendMode::DESTROY_IF_ZERO));
        assert!(!decoded.bounce);
    }

    #[test]
    fn test_later_transfer_has_no_state_init() {
        let codec = codec();
        let wallet = Wallet::open(&codec, key(5), WalletVersion::CURRENT, false).unwrap();
        let destination = AccountAddress::new(0, [9; 32]);
        let intent = TransferIntent::exact(destination.to_raw(), Coins::from_nanos(1_500_000_000), 3);
        let message = wallet.sign(&codec, &intent).unwrap();

        let decoded = codec.decode_transfer(&message).unwrap();
        assert_eq!(decoded.public_key, None);
        assert!(decoded.verify(&wallet.key.public_key()));
        assert_eq!(decoded.seqno, 3);
        assert!(decoded.valid_until > Utc::now().timestamp() as u32);
        assert_eq!(decoded.destination, destination);
        assert_eq!(decoded.amount, Coins::from_nanos(1_500_000_000));
        assert_eq!(decoded.mode, SendMode(3));
    }

    #[test]
    fn test_bad_destination_rejected() {
        let wallet = Wallet::open(&codec(), key(6), WalletVersion::CURRENT, false).unwrap();
        let err = wallet
            .sign(&codec(), &TransferIntent::exact("EQdest", Coins::from_nanos(1), 1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDestination(_)));
    }

    #[test]
    fn test_tampered_message_rejected() {
        let codec = codec();
        let wallet = Wallet::open(&codec, key(7), WalletVersion::CURRENT, false).unwrap();
        let intent = TransferIntent::exact(
            AccountAddress::new(0, [1; 32]).to_raw(),
            Coins::from_nanos(5),
            2,
        );
        let message = wallet.sign(&codec, &intent).unwrap();

        let mut bytes = STANDARD.decode(&message.boc).unwrap();
        let n = bytes.len();
        bytes[n - 8] ^= 0x01;
        let tampered = SignedMessage {
            boc: STANDARD.encode(bytes),
        };
        assert!(codec.decode_transfer(&tampered).is_err());
    }

    #[test]
    fn test_send_modes() {
        let drain = TransferIntent::drain("EQdest", 4, false);
        assert_eq!(drain.mode, SendMode(128));
        assert_eq!(drain.amount, Coins::ZERO);
        let exact = TransferIntent::exact("EQdest", Coins::from_nanos(1), 4);
        assert_eq!(exact.mode, SendMode(3));
    }
}

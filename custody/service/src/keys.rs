// Copyright (c) 2024 The Botho Foundation

//! Key management.
//!
//! Wallet secrets are BIP39 mnemonics. Keys are derived from the mnemonic
//! seed with SLIP-0010 (ed25519, hardened components only).
//!
//! Mnemonic phrases and seeds are held in `Zeroizing` wrappers so they are
//! wiped from memory when dropped.

use bip39::{Language, Mnemonic, MnemonicType, Seed};
use custody_core::DerivationPath;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Number of words in generated mnemonics
const MNEMONIC_WORDS: MnemonicType = MnemonicType::Words24;

/// A validated BIP39 mnemonic.
#[derive(Clone)]
pub struct SeedPhrase {
    phrase: Zeroizing<String>,
}

impl SeedPhrase {
    /// Generate a new random mnemonic.
    pub fn generate() -> Self {
        let mnemonic = Mnemonic::new(MNEMONIC_WORDS, Language::English);
        Self {
            phrase: Zeroizing::new(mnemonic.phrase().to_string()),
        }
    }

    /// Restore from a mnemonic phrase.
    pub fn from_phrase(phrase: &str) -> Result<Self> {
        let mnemonic = Mnemonic::from_phrase(phrase.trim(), Language::English)
            .map_err(|e| Error::Key(format!("invalid mnemonic phrase: {}", e)))?;
        Ok(Self {
            phrase: Zeroizing::new(mnemonic.phrase().to_string()),
        })
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Derive the key pair at `path`.
    pub fn derive(&self, path: &DerivationPath) -> Result<KeyPair> {
        let mnemonic = Mnemonic::from_phrase(&self.phrase, Language::English)
            .map_err(|e| Error::Key(format!("invalid mnemonic phrase: {}", e)))?;
        // Passphrases are not supported.
        let seed = Seed::new(&mnemonic, "");
        let secret = Zeroizing::new(slip10_ed25519::derive_ed25519_private_key(
            seed.as_bytes(),
            path.components(),
        ));
        Ok(KeyPair::from_secret(&secret))
    }
}

impl std::fmt::Debug for SeedPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SeedPhrase(..)")
    }
}

/// An ed25519 signing key.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(secret),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", hex::encode(self.public_key()))
    }
}

/// Verify an ed25519 signature against a raw public key.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    key.verify(message, &ed25519_dalek::Signature::from_bytes(signature))
        .is_ok()
}

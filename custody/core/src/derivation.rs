// Copyright (c) 2024 The Botho Foundation

//! Hierarchical derivation paths (`m/44'/607'/0'`).
//!
//! ed25519 derivation only supports hardened children, so every component is
//! treated as hardened whether or not it carries the `'` marker.

use std::{fmt, str::FromStr};
use thiserror::Error;

/// Highest index usable as a path component (the hardened bit is reserved).
pub const MAX_INDEX: u32 = 0x7fff_ffff;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid derivation path '{0}'")]
pub struct DerivationPathError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// This path extended by one hardened child.
    pub fn child(&self, index: u32) -> Result<Self, DerivationPathError> {
        if index > MAX_INDEX {
            return Err(DerivationPathError(format!("{}/{}'", self, index)));
        }
        let mut components = self.0.clone();
        components.push(index);
        Ok(Self(components))
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || DerivationPathError(s.to_string());
        let mut parts = s.trim().split('/');
        if parts.next() != Some("m") {
            return Err(err());
        }
        let components = parts
            .map(|part| {
                let digits = part.strip_suffix('\'').unwrap_or(part);
                match digits.parse::<u32>() {
                    Ok(n) if n <= MAX_INDEX => Ok(n),
                    _ => Err(err()),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(components))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for c in &self.0 {
            write!(f, "/{}'", c)?;
        }
        Ok(())
    }
}

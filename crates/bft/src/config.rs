//! Finalizer configuration.

use savanna_types::{BlsPrivateKey, BlsPublicKey, CryptoError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

/// Default location of the safety file, relative to the data directory.
pub const DEFAULT_SAFETY_FILE: &str = "finalizers/safety.dat";

/// One finalizer key pair, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizerKeyConfig {
    pub public_key: String,
    pub private_key: String,
}

/// Configuration for the local finalizer set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizerSetConfig {
    /// Where finalizer safety information is persisted.
    pub safety_file: PathBuf,

    /// Finalizer keys configured on this node.
    pub keys: Vec<FinalizerKeyConfig>,
}

impl Default for FinalizerSetConfig {
    fn default() -> Self {
        Self {
            safety_file: PathBuf::from(DEFAULT_SAFETY_FILE),
            keys: Vec::new(),
        }
    }
}

/// Errors in finalizer configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid public key for finalizer {index}: {source}")]
    InvalidPublicKey {
        index: usize,
        #[source]
        source: CryptoError,
    },

    #[error("Invalid private key for finalizer {index}: {source}")]
    InvalidPrivateKey {
        index: usize,
        #[source]
        source: CryptoError,
    },

    #[error("Private key of finalizer {index} does not match public key {public_key}")]
    KeyMismatch { index: usize, public_key: BlsPublicKey },

    #[error("Finalizer key {0} configured more than once")]
    DuplicateKey(BlsPublicKey),
}

impl FinalizerSetConfig {
    /// Parse and cross-check the configured key pairs.
    pub fn parse_keys(&self) -> Result<Vec<(BlsPublicKey, BlsPrivateKey)>, ConfigError> {
        let mut seen = HashSet::with_capacity(self.keys.len());
        self.keys
            .iter()
            .enumerate()
            .map(|(index, pair)| {
                let public_key = BlsPublicKey::from_hex(&pair.public_key)
                    .map_err(|source| ConfigError::InvalidPublicKey { index, source })?;
                let private_key = BlsPrivateKey::from_hex(&pair.private_key)
                    .map_err(|source| ConfigError::InvalidPrivateKey { index, source })?;
                if private_key.public_key() != public_key {
                    return Err(ConfigError::KeyMismatch { index, public_key });
                }
                if !seen.insert(public_key) {
                    return Err(ConfigError::DuplicateKey(public_key));
                }
                Ok((public_key, private_key))
            })
            .collect()
    }
}

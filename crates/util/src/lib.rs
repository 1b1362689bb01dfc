//! Operator tooling for Savanna finalizers.
//!
//! The `savanna-util` binary is a thin CLI over the functions here:
//! generating BLS keys, dumping a safety file, and checking a node
//! configuration against the safety file it points to.

use anyhow::{bail, Context};
use savanna_bft::{FinalizerSetConfig, SafetyFile};
use savanna_types::{BlockRef, BlsPrivateKey, FinalizerSafetyInformation};
use savanna_vote_processor::VoteProcessorConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Node configuration read by `safety check`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtilConfig {
    pub finalizers: FinalizerSetConfig,
    pub vote_processor: VoteProcessorConfig,
}

impl UtilConfig {
    /// Load a TOML configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config
            .vote_processor
            .validate()
            .context("Invalid vote processor configuration")?;
        Ok(config)
    }
}

/// A BLS key pair, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyPair {
    pub public_key: String,
    pub private_key: String,
}

/// Generate a key pair, from a 32-byte hex seed when given.
pub fn create_key(seed: Option<&str>) -> anyhow::Result<KeyPair> {
    let key = match seed {
        Some(seed) => {
            let bytes = hex::decode(seed).context("Seed is not valid hex")?;
            let seed: [u8; 32] = match bytes.try_into() {
                Ok(seed) => seed,
                Err(bytes) => bail!("Seed must be 32 bytes, got {}", bytes.len()),
            };
            BlsPrivateKey::from_seed(&seed)
        }
        None => BlsPrivateKey::generate(),
    };
    Ok(KeyPair {
        public_key: key.public_key().to_hex(),
        private_key: key.to_hex(),
    })
}

/// A block reference as printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRefView {
    pub block_num: u32,
    pub block_id: String,
    pub timestamp: u32,
}

impl From<&BlockRef> for BlockRefView {
    fn from(block_ref: &BlockRef) -> Self {
        Self {
            block_num: block_ref.block_num().0,
            block_id: block_ref.block_id.to_hex(),
            timestamp: block_ref.timestamp.0,
        }
    }
}

/// One safety file record as printed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyRecordView {
    pub public_key: String,
    pub last_vote_range_start: u32,
    pub last_vote: BlockRefView,
    pub lock: BlockRefView,
}

impl SafetyRecordView {
    fn new(public_key: String, fsi: &FinalizerSafetyInformation) -> Self {
        Self {
            public_key,
            last_vote_range_start: fsi.last_vote_range_start.0,
            last_vote: (&fsi.last_vote).into(),
            lock: (&fsi.lock).into(),
        }
    }
}

/// Every record of the safety file at `path`, in file order.
pub fn inspect_safety_file(path: &Path) -> anyhow::Result<Vec<SafetyRecordView>> {
    if !path.exists() {
        bail!("Safety file {} does not exist", path.display());
    }
    let records = SafetyFile::new(path)
        .load()
        .with_context(|| format!("Failed to read safety file {}", path.display()))?;
    Ok(records
        .iter()
        .map(|(key, fsi)| SafetyRecordView::new(key.to_hex(), fsi))
        .collect())
}

/// Outcome of checking a configuration against its safety file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    /// Configured keys with a stored record.
    pub stored: Vec<String>,
    /// Configured keys without one; they start from the default.
    pub missing: Vec<String>,
    /// Stored keys that are not configured.
    pub inactive: Vec<String>,
}

/// Validate the configured keys and match them against the safety file.
///
/// `base_dir` resolves a relative safety file path.
pub fn check_config(config: &UtilConfig, base_dir: &Path) -> anyhow::Result<CheckReport> {
    let keys = config
        .finalizers
        .parse_keys()
        .context("Invalid finalizer keys")?;
    let path = base_dir.join(&config.finalizers.safety_file);
    let mut stored = SafetyFile::new(&path)
        .load()
        .with_context(|| format!("Failed to read safety file {}", path.display()))?;

    let mut report = CheckReport::default();
    for (public_key, _) in &keys {
        if stored.shift_remove(public_key).is_some() {
            report.stored.push(public_key.to_hex());
        } else {
            report.missing.push(public_key.to_hex());
        }
    }
    report.inactive = stored.keys().map(|key| key.to_hex()).collect();
    Ok(report)
}

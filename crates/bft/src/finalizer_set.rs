//! The finalizers configured on this node.
//!
//! [`FinalizerSet`] decides votes for every local finalizer, persists the
//! resulting safety information, and only then hands the votes out. A vote
//! can never reach the network before the state that produced it is on
//! disk, so a crash between the two steps loses at most a vote, never
//! safety.

use crate::block_state::BlockState;
use crate::config::{ConfigError, FinalizerSetConfig};
use crate::finalizer::Finalizer;
use crate::safety_file::{SafetyFile, SafetyFileError, SafetyMap};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use savanna_messages::VoteMessage;
use savanna_types::{
    BlockQuorumCertificate, BlsPrivateKey, BlsPublicKey, FinalizerAuthority, FinalizerPolicy,
    FinalizerSafetyInformation, QcError, QuorumCertificate,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from the finalizer set.
#[derive(Debug, Error)]
pub enum FinalizerSetError {
    #[error(transparent)]
    Safety(#[from] SafetyFileError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Received QC rejected: {0}")]
    Qc(#[from] QcError),
}

/// A vote cast by a local finalizer, with the authorities it signed as.
#[derive(Debug, Clone)]
pub struct CastVote {
    pub vote: VoteMessage,
    /// Entry in the block's active policy, if the finalizer is in it.
    pub active_authority: Option<FinalizerAuthority>,
    /// Entry in the block's pending policy, if the finalizer is in it.
    pub pending_authority: Option<FinalizerAuthority>,
}

struct Inner {
    finalizers: IndexMap<BlsPublicKey, Finalizer>,
    /// Records for keys no longer configured; written back untouched.
    inactive: SafetyMap,
    default_fsi: FinalizerSafetyInformation,
    file: SafetyFile,
}

impl Inner {
    fn save(&mut self) -> Result<(), SafetyFileError> {
        let Inner {
            finalizers,
            inactive,
            file,
            ..
        } = self;
        file.save(inactive, finalizers.iter().map(|(key, f)| (key, &f.fsi)))
    }
}

/// Local finalizers and their persisted safety state.
///
/// The key set is fixed after [`set_keys`](Self::set_keys), so the
/// read-only accessors never take the lock.
pub struct FinalizerSet {
    keys: IndexSet<BlsPublicKey>,
    has_voted: AtomicBool,
    inner: Mutex<Inner>,
}

impl FinalizerSet {
    /// An empty set persisting to `safety_file`.
    pub fn new(safety_file: impl Into<PathBuf>) -> Self {
        Self {
            keys: IndexSet::new(),
            has_voted: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                finalizers: IndexMap::new(),
                inactive: SafetyMap::new(),
                default_fsi: FinalizerSafetyInformation::unset(),
                file: SafetyFile::new(safety_file),
            }),
        }
    }

    /// Build the set described by `config`, loading stored safety state.
    pub fn from_config(config: &FinalizerSetConfig) -> Result<Self, FinalizerSetError> {
        let mut set = Self::new(config.safety_file.clone());
        set.set_keys(config.parse_keys()?)?;
        Ok(set)
    }

    /// Configure the local finalizer keys. Call once at startup.
    ///
    /// Each key takes its stored safety information, or the default when
    /// none is stored. Stored records of keys not configured here are kept
    /// and written back with every save.
    pub fn set_keys(
        &mut self,
        keys: Vec<(BlsPublicKey, BlsPrivateKey)>,
    ) -> Result<(), FinalizerSetError> {
        if keys.is_empty() {
            return Ok(());
        }
        let inner = self.inner.get_mut();
        debug_assert!(inner.finalizers.is_empty(), "keys configured twice");

        let mut stored = inner.file.load()?;
        for (public_key, private_key) in keys {
            let fsi = stored.shift_remove(&public_key);
            debug!(
                public_key = %public_key,
                stored = fsi.is_some(),
                "Configured finalizer"
            );
            let fsi = fsi.unwrap_or(inner.default_fsi);
            inner
                .finalizers
                .insert(public_key, Finalizer::new(private_key, fsi));
            self.keys.insert(public_key);
        }
        inner.inactive = stored;

        info!(
            finalizers = self.keys.len(),
            inactive = inner.inactive.len(),
            path = %inner.file.path().display(),
            "Finalizer keys configured"
        );
        Ok(())
    }

    /// Give `fsi` to every finalizer that has no safety information yet,
    /// and use it for keys configured later.
    ///
    /// Used when finality first activates, before any vote is cast.
    pub fn set_default_safety_information(&self, fsi: FinalizerSafetyInformation) {
        let mut inner = self.inner.lock();
        for finalizer in inner.finalizers.values_mut() {
            if finalizer.fsi.is_unset() {
                finalizer.fsi = fsi;
            }
        }
        inner.default_fsi = fsi;
    }

    /// Decide votes on `block` for every local finalizer in its policies.
    ///
    /// When any vote is decided the safety file is written first; `emit` is
    /// then called once per vote after the lock is released. If the write
    /// fails nothing is emitted.
    pub fn maybe_vote(
        &self,
        block: &BlockState,
        mut emit: impl FnMut(CastVote),
    ) -> Result<(), FinalizerSetError> {
        if self.keys.is_empty() {
            return Ok(());
        }

        let votes = {
            let mut inner = self.inner.lock();
            let mut votes = Vec::new();
            for (public_key, finalizer) in inner.finalizers.iter_mut() {
                let active_authority = authority(block.active_policy(), public_key);
                let pending_authority = block
                    .pending_policy()
                    .and_then(|policy| authority(policy, public_key));
                if active_authority.is_none() && pending_authority.is_none() {
                    continue;
                }
                if let Some(vote) = finalizer.maybe_vote(public_key, block, block.strong_digest())
                {
                    votes.push(CastVote {
                        vote,
                        active_authority,
                        pending_authority,
                    });
                }
            }
            if votes.is_empty() {
                return Ok(());
            }
            inner.save()?;
            votes
        };

        self.has_voted.store(true, Ordering::Relaxed);
        debug!(
            block_num = %block.block_num(),
            block_id = %block.id(),
            votes = votes.len(),
            "Safety information saved, emitting votes"
        );
        for vote in votes {
            emit(vote);
        }
        Ok(())
    }

    /// Adopt the lock implied by a strong `received_qc` carried by `block`
    /// for local finalizers that voted in it.
    ///
    /// Once this node has cast a vote its own safety information is current
    /// and received QCs are ignored. Returns whether anything was saved.
    pub fn maybe_update_fsi(
        &self,
        block: &BlockState,
        received_qc: &BlockQuorumCertificate,
    ) -> Result<bool, FinalizerSetError> {
        if self.keys.is_empty() || self.has_voted.load(Ordering::Relaxed) {
            return Ok(false);
        }
        if !received_qc.is_strong() {
            return Ok(false);
        }
        let pending = match (block.pending_policy(), &received_qc.pending) {
            (Some(policy), Some(qc)) => Some((policy, qc)),
            (Some(_), None) => {
                return Err(QcError::MissingPendingSignature {
                    block_num: received_qc.block_num(),
                }
                .into())
            }
            (None, _) => None,
        };

        let mut inner = self.inner.lock();
        let mut updated = false;
        for (public_key, finalizer) in inner.finalizers.iter_mut() {
            let voted = voted_strong(block.active_policy(), &received_qc.active, public_key)
                || pending.is_some_and(|(policy, qc)| voted_strong(policy, qc, public_key));
            if voted && finalizer.maybe_update_fsi(block) {
                debug!(
                    public_key = %public_key,
                    lock_num = %finalizer.fsi.lock.block_num(),
                    "Lock updated from received QC"
                );
                updated = true;
            }
        }
        if updated {
            inner.save()?;
        }
        Ok(updated)
    }

    /// Number of configured finalizers.
    pub fn size(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, public_key: &BlsPublicKey) -> bool {
        self.keys.contains(public_key)
    }

    /// Configured keys, in configuration order.
    pub fn public_keys(&self) -> impl Iterator<Item = &BlsPublicKey> + '_ {
        self.keys.iter()
    }

    /// Current safety information of a configured finalizer.
    pub fn fsi(&self, public_key: &BlsPublicKey) -> Option<FinalizerSafetyInformation> {
        self.inner.lock().finalizers.get(public_key).map(|f| f.fsi)
    }
}

impl std::fmt::Debug for FinalizerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinalizerSet")
            .field("keys", &self.keys)
            .field("has_voted", &self.has_voted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn authority(policy: &FinalizerPolicy, public_key: &BlsPublicKey) -> Option<FinalizerAuthority> {
    policy
        .index_of(public_key)
        .and_then(|index| policy.finalizer(index))
        .cloned()
}

fn voted_strong(policy: &FinalizerPolicy, qc: &QuorumCertificate, public_key: &BlsPublicKey) -> bool {
    policy.index_of(public_key).is_some_and(|index| {
        qc.strong_votes
            .as_ref()
            .is_some_and(|votes| votes.is_set(index))
    })
}

//! Core types for the Savanna finality engine.
//!
//! This crate provides the foundational types shared by every other crate:
//!
//! - Primitive types: [`Digest`], [`BlockId`], [`BlockNum`], [`BlockTimestamp`]
//! - BLS wrappers: [`BlsPrivateKey`], [`BlsPublicKey`], [`BlsSignature`],
//!   [`AggregateSignature`]
//! - Finalizer rosters: [`FinalizerPolicy`], [`FinalizerAuthority`]
//! - Vote tracking and certificates: [`VoteBitset`], [`QuorumCertificate`],
//!   [`BlockQuorumCertificate`]
//! - Finality bookkeeping: [`FinalityCore`], [`BlockRef`], [`QcClaim`],
//!   [`FinalizerSafetyInformation`]

mod block;
mod crypto;
mod finalizer_policy;
mod hash;
mod identifiers;
mod quorum_certificate;
mod safety;
mod signing;
mod vote_bitset;

pub use block::{BlockRef, FinalityCore, FinalityCoreError, QcClaim, QcLink};
pub use crypto::{
    AggregateSignature, BlsPrivateKey, BlsPublicKey, BlsSignature, CryptoError, BLS_DST,
};
pub use finalizer_policy::{FinalizerAuthority, FinalizerPolicy, PolicyError};
pub use hash::{Digest, HexError};
pub use identifiers::{BlockId, BlockNum, BlockTimestamp, ConnectionId};
pub use quorum_certificate::{BlockQuorumCertificate, QcError, QuorumCertificate};
pub use safety::FinalizerSafetyInformation;
pub use signing::{vote_signing_message, weak_digest, WEAK_SUFFIX};
pub use vote_bitset::VoteBitset;

//! BLS12-381 keys and signatures.
//!
//! Finalizers sign with BLS12-381 in the "minimal public key" configuration
//! (48-byte G1 public keys, 96-byte G2 signatures) so that votes can be
//! aggregated into a single quorum certificate signature.
//!
//! Keys and signatures are stored in compressed form. They are decompressed
//! on demand, which keeps the types `Eq + Hash + Ord` and bit-identical across
//! a round trip through the safety file or the wire.

use blst::min_pk;
use blst::BLST_ERROR;
use std::fmt;

/// Domain separation tag for finalizer signatures (proof-of-possession scheme).
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// A finalizer's BLS private key.
#[derive(Clone)]
pub struct BlsPrivateKey(min_pk::SecretKey);

impl BlsPrivateKey {
    /// Size of a serialized private key.
    pub const BYTES: usize = 32;

    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        Self::from_seed(&ikm)
    }

    /// Derive a key from 32 bytes of input key material (for tests and tooling).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        // key_gen only fails for ikm shorter than 32 bytes, which the array type rules out.
        match min_pk::SecretKey::key_gen(seed, &[]) {
            Ok(sk) => Self(sk),
            Err(e) => unreachable!("key_gen rejected 32-byte ikm: {:?}", e),
        }
    }

    /// Parse a serialized private key.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        min_pk::SecretKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidPrivateKey(format!("{:?}", e)))
    }

    /// Parse a hex-encoded private key.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex).map_err(|_| CryptoError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    /// Hex encoding of the private key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature(self.0.sign(message, BLS_DST, &[]).compress())
    }

    /// Derive the public key.
    pub fn public_key(&self) -> BlsPublicKey {
        BlsPublicKey(self.0.sk_to_pk().compress())
    }
}

impl fmt::Debug for BlsPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsPrivateKey({:?})", self.public_key())
    }
}

/// A finalizer's BLS public key (compressed G1 point).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlsPublicKey([u8; 48]);

impl BlsPublicKey {
    /// Size of a compressed public key.
    pub const BYTES: usize = 48;

    /// Parse and validate a compressed public key.
    ///
    /// Rejects points not on the curve, outside the subgroup, or at infinity.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let pk = min_pk::PublicKey::key_validate(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("{:?}", e)))?;
        Ok(Self(pk.compress()))
    }

    /// Parse a hex-encoded public key.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex).map_err(|_| CryptoError::InvalidHex)?;
        Self::from_bytes(&bytes)
    }

    /// Borrow the compressed bytes.
    pub fn as_bytes(&self) -> &[u8; 48] {
        &self.0
    }

    /// Hex encoding of the public key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Verify `signature` over `message`.
    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> bool {
        let Ok(pk) = self.decompress() else {
            return false;
        };
        let Ok(sig) = signature.decompress() else {
            return false;
        };
        sig.verify(true, message, BLS_DST, &[], &pk, false) == BLST_ERROR::BLST_SUCCESS
    }

    fn decompress(&self) -> Result<min_pk::PublicKey, CryptoError> {
        min_pk::PublicKey::uncompress(&self.0)
            .map_err(|e| CryptoError::InvalidPublicKey(format!("{:?}", e)))
    }
}

impl fmt::Debug for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "BlsPublicKey({}..{})", &hex[..8], &hex[hex.len() - 8..])
    }
}

impl fmt::Display for BlsPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A BLS signature (compressed G2 point).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlsSignature([u8; 96]);

impl BlsSignature {
    /// Size of a compressed signature.
    pub const BYTES: usize = 96;

    /// Parse a compressed signature.
    ///
    /// Only checks that the bytes decode to a curve point; subgroup membership
    /// is checked at verification time.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let sig = min_pk::Signature::from_bytes(bytes)
            .map_err(|e| CryptoError::InvalidSignature(format!("{:?}", e)))?;
        Ok(Self(sig.compress()))
    }

    /// Borrow the compressed bytes.
    pub fn as_bytes(&self) -> &[u8; 96] {
        &self.0
    }

    /// Verify an aggregate signature over several groups of signers.
    ///
    /// Each group is a set of public keys that all signed the same message.
    /// Empty groups are skipped. Returns false if no group has any signer.
    pub fn verify_aggregate(&self, groups: &[(&[&BlsPublicKey], &[u8])]) -> bool {
        let mut aggregated = Vec::with_capacity(groups.len());
        let mut messages: Vec<&[u8]> = Vec::with_capacity(groups.len());
        for (keys, message) in groups {
            if keys.is_empty() {
                continue;
            }
            let Ok(pks) = keys
                .iter()
                .map(|k| k.decompress())
                .collect::<Result<Vec<_>, _>>()
            else {
                return false;
            };
            let refs: Vec<&min_pk::PublicKey> = pks.iter().collect();
            let Ok(agg) = min_pk::AggregatePublicKey::aggregate(&refs, false) else {
                return false;
            };
            aggregated.push(agg.to_public_key());
            messages.push(*message);
        }
        if aggregated.is_empty() {
            return false;
        }

        let Ok(sig) = self.decompress() else {
            return false;
        };
        let pk_refs: Vec<&min_pk::PublicKey> = aggregated.iter().collect();
        sig.aggregate_verify(true, &messages, BLS_DST, &pk_refs, false)
            == BLST_ERROR::BLST_SUCCESS
    }

    fn decompress(&self) -> Result<min_pk::Signature, CryptoError> {
        min_pk::Signature::uncompress(&self.0)
            .map_err(|e| CryptoError::InvalidSignature(format!("{:?}", e)))
    }
}

impl fmt::Debug for BlsSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlsSignature({}..)", &hex::encode(self.0)[..16])
    }
}

/// A running aggregate of BLS signatures.
///
/// Starts empty; each [`aggregate`](Self::aggregate) folds one more signature
/// in. Aggregation is associative and commutative, so the order in which votes
/// arrive does not change the result.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AggregateSignature(Option<BlsSignature>);

impl AggregateSignature {
    /// An aggregate containing no signatures.
    pub fn new() -> Self {
        Self(None)
    }

    /// Fold `signature` into the aggregate.
    pub fn aggregate(&mut self, signature: &BlsSignature) -> Result<(), CryptoError> {
        self.0 = Some(match self.0 {
            None => *signature,
            Some(current) => combine(&current, signature)?,
        });
        Ok(())
    }

    /// Fold another aggregate into this one.
    pub fn merge(&mut self, other: &AggregateSignature) -> Result<(), CryptoError> {
        match other.0 {
            Some(ref sig) => self.aggregate(sig),
            None => Ok(()),
        }
    }

    /// The aggregated signature, or None if nothing was aggregated.
    pub fn signature(&self) -> Option<BlsSignature> {
        self.0
    }

    /// True if no signature has been aggregated.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Debug for AggregateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(sig) => write!(f, "AggregateSignature({:?})", sig),
            None => write!(f, "AggregateSignature(empty)"),
        }
    }
}

fn combine(a: &BlsSignature, b: &BlsSignature) -> Result<BlsSignature, CryptoError> {
    let a = a.decompress()?;
    let b = b.decompress()?;
    let agg = min_pk::AggregateSignature::aggregate(&[&a, &b], false)
        .map_err(|e| CryptoError::AggregationFailed(format!("{:?}", e)))?;
    Ok(BlsSignature(agg.to_signature().compress()))
}

/// Errors from key and signature handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Bytes do not form a valid private key.
    #[error("Invalid BLS private key: {0}")]
    InvalidPrivateKey(String),

    /// Bytes do not form a valid public key.
    #[error("Invalid BLS public key: {0}")]
    InvalidPublicKey(String),

    /// Bytes do not form a valid signature.
    #[error("Invalid BLS signature: {0}")]
    InvalidSignature(String),

    /// Input was not valid hex.
    #[error("Invalid hex string")]
    InvalidHex,

    /// Aggregation failed.
    #[error("Signature aggregation failed: {0}")]
    AggregationFailed(String),
}

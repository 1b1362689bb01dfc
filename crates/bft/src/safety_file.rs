//! Persistent finalizer safety information.
//!
//! # File Format
//!
//! All integers are little-endian:
//!
//! ```text
//! [magic: u64][version: u64][count: u64]
//! count × [public_key: 48][last_vote_range_start: u32]
//!         [last_vote.block_id: 32][last_vote.timestamp: u32]
//!         [lock.block_id: 32][lock.timestamp: u32]
//! [checksum: 32]   BLAKE3 of every preceding byte
//! ```
//!
//! Records of finalizers that are no longer configured come first, followed
//! by the configured ones. The first part never changes for the life of a
//! handle, so it is encoded once and its checksum state cached.
//!
//! Every save writes a complete image to a sibling temp file, syncs it and
//! renames it over the old file, so a crash mid-save leaves either the old
//! or the new contents on disk.
//!
//! Files written before versioning use [`LEGACY_MAGIC`], no version field
//! and no checksum. They are read but never written.

use indexmap::IndexMap;
use savanna_types::{
    BlockId, BlockRef, BlockTimestamp, BlsPublicKey, CryptoError, FinalizerSafetyInformation,
};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Magic number of the current format.
pub const MAGIC: u64 = 0x5AFE_1111_5AFE_1112;

/// Magic number of the unversioned legacy format.
pub const LEGACY_MAGIC: u64 = 0x5AFE_1111_5AFE_1111;

/// Current format version.
pub const VERSION: u64 = 1;

/// Size of one `(public_key, fsi)` record.
pub const RECORD_LEN: usize = BlsPublicKey::BYTES + FinalizerSafetyInformation::ENCODED_LEN;

const HEADER_LEN: usize = 3 * 8;
const LEGACY_HEADER_LEN: usize = 2 * 8;
const CHECKSUM_LEN: usize = 32;

/// Safety information keyed by finalizer, in file order.
pub type SafetyMap = IndexMap<BlsPublicKey, FinalizerSafetyInformation>;

/// Errors reading or writing the safety file.
#[derive(Debug, Error)]
pub enum SafetyFileError {
    #[error("I/O error on safety file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Bad magic number {0:#018x} in safety file")]
    BadMagic(u64),

    #[error("Unsupported safety file version {0}")]
    UnsupportedVersion(u64),

    #[error("Safety file truncated: need {needed} bytes, have {actual}")]
    Truncated { needed: usize, actual: usize },

    #[error("Safety file has {0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("Safety file checksum mismatch")]
    ChecksumMismatch,

    #[error("Invalid public key in safety record {index}: {source}")]
    InvalidKey {
        index: usize,
        #[source]
        source: CryptoError,
    },

    #[error("Duplicate public key {0} in safety file")]
    DuplicateKey(BlsPublicKey),
}

/// Header plus inactive records, as written by the first save on a handle.
struct Prefix {
    bytes: Vec<u8>,
    active_count: usize,
    hasher: blake3::Hasher,
}

/// Handle on a safety file.
pub struct SafetyFile {
    path: PathBuf,
    prefix: Option<Prefix>,
}

impl SafetyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            prefix: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a save is staged before it replaces the file.
    pub fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn io_error(&self, source: io::Error) -> SafetyFileError {
        SafetyFileError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Read every record. A missing file reads as empty.
    ///
    /// A leftover temp file from an interrupted save is ignored.
    pub fn load(&self) -> Result<SafetyMap, SafetyFileError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Safety file does not exist, using defaults");
                return Ok(SafetyMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };
        let records = decode(&bytes)?;
        debug!(path = %self.path.display(), records = records.len(), "Loaded safety file");
        Ok(records)
    }

    /// Atomically replace the file with `inactive` followed by `active`.
    ///
    /// The first call on a handle creates the directory if needed and encodes
    /// the inactive section; later calls reuse it unless the number of active
    /// records changed.
    pub fn save<'a, I>(&mut self, inactive: &SafetyMap, active: I) -> Result<(), SafetyFileError>
    where
        I: IntoIterator<Item = (&'a BlsPublicKey, &'a FinalizerSafetyInformation)>,
        I::IntoIter: ExactSizeIterator,
    {
        let active = active.into_iter();
        let active_count = active.len();
        let mut body = Vec::with_capacity(active_count * RECORD_LEN + CHECKSUM_LEN);
        for (key, fsi) in active {
            put_record(&mut body, key, fsi);
        }

        let prefix = match self.prefix.take() {
            Some(prefix) if prefix.active_count == active_count => prefix,
            _ => {
                create_parent_dir(&self.path)?;
                let mut bytes = encode_header(inactive.len() + active_count);
                for (key, fsi) in inactive {
                    put_record(&mut bytes, key, fsi);
                }
                let mut hasher = blake3::Hasher::new();
                hasher.update(&bytes);
                Prefix {
                    bytes,
                    active_count,
                    hasher,
                }
            }
        };

        let mut hasher = prefix.hasher.clone();
        hasher.update(&body);
        body.extend_from_slice(hasher.finalize().as_bytes());

        let temp_path = self.temp_path();
        replace_file(&temp_path, &self.path, &prefix.bytes, &body).map_err(|e| {
            // Do not leave a half-written temp file behind.
            let _ = fs::remove_file(&temp_path);
            self.io_error(e)
        })?;
        self.prefix = Some(prefix);
        Ok(())
    }
}

fn create_parent_dir(path: &Path) -> Result<(), SafetyFileError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|source| SafetyFileError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            info!(dir = %parent.display(), "Created safety file directory");
        }
    }
    Ok(())
}

impl std::fmt::Debug for SafetyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyFile")
            .field("path", &self.path)
            .field("prefix_cached", &self.prefix.is_some())
            .finish()
    }
}

/// Write `head` then `tail` to `temp`, sync, and rename over `path`.
fn replace_file(temp: &Path, path: &Path, head: &[u8], tail: &[u8]) -> io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(head)?;
    file.write_all(tail)?;
    file.sync_data()?;
    drop(file);
    fs::rename(temp, path)?;
    // Persist the rename itself where directories can be synced.
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

fn encode_header(count: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + count * RECORD_LEN + CHECKSUM_LEN);
    bytes.extend_from_slice(&MAGIC.to_le_bytes());
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&(count as u64).to_le_bytes());
    bytes
}

fn put_block_ref(buf: &mut Vec<u8>, block_ref: &BlockRef) {
    buf.extend_from_slice(block_ref.block_id.as_bytes());
    buf.extend_from_slice(&block_ref.timestamp.0.to_le_bytes());
}

fn put_record(buf: &mut Vec<u8>, key: &BlsPublicKey, fsi: &FinalizerSafetyInformation) {
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&fsi.last_vote_range_start.0.to_le_bytes());
    put_block_ref(buf, &fsi.last_vote);
    put_block_ref(buf, &fsi.lock);
}

/// Encode a complete file in the current format.
pub fn encode(records: &SafetyMap) -> Vec<u8> {
    let mut bytes = encode_header(records.len());
    for (key, fsi) in records {
        put_record(&mut bytes, key, fsi);
    }
    let checksum = blake3::hash(&bytes);
    bytes.extend_from_slice(checksum.as_bytes());
    bytes
}

/// Sequential little-endian reader.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Result<[u8; N], SafetyFileError> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or(SafetyFileError::Truncated {
            needed: end,
            actual: self.bytes.len(),
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u64(&mut self) -> Result<u64, SafetyFileError> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, SafetyFileError> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    fn block_ref(&mut self) -> Result<BlockRef, SafetyFileError> {
        let block_id = BlockId::from_bytes(self.take::<32>()?);
        let timestamp = BlockTimestamp(self.u32()?);
        Ok(BlockRef::new(block_id, timestamp))
    }
}

/// Decode a file in either format.
pub fn decode(bytes: &[u8]) -> Result<SafetyMap, SafetyFileError> {
    let mut reader = Reader { bytes, pos: 0 };
    let (header_len, checksum_len) = match reader.u64()? {
        MAGIC => {
            let version = reader.u64()?;
            if version != VERSION {
                return Err(SafetyFileError::UnsupportedVersion(version));
            }
            (HEADER_LEN, CHECKSUM_LEN)
        }
        LEGACY_MAGIC => (LEGACY_HEADER_LEN, 0),
        other => return Err(SafetyFileError::BadMagic(other)),
    };

    let count = reader.u64()?;
    let needed = usize::try_from(count)
        .ok()
        .and_then(|c| c.checked_mul(RECORD_LEN))
        .and_then(|n| n.checked_add(header_len + checksum_len))
        .unwrap_or(usize::MAX);
    if bytes.len() < needed {
        return Err(SafetyFileError::Truncated {
            needed,
            actual: bytes.len(),
        });
    }
    if bytes.len() > needed {
        return Err(SafetyFileError::TrailingBytes(bytes.len() - needed));
    }

    if checksum_len > 0 {
        let body_len = needed - checksum_len;
        let expected = blake3::hash(&bytes[..body_len]);
        if expected.as_bytes()[..] != bytes[body_len..] {
            return Err(SafetyFileError::ChecksumMismatch);
        }
    }

    let mut records = SafetyMap::with_capacity(count as usize);
    for index in 0..count as usize {
        let key_bytes = reader.take::<{ BlsPublicKey::BYTES }>()?;
        let key = BlsPublicKey::from_bytes(&key_bytes)
            .map_err(|source| SafetyFileError::InvalidKey { index, source })?;
        let fsi = FinalizerSafetyInformation {
            last_vote_range_start: BlockTimestamp(reader.u32()?),
            last_vote: reader.block_ref()?,
            lock: reader.block_ref()?,
        };
        if records.insert(key, fsi).is_some() {
            return Err(SafetyFileError::DuplicateKey(key));
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use savanna_test_helpers::test_keys;
    use savanna_types::{BlockNum, Digest};
    use tempfile::TempDir;
    use tracing_test::traced_test;

    fn fsi(n: u32) -> FinalizerSafetyInformation {
        let id = |k: u32| BlockId::new(BlockNum(k), &Digest::from_bytes(&k.to_le_bytes()));
        FinalizerSafetyInformation {
            last_vote_range_start: BlockTimestamp(n),
            last_vote: BlockRef::new(id(n + 2), BlockTimestamp(n + 2)),
            lock: BlockRef::new(id(n + 1), BlockTimestamp(n + 1)),
        }
    }

    fn records(keys: &[BlsPublicKey], base: u32) -> SafetyMap {
        keys.iter()
            .enumerate()
            .map(|(i, k)| (*k, fsi(base + i as u32 * 10)))
            .collect()
    }

    fn public_keys(n: usize) -> Vec<BlsPublicKey> {
        test_keys(n).iter().map(|k| k.public_key()).collect()
    }

    #[traced_test]
    #[test]
    fn test_missing_file_loads_empty_and_save_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("finalizers").join("safety.dat");
        let mut file = SafetyFile::new(&path);

        assert!(file.load().unwrap().is_empty());
        assert!(!path.exists());

        let active = records(&public_keys(2), 1);
        file.save(&SafetyMap::new(), &active).unwrap();
        assert!(path.exists());
        assert_eq!(SafetyFile::new(&path).load().unwrap(), active);
    }

    #[traced_test]
    #[test]
    fn test_inactive_section_first_and_preserved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("safety.dat");
        let keys = public_keys(5);
        let inactive = records(&keys[3..], 100);
        let mut active = records(&keys[..3], 1);

        let mut file = SafetyFile::new(&path);
        file.save(&inactive, &active).unwrap();
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(len as usize, HEADER_LEN + 5 * RECORD_LEN + CHECKSUM_LEN);

        // Second save reuses the cached inactive section.
        active[1] = fsi(500);
        file.save(&inactive, &active).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), len);

        let loaded = SafetyFile::new(&path).load().unwrap();
        let order: Vec<_> = loaded.keys().copied().collect();
        assert_eq!(order, [&keys[3..], &keys[..3]].concat());
        assert_eq!(loaded[&keys[1]], fsi(500));
        assert_eq!(loaded[&keys[4]], inactive[&keys[4]]);
    }

    #[traced_test]
    #[test]
    fn test_failed_save_keeps_previous_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("safety.dat");
        let keys = public_keys(2);
        let first = records(&keys, 1);

        let mut file = SafetyFile::new(&path);
        file.save(&SafetyMap::new(), &first).unwrap();
        assert!(!file.temp_path().exists());

        // A directory squatting on the temp path makes the staging write fail.
        fs::create_dir(file.temp_path()).unwrap();
        let second = records(&keys, 50);
        assert!(matches!(
            file.save(&SafetyMap::new(), &second),
            Err(SafetyFileError::Io { .. })
        ));
        assert_eq!(SafetyFile::new(&path).load().unwrap(), first);

        // A torn temp file from an interrupted save does not affect loading.
        fs::remove_dir(file.temp_path()).unwrap();
        fs::write(file.temp_path(), &encode(&second)[..10]).unwrap();
        assert_eq!(SafetyFile::new(&path).load().unwrap(), first);

        file.save(&SafetyMap::new(), &second).unwrap();
        assert!(!file.temp_path().exists());
        assert_eq!(SafetyFile::new(&path).load().unwrap(), second);
    }

    #[test]
    fn test_encode_matches_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("safety.dat");
        let keys = public_keys(3);
        let inactive = records(&keys[..1], 7);
        let active = records(&keys[1..], 9);

        let mut file = SafetyFile::new(&path);
        file.save(&inactive, &active).unwrap();

        let mut all = inactive.clone();
        all.extend(active);
        assert_eq!(fs::read(&path).unwrap(), encode(&all));
    }

    #[test]
    fn test_corrupt_files_rejected() {
        let keys = public_keys(2);
        let good = encode(&records(&keys, 3));

        let mut flipped = good.clone();
        flipped[HEADER_LEN + 60] ^= 1;
        assert!(matches!(decode(&flipped), Err(SafetyFileError::ChecksumMismatch)));

        let mut bad_magic = good.clone();
        bad_magic[0] ^= 0xff;
        assert!(matches!(decode(&bad_magic), Err(SafetyFileError::BadMagic(_))));

        let mut future = good.clone();
        future[8..16].copy_from_slice(&2u64.to_le_bytes());
        assert!(matches!(decode(&future), Err(SafetyFileError::UnsupportedVersion(2))));

        assert!(matches!(
            decode(&good[..good.len() - 1]),
            Err(SafetyFileError::Truncated { .. })
        ));

        let mut trailing = good.clone();
        trailing.push(0);
        assert!(matches!(decode(&trailing), Err(SafetyFileError::TrailingBytes(1))));

        let mut huge_count = good;
        huge_count[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(decode(&huge_count), Err(SafetyFileError::Truncated { .. })));
    }

    #[test]
    fn test_legacy_file_readable() {
        let keys = public_keys(2);
        let expected = records(&keys, 4);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&LEGACY_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&2u64.to_le_bytes());
        for (key, fsi) in &expected {
            put_record(&mut bytes, key, fsi);
        }
        assert_eq!(decode(&bytes).unwrap(), expected);
    }

    #[traced_test]
    #[test]
    fn test_unreadable_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("safety.dat");
        fs::write(&path, b"not a safety file").unwrap();
        assert!(SafetyFile::new(&path).load().is_err());
    }
}

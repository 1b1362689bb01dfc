//! Bitset tracking which finalizers have voted.

/// A fixed-size bitset over finalizer indices.
///
/// Bit `i` is set when the vote of finalizer `i` (in policy order) has been
/// folded into the signature the bitset accompanies. The size always equals
/// the number of finalizers in the policy it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VoteBitset {
    /// Packed bits, least significant bit first.
    bits: Vec<u8>,
    /// Number of finalizers (valid bits).
    len: usize,
}

impl VoteBitset {
    /// Create an empty bitset for `num_finalizers` finalizers.
    pub fn new(num_finalizers: usize) -> Self {
        Self {
            bits: vec![0u8; num_finalizers.div_ceil(8)],
            len: num_finalizers,
        }
    }

    /// Rebuild a bitset from its packed representation.
    ///
    /// Returns None when the byte count does not match `num_finalizers` or a
    /// padding bit beyond `num_finalizers` is set.
    pub fn from_bytes(bytes: &[u8], num_finalizers: usize) -> Option<Self> {
        if bytes.len() != num_finalizers.div_ceil(8) {
            return None;
        }
        let bitset = Self {
            bits: bytes.to_vec(),
            len: num_finalizers,
        };
        let padding = bitset.bits.len() * 8 - num_finalizers;
        if padding > 0 {
            let last = bitset.bits[bitset.bits.len() - 1];
            if last >> (8 - padding) != 0 {
                return None;
            }
        }
        Some(bitset)
    }

    /// Packed bytes, least significant bit first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Mark finalizer `index` as having voted.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn set(&mut self, index: usize) {
        assert!(
            index < self.len,
            "vote index {index} out of range for {} finalizers",
            self.len
        );
        self.bits[index / 8] |= 1 << (index % 8);
    }

    /// Check whether finalizer `index` voted. Out-of-range indices read as unset.
    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.bits[index / 8] >> (index % 8)) & 1 == 1
    }

    /// Number of finalizers that voted.
    pub fn count_ones(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Number of finalizers the bitset covers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the bitset covers no finalizers.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True when no finalizer voted.
    pub fn none(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    /// Indices of finalizers that voted, ascending.
    pub fn set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(|&i| self.is_set(i))
    }

    /// True when some index is set in both bitsets.
    pub fn intersects(&self, other: &VoteBitset) -> bool {
        self.bits.iter().zip(&other.bits).any(|(a, b)| a & b != 0)
    }

    /// Sum of `weight(i)` over the set indices.
    pub fn weight(&self, weight: impl Fn(usize) -> u64) -> u64 {
        self.set_indices().map(weight).sum()
    }
}

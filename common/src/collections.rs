//! Collections used in `bulwark`.
//!
//! Maps keyed by peer-supplied data (transaction ids, outpoints) use a keyed
//! `siphash24` hasher seeded from the injected [`fastrand::Rng`], so that a remote
//! peer can't predict bucket placement, while tests stay reproducible.
use bitcoin_hashes::siphash24::Hash;

/// A `HashMap` which uses `fastrand::Rng` for its random state.
pub type HashMap<K, V> = std::collections::HashMap<K, V, RandomState>;

/// A `HashSet` which uses `fastrand::Rng` for its random state.
pub type HashSet<K> = std::collections::HashSet<K, RandomState>;

/// Streaming hasher using `siphash24` with fixed keys.
#[derive(Default)]
pub struct Hasher {
    data: Vec<u8>,
    keys: (u64, u64),
}

impl std::hash::Hasher for Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes)
    }

    fn finish(&self) -> u64 {
        let (k0, k1) = self.keys;

        Hash::hash_with_keys(k0, k1, &self.data).as_u64()
    }
}

/// Random hasher state. Holds the two `siphash24` keys.
#[derive(Debug, Default, Clone)]
pub struct RandomState {
    keys: (u64, u64),
}

impl std::hash::BuildHasher for RandomState {
    type Hasher = Hasher;

    fn build_hasher(&self) -> Self::Hasher {
        Hasher {
            data: Vec::new(),
            keys: self.keys,
        }
    }
}

impl From<fastrand::Rng> for RandomState {
    fn from(rng: fastrand::Rng) -> Self {
        Self {
            keys: (rng.u64(..), rng.u64(..)),
        }
    }
}

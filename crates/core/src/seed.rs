use crate::result::Error;
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// 256 bits of entropy identifying a protection run. Two runs over the
/// same module with equal seeds emit identical output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seed {
    inner: [u8; 32],
}

impl Seed {
    /// Draws a fresh seed from OS entropy. Every unseeded protection run
    /// gets its own.
    pub fn generate() -> Self {
        Self {
            inner: rand::random(),
        }
    }

    /// Parses the 64-hex-digit form used on the command line and in
    /// configuration files; a `0x` prefix is accepted.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        let digits = hex.strip_prefix("0x").unwrap_or(hex);
        if digits.len() != 64 {
            return Err(Error::InvalidSeedLength(digits.len()));
        }
        let decoded = hex::decode(digits).map_err(|_| Error::InvalidSeedHex)?;
        let inner = <[u8; 32]>::try_from(decoded.as_slice()).map_err(|_| Error::InvalidSeedHex)?;
        Ok(Self { inner })
    }

    /// The `0x`-prefixed form accepted back by [`Seed::from_hex`].
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.inner))
    }

    /// Create a deterministic RNG for module protection runs.
    ///
    /// The same seed always drives identical pass decisions, so a fixed seed
    /// reproduces the output module byte for byte.
    pub fn create_deterministic_rng(&self) -> StdRng {
        let mut hasher = Sha3_256::new();
        hasher.update(b"UMBRA_MODULE_PROTECTION");
        hasher.update(self.inner);
        let seed_hash = hasher.finalize();

        let mut rng_seed = [0u8; 32];
        rng_seed.copy_from_slice(&seed_hash);
        StdRng::from_seed(rng_seed)
    }

    /// Digest of the seed. Safe to surface in logs and watermarks where the
    /// seed itself must stay private.
    pub fn hash(&self) -> [u8; 32] {
        Sha3_256::digest(self.inner).into()
    }

    /// Hex form of [`Seed::hash`], `0x`-prefixed.
    pub fn hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.hash()))
    }
}

impl std::fmt::Debug for Seed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The raw seed never lands in logs; the hash is enough to identify a build.
        write!(f, "Seed({})", self.hash_hex())
    }
}

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// The randomness service every pass draws from.
///
/// Passes must not touch any other entropy source: routing every draw through
/// one seeded generator is what makes protection runs reproducible.
#[derive(Clone)]
pub struct Rand {
    rng: StdRng,
}

impl Rand {
    /// Deterministic generator derived from `seed`.
    pub fn from_seed(seed: &Seed) -> Self {
        Self {
            rng: seed.create_deterministic_rng(),
        }
    }

    /// Generator seeded from OS entropy. Each construction is independent.
    pub fn from_entropy() -> Self {
        Self::from_seed(&Seed::generate())
    }

    /// Uniform draw from the half-open range `[min, max)`.
    ///
    /// `min == max` returns `min`. Inverted bounds are a caller error.
    pub fn next_int(&mut self, min: i64, max: i64) -> i64 {
        assert!(min <= max, "next_int: inverted range {min}..{max}");
        if min == max {
            return min;
        }
        self.rng.random_range(min..max)
    }

    /// `n` uniformly random bytes.
    pub fn next_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.rng.fill_bytes(&mut buf);
        buf
    }

    /// Random alphanumeric string of length `len`, first character a letter.
    pub fn next_string(&mut self, len: usize) -> String {
        let mut out = String::with_capacity(len);
        for i in 0..len {
            let pool = if i == 0 {
                &ALPHANUMERIC[..52]
            } else {
                ALPHANUMERIC
            };
            let idx = self.rng.random_range(0..pool.len());
            out.push(pool[idx] as char);
        }
        out
    }

    /// Uniform draw from `[0, 1)`.
    pub fn next_double(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Bernoulli draw with probability `p`.
    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.random_bool(p.clamp(0.0, 1.0))
    }

    /// In-place Fisher-Yates shuffle.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.rng);
    }
}

impl std::fmt::Debug for Rand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Rand")
    }
}

use rand::Rng;
use serde::Deserialize;

use crate::error::BuildError;

/// Largest prime below 2^32. Every row hash works mod this prime.
pub const P: u64 = 4_294_967_291;

/// Coefficient pair of one universal hash `h(x) = ((a*x + b) mod P) mod width`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HashPair {
    pub a: u64,
    pub b: u64,
}

impl HashPair {
    /// Default coefficients for row `row`: `(row + 1, 0)`.
    pub fn for_row(row: usize) -> Self {
        Self {
            a: row as u64 + 1,
            b: 0,
        }
    }

    /// Draw a random pair with `a` nonzero, the way random hash seeds are
    /// usually picked for sketch rows.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self {
            a: rng.gen_range(1..P),
            b: rng.gen_range(0..P),
        }
    }
}

/// Universal hash mapping a `u64` key to a bucket index in `[0, width)`.
///
/// Deterministic for a fixed `(a, b, width)`; the coefficients can be
/// reprogrammed at runtime between operations.
#[derive(Debug, Clone)]
pub struct UniversalHash {
    a: u64,
    b: u64,
    width: usize,
}

impl UniversalHash {
    pub fn new(pair: HashPair, width: usize) -> Result<Self, BuildError> {
        if width == 0 || !width.is_power_of_two() {
            return Err(BuildError::BadWidth(width));
        }
        Ok(Self {
            a: pair.a % P,
            b: pair.b % P,
            width,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `((a * (key mod P) + b) mod P) mod width`.
    ///
    /// `a` and `key mod P` are both below 2^32, so the product fits in u64.
    pub fn index(&self, key: u64) -> usize {
        (((self.a * (key % P) + self.b) % P) % self.width as u64) as usize
    }

    /// Reprogram the coefficients. Takes effect for subsequently accepted
    /// operations.
    pub fn set_pair(&mut self, pair: HashPair) {
        self.a = pair.a % P;
        self.b = pair.b % P;
    }
}

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{BuildError, ConfigError};
use crate::hash::HashPair;
use crate::sketch_row::CounterWidth;

/// Engine parameters, fixed at construction and validated before any
/// component is built.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hash rows per sketch.
    pub depth: usize,
    /// Buckets per row; must be a power of two.
    pub width: usize,
    /// Bucket counter width in bits: 8, 16 or 32.
    pub counter_bits: u8,
    /// Key width in bits: 32, 48 or 64.
    pub key_bits: u8,
    /// Samples per volume window.
    pub window: u64,
    /// Window volume above which the engine switches to enforcement.
    pub volume_threshold: u64,
    /// Estimate sum above which a queried record is dropped.
    pub discard_threshold: u64,
    /// Sketch instances per rolling ring: 2 or 3.
    pub instances: usize,
    /// Capacity of each ingress/egress queue.
    pub fifo_depth: usize,
    /// Draw random hash coefficients instead of the `(row + 1, 0)` defaults.
    /// Ignored when `hash_params` is given.
    pub randomize_hashes: bool,
    /// Explicit per-row hash coefficients; length must equal `depth`.
    pub hash_params: Option<Vec<HashPair>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            depth: 4,
            width: 16_384,
            counter_bits: 32,
            key_bits: 64,
            window: 65_536,
            volume_threshold: 100_000,
            discard_threshold: 0,
            instances: 2,
            fifo_depth: 16,
            randomize_hashes: false,
            hash_params: None,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.width == 0 || !self.width.is_power_of_two() {
            return Err(BuildError::BadWidth(self.width));
        }
        if self.depth < 1 {
            return Err(BuildError::ZeroDepth);
        }
        CounterWidth::from_bits(self.counter_bits)?;
        if !matches!(self.key_bits, 32 | 48 | 64) {
            return Err(BuildError::BadKeyWidth(self.key_bits));
        }
        if self.window < 1 {
            return Err(BuildError::ZeroWindow);
        }
        if !(2..=3).contains(&self.instances) {
            return Err(BuildError::BadRingSize(self.instances));
        }
        if self.fifo_depth < 1 {
            return Err(BuildError::ZeroFifoDepth);
        }
        if let Some(params) = &self.hash_params {
            if params.len() != self.depth {
                return Err(BuildError::HashParamCount {
                    expected: self.depth,
                    got: params.len(),
                });
            }
        }
        Ok(())
    }

    pub fn counter_width(&self) -> Result<CounterWidth, BuildError> {
        CounterWidth::from_bits(self.counter_bits)
    }

    /// The per-row coefficients to build sketches with: explicit ones when
    /// given, freshly drawn ones when randomization is on, otherwise `None`
    /// (rows fall back to their defaults).
    pub fn resolved_hash_params(&self) -> Option<Vec<HashPair>> {
        if let Some(params) = &self.hash_params {
            return Some(params.clone());
        }
        if self.randomize_hashes {
            let mut rng = rand::thread_rng();
            return Some((0..self.depth).map(|_| HashPair::random(&mut rng)).collect());
        }
        None
    }
}

pub fn read_config<P: AsRef<Path>>(path: P) -> Result<EngineConfig, ConfigError> {
    let data = fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&data)?;
    config.validate()?;
    Ok(config)
}

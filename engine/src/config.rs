//! Tunables for preprocessing and querying.
//!
//! All structs deserialize from JSON with every field optional, missing fields take the defaults below.
//!
//! ```
//! # use compressed_ch::config::Config;
//! let config = Config::from_json_str(r#"{ "compression": { "block_size": 8192 }, "cache": { "preload": true } }"#)?;
//! assert_eq!(config.compression.block_size, 8192);
//! assert_eq!(config.contraction.simulation_settle_limit, 500);
//! # Ok::<(), compressed_ch::Error>(())
//! ```

use crate::{
    datastr::graph::{Weight, INFINITY},
    error::*,
};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Smallest supported block size in bytes. The file header has to fit into one block.
pub const MIN_BLOCK_SIZE: u32 = 64;
/// Largest supported block size in bytes.
pub const MAX_BLOCK_SIZE: u32 = 1 << 24;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub contraction: ContractionConfig,
    pub compression: CompressionConfig,
    pub cache: CacheConfig,
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.contraction.validate()?;
        self.compression.validate()?;
        self.cache.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractionConfig {
    /// Number of worker threads, 0 lets rayon decide.
    pub threads: usize,
    /// Seed of the random tie breaking bias between nodes of equal priority.
    pub seed: u64,
    /// Settled node limit of witness searches while simulating a contraction.
    pub simulation_settle_limit: usize,
    /// Settled node limit of witness searches during the actual contraction.
    pub contraction_settle_limit: usize,
    /// Keep a record of all shortcuts which were skipped because of a witness.
    pub record_witnesses: bool,
    /// Input edges heavier than this (in tenths of a second) are dropped.
    pub max_edge_weight: Weight,
}

impl Default for ContractionConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            seed: 0x5eed,
            simulation_settle_limit: 500,
            contraction_settle_limit: 1000,
            record_witnesses: false,
            max_edge_weight: 24 * 60 * 60 * 10,
        }
    }
}

impl ContractionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_edge_weight > INFINITY {
            return Err(Error::InvalidInput(format!(
                "max edge weight must not exceed {}, got {}",
                INFINITY, self.max_edge_weight
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Size of a block in bytes, a power of two.
    pub block_size: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { block_size: 4096 }
    }
}

impl CompressionConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() || self.block_size < MIN_BLOCK_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::InvalidInput(format!(
                "block size must be a power of two between {} and {}, got {}",
                MIN_BLOCK_SIZE, MAX_BLOCK_SIZE, self.block_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of blocks kept in memory in lazy mode.
    pub cache_blocks: usize,
    /// Read the whole file into memory on load.
    pub preload: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_blocks: 1024,
            preload: false,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cache_blocks == 0 && !self.preload {
            return Err(Error::InvalidInput("cache needs room for at least one block".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config.compression.block_size, 4096);
        assert_eq!(config.cache.cache_blocks, 1024);
        assert!(!config.cache.preload);
        assert_eq!(config.contraction.contraction_settle_limit, 1000);
        assert_eq!(config.contraction.max_edge_weight, 864_000);
    }

    #[test]
    fn rejects_odd_block_sizes() {
        assert!(matches!(
            Config::from_json_str(r#"{ "compression": { "block_size": 1000 } }"#),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            Config::from_json_str(r#"{ "compression": { "block_size": 32 } }"#),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn rejects_edge_weights_beyond_infinity() {
        let json = format!(r#"{{ "contraction": {{ "max_edge_weight": {} }} }}"#, INFINITY + 1);
        assert!(matches!(Config::from_json_str(&json), Err(Error::InvalidInput(_))));
        let json = format!(r#"{{ "contraction": {{ "max_edge_weight": {} }} }}"#, INFINITY);
        assert_eq!(Config::from_json_str(&json).unwrap().contraction.max_edge_weight, INFINITY);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "contraction": { "seed": 7, "record_witnesses": true } }"#).unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.contraction.seed, 7);
        assert!(config.contraction.record_witnesses);
        assert!(matches!(Config::load_from(dir.path().join("missing.json")), Err(Error::Io(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(Config::from_json_str("{ contraction: "), Err(Error::Config(_))));
    }
}

//! The `run` command's configuration file.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use holonindex_core::IndexerConfig;

use crate::logging::LogConfig;

/// One chain to index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEntry {
    #[serde(default)]
    pub indexer: IndexerConfig,
    pub rpc_url: String,
    /// SQLite file for this chain's entities and checkpoints.
    #[serde(default = "default_database")]
    pub database: String,
    /// Blocks fetched per round.
    #[serde(default)]
    pub batch_size: Option<u64>,
}

fn default_database() -> String {
    "./holons.db".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub log: LogConfig,
    pub chains: Vec<ChainEntry>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chains.is_empty() {
            bail!("config lists no chains");
        }
        let mut databases: Vec<&str> = self.chains.iter().map(|c| c.database.as_str()).collect();
        databases.sort_unstable();
        if databases.windows(2).any(|w| w[0] == w[1]) {
            bail!("each chain needs its own database file");
        }
        for chain in &self.chains {
            if chain.indexer.factory_addresses.is_empty() {
                bail!("chain '{}' has no factory_addresses", chain.indexer.chain);
            }
        }
        Ok(())
    }
}

//! Network profiles and their hard-fork schedule, keyed by block number.
//!
//! Shanghai and later forks are activated by timestamp on the beacon chain,
//! but once activated they map to a fixed first block. The relay only ever
//! asks "which header layout does block N use", so the schedule stores the
//! first block of each era and nothing else.

use std::{path::Path, sync::Arc};

use eyre::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::header::ConsensusEra;

/// First block of every header era for one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EraSchedule {
    pub london_block: u64,
    /// First proof-of-stake block.
    pub paris_block: u64,
    pub shanghai_block: u64,
    pub cancun_block: u64,
    #[serde(default)]
    pub prague_block: Option<u64>,
}

impl EraSchedule {
    pub const MAINNET: Self = Self {
        london_block: 12_965_000,
        paris_block: 15_537_394,
        shanghai_block: 17_034_870,
        cancun_block: 19_426_587,
        prague_block: Some(22_431_084),
    };

    pub const SEPOLIA: Self = Self {
        london_block: 0,
        paris_block: 1_450_409,
        shanghai_block: 2_990_908,
        cancun_block: 5_187_023,
        prague_block: Some(7_836_331),
    };

    /// Every fork active from genesis, as on a local dev chain.
    pub const DEV: Self = Self {
        london_block: 0,
        paris_block: 0,
        shanghai_block: 0,
        cancun_block: 0,
        prague_block: Some(0),
    };

    /// Header era of `number`.
    pub const fn era_for(&self, number: u64) -> ConsensusEra {
        if let Some(prague) = self.prague_block {
            if number >= prague {
                return ConsensusEra::Prague;
            }
        }
        if number >= self.cancun_block {
            ConsensusEra::Cancun
        } else if number >= self.shanghai_block {
            ConsensusEra::Shanghai
        } else if number >= self.paris_block {
            ConsensusEra::Paris
        } else if number >= self.london_block {
            ConsensusEra::London
        } else {
            ConsensusEra::Frontier
        }
    }

    /// Rejects schedules whose forks are out of order.
    pub fn validate(&self) -> eyre::Result<()> {
        let ordered = [
            ("london", self.london_block),
            ("paris", self.paris_block),
            ("shanghai", self.shanghai_block),
            ("cancun", self.cancun_block),
        ];
        for pair in ordered.windows(2) {
            let ((prev_name, prev), (name, block)) = (pair[0], pair[1]);
            if block < prev {
                eyre::bail!("{name} block {block} precedes {prev_name} block {prev}");
            }
        }
        if let Some(prague) = self.prague_block {
            if prague < self.cancun_block {
                eyre::bail!("prague block {prague} precedes cancun block {}", self.cancun_block);
            }
        }
        Ok(())
    }
}

/// A named network profile: expected chain id plus era schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayChainSpec {
    pub name: String,
    /// Chain id the node must report; `None` accepts any chain.
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(flatten)]
    pub schedule: EraSchedule,
}

impl RelayChainSpec {
    pub fn mainnet() -> Self {
        Self { name: "mainnet".to_string(), chain_id: Some(1), schedule: EraSchedule::MAINNET }
    }

    pub fn sepolia() -> Self {
        Self {
            name: "sepolia".to_string(),
            chain_id: Some(11_155_111),
            schedule: EraSchedule::SEPOLIA,
        }
    }

    pub fn dev() -> Self {
        Self { name: "dev".to_string(), chain_id: None, schedule: EraSchedule::DEV }
    }

    /// Loads a profile from a JSON file and validates its schedule.
    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read chain profile {}", path.display()))?;
        let spec: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse chain profile {}", path.display()))?;
        spec.schedule.validate().context("Chain profile validation failed")?;
        debug!(name = %spec.name, schedule = ?spec.schedule, "Loaded chain profile from file");
        Ok(spec)
    }

    /// Checks the chain id reported by the node against the profile.
    pub fn ensure_chain_id(&self, reported: u64) -> eyre::Result<()> {
        match self.chain_id {
            Some(expected) if expected != reported => eyre::bail!(
                "Node reports chain id {reported} but profile `{}` expects {expected}",
                self.name
            ),
            _ => Ok(()),
        }
    }
}

impl Default for RelayChainSpec {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Chain profile parser for the CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayChainSpecParser;

impl RelayChainSpecParser {
    pub const SUPPORTED_CHAINS: &'static [&'static str] = &["mainnet", "sepolia", "dev"];

    pub fn parse(s: &str) -> eyre::Result<Arc<RelayChainSpec>> {
        let spec = match s {
            "mainnet" => RelayChainSpec::mainnet(),
            "sepolia" => RelayChainSpec::sepolia(),
            "dev" => RelayChainSpec::dev(),
            path => {
                info!(path, "Parsing chain profile from file");
                RelayChainSpec::from_file(Path::new(path))?
            }
        };
        Ok(Arc::new(spec))
    }
}

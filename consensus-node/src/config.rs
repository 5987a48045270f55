// Copyright (c) Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Node configuration: defaults, JSON file and command-line overrides.

use anyhow::{anyhow, bail, Context};
use consensus_core::ConsensusConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of replicas in the local cluster
pub const DEFAULT_NUM_REPLICAS: usize = 4;

/// Default number of client transactions fed to the cluster
pub const DEFAULT_NUM_TRANSACTIONS: usize = 20;

/// Default wall-clock time the cluster runs before shutdown
pub const DEFAULT_RUN_DURATION_MS: u64 = 3_000;

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable overriding the log level
pub const LOG_LEVEL_ENV: &str = "CONSENSUS_LOG_LEVEL";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "CONSENSUS_DATA_DIR";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub num_replicas: usize,
    pub num_transactions: usize,
    pub run_duration_ms: u64,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Each replica keeps its state under `<data_dir>/replica-<id>`.
    /// State is kept in memory when unset.
    pub data_dir: Option<PathBuf>,
    /// Replicas cut off from the network for the whole run.
    pub isolated: Vec<u32>,
    /// Template for every replica. `replica_id`, `num_validators` and
    /// `data_dir` are filled in per replica.
    pub consensus: ConsensusConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            num_replicas: DEFAULT_NUM_REPLICAS,
            num_transactions: DEFAULT_NUM_TRANSACTIONS,
            run_duration_ms: DEFAULT_RUN_DURATION_MS,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            data_dir: None,
            isolated: Vec::new(),
            consensus: ConsensusConfig::default(),
        }
    }
}

/// What the command line asked for.
#[derive(Debug, PartialEq)]
pub enum Command {
    Run(NodeConfig),
    Help,
}

impl NodeConfig {
    /// Load a JSON configuration file. Missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse command-line arguments (without the program name).
    ///
    /// `--config` is applied first so that the other flags override the
    /// file regardless of their position.
    pub fn from_args(args: &[String]) -> anyhow::Result<Command> {
        let mut config = match config_path(args)? {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let mut i = 0;
        while i < args.len() {
            let flag = args[i].as_str();
            if matches!(flag, "--help" | "-h") {
                return Ok(Command::Help);
            }
            let value = args
                .get(i + 1)
                .ok_or_else(|| anyhow!("Missing value for {}", flag))?;
            match flag {
                "--config" | "-c" => {},
                "--replicas" | "-n" => {
                    config.num_replicas = parse_value(flag, value)?;
                },
                "--transactions" | "-t" => {
                    config.num_transactions = parse_value(flag, value)?;
                },
                "--duration-ms" => {
                    config.run_duration_ms = parse_value(flag, value)?;
                },
                "--block-size" => {
                    config.consensus.block_size = parse_value(flag, value)?;
                },
                "--gst-ms" => {
                    config.consensus.pacemaker.gst_estimate_ms = parse_value(flag, value)?;
                },
                "--data-dir" => {
                    config.data_dir = Some(PathBuf::from(value));
                },
                "--log-level" => {
                    config.log_level = value.clone();
                },
                "--isolate" => {
                    config.isolated.push(parse_value(flag, value)?);
                },
                other => bail!("Unknown flag or argument: {}", other),
            }
            i += 2;
        }

        Ok(Command::Run(config))
    }

    /// Apply `CONSENSUS_LOG_LEVEL` and `CONSENSUS_DATA_DIR`.
    pub fn apply_env(&mut self) {
        if let Ok(level) = std::env::var(LOG_LEVEL_ENV) {
            self.log_level = level;
        }
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_replicas == 0 {
            bail!("num_replicas must be at least 1");
        }
        if self.consensus.block_size == 0 {
            bail!("block_size must be at least 1");
        }
        if self.consensus.pacemaker.gst_estimate_ms == 0 {
            bail!("gst_estimate_ms must be positive");
        }
        if let Some(id) = self.isolated.iter().find(|id| **id as usize >= self.num_replicas) {
            bail!("Cannot isolate replica {}: cluster has {} replicas", id, self.num_replicas);
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => bail!("Invalid log level: {}", other),
        }
    }

    /// Configuration of replica `replica_id`.
    pub fn replica_config(&self, replica_id: u32) -> ConsensusConfig {
        let mut config = self
            .consensus
            .clone()
            .with_replica_id(replica_id)
            .with_num_validators(self.num_replicas);
        config.data_dir = self
            .data_dir
            .as_ref()
            .map(|dir| dir.join(format!("replica-{}", replica_id)));
        config
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level.as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        }
    }
}

fn config_path(args: &[String]) -> anyhow::Result<Option<&str>> {
    match args.iter().position(|arg| arg == "--config" || arg == "-c") {
        Some(index) => args
            .get(index + 1)
            .map(|path| Some(path.as_str()))
            .ok_or_else(|| anyhow!("Missing value for --config")),
        None => Ok(None),
    }
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: &str) -> anyhow::Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("Invalid value for {}: {}", flag, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|arg| arg.to_string()).collect()
    }

    fn run_config(list: &[&str]) -> NodeConfig {
        match NodeConfig::from_args(&args(list)).unwrap() {
            Command::Run(config) => config,
            Command::Help => panic!("expected a run configuration"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.num_replicas, DEFAULT_NUM_REPLICAS);
        assert_eq!(config.num_transactions, DEFAULT_NUM_TRANSACTIONS);
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.data_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_flags() {
        let config = run_config(&[
            "--replicas",
            "7",
            "-t",
            "50",
            "--block-size",
            "5",
            "--log-level",
            "debug",
            "--isolate",
            "3",
        ]);
        assert_eq!(config.num_replicas, 7);
        assert_eq!(config.num_transactions, 50);
        assert_eq!(config.consensus.block_size, 5);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.isolated, vec![3]);
        assert_eq!(config.log_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn test_help_and_bad_flags() {
        assert_eq!(NodeConfig::from_args(&args(&["-h"])).unwrap(), Command::Help);
        assert!(NodeConfig::from_args(&args(&["--replicas"])).is_err());
        assert!(NodeConfig::from_args(&args(&["--replicas", "four"])).is_err());
        assert!(NodeConfig::from_args(&args(&["--verbose", "1"])).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "num_replicas": 7, "run_duration_ms": 100, "consensus": {{ "block_size": 3 }} }}"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let config = run_config(&["--replicas", "10", "--config", &path]);
        assert_eq!(config.num_replicas, 10);
        assert_eq!(config.run_duration_ms, 100);
        assert_eq!(config.consensus.block_size, 3);
        assert_eq!(config.num_transactions, DEFAULT_NUM_TRANSACTIONS);
    }

    #[test]
    fn test_validate() {
        let mut config = NodeConfig::default();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.isolated = vec![4];
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.num_replicas = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_replica_config() {
        let config = NodeConfig {
            num_replicas: 7,
            data_dir: Some(PathBuf::from("/tmp/cluster")),
            ..NodeConfig::default()
        };
        let replica = config.replica_config(5);
        assert_eq!(replica.replica_id, 5);
        assert_eq!(replica.num_validators, 7);
        assert_eq!(replica.leader_election.num_validators, 7);
        assert_eq!(replica.data_dir, Some(PathBuf::from("/tmp/cluster/replica-5")));
    }
}

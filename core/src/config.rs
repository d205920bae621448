//! # Configuration Options
//!
//! This module defines configuration options.
//!
//! Configuration options can be read from a TOML file. File contents are
//! described in the `VigilConfig` struct. Every component receives the
//! config by reference from whoever constructed it at process start;
//! nothing in this crate reads ambient environment state.

use crate::errors::VigilError;
use bitcoin::{Network, XOnlyPublicKey};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use std::{fs::File, io::Read};

/// Which data the OP_RETURN commitment output is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentSource {
    /// Hash the concatenated external content-store handles; fall back to
    /// the step chain when the block carries none.
    ContentHandles,
    /// Always hash the concatenated step-chain hex strings.
    StepChain,
}

/// Configuration options for any vigil target (tests, daemons etc.).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Root directory of the rollup block store.
    pub db_path: PathBuf,
    /// Seconds between watcher poll ticks.
    pub poll_interval_secs: u64,
    /// Bitcoin network to work on.
    pub network: Network,
    /// Bitcoin remote procedure call URL.
    pub bitcoin_rpc_url: String,
    /// Bitcoin RPC user.
    pub bitcoin_rpc_user: SecretString,
    /// Bitcoin RPC user password.
    pub bitcoin_rpc_password: SecretString,
    /// Cluster pin endpoint of the external content store.
    pub ipfs_cluster_url: String,
    /// Operator's x-only public key; internal key of the challenge tree
    /// and owner of every timeout branch.
    pub operator_xonly_pk: XOnlyPublicKey,
    /// Challenger's x-only public key, required on the reveal branch.
    pub challenger_xonly_pk: XOnlyPublicKey,
    /// Relative-timelock interval between consecutive step leaves, in
    /// blocks. Step `i` (0-based) times out after `(i + 1) * interval`.
    pub step_timeout_interval: u16,
    /// Relative timelock of the operator fallback leaf, in blocks. Must
    /// exceed every step timeout.
    pub fallback_timeout: u16,
    /// Flat fee deducted from the spent amount, in satoshis.
    pub challenge_fee_sats: u64,
    /// Source of the OP_RETURN commitment payload.
    pub commitment_source: CommitmentSource,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("rollup_block_db"),
            poll_interval_secs: 5,
            network: Network::Regtest,
            bitcoin_rpc_url: "http://127.0.0.1:8332".to_string(),
            bitcoin_rpc_user: SecretString::from("user".to_string()),
            bitcoin_rpc_password: SecretString::from("password".to_string()),
            ipfs_cluster_url: "http://127.0.0.1:9094/pins".to_string(),
            // Dev-only keys: secp256k1's generator point and the BIP-340
            // test-vector key. Real deployments configure their own.
            operator_xonly_pk: XOnlyPublicKey::from_str(
                "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
            )
            .expect("this key is valid"),
            challenger_xonly_pk: XOnlyPublicKey::from_str(
                "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9",
            )
            .expect("this key is valid"),
            step_timeout_interval: 80,
            fallback_timeout: 300,
            challenge_fee_sats: 1000,
            commitment_source: CommitmentSource::ContentHandles,
        }
    }
}

impl VigilConfig {
    /// Create a new `VigilConfig` with default values.
    pub fn new() -> Self {
        VigilConfig {
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Read contents of a TOML file and generate a `VigilConfig`.
    pub fn try_parse_file(path: PathBuf) -> Result<Self, VigilError> {
        let mut contents = String::new();

        let mut file = match File::open(path.clone()) {
            Ok(f) => f,
            Err(e) => return Err(VigilError::ConfigError(e.to_string())),
        };

        if let Err(e) = file.read_to_string(&mut contents) {
            return Err(VigilError::ConfigError(e.to_string()));
        }

        tracing::trace!("Using configuration file: {:?}", path);

        VigilConfig::try_parse_from(contents)
    }

    /// Try to parse a `VigilConfig` from given TOML formatted string.
    pub fn try_parse_from(input: String) -> Result<Self, VigilError> {
        let config = match toml::from_str::<VigilConfig>(&input) {
            Ok(c) => c,
            Err(e) => return Err(VigilError::ConfigError(e.to_string())),
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VigilError> {
        if self.step_timeout_interval == 0 {
            return Err(VigilError::ConfigError(
                "step_timeout_interval must be a positive relative locktime".to_string(),
            ));
        }
        if self.fallback_timeout <= self.step_timeout_interval {
            return Err(VigilError::ConfigError(
                "fallback_timeout must exceed the first step timeout".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        VigilConfig::new().validate().expect("defaults are usable");
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config = VigilConfig::try_parse_from(
            r#"
            db_path = "/tmp/vigil-db"
            poll_interval_secs = 1
            commitment_source = "step_chain"
            "#
            .to_string(),
        )
        .expect("parsable");

        assert_eq!(config.db_path, PathBuf::from("/tmp/vigil-db"));
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.commitment_source, CommitmentSource::StepChain);
        // Untouched fields keep their defaults.
        assert_eq!(config.step_timeout_interval, 80);
    }

    #[test]
    fn zero_timeout_interval_is_rejected() {
        let result =
            VigilConfig::try_parse_from("step_timeout_interval = 0".to_string());
        assert!(matches!(result, Err(VigilError::ConfigError(_))));
    }
}

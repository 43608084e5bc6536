//! Configuration loading (§6), layering a base file with `SHIELDNET_`-prefixed
//! environment overrides via the `config` crate.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain_id: u64,
    pub rpc_url: String,
    pub private_key: String,
    pub consensus_address: String,
    pub coordinator_address: String,
    pub participants: Vec<ParticipantConfig>,
    pub blocks_per_epoch: u64,
    pub key_gen_timeout: u64,
    pub signing_timeout: u64,
    pub genesis_salt: String,
    pub metrics_port: u16,
    #[serde(default)]
    pub storage_path: String,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantConfig {
    pub id: u64,
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingSettings {
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Settings {
    pub fn load(config_path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("SHIELDNET").separator("__"))
            .build()
            .context("failed to build configuration")?;

        let settings: Settings = settings
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !self.rpc_url.starts_with("http") && !self.rpc_url.starts_with("ws") {
            bail!("invalid rpc_url: {}", self.rpc_url);
        }
        if !self.consensus_address.starts_with("0x") || self.consensus_address.len() != 42 {
            bail!("invalid consensus_address: {}", self.consensus_address);
        }
        if !self.coordinator_address.starts_with("0x") || self.coordinator_address.len() != 42 {
            bail!("invalid coordinator_address: {}", self.coordinator_address);
        }
        if self.chain_id == 0 {
            bail!("chain_id must be nonzero");
        }
        let threshold_ok = !self.participants.is_empty();
        if !threshold_ok {
            bail!("participants list must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Settings {
        Settings {
            chain_id: 1,
            rpc_url: "https://rpc.example".into(),
            private_key: "0x00".into(),
            consensus_address: "0x0000000000000000000000000000000000dEaD".into(),
            coordinator_address: "0x0000000000000000000000000000000000bEEF".into(),
            participants: vec![ParticipantConfig { id: 1, address: "0x0".into() }],
            blocks_per_epoch: 100,
            key_gen_timeout: 20,
            signing_timeout: 20,
            genesis_salt: "salt".into(),
            metrics_port: 9100,
            storage_path: "./data".into(),
            logging: LoggingSettings::default(),
        }
    }

    #[test]
    fn rejects_bad_rpc_url() {
        let mut s = base();
        s.rpc_url = "not-a-url".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_zero_chain_id() {
        let mut s = base();
        s.chain_id = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn accepts_valid_settings() {
        assert!(base().validate().is_ok());
    }
}

use std::{fmt::Debug, path::Path};

use analysis::AnalysisConfig;
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use gateway::{Ed25519Signer, GatewayConfig};
use metrics::TelemetryConfig;
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use tracker::TrackerConfig;

const LOCAL_ENV: &str = "local";
const ENV_PREFIX: &str = "BEACON_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Base64 encoded ed25519 secret key. Retry specs are submitted unsigned
    /// when unset.
    #[serde(default)]
    pub private_key_base64: Option<String>,
}

#[serde_inline_default]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Environment name (e.g., "local", "staging", "production").
    #[serde_inline_default(LOCAL_ENV.to_string())]
    pub env: String,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        BeaconConfig {
            env: LOCAL_ENV.to_string(),
            gateway: GatewayConfig::default(),
            tracker: TrackerConfig::default(),
            analysis: AnalysisConfig::default(),
            signing: SigningConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl BeaconConfig {
    /// Loads the YAML file at `path`; `BEACON_` environment variables
    /// override it, with `__` separating nested keys
    /// (`BEACON_GATEWAY__API_URL`).
    pub fn from_path(path: impl AsRef<Path>) -> Result<BeaconConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(anyhow::anyhow!("config file {} does not exist", path.display()));
        }
        Self::extract(Figment::new().merge(Yaml::file(path)).merge(Self::env()))
            .with_context(|| format!("loading config from {}", path.display()))
    }

    /// Defaults overridden by `BEACON_` environment variables only.
    pub fn from_env() -> Result<BeaconConfig> {
        Self::extract(Figment::new().merge(Self::env())).context("loading config from environment")
    }

    pub fn from_yaml_str(config_str: &str) -> Result<BeaconConfig> {
        Self::extract(Figment::new().merge(Yaml::string(config_str)))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn extract(figment: Figment) -> Result<BeaconConfig> {
        let config: BeaconConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.gateway.validate()?;
        self.tracker.validate()?;
        self.analysis.validate()?;
        if let Some(key) = &self.signing.private_key_base64 {
            Ed25519Signer::from_base64(key).context("signing.private_key_base64 is invalid")?;
        }
        Ok(())
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }
}

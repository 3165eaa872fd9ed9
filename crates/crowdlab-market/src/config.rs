//! Configuration for crowdlab-market.

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{MarketError, MarketResult};

/// Marketplace settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Whether to target the sandbox marketplace.
    ///
    /// Defaults to sandbox so a misconfigured run never spends real
    /// money.
    #[serde(default = "default_sandbox")]
    pub sandbox: bool,

    /// Marketplace region. The requester API is only served from
    /// us-east-1.
    #[serde(default = "default_region")]
    pub region: String,

    /// Height of the worker-facing question frame, in pixels.
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,

    /// Directory where generated listing artifacts are written.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

const fn default_sandbox() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

const fn default_frame_height() -> u32 {
    650
}

fn default_artifact_dir() -> PathBuf {
    std::env::temp_dir().join("crowdlab")
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            sandbox: default_sandbox(),
            region: default_region(),
            frame_height: default_frame_height(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl MarketConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `crowdlab-market.toml` in the current directory (if present)
    /// 3. Environment variables with `CROWDLAB_MARKET_` prefix
    pub fn load() -> MarketResult<Self> {
        Figment::new()
            .merge(Toml::file("crowdlab-market.toml"))
            .merge(Env::prefixed("CROWDLAB_MARKET_").split("__"))
            .extract()
            .map_err(|e| MarketError::Config(e.to_string()))
    }
}

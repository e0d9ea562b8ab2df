//! Daemon configuration: the engine settings plus the TronGrid connection.
use std::env;

use log::*;
use storefront_payment_engine::EngineSettings;

const DEFAULT_TRONGRID_URL: &str = "https://api.trongrid.io";

#[derive(Clone, Debug)]
pub struct TronGridConfig {
    pub base_url: String,
    /// Sent as `TRON-PRO-API-KEY`. TronGrid throttles anonymous clients much harder.
    pub api_key: Option<String>,
}

impl Default for TronGridConfig {
    fn default() -> Self {
        Self { base_url: DEFAULT_TRONGRID_URL.to_string(), api_key: None }
    }
}

impl TronGridConfig {
    pub fn from_env_or_default() -> Self {
        let base_url = env::var("SPG_TRONGRID_URL").ok().unwrap_or_else(|| {
            info!("🪛️ SPG_TRONGRID_URL is not set. Using the default, {DEFAULT_TRONGRID_URL}.");
            DEFAULT_TRONGRID_URL.to_string()
        });
        let api_key = env::var("SPG_TRONGRID_API_KEY").ok();
        if api_key.is_none() {
            warn!("🪛️ SPG_TRONGRID_API_KEY is not set. TronGrid applies its anonymous rate limits.");
        }
        Self { base_url, api_key }
    }
}

#[derive(Clone, Debug, Default)]
pub struct WatcherdConfig {
    pub engine: EngineSettings,
    pub trongrid: TronGridConfig,
}

impl WatcherdConfig {
    pub fn from_env_or_default() -> Self {
        Self { engine: EngineSettings::from_env_or_default(), trongrid: TronGridConfig::from_env_or_default() }
    }
}

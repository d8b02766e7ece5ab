//! Configuration management for the Marketplace Relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::error::ConfigurationError;

use anyhow::{Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub rpc: RpcConfig,
    pub marketplace: MarketplaceConfig,
    #[serde(default)]
    pub gas: GasConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    pub wallet: WalletConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    /// Generated per process when left out
    #[serde(default = "generate_instance_id")]
    pub instance_id: String,
    /// Upper bound on a single submission, applied by the HTTP layer
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    pub urls: Vec<String>,
    pub chain_id: u64,
    pub poll_interval_ms: u64,
    /// Blocks required on top of the inclusion block, counting it as the first
    pub confirmations: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceConfig {
    pub contract_address: String,
    #[serde(default)]
    pub account_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    pub limit_buffer_percent: u64,
    pub price_buffer_percent: u64,
    #[serde(default)]
    pub max_gas_price_gwei: Option<u64>,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            limit_buffer_percent: 20,
            price_buffer_percent: 10,
            max_gas_price_gwei: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub private_key_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("MARKETPLACE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::from_file(&config_path)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.rpc.urls.iter().all(|u| u.trim().is_empty()) {
            return Err(ConfigurationError("No RPC URLs configured".to_string()));
        }
        if self.rpc.chain_id == 0 {
            return Err(ConfigurationError("rpc.chain_id must be set".to_string()));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigurationError(
                "cache.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.relayer.request_timeout_secs == 0 {
            return Err(ConfigurationError(
                "relayer.request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.wallet.private_key_env.is_empty() {
            return Err(ConfigurationError(
                "wallet.private_key_env must name an environment variable".to_string(),
            ));
        }

        self.marketplace.contract_address()?;
        self.marketplace.account_address()?;

        Ok(())
    }
}

impl RelayerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RpcConfig {
    /// Configured endpoints with blanks from unset variables removed
    pub fn endpoints(&self) -> Vec<&str> {
        self.urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .collect()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl MarketplaceConfig {
    pub fn contract_address(&self) -> Result<Address, ConfigurationError> {
        parse_address("marketplace.contract_address", &self.contract_address)
    }

    /// Account to submit from; `None` means the first account the wallet offers
    pub fn account_address(&self) -> Result<Option<Address>, ConfigurationError> {
        match self.account_address.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => parse_address("marketplace.account_address", raw).map(Some),
        }
    }
}

impl GasConfig {
    pub fn max_gas_price(&self) -> Option<U256> {
        self.max_gas_price_gwei
            .map(|gwei| U256::from(gwei) * U256::exp10(9))
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn parse_address(field: &str, raw: &str) -> Result<Address, ConfigurationError> {
    raw.trim()
        .parse::<Address>()
        .map_err(|e| ConfigurationError(format!("{} is not a valid address ({:?}): {}", field, raw, e)))
}

fn generate_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[relayer]
instance_id = "test"
request_timeout_secs = 30

[rpc]
urls = ["http://localhost:8545", "${MARKET_TEST_UNSET_RPC}"]
chain_id = 31337
poll_interval_ms = 100
confirmations = 1

[marketplace]
contract_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
account_address = ""

[cache]
ttl_secs = 300

[wallet]
private_key_env = "MARKETPLACE_PRIVATE_KEY"

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_sample_settings() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();

        assert_eq!(settings.rpc.endpoints(), vec!["http://localhost:8545"]);
        assert_eq!(settings.cache.ttl(), Duration::from_secs(300));
        assert_eq!(settings.marketplace.account_address().unwrap(), None);
        assert_eq!(settings.gas.limit_buffer_percent, 20);
        assert!(settings.gas.max_gas_price().is_none());
    }

    #[test]
    fn test_invalid_contract_address_is_rejected() {
        let input = SAMPLE.replace(
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
            "not-an-address",
        );
        let err = Settings::from_toml_str(&input).unwrap_err();
        assert!(err.to_string().contains("marketplace.contract_address"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            SAMPLE.replace("instance_id = \"test\"\n", "").as_bytes(),
        )
        .unwrap();

        let settings = tokio_test::assert_ok!(Settings::from_file(file.path()));
        assert_eq!(settings.rpc.chain_id, 31337);
        assert!(uuid::Uuid::parse_str(&settings.relayer.instance_id).is_ok());
    }

    #[test]
    fn test_missing_file_names_the_path() {
        let err = Settings::from_file(Path::new("/nonexistent/market.toml")).unwrap_err();
        assert!(err.to_string().contains("market.toml"));
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let input = SAMPLE.replace("ttl_secs = 300", "ttl_secs = 0");
        let err = Settings::from_toml_str(&input).unwrap_err();
        assert!(err.to_string().contains("ttl_secs"));
    }
}

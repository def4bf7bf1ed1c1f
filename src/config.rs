//! Configuration loading for agentpair.
//!
//! Settings come from, in increasing precedence: built-in defaults, an
//! optional JSON settings file, and the environment (a `.env` file in the
//! working directory is loaded first).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::agent::{default_vocabulary, FailurePolicy, Intervals};
use crate::error::{Error, Result};
use crate::ledger::Address;
use crate::signer::Wallet;
use crate::transfer::RetryPolicy;

pub const ENV_RPC_URL: &str = "ETH_RPC_URL";
pub const ENV_CHAIN_ID: &str = "CHAIN_ID";
pub const ENV_TOKEN_ADDRESS: &str = "ERC20_CONTRACT_ADDRESS";
pub const ENV_SOURCE_ADDRESS: &str = "SOURCE_ADDRESS";
pub const ENV_TARGET_ADDRESS: &str = "TARGET_ADDRESS";
pub const ENV_SOURCE_PRIVATE_KEY: &str = "SOURCE_PRIVATE_KEY";
pub const ENV_TARGET_PRIVATE_KEY: &str = "TARGET_PRIVATE_KEY";
pub const ENV_FAILURE_POLICY: &str = "AGENTPAIR_FAILURE_POLICY";
pub const ENV_MAX_TRANSFER_ATTEMPTS: &str = "AGENTPAIR_MAX_TRANSFER_ATTEMPTS";

/// Get the agentpair home directory (~/.agentpair).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".agentpair"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load and validate settings.
///
/// `path` must exist when given; otherwise `~/.agentpair/settings.json` is
/// read if present.
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    if let Ok(env_file) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", env_file.display());
    }

    let mut settings = match path {
        Some(p) => read_settings_file(p)?,
        None => match get_settings_path() {
            Ok(default_path) if default_path.exists() => read_settings_file(&default_path)?,
            _ => Settings::default(),
        },
    };

    settings.apply_env(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Cannot read settings file {}: {}", path.display(), e))
    })?;
    let settings: Settings = serde_json::from_str(&content)?;
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Ledger connection.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LedgerSettings {
    pub rpc_url: Option<String>,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    pub token_address: Option<Address>,
}

fn default_chain_id() -> u64 {
    123456
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            rpc_url: None,
            chain_id: default_chain_id(),
            token_address: None,
        }
    }
}

/// One signing identity.
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct IdentitySettings {
    pub address: Option<Address>,
    pub private_key: Option<String>,
}

impl std::fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("address", &self.address)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl IdentitySettings {
    /// Build the wallet and check it signs for the configured address.
    fn wallet(&self, label: &str) -> Result<Wallet> {
        let key = self
            .private_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("{} private key is not set", label)))?;
        let address = self
            .address
            .ok_or_else(|| Error::Config(format!("{} address is not set", label)))?;

        let wallet = Wallet::from_private_key_hex(key)
            .map_err(|e| Error::Config(format!("{} private key: {}", label, e)))?;
        if wallet.address() != address {
            return Err(Error::Config(format!(
                "{} private key signs for {}, not the configured {}",
                label,
                wallet.address(),
                address
            )));
        }
        Ok(wallet)
    }
}

/// Both identities. `source` drives the first agent, `target` the second.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Identities {
    #[serde(default)]
    pub source: IdentitySettings,
    #[serde(default)]
    pub target: IdentitySettings,
}

/// Agent behavior.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AgentSettings {
    #[serde(default = "default_first_name")]
    pub first_name: String,
    #[serde(default = "default_second_name")]
    pub second_name: String,
    #[serde(default = "default_vocabulary")]
    pub vocabulary: Vec<String>,
    #[serde(default)]
    pub intervals: Intervals,
    #[serde(default = "default_generator_enabled")]
    pub generator_enabled: bool,
    /// Base units the second agent sends on a "crypto" message; 0 only logs.
    #[serde(default = "default_crypto_transfer_amount")]
    pub crypto_transfer_amount: u64,
}

fn default_first_name() -> String {
    "Agent1".to_string()
}

fn default_second_name() -> String {
    "Agent2".to_string()
}

fn default_generator_enabled() -> bool {
    true
}

fn default_crypto_transfer_amount() -> u64 {
    1
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            first_name: default_first_name(),
            second_name: default_second_name(),
            vocabulary: default_vocabulary(),
            intervals: Intervals::default(),
            generator_enabled: default_generator_enabled(),
            crypto_transfer_amount: default_crypto_transfer_amount(),
        }
    }
}

/// Supervision of running activities.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Supervision {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_shutdown_grace_secs() -> u64 {
    15
}

impl Default for Supervision {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// agentpair settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub identities: Identities,

    #[serde(default)]
    pub agents: AgentSettings,

    #[serde(default)]
    pub transfers: RetryPolicy,

    #[serde(default)]
    pub supervision: Supervision,
}

impl Settings {
    /// Overlay environment values found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_RPC_URL) {
            self.ledger.rpc_url = Some(url);
        }
        if let Some(chain_id) = get(ENV_CHAIN_ID) {
            self.ledger.chain_id = chain_id
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("{} '{}': {}", ENV_CHAIN_ID, chain_id, e)))?;
        }
        if let Some(token) = get(ENV_TOKEN_ADDRESS) {
            self.ledger.token_address = Some(token.parse()?);
        }
        if let Some(address) = get(ENV_SOURCE_ADDRESS) {
            self.identities.source.address = Some(address.parse()?);
        }
        if let Some(address) = get(ENV_TARGET_ADDRESS) {
            self.identities.target.address = Some(address.parse()?);
        }
        if let Some(key) = get(ENV_SOURCE_PRIVATE_KEY) {
            self.identities.source.private_key = Some(key);
        }
        if let Some(key) = get(ENV_TARGET_PRIVATE_KEY) {
            self.identities.target.private_key = Some(key);
        }
        if let Some(policy) = get(ENV_FAILURE_POLICY) {
            self.supervision.failure_policy = policy.parse()?;
        }
        if let Some(attempts) = get(ENV_MAX_TRANSFER_ATTEMPTS) {
            self.transfers.max_attempts = attempts.trim().parse().map_err(|e| {
                Error::Config(format!("{} '{}': {}", ENV_MAX_TRANSFER_ATTEMPTS, attempts, e))
            })?;
        }
        Ok(())
    }

    pub fn rpc_url(&self) -> Result<&str> {
        self.ledger
            .rpc_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| Error::Config(format!("{} is not set", ENV_RPC_URL)))
    }

    pub fn token_address(&self) -> Result<Address> {
        self.ledger
            .token_address
            .ok_or_else(|| Error::Config(format!("{} is not set", ENV_TOKEN_ADDRESS)))
    }

    /// Wallets for (source, target), checked against the configured addresses.
    pub fn wallets(&self) -> Result<(Wallet, Wallet)> {
        let source = self.identities.source.wallet("SOURCE")?;
        let target = self.identities.target.wallet("TARGET")?;
        if source.address() == target.address() {
            return Err(Error::Config(
                "SOURCE and TARGET must be different identities".to_string(),
            ));
        }
        Ok((source, target))
    }

    pub fn validate(&self) -> Result<()> {
        self.rpc_url()?;
        self.token_address()?;
        self.wallets()?;
        if self.transfers.max_attempts == 0 {
            return Err(Error::Config(
                "transfers.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.agents.first_name == self.agents.second_name {
            return Err(Error::Config("agent names must differ".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    pub const SOURCE_KEY: &str =
        "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
    pub const SOURCE_ADDRESS: &str = "0x2c7536E3605D9C16a7a3D7b1898e529396a65c23";
    pub const TARGET_KEY: &str =
        "0x4646464646464646464646464646464646464646464646464646464646464646";
    pub const TARGET_ADDRESS: &str = "0x9d8A62f656a8d1615C1294fd71e9CFb3E4855A4F";
    pub const TOKEN_ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    pub fn env() -> HashMap<&'static str, String> {
        HashMap::from([
            (ENV_RPC_URL, "http://127.0.0.1:8545".to_string()),
            (ENV_TOKEN_ADDRESS, TOKEN_ADDRESS.to_string()),
            (ENV_SOURCE_ADDRESS, SOURCE_ADDRESS.to_string()),
            (ENV_TARGET_ADDRESS, TARGET_ADDRESS.to_string()),
            (ENV_SOURCE_PRIVATE_KEY, SOURCE_KEY.to_string()),
            (ENV_TARGET_PRIVATE_KEY, TARGET_KEY.to_string()),
        ])
    }

    /// Fully valid settings for tests across the crate.
    pub fn test_settings() -> Settings {
        let vars = env();
        let mut settings = Settings::default();
        settings
            .apply_env(|k| vars.get(k).cloned())
            .unwrap();
        settings
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.ledger.chain_id, 123456);
        assert_eq!(settings.agents.intervals.message_loop_ms, 1_000);
        assert_eq!(settings.agents.intervals.generator_ms, 2_000);
        assert_eq!(settings.agents.intervals.balance_ms, 10_000);
        assert_eq!(settings.agents.vocabulary.len(), 10);
        assert_eq!(settings.transfers.max_attempts, 5);
        assert_eq!(settings.supervision.failure_policy, FailurePolicy::StopActivity);
    }

    #[test]
    fn test_env_overlay_validates() {
        let settings = test_settings();
        settings.validate().unwrap();
        let (source, target) = settings.wallets().unwrap();
        assert_eq!(source.address().to_checksum(), SOURCE_ADDRESS);
        assert_eq!(target.address().to_checksum(), TARGET_ADDRESS);
    }

    #[test]
    fn test_missing_private_key_is_fatal() {
        let mut vars = env();
        vars.remove(ENV_TARGET_PRIVATE_KEY);
        let mut settings = Settings::default();
        settings.apply_env(|k| vars.get(k).cloned()).unwrap();

        let err = settings.validate().unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("TARGET private key")));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let mut vars = env();
        vars.insert(ENV_RPC_URL, "   ".to_string());
        let mut settings = Settings::default();
        settings.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_key_address_mismatch_is_fatal() {
        let mut vars = env();
        vars.insert(ENV_SOURCE_ADDRESS, TARGET_ADDRESS.to_string());
        let mut settings = Settings::default();
        settings.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_env_policy_and_attempts() {
        let mut vars = env();
        vars.insert(ENV_FAILURE_POLICY, "stop-agent".to_string());
        vars.insert(ENV_MAX_TRANSFER_ATTEMPTS, "9".to_string());
        vars.insert(ENV_CHAIN_ID, "1337".to_string());
        let mut settings = Settings::default();
        settings.apply_env(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(settings.supervision.failure_policy, FailurePolicy::StopAgent);
        assert_eq!(settings.transfers.max_attempts, 9);
        assert_eq!(settings.ledger.chain_id, 1337);

        vars.insert(ENV_CHAIN_ID, "mainnet".to_string());
        assert!(settings.apply_env(|k| vars.get(k).cloned()).is_err());
    }

    #[test]
    fn test_settings_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "ledger": { "rpc_url": "http://file:8545", "chain_id": 5 },
                "agents": { "crypto_transfer_amount": 3, "intervals": { "balance_ms": 500 } },
                "supervision": { "failure_policy": "stop-process" }
            }"#,
        )
        .unwrap();

        let mut settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.ledger.rpc_url.as_deref(), Some("http://file:8545"));
        assert_eq!(settings.ledger.chain_id, 5);
        assert_eq!(settings.agents.crypto_transfer_amount, 3);
        assert_eq!(settings.agents.intervals.balance_ms, 500);
        assert_eq!(settings.agents.intervals.message_loop_ms, 1_000);
        assert_eq!(settings.supervision.failure_policy, FailurePolicy::StopProcess);

        let vars = env();
        settings.apply_env(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(settings.ledger.rpc_url.as_deref(), Some("http://127.0.0.1:8545"));
        assert_eq!(settings.ledger.chain_id, 5);
    }

    #[test]
    fn test_missing_settings_file_is_config_error() {
        let err = read_settings_file(Path::new("/nonexistent/agentpair.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_debug_redacts_private_keys() {
        let settings = test_settings();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("4c0883a6"));
        assert!(rendered.contains("<redacted>"));
    }
}

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fixed mining reward paid to the first output of every coinbase
/// transaction. Block reward halving is out of scope.
pub const MINING_REWARD: f64 = 20.0;

/// Canonical address checksum length. Anything below this is accepted
/// but logged as a warning at startup (see `Config::validate`).
pub const CANONICAL_CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Root directory for the chain store and UTXO index sled trees.
    pub data_dir: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_addr: String,
    pub peer_discovery_interval: Duration,
    pub inbound_channel_capacity: usize,
    pub outbound_channel_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            peer_discovery_interval: Duration::from_secs(30),
            inbound_channel_capacity: 128,
            outbound_channel_capacity: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    pub enabled: bool,
    /// Leading zero bits the proof-of-work digest must have.
    pub difficulty: u32,
    pub tick_interval: Duration,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            difficulty: 16,
            tick_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Number of leading bytes of the double-SHA256 digest appended to an
    /// address as its checksum. 4 is canonical; lower values are accepted
    /// for compatibility but weaken collision resistance.
    pub address_checksum_len: usize,
    pub address_version: u8,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            address_checksum_len: CANONICAL_CHECKSUM_LEN,
            address_version: 0x00,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub enable_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_console: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub database: DatabaseConfig,
    pub network: NetworkConfig,
    pub mining: MiningConfig,
    pub crypto: CryptoConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        let database = DatabaseConfig {
            data_dir: data_dir.clone(),
        };
        Self {
            data_dir,
            database,
            ..Default::default()
        }
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(())
    }

    /// Logs a warning for settings that are legal but weaker than the
    /// canonical recommendation. Does not fail startup.
    pub fn validate(&self) {
        if self.crypto.address_checksum_len < CANONICAL_CHECKSUM_LEN {
            tracing::warn!(
                configured = self.crypto.address_checksum_len,
                canonical = CANONICAL_CHECKSUM_LEN,
                "address checksum length below canonical recommendation"
            );
        }
    }

    pub fn chain_store_path(&self) -> PathBuf {
        self.database.data_dir.join("chainstate")
    }

    pub fn utxo_index_path(&self) -> PathBuf {
        self.database.data_dir.join("utxo")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Serialize(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(msg) => write!(f, "io error: {}", msg),
            ConfigError::Parse(msg) => write!(f, "parse error: {}", msg),
            ConfigError::Serialize(msg) => write!(f, "serialize error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_checksum_is_canonical() {
        let config = Config::default();
        assert_eq!(config.crypto.address_checksum_len, CANONICAL_CHECKSUM_LEN);
    }

    #[test]
    fn round_trips_through_toml() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config = Config::new(temp_dir.path().to_path_buf());
        config.to_file(&config_path).unwrap();

        let loaded = Config::from_file(&config_path).unwrap();
        assert_eq!(config.data_dir, loaded.data_dir);
        assert_eq!(
            config.mining.difficulty,
            loaded.mining.difficulty
        );
    }

    #[test]
    fn new_points_database_at_data_dir() {
        let config = Config::new(PathBuf::from("/tmp/ledgerd-test"));
        assert_eq!(config.database.data_dir, PathBuf::from("/tmp/ledgerd-test"));
    }
}

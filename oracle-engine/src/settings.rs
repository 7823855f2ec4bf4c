//! Process-boundary configuration (§6), loaded once at startup.

use std::path::{Path, PathBuf};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::constants::{keyring_subdir, CONFIG_FILE_NAME, CONFIG_SUBDIR};

#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub chain_id: String,
    pub endpoint: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KeyringSettings {
    /// One of `"test"`, `"file"`, ... — the backend is an external
    /// collaborator (§1); the daemon only needs to know which directory to
    /// look for and which name to ask for.
    pub backend: String,
    pub name: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GasSettings {
    pub limit: u64,
    pub adjustment: f64,
    pub denom: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthCheckSettings {
    #[serde(default = "default_health_hostname")]
    pub hostname: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    5757
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self { hostname: default_health_hostname(), port: default_health_port() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub chain: ChainSettings,
    pub keyring: KeyringSettings,
    pub gas: GasSettings,
    #[serde(default)]
    pub health_check: HealthCheckSettings,
}

impl Settings {
    /// Loads `<home>/.oracled/config.toml`, overridden by `OCTL__`-prefixed
    /// environment variables using the teacher's `__`-nested-key convention
    /// (e.g. `OCTL__CHAIN__ENDPOINT`).
    pub fn new(home: &Path) -> Result<Self, config::ConfigError> {
        let config_path = config_file_path(home);
        let builder = Config::builder()
            .add_source(File::from(config_path))
            .add_source(Environment::with_prefix("OCTL").separator("__"));
        builder.build()?.try_deserialize()
    }

    /// An in-memory settings value for unit tests, without touching the
    /// filesystem.
    pub fn new_test() -> Self {
        Self {
            chain: ChainSettings {
                chain_id: "test-chain".to_string(),
                endpoint: "ws://127.0.0.1:26657/websocket".to_string(),
            },
            keyring: KeyringSettings {
                backend: "test".to_string(),
                name: "oracle".to_string(),
                passphrase: None,
            },
            gas: GasSettings { limit: 200_000, adjustment: 1.2, denom: "uatom".to_string() },
            health_check: HealthCheckSettings::default(),
        }
    }
}

pub fn config_file_path(home: &Path) -> PathBuf {
    home.join(CONFIG_SUBDIR).join(CONFIG_FILE_NAME)
}

pub fn keyring_dir_path(home: &Path, backend: &str) -> PathBuf {
    home.join(CONFIG_SUBDIR).join(keyring_subdir(backend))
}

pub fn home_dir_exists(home: &Path) -> bool {
    home.join(CONFIG_SUBDIR).is_dir()
}

#[derive(Debug, Parser)]
#[command(name = "oracled", about = "Off-chain oracle reporting daemon")]
pub struct CommandLineOptions {
    /// Home directory containing `.oracled/config.toml` and keyring data.
    #[arg(long, env = "OCTL_HOME", default_value = "~")]
    pub home: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Scaffold the home directory layout.
    Init,
    /// Run the daemon.
    Start,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_dir_exists_false_for_missing_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!home_dir_exists(tmp.path()));
    }

    #[test]
    fn home_dir_exists_true_once_scaffolded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(CONFIG_SUBDIR)).unwrap();
        assert!(home_dir_exists(tmp.path()));
    }

    #[test]
    fn keyring_dir_path_matches_layout() {
        let home = Path::new("/home/operator");
        assert_eq!(
            keyring_dir_path(home, "test"),
            PathBuf::from("/home/operator/.oracled/keyring-test")
        );
    }
}

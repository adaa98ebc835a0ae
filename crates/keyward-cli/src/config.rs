// ABOUTME: Configuration loading for the keyward CLI.
// ABOUTME: Optional TOML file with base path, mechanism choice and host facts.

use anyhow::{Context, Result};
use keyward_ssh::{HostFacts, KeyRequestService, DEFAULT_BASE_PATH};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// System-wide config location, checked before the per-user one.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/keyward/config.toml";

/// Which implementation generates keys and purges known_hosts entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mechanism {
    /// Shell out to ssh-keygen.
    #[default]
    Openssh,
    /// In-process ed25519 generation, no external binaries.
    Native,
}

/// Top-level configuration structure for keyward.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the managed tree (default `/etc/keyward`).
    pub base_path: Option<PathBuf>,
    pub mechanism: Mechanism,
    /// ssh-keygen binary used by the openssh mechanism.
    pub ssh_keygen: Option<PathBuf>,
    pub host: HostConfig,
}

/// Facts about this host used for comments and known_hosts records.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub hostname: Option<String>,
    pub fqdn: Option<String>,
    pub ip_address: Option<IpAddr>,
}

impl Config {
    /// Load configuration from the specified path or the default locations.
    ///
    /// An explicit path must exist. Without one, `/etc/keyward/config.toml`
    /// and then `~/.config/keyward/config.toml` are tried; if neither exists
    /// the built-in defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => Self::from_file(&path),
                None => Ok(Self::default()),
            },
        }
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("keyward").join("config.toml"));
        }
        paths
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn base_path(&self) -> PathBuf {
        self.base_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_PATH))
    }

    /// Build the service this configuration describes.
    pub fn service(&self) -> KeyRequestService {
        match self.mechanism {
            Mechanism::Openssh => KeyRequestService::openssh(
                self.base_path(),
                self.ssh_keygen
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("ssh-keygen")),
            ),
            Mechanism::Native => KeyRequestService::native(self.base_path()),
        }
    }
}

impl HostConfig {
    /// Host facts, falling back to the OS hostname when none is configured.
    pub fn facts(&self) -> Option<HostFacts> {
        let hostname = self.hostname.clone().or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .filter(|h| !h.is_empty())
        })?;

        let mut facts = HostFacts::new(hostname);
        facts.fqdn = self.fqdn.clone();
        facts.ip_address = self.ip_address;
        Some(facts)
    }
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Context, Result};

/// Well-known rendezvous port routers connect to by default.
pub const DEFAULT_SERVER_PORT: u16 = 5555;
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 1500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub server: ServerConfig,
    pub router: RouterConfig,
    pub topology: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub idle_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub server_addr: SocketAddr,
    pub bind_addr: SocketAddr,
    /// Give up waiting for RESPONSE after this long; wait forever when unset.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            router: RouterConfig::default(),
            topology: PathBuf::from("config.txt"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_SERVER_PORT)),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_SERVER_PORT)),
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            connect_timeout_ms: None,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

impl RouterConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}

impl SimulationConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let config: SimulationConfig =
            serde_json::from_str(&content).with_context(|| format!("parsing config {}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

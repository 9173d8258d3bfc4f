use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Executable that implements the display server itself.
    #[serde(default = "default_display_exec")]
    pub display_exec: String,
    #[serde(default)]
    pub display_args: Vec<String>,
    /// Port the display server listens on; probed for readiness.
    #[serde(default = "default_display_port")]
    pub display_port: u16,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Helper command prompting for the screen-capture grant. Exit 0
    /// means granted; unset means the device is pre-provisioned.
    #[serde(default)]
    pub grant_cmd: Option<String>,
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&scast_protocol::paths::config_path())
    }

    /// Load from a config file, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            display_exec: default_display_exec(),
            display_args: Vec::new(),
            display_port: default_display_port(),
            ready_timeout_ms: default_ready_timeout_ms(),
            grant_cmd: None,
        }
    }
}

fn default_socket_path() -> PathBuf {
    scast_protocol::paths::default_socket_path()
}

fn default_display_exec() -> String {
    "scast-display".to_string()
}

fn default_display_port() -> u16 {
    5900
}

fn default_ready_timeout_ms() -> u64 {
    5_000
}

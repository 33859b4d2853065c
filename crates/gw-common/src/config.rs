use serde::Deserialize;

/// Top-level gateway configuration.
/// Loaded from `GW__`-prefixed environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Display server the tunnels connect to
    #[serde(default)]
    pub backend: BackendConfig,
    /// Per-tunnel time budgets
    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to (default: 0.0.0.0)
    #[serde(default = "default_host")]
    pub host: String,
    /// HTTP + WebSocket port (default: 8080)
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Log level (default: info)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Display server host (default: 127.0.0.1)
    #[serde(default = "default_backend_host")]
    pub host: String,
    /// Display server port (default: 4822)
    #[serde(default = "default_backend_port")]
    pub port: u16,
    /// TCP connect timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

/// Budgets handed to every new tunnel. An unset limit means no limit on
/// that axis.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaConfig {
    #[serde(default)]
    pub daily_limit_secs: Option<u64>,
    #[serde(default)]
    pub monthly_limit_secs: Option<u64>,
}

impl AppConfig {
    /// Load config from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::from_env(Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::default()
            .prefix("GW")
            .separator("__")
            .try_parsing(true)
    }

    fn from_env(env: config::Environment) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder().add_source(env).build()?;

        cfg.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_port: default_api_port(),
            log_level: default_log_level(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl BackendConfig {
    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}
fn default_backend_port() -> u16 {
    4822
}
fn default_connect_timeout() -> u64 {
    10
}

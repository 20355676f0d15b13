use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AgriChatConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/agrichat".to_string(),
            max_connections: 16,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
        }
    }
}

impl CacheConfig {
    /// Build a `redis://` connection URL from the parts.
    pub fn url(&self) -> String {
        let auth = self
            .password
            .as_deref()
            .map(|p| format!(":{}@", p))
            .unwrap_or_default();
        format!("redis://{}{}:{}/{}", auth, self.host, self.port, self.db)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// TTL applied to every cache entry for a session.
    pub ttl_seconds: u64,
    /// Maximum number of recent messages kept in the per-session cache list.
    pub history_cache_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 3600,
            history_cache_size: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    pub bucket: String,
    pub access_token: Option<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            bucket: "agrichat-storage".to_string(),
            access_token: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupervisorConfig {
    pub api_key: Option<String>,
    pub model: String,
    /// Upper bound on tool-call rounds before the classifier gives up.
    pub max_tool_rounds: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gemini-1.5-flash".to_string(),
            max_tool_rounds: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8780,
        }
    }
}

impl Default for AgriChatConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            session: SessionConfig::default(),
            archive: ArchiveConfig::default(),
            supervisor: SupervisorConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl AgriChatConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// `AGRICHAT_*` environment overrides (`__` separates nesting, e.g.
    /// `AGRICHAT_DATABASE__URL`). Credentials have no defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(p) = path {
            builder = builder.add_source(File::with_name(p).required(false));
        }
        let s = builder
            .add_source(Environment::with_prefix("AGRICHAT").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KissaConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
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
            url: "sqlite://conversations.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub model: String,
    pub base_url: String,
    pub request_timeout_seconds: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Optional file whose contents replace the built-in persona instructions.
    pub persona_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-lite".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            request_timeout_seconds: 60,
            max_retries: 0,
            retry_delay_ms: 1000,
            persona_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    pub turn_limit: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { turn_limit: 10 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AdminConfig {
    pub token: Option<String>,
}

impl AdminConfig {
    /// The configured admin secret, falling back to `ADMIN_TOKEN`.
    /// An empty value counts as unset.
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("ADMIN_TOKEN").ok())
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SheetsConfig {
    pub enabled: bool,
    pub spreadsheet_id: String,
    pub range: String,
    pub base_url: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            spreadsheet_id: "1cbeBpGD7h5uBd4lH4ggU5srKvo01kAhXNpnupw-zGXQ".to_string(),
            range: "Sheet1".to_string(),
            base_url: "https://sheets.googleapis.com/v4".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

impl KissaConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("KISSA").separator("__"))
            .build()?;
        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = KissaConfig::load("does-not-exist.toml").unwrap();
        assert_eq!(config.conversation.turn_limit, 10);
        assert_eq!(config.engine.model, "gemini-2.5-flash-lite");
        assert_eq!(config.engine.max_retries, 0);
        assert_eq!(config.http.port, 8000);
        assert!(config.sheets.enabled);
    }

    #[test]
    fn test_partial_file_overrides_only_named_keys() {
        let dir = std::env::temp_dir().join(format!("kissa-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("partial.toml");
        std::fs::write(
            &path,
            "[conversation]\nturn_limit = 4\n\n[engine]\nmodel = \"gemini-test\"\n",
        )
        .unwrap();

        let config = KissaConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.conversation.turn_limit, 4);
        assert_eq!(config.engine.model, "gemini-test");
        assert_eq!(config.engine.request_timeout_seconds, 60);
        assert_eq!(config.database.url, "sqlite://conversations.db");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_admin_token_from_config_wins() {
        let admin = AdminConfig {
            token: Some("from-file".to_string()),
        };
        assert_eq!(admin.resolve_token().as_deref(), Some("from-file"));
    }
}

use std::{path::PathBuf, time::Duration as StdDuration};

use chrono::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Runtime configuration for wewatch
#[derive(Debug, Clone)]
pub struct Config {
    /// Secret used to sign and verify user tokens
    pub jwt_secret: String,
    pub database: DatabaseConfig,
    /// Credentials for the external real-time media service, if configured
    pub livekit: Option<LiveKitConfig>,
    /// Use the in-memory record store instead of Postgres
    pub use_memory_store: bool,
    /// Root directory for uploaded media
    pub upload_dir: PathBuf,
    pub port: u16,
    /// The single origin allowed by CORS
    pub allowed_origin: String,
    /// How long a session in a temporary room may live before the reaper ends it
    pub session_ttl: Duration,
    /// How often the reaper runs
    pub reaper_interval: StdDuration,
    /// How long an issued login token stays valid
    pub token_lifetime: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LiveKitConfig {
    pub api_key: String,
    pub api_secret: String,
    pub url: Url,
}

impl Config {
    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_UPLOAD_DIR: &'static str = "./uploads";
    pub const DEFAULT_ORIGIN: &'static str = "http://localhost:3000";
    pub const SESSION_TTL_IN_MINUTES: i64 = 30;
    pub const REAPER_INTERVAL_IN_SECONDS: u64 = 10 * 60;
    pub const TOKEN_LIFETIME_IN_DAYS: i64 = 7;

    /// Creates a config with defaults for everything except the secret.
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            database: DatabaseConfig::default(),
            livekit: None,
            use_memory_store: false,
            upload_dir: PathBuf::from(Self::DEFAULT_UPLOAD_DIR),
            port: Self::DEFAULT_PORT,
            allowed_origin: Self::DEFAULT_ORIGIN.to_string(),
            session_ttl: Duration::minutes(Self::SESSION_TTL_IN_MINUTES),
            reaper_interval: StdDuration::from_secs(Self::REAPER_INTERVAL_IN_SECONDS),
            token_lifetime: Duration::days(Self::TOKEN_LIFETIME_IN_DAYS),
        }
    }

    /// Reads the config from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the config through `lookup`, which returns the value of a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        let mut config = Self::with_secret(jwt_secret);

        let defaults = DatabaseConfig::default();
        config.database = DatabaseConfig {
            host: get("DB_HOST").unwrap_or(defaults.host),
            user: get("DB_USER").unwrap_or(defaults.user),
            password: get("DB_PASSWORD").unwrap_or(defaults.password),
            name: get("DB_NAME").unwrap_or(defaults.name),
            port: parse_port("DB_PORT", get("DB_PORT"), defaults.port)?,
        };

        config.livekit = match (
            get("LIVEKIT_API_KEY"),
            get("LIVEKIT_API_SECRET"),
            get("LIVEKIT_URL"),
        ) {
            (Some(api_key), Some(api_secret), Some(url)) => Some(LiveKitConfig {
                api_key,
                api_secret,
                url: Url::parse(&url).map_err(|_| ConfigError::Invalid {
                    key: "LIVEKIT_URL",
                    value: url,
                })?,
            }),
            (None, None, None) => None,
            _ => return Err(ConfigError::Missing("LIVEKIT_API_KEY, LIVEKIT_API_SECRET and LIVEKIT_URL")),
        };

        config.use_memory_store = get("WEWATCH_STORE")
            .map(|v| v.eq_ignore_ascii_case("memory"))
            .unwrap_or(false);

        if let Some(dir) = get("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }

        config.port = parse_port("PORT", get("PORT"), Self::DEFAULT_PORT)?;

        if let Some(origin) = get("ALLOWED_ORIGIN") {
            config.allowed_origin = origin;
        }

        Ok(config)
    }
}

impl DatabaseConfig {
    /// Returns the postgres connection url
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            name: "wewatch".to_string(),
            port: 5432,
        }
    }
}

fn parse_port(key: &'static str, value: Option<String>, default: u16) -> Result<u16, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::{Config, ConfigError};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| vars.get(key).cloned()
    }

    #[test]
    fn missing_secret_fails_fast() {
        let result = Config::from_lookup(lookup(&[("DB_HOST", "db")]));

        assert_eq!(result.unwrap_err(), ConfigError::Missing("JWT_SECRET"));
    }

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&[("JWT_SECRET", "s3cret")])).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.upload_dir.to_str(), Some("./uploads"));
        assert_eq!(config.session_ttl.num_minutes(), 30);
        assert_eq!(config.reaper_interval.as_secs(), 600);
        assert!(config.livekit.is_none());
        assert!(!config.use_memory_store);
    }

    #[test]
    fn reads_database_and_livekit() {
        let config = Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s3cret"),
            ("DB_HOST", "db.internal"),
            ("DB_USER", "watch"),
            ("DB_PASSWORD", "pw"),
            ("DB_NAME", "parties"),
            ("DB_PORT", "6543"),
            ("LIVEKIT_API_KEY", "key"),
            ("LIVEKIT_API_SECRET", "secret"),
            ("LIVEKIT_URL", "wss://media.example.com"),
            ("WEWATCH_STORE", "memory"),
        ]))
        .unwrap();

        assert_eq!(
            config.database.url(),
            "postgres://watch:pw@db.internal:6543/parties"
        );
        assert_eq!(config.livekit.unwrap().api_key, "key");
        assert!(config.use_memory_store);
    }

    #[test]
    fn rejects_bad_port_and_partial_livekit() {
        let bad_port = Config::from_lookup(lookup(&[("JWT_SECRET", "s"), ("PORT", "eighty")]));
        assert!(matches!(bad_port, Err(ConfigError::Invalid { key: "PORT", .. })));

        let partial = Config::from_lookup(lookup(&[("JWT_SECRET", "s"), ("LIVEKIT_API_KEY", "k")]));
        assert!(matches!(partial, Err(ConfigError::Missing(_))));
    }
}

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub filter: FilterConfig,
    pub database: DatabaseConfig,
    pub notify: NotifyConfig,
    pub request: RequestConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Hard ceiling on list page size
    pub max_limit: u32,
    /// Page size used when the caller gives none or an invalid one
    pub default_limit: u32,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Bounded queue size for automation/webhook notifications
    pub queue_capacity: usize,
    /// Per-notifier delivery timeout
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    pub default_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub enable_audit_logging: bool,
}

impl NotifyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl RequestConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_overrides(|key| env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        // Filter overrides
        if let Some(v) = lookup("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.parse().unwrap_or(self.filter.max_limit);
        }
        if let Some(v) = lookup("FILTER_DEFAULT_LIMIT") {
            self.filter.default_limit = v.parse().unwrap_or(self.filter.default_limit);
        }
        if let Some(v) = lookup("FILTER_DEBUG_LOGGING") {
            self.filter.debug_logging = v.parse().unwrap_or(self.filter.debug_logging);
        }

        // Database overrides
        if let Some(v) = lookup("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Some(v) = lookup("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Some(v) = lookup("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }

        // Notification overrides
        if let Some(v) = lookup("NOTIFY_QUEUE_CAPACITY") {
            self.notify.queue_capacity = v.parse().unwrap_or(self.notify.queue_capacity);
        }
        if let Some(v) = lookup("NOTIFY_TIMEOUT_MS") {
            self.notify.timeout_ms = v.parse().unwrap_or(self.notify.timeout_ms);
        }

        if let Some(v) = lookup("REQUEST_TIMEOUT_MS") {
            self.request.default_timeout_ms = v.parse().unwrap_or(self.request.default_timeout_ms);
        }

        if let Some(v) = lookup("SECURITY_ENABLE_AUDIT_LOGGING") {
            self.security.enable_audit_logging = v.parse().unwrap_or(self.security.enable_audit_logging);
        }

        // Pages hold at least one row and the default never exceeds the ceiling
        self.filter.max_limit = self.filter.max_limit.max(1);
        self.filter.default_limit = self.filter.default_limit.clamp(1, self.filter.max_limit);

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            filter: FilterConfig {
                max_limit: 1000,
                default_limit: 50,
                debug_logging: true,
            },
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
                enable_query_logging: true,
            },
            notify: NotifyConfig {
                queue_capacity: 1024,
                timeout_ms: 10_000,
            },
            request: RequestConfig {
                default_timeout_ms: 30_000,
            },
            security: SecurityConfig {
                enable_audit_logging: false,
            },
        }
    }

    pub fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            filter: FilterConfig {
                max_limit: 500,
                default_limit: 25,
                debug_logging: false,
            },
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
                enable_query_logging: true,
            },
            notify: NotifyConfig {
                queue_capacity: 4096,
                timeout_ms: 5_000,
            },
            request: RequestConfig {
                default_timeout_ms: 15_000,
            },
            security: SecurityConfig {
                enable_audit_logging: true,
            },
        }
    }

    pub fn production() -> Self {
        Self {
            environment: Environment::Production,
            filter: FilterConfig {
                max_limit: 100,
                default_limit: 20,
                debug_logging: false,
            },
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
                enable_query_logging: false,
            },
            notify: NotifyConfig {
                queue_capacity: 8192,
                timeout_ms: 5_000,
            },
            request: RequestConfig {
                default_timeout_ms: 10_000,
            },
            security: SecurityConfig {
                enable_audit_logging: true,
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_development_config() {
        let config = AppConfig::development();
        assert_eq!(config.filter.max_limit, 1000);
        assert_eq!(config.filter.default_limit, 50);
        assert!(!config.security.enable_audit_logging);
    }

    #[test]
    fn test_default_production_config() {
        let config = AppConfig::production();
        assert_eq!(config.filter.max_limit, 100);
        assert!(config.filter.default_limit <= config.filter.max_limit);
        assert!(config.security.enable_audit_logging);
    }

    #[test]
    fn test_durations() {
        let config = AppConfig::staging();
        assert_eq!(config.notify.timeout(), Duration::from_secs(5));
        assert_eq!(config.request.default_timeout(), Duration::from_secs(15));
    }

    fn overrides<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key: &str| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn test_overrides_replace_preset_values() {
        let config = AppConfig::development().with_overrides(overrides(&[
            ("FILTER_MAX_LIMIT", "200"),
            ("REQUEST_TIMEOUT_MS", "750"),
            ("NOTIFY_QUEUE_CAPACITY", "not-a-number"),
        ]));
        assert_eq!(config.filter.max_limit, 200);
        assert_eq!(config.request.default_timeout(), Duration::from_millis(750));
        assert_eq!(config.notify.queue_capacity, 1024);
    }

    #[test]
    fn test_zero_limits_clamp_to_one() {
        let config = AppConfig::development().with_overrides(overrides(&[("FILTER_MAX_LIMIT", "0")]));
        assert_eq!(config.filter.max_limit, 1);
        assert_eq!(config.filter.default_limit, 1);

        let config = AppConfig::production().with_overrides(overrides(&[("FILTER_DEFAULT_LIMIT", "0")]));
        assert_eq!(config.filter.max_limit, 100);
        assert_eq!(config.filter.default_limit, 1);
    }

    #[test]
    fn test_default_limit_never_exceeds_max() {
        let config = AppConfig::production().with_overrides(overrides(&[("FILTER_DEFAULT_LIMIT", "5000")]));
        assert_eq!(config.filter.default_limit, 100);
    }
}

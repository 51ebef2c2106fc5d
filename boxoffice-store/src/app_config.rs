use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub auth: AuthConfig,
    pub seatsio: SeatsIoConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

/// Timing policy for holds, sweepers and outbound calls.
#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_hold_minutes")]
    pub hold_minutes: i32,
    #[serde(default = "default_expiry_sweep_seconds")]
    pub expiry_sweep_seconds: u64,
    #[serde(default = "default_expiry_notice_sweep_seconds")]
    pub expiry_notice_sweep_seconds: u64,
    #[serde(default = "default_expiry_notice_window_seconds")]
    pub expiry_notice_window_seconds: i64,
    #[serde(default = "default_external_call_timeout_seconds")]
    pub external_call_timeout_seconds: u64,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: i64,
}

fn default_hold_minutes() -> i32 { 15 }
fn default_expiry_sweep_seconds() -> u64 { 20 }
fn default_expiry_notice_sweep_seconds() -> u64 { 25 }
fn default_expiry_notice_window_seconds() -> i64 { 60 }
fn default_external_call_timeout_seconds() -> u64 { 10 }
fn default_rate_limit_per_minute() -> i64 { 100 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            hold_minutes: default_hold_minutes(),
            expiry_sweep_seconds: default_expiry_sweep_seconds(),
            expiry_notice_sweep_seconds: default_expiry_notice_sweep_seconds(),
            expiry_notice_window_seconds: default_expiry_notice_window_seconds(),
            external_call_timeout_seconds: default_external_call_timeout_seconds(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
        }
    }
}

impl BusinessRules {
    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_secs(self.external_call_timeout_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeatsIoConfig {
    pub base_url: String,
    pub secret_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_primary_provider")]
    pub primary_provider: String,
    /// Shared secret for the trusted manual-pay channel.
    pub confirmation_secret: String,
    pub amwal: AmwalConfig,
    #[serde(default)]
    pub cash: CashConfig,
}

fn default_currency() -> String { "IQD".to_string() }
fn default_primary_provider() -> String { "amwal".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct AmwalConfig {
    #[serde(default)]
    pub server_key: String,
    #[serde(default)]
    pub profile_id: i64,
    pub base_url: String,
    pub callback_url: String,
    pub return_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CashConfig {
    #[serde(default = "default_cash_enabled")]
    pub enabled: bool,
}

fn default_cash_enabled() -> bool { true }

impl Default for CashConfig {
    fn default() -> Self {
        Self { enabled: default_cash_enabled() }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `BOXOFFICE__PAYMENTS__CONFIRMATION_SECRET=...`
            .add_source(config::Environment::with_prefix("BOXOFFICE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_rules_defaults() {
        let rules = BusinessRules::default();
        assert_eq!(rules.hold_minutes, 15);
        assert_eq!(rules.expiry_sweep_seconds, 20);
        assert_eq!(rules.expiry_notice_sweep_seconds, 25);
        assert_eq!(rules.external_call_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_deserialize_from_toml_source() {
        let raw = r#"
            [server]
            port = 8080
            [database]
            url = "postgres://localhost/boxoffice"
            [auth]
            jwt_secret = "secret"
            [seatsio]
            base_url = "https://api-eu.seatsio.net"
            secret_key = "sk"
            [payments]
            confirmation_secret = "pos-secret"
            [payments.amwal]
            base_url = "https://secure-iraq.paytabs.com"
            callback_url = "https://example.test/cb"
            return_url = "https://example.test/return"
            [business_rules]
            hold_minutes = 10
        "#;

        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.payments.currency, "IQD");
        assert_eq!(config.payments.primary_provider, "amwal");
        assert!(config.payments.cash.enabled);
        assert!(config.redis.is_none());
        assert_eq!(config.business_rules.hold_minutes, 10);
        assert_eq!(config.business_rules.expiry_notice_window_seconds, 60);
        assert_eq!(config.database.max_connections, 5);
    }
}

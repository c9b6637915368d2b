use chrono::Duration;
use config::ConfigError;
use libris_core::{FinePolicy, LibraryRules};
use serde::Deserialize;
use std::env;
use std::ops::RangeInclusive;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub rules: BusinessRules,
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

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    #[serde(default = "default_loan_period_days")]
    pub loan_period_days: i64,
    #[serde(default = "default_fine_per_day")]
    pub fine_per_day: i64,
    #[serde(default = "default_session_hours")]
    pub session_hours: i64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

fn default_loan_period_days() -> i64 { 7 }
fn default_fine_per_day() -> i64 { 100 }
fn default_session_hours() -> i64 { 4 }
fn default_sweep_interval_seconds() -> u64 { 60 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            loan_period_days: default_loan_period_days(),
            fine_per_day: default_fine_per_day(),
            session_hours: default_session_hours(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

const LOAN_PERIOD_DAYS: RangeInclusive<i64> = 1..=3650;
const FINE_PER_DAY: RangeInclusive<i64> = 0..=1_000_000;
const SESSION_HOURS: RangeInclusive<i64> = 1..=24;
const SWEEP_INTERVAL_SECONDS: RangeInclusive<u64> = 1..=86_400;

fn check<T>(field: &str, value: T, allowed: &RangeInclusive<T>) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Message(format!(
            "rules.{} = {} is outside {}..={}",
            field,
            value,
            allowed.start(),
            allowed.end()
        )))
    }
}

impl BusinessRules {
    /// Rejects values the services cannot run with, such as a zero sweep
    /// interval or a negative loan period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("loan_period_days", self.loan_period_days, &LOAN_PERIOD_DAYS)?;
        check("fine_per_day", self.fine_per_day, &FINE_PER_DAY)?;
        check("session_hours", self.session_hours, &SESSION_HOURS)?;
        check("sweep_interval_seconds", self.sweep_interval_seconds, &SWEEP_INTERVAL_SECONDS)
    }

    pub fn library_rules(&self) -> LibraryRules {
        LibraryRules {
            loan_period: Duration::days(self.loan_period_days),
            session_length: Duration::hours(self.session_hours),
            fines: FinePolicy::new(self.fine_per_day),
        }
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local, uncommitted overrides
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `LIBRIS_SERVER__PORT=8080` sets `server.port`
            .add_source(config::Environment::with_prefix("LIBRIS").separator("__"))
            .build()?;

        Self::from_settings(s)
    }

    /// Deserializes layered settings and checks the business rules.
    pub fn from_settings(settings: config::Config) -> Result<Self, ConfigError> {
        let config: Self = settings.try_deserialize()?;
        config.rules.validate()?;
        Ok(config)
    }
}

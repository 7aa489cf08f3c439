//! Configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::events::HEARTBEAT_INTERVAL;
use crate::scheduler::renewal::{DEFAULT_RENEWAL_PERIOD_DAYS, DEFAULT_RENEWAL_THRESHOLD_DAYS};
use crate::scheduler::{DEFAULT_PUBLISH_INTERVAL, DEFAULT_RENEWAL_INTERVAL};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DB_PATH: &str = "./data/convo-crm.db";
pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";

/// WhatsApp Cloud API credentials.
#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub phone_number_id: String,
    pub access_token: SecretString,
}

/// Instagram business account credentials. Used for both direct messages
/// and content publishing.
#[derive(Debug, Clone)]
pub struct InstagramConfig {
    pub account_id: String,
    pub access_token: SecretString,
}

/// Endpoint that renews external subscriptions.
#[derive(Debug, Clone)]
pub struct RenewalConfig {
    pub endpoint: String,
    pub token: Option<SecretString>,
}

/// Scheduler timing.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub publish_interval: Duration,
    pub renewal_interval: Duration,
    pub renewal_threshold: chrono::Duration,
    pub renewal_period: chrono::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            renewal_threshold: chrono::Duration::days(DEFAULT_RENEWAL_THRESHOLD_DAYS),
            renewal_period: chrono::Duration::days(DEFAULT_RENEWAL_PERIOD_DAYS),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Directory for the rolling log file; stderr only when unset.
    pub log_dir: Option<PathBuf>,
    pub heartbeat_interval: Duration,
    pub graph_api_base: String,
    pub scheduler: SchedulerConfig,
    pub whatsapp: Option<WhatsAppConfig>,
    pub instagram: Option<InstagramConfig>,
    pub renewal: Option<RenewalConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            log_dir: None,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            graph_api_base: DEFAULT_GRAPH_API_BASE.to_string(),
            scheduler: SchedulerConfig::default(),
            whatsapp: None,
            instagram: None,
            renewal: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let scheduler = SchedulerConfig {
            enabled: parse_or(&get, "CONVO_CRM_SCHEDULER_ENABLED", true, parse_bool)?,
            publish_interval: secs_or(
                &get,
                "CONVO_CRM_PUBLISH_INTERVAL_SECS",
                defaults.scheduler.publish_interval,
            )?,
            renewal_interval: secs_or(
                &get,
                "CONVO_CRM_RENEWAL_INTERVAL_SECS",
                defaults.scheduler.renewal_interval,
            )?,
            renewal_threshold: chrono::Duration::days(parse_or(
                &get,
                "CONVO_CRM_RENEWAL_THRESHOLD_DAYS",
                DEFAULT_RENEWAL_THRESHOLD_DAYS,
                parse_days,
            )?),
            renewal_period: chrono::Duration::days(parse_or(
                &get,
                "CONVO_CRM_RENEWAL_PERIOD_DAYS",
                DEFAULT_RENEWAL_PERIOD_DAYS,
                parse_days,
            )?),
        };

        let whatsapp = match (get("WHATSAPP_PHONE_NUMBER_ID"), get("WHATSAPP_ACCESS_TOKEN")) {
            (Some(phone_number_id), Some(token)) => Some(WhatsAppConfig {
                phone_number_id,
                access_token: SecretString::from(token),
            }),
            _ => None,
        };
        let instagram = match (get("INSTAGRAM_ACCOUNT_ID"), get("INSTAGRAM_ACCESS_TOKEN")) {
            (Some(account_id), Some(token)) => Some(InstagramConfig {
                account_id,
                access_token: SecretString::from(token),
            }),
            _ => None,
        };
        let renewal = get("CONVO_CRM_RENEWAL_ENDPOINT").map(|endpoint| RenewalConfig {
            endpoint,
            token: get("CONVO_CRM_RENEWAL_TOKEN").map(SecretString::from),
        });

        Ok(Self {
            port: parse_or(&get, "CONVO_CRM_PORT", defaults.port, |v| {
                v.parse::<u16>().map_err(|e| e.to_string())
            })?,
            db_path: get("CONVO_CRM_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            log_dir: get("CONVO_CRM_LOG_DIR").map(PathBuf::from),
            heartbeat_interval: secs_or(
                &get,
                "CONVO_CRM_HEARTBEAT_SECS",
                defaults.heartbeat_interval,
            )?,
            graph_api_base: get("CONVO_CRM_GRAPH_API_BASE").unwrap_or(defaults.graph_api_base),
            scheduler,
            whatsapp,
            instagram,
            renewal,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => parse(&raw).map_err(|message| ConfigError::InvalidValue {
            key: key.to_string(),
            message,
        }),
    }
}

fn secs_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(get, key, default, |v| match v.parse::<u64>() {
        Ok(0) => Err("must be greater than zero".to_string()),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(e.to_string()),
    })
}

fn parse_days(v: &str) -> Result<i64, String> {
    match v.parse::<i64>() {
        Ok(days) if days > 0 => Ok(days),
        Ok(_) => Err("must be greater than zero".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn parse_bool(v: &str) -> Result<bool, String> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(format!("expected a boolean, got '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.db_path, PathBuf::from("./data/convo-crm.db"));
        assert!(cfg.log_dir.is_none());
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert!(cfg.scheduler.enabled);
        assert_eq!(cfg.scheduler.publish_interval, Duration::from_secs(60));
        assert_eq!(cfg.scheduler.renewal_interval, Duration::from_secs(86_400));
        assert_eq!(cfg.scheduler.renewal_threshold, chrono::Duration::days(2));
        assert_eq!(cfg.scheduler.renewal_period, chrono::Duration::days(7));
        assert!(cfg.whatsapp.is_none());
        assert!(cfg.instagram.is_none());
        assert!(cfg.renewal.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = config(&[
            ("CONVO_CRM_PORT", "9001"),
            ("CONVO_CRM_SCHEDULER_ENABLED", "off"),
            ("CONVO_CRM_PUBLISH_INTERVAL_SECS", "15"),
            ("CONVO_CRM_RENEWAL_PERIOD_DAYS", "30"),
            ("CONVO_CRM_LOG_DIR", "/var/log/convo"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 9001);
        assert!(!cfg.scheduler.enabled);
        assert_eq!(cfg.scheduler.publish_interval, Duration::from_secs(15));
        assert_eq!(cfg.scheduler.renewal_period, chrono::Duration::days(30));
        assert_eq!(cfg.log_dir, Some(PathBuf::from("/var/log/convo")));
    }

    #[test]
    fn channel_needs_every_key() {
        let cfg = config(&[("WHATSAPP_PHONE_NUMBER_ID", "1234")]).unwrap();
        assert!(cfg.whatsapp.is_none());

        let cfg = config(&[
            ("WHATSAPP_PHONE_NUMBER_ID", "1234"),
            ("WHATSAPP_ACCESS_TOKEN", "tok"),
            ("INSTAGRAM_ACCOUNT_ID", "  "),
            ("INSTAGRAM_ACCESS_TOKEN", "ig-tok"),
        ])
        .unwrap();
        let wa = cfg.whatsapp.unwrap();
        assert_eq!(wa.phone_number_id, "1234");
        assert_eq!(wa.access_token.expose_secret(), "tok");
        assert!(cfg.instagram.is_none());
    }

    #[test]
    fn renewal_token_is_optional() {
        let cfg = config(&[("CONVO_CRM_RENEWAL_ENDPOINT", "https://hooks.local/renew")]).unwrap();
        let renewal = cfg.renewal.unwrap();
        assert_eq!(renewal.endpoint, "https://hooks.local/renew");
        assert!(renewal.token.is_none());
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = config(&[("CONVO_CRM_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "CONVO_CRM_PORT"));

        let err = config(&[("CONVO_CRM_HEARTBEAT_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("CONVO_CRM_HEARTBEAT_SECS"));

        let err = config(&[("CONVO_CRM_SCHEDULER_ENABLED", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}

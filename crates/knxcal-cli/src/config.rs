//! `knxcal.toml` loading.
//!
//! Relative `state_file` and calendar paths are resolved against the directory the
//! configuration file lives in, so the gateway behaves the same from any working
//! directory (cron, systemd).

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use chrono_tz::Tz;
use ical_feed::IcalFeed;
use knx_bus::{ConnectionConfig, ConnectionType, IndividualAddress};
use serde::Deserialize;
use thiserror::Error;
use trigger_engine::{RawRule, RuleSet};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error(transparent)]
    Rules(#[from] trigger_engine::ConfigError),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    knxcal: RawGateway,
    #[serde(default)]
    connection: RawConnection,
    #[serde(default, rename = "trigger")]
    triggers: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGateway {
    ical_url: String,
    event_name: String,
    state_file: PathBuf,
    timezone: Option<String>,
    lookback_hours: Option<i64>,
    fetch_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConnection {
    #[serde(rename = "type", default)]
    connection_type: ConnectionType,
    gateway_ip: Option<Ipv4Addr>,
    gateway_port: Option<u16>,
    local_ip: Option<Ipv4Addr>,
    individual_address: Option<String>,
    timeout_secs: Option<u64>,
}

/// Validated gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub ical_url: String,
    pub event_name: String,
    pub state_file: PathBuf,
    pub timezone: Tz,
    pub lookback: Duration,
    pub fetch_timeout: StdDuration,
    pub connection: ConnectionConfig,
    pub rules: RuleSet,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        Self::from_toml(&content, base_dir).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration text; relative paths are taken relative to `base_dir`.
    pub fn from_toml(content: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: "<string>".to_string(),
            source,
        })?;
        let gateway = raw.knxcal;

        if gateway.event_name.trim().is_empty() {
            return Err(invalid("event_name", "must not be empty"));
        }
        if gateway.ical_url.trim().is_empty() {
            return Err(invalid("ical_url", "must not be empty"));
        }

        let timezone = match gateway.timezone.as_deref() {
            Some(name) => name
                .parse::<Tz>()
                .map_err(|_| invalid("timezone", format!("unknown timezone '{}'", name)))?,
            None => Tz::UTC,
        };

        let lookback_hours = gateway.lookback_hours.unwrap_or(48);
        if lookback_hours < 0 {
            return Err(invalid("lookback_hours", "must not be negative"));
        }
        let lookback = Duration::try_hours(lookback_hours)
            .ok_or_else(|| invalid("lookback_hours", "out of range"))?;

        let connection = connection_config(raw.connection)?;
        let rules = RuleSet::load(raw.triggers)?;

        Ok(Self {
            ical_url: resolve_source(&gateway.ical_url, base_dir),
            event_name: gateway.event_name,
            state_file: base_dir.join(gateway.state_file),
            timezone,
            lookback,
            fetch_timeout: StdDuration::from_secs(gateway.fetch_timeout_secs.unwrap_or(30)),
            connection,
            rules,
        })
    }

    /// The calendar feed this configuration describes.
    pub fn feed(&self) -> IcalFeed {
        IcalFeed::new(self.ical_url.clone())
            .with_timezone(self.timezone)
            .with_lookback(self.lookback)
            .with_timeout(self.fetch_timeout)
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}

fn connection_config(raw: RawConnection) -> Result<ConnectionConfig, ConfigError> {
    let defaults = ConnectionConfig::default();
    if raw.connection_type == ConnectionType::Tunneling && raw.gateway_ip.is_none() {
        return Err(invalid("connection.gateway_ip", "required for tunneling"));
    }
    let individual_address = match raw.individual_address {
        Some(text) => text
            .parse::<IndividualAddress>()
            .map_err(|e| invalid("connection.individual_address", e.to_string()))?,
        None => defaults.individual_address,
    };

    Ok(ConnectionConfig {
        connection_type: raw.connection_type,
        gateway_ip: raw.gateway_ip,
        gateway_port: raw.gateway_port.unwrap_or(defaults.gateway_port),
        local_ip: raw.local_ip,
        individual_address,
        timeout: raw
            .timeout_secs
            .map(StdDuration::from_secs)
            .unwrap_or(defaults.timeout),
        multicast_group: defaults.multicast_group,
    })
}

/// URLs pass through; relative file paths are anchored at `base_dir`.
fn resolve_source(source: &str, base_dir: &Path) -> String {
    if source.contains("://") || Path::new(source).is_absolute() {
        source.to_string()
    } else {
        base_dir.join(source).display().to_string()
    }
}

/*
Application settings are merged from these sources, later sources overriding earlier ones:
- built in defaults
- Settings.toml in the working directory, if present
- Settings.<environment>.toml, if present
- environment variables with a PINGER_ prefix, for example PINGER_PROBE_INTERVAL_SECS=30

The identity of the pod that the agent runs in comes from MY_POD_NAME and
MY_POD_NAMESPACE, which the pod spec should populate from the downward API.
*/

use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use config::{Config, ConfigError};
use log::LevelFilter;
use serde::Deserialize;

use crate::{
    cluster_state::ClusterStateScheme,
    rtt_probe::{ProbeOptions, DEFAULT_MAX_CONCURRENT_PROBES, DEFAULT_PROBE_ATTEMPTS},
};
use node_pinger_net::data_types::{AttemptCount, Distance, UNREACHABLE_DISTANCE};

pub const POD_NAME_VARIABLE: &str = "MY_POD_NAME";
pub const POD_NAMESPACE_VARIABLE: &str = "MY_POD_NAMESPACE";

const ENVIRONMENT_PREFIX: &str = "PINGER";

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    Config { msg: String },
    Invalid { key: String, msg: String },
    MissingEnvironment { name: String },
}

impl Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::Config { msg } => write!(f, "failed to load configuration: {msg}"),
            SettingsError::Invalid { key, msg } => write!(f, "invalid setting '{key}': {msg}"),
            SettingsError::MissingEnvironment { name } => {
                write!(f, "environment variable {name} must be set")
            }
        }
    }
}

impl std::error::Error for SettingsError {}

impl From<ConfigError> for SettingsError {
    fn from(e: ConfigError) -> Self {
        SettingsError::Config { msg: e.to_string() }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub probe_interval_secs: u64,
    pub probe_attempts: AttemptCount,
    pub ping_timeout_secs: u64,
    pub max_concurrent_probes: usize,
    pub unreachable_distance: Distance,
    pub cluster_state: String,
    pub state_path: String,
    pub statsd_endpoint: String,
    pub log_level: String,
}

impl Settings {
    pub fn load(environment: &str) -> Result<Self, SettingsError> {
        let config = Self::defaults()?
            .add_source(config::File::with_name("Settings").required(false))
            .add_source(config::File::with_name(&format!("Settings.{environment}")).required(false))
            .add_source(config::Environment::with_prefix(ENVIRONMENT_PREFIX))
            .build()?;

        Self::from_config(config)
    }

    /// Builder pre-populated with the defaults, so that callers can layer sources on top
    pub fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, SettingsError> {
        Ok(Config::builder()
            .set_default("probe_interval_secs", 15)?
            .set_default("probe_attempts", i64::from(DEFAULT_PROBE_ATTEMPTS))?
            .set_default("ping_timeout_secs", 1)?
            .set_default("max_concurrent_probes", DEFAULT_MAX_CONCURRENT_PROBES as i64)?
            .set_default("unreachable_distance", UNREACHABLE_DISTANCE as i64)?
            .set_default("cluster_state", "file-system")?
            .set_default("state_path", "/var/lib/node-pinger")?
            .set_default("statsd_endpoint", "")?
            .set_default("log_level", "info")?)
    }

    pub fn from_config(config: Config) -> Result<Self, SettingsError> {
        let settings: Settings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(self: &Self) -> Result<(), SettingsError> {
        if self.probe_interval_secs == 0 {
            return Err(SettingsError::Invalid {
                key: "probe_interval_secs".to_owned(),
                msg: "cycles must be at least one second apart".to_owned(),
            });
        }
        if self.probe_attempts == 0 {
            return Err(SettingsError::Invalid {
                key: "probe_attempts".to_owned(),
                msg: "at least one attempt is needed to measure a distance".to_owned(),
            });
        }
        if self.max_concurrent_probes == 0 {
            return Err(SettingsError::Invalid {
                key: "max_concurrent_probes".to_owned(),
                msg: "at least one probe must be allowed to run".to_owned(),
            });
        }
        self.cluster_state_scheme()?;
        self.log_level_filter()?;
        Ok(())
    }

    #[rustfmt::skip]
    pub fn probe_interval(self: &Self) -> Duration { Duration::from_secs(self.probe_interval_secs) }
    #[rustfmt::skip]
    pub fn ping_timeout(self: &Self) -> Duration { Duration::from_secs(self.ping_timeout_secs) }
    #[rustfmt::skip]
    pub fn state_path(self: &Self) -> PathBuf { PathBuf::from(&self.state_path) }

    pub fn probe_options(self: &Self) -> ProbeOptions {
        ProbeOptions {
            attempts: self.probe_attempts,
            unreachable_distance: self.unreachable_distance,
            max_concurrent_probes: self.max_concurrent_probes,
        }
    }

    pub fn cluster_state_scheme(self: &Self) -> Result<ClusterStateScheme, SettingsError> {
        ClusterStateScheme::from_string(&self.cluster_state).ok_or_else(|| SettingsError::Invalid {
            key: "cluster_state".to_owned(),
            msg: format!("'{}' is not one of in-memory, file-system", self.cluster_state),
        })
    }

    pub fn log_level_filter(self: &Self) -> Result<LevelFilter, SettingsError> {
        LevelFilter::from_str(&self.log_level).map_err(|_| SettingsError::Invalid {
            key: "log_level".to_owned(),
            msg: format!("'{}' is not a log level", self.log_level),
        })
    }
}

/// Which pod this agent is, and therefore which node record it owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeIdentity {
    pub pod_name: String,
    pub namespace: String,
}

impl RuntimeIdentity {
    pub fn new(pod_name: &str, namespace: &str) -> Self {
        Self {
            pod_name: pod_name.to_owned(),
            namespace: namespace.to_owned(),
        }
    }

    pub fn from_env() -> Result<Self, SettingsError> {
        Ok(Self {
            pod_name: required_variable(POD_NAME_VARIABLE)?,
            namespace: required_variable(POD_NAMESPACE_VARIABLE)?,
        })
    }
}

fn required_variable(name: &str) -> Result<String, SettingsError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(SettingsError::MissingEnvironment {
            name: name.to_owned(),
        }),
    }
}

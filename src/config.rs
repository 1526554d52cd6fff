//! # GatewayConfig
//!
//! The core's own configuration surface (spec §6, ambient stack): the handful of
//! knobs that vary per deployment — the vault key and the two per-call deadlines
//! and probe cadence a caller legitimately wants to tune — loadable from a TOML
//! file via the `config` crate and overridable with `GATEWAY_*` environment
//! variables, mirroring the corpus's `Config::load` + `apply_env_overrides`
//! two-step pattern. The breaker's failure threshold/cooldown and the rate
//! limiter's window are fixed by the spec rather than configurable (see
//! [`crate::circuit_breaker`]/[`crate::rate_limiter`]) and so have no field here.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub encryption_key: Option<String>,
    #[serde(with = "duration_secs")]
    pub default_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub self_hosted_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub health_probe_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            default_timeout: Duration::from_secs(30),
            self_hosted_timeout: Duration::from_secs(60),
            health_probe_interval: Duration::from_secs(300),
        }
    }
}

impl GatewayConfig {
    /// Loads from an optional TOML file at `path`, then applies `GATEWAY_*`
    /// environment overrides on top, mirroring the corpus's
    /// `Config::load` -> `apply_env_overrides` -> `validate` pipeline.
    pub fn load(path: Option<&str>) -> Result<Self, GatewayError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Self::default())
            .map_err(|e| GatewayError::Configuration { message: e.to_string() })?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

        let built = builder
            .build()
            .map_err(|e| GatewayError::Configuration { message: e.to_string() })?;

        let cfg: GatewayConfig = built
            .try_deserialize()
            .map_err(|e| GatewayError::Configuration { message: e.to_string() })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.default_timeout.is_zero() {
            return Err(GatewayError::Configuration {
                message: "default_timeout must be greater than zero".to_string(),
            });
        }
        if self.health_probe_interval.is_zero() {
            return Err(GatewayError::Configuration {
                message: "health_probe_interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

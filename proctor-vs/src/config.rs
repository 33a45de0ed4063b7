//! Service configuration for proctor-vs
//!
//! Priority: command line (with `PROCTOR_*` environment fallbacks, handled by
//! clap) → TOML file → compiled defaults.

use proctor_common::config::TomlConfig;
use proctor_common::{Error, Result};
use std::time::Duration;

use crate::pipeline::{PipelineSettings, VerifierSettings};

/// Values given on the command line (or their environment fallbacks)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub detector_url: Option<String>,
}

/// Validated runtime configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub detector_url: String,
    pub detector_timeout: Duration,
    pub max_attempts: u32,
    pub confidence_threshold: f32,
    pub drain_timeout: Duration,
    /// 0 = unbounded
    pub max_pending: u64,
    pub max_concurrent_verifications: usize,
}

impl ServiceConfig {
    pub fn resolve(toml: &TomlConfig, overrides: &ConfigOverrides) -> Result<Self> {
        let config = Self {
            host: overrides
                .host
                .clone()
                .unwrap_or_else(|| toml.server.host.clone()),
            port: overrides.port.unwrap_or(toml.server.port),
            detector_url: overrides
                .detector_url
                .clone()
                .unwrap_or_else(|| toml.detector.url.clone()),
            detector_timeout: Duration::from_millis(toml.detector.timeout_ms),
            max_attempts: toml.detector.max_attempts,
            confidence_threshold: toml.detector.confidence_threshold,
            drain_timeout: Duration::from_millis(toml.session.drain_timeout_ms),
            max_pending: toml.session.max_pending as u64,
            max_concurrent_verifications: toml.session.max_concurrent_verifications,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "detector.confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config(
                "detector.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.detector_timeout.is_zero() {
            return Err(Error::Config(
                "detector.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_verifications == 0 {
            return Err(Error::Config(
                "session.max_concurrent_verifications must be at least 1".to_string(),
            ));
        }
        if self.detector_url.trim().is_empty() {
            return Err(Error::Config("detector.url must not be empty".to_string()));
        }
        self.pipeline_settings()
            .validate()
            .map_err(|e| Error::Config(format!("session.drain_timeout_ms: {}", e)))?;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            verifier: VerifierSettings {
                detector_timeout: self.detector_timeout,
                max_attempts: self.max_attempts,
                confidence_threshold: self.confidence_threshold,
            },
            drain_timeout: self.drain_timeout,
            max_pending: self.max_pending,
            max_concurrent_verifications: self.max_concurrent_verifications,
        }
    }
}

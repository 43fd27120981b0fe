use crate::arbitration::DEFAULT_INVALID_STATUSES;
use crate::role::{Role, parse_authority};
use http::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid upstream address for {0}: {1}")]
    InvalidUpstream(Role, String),

    #[error("Response timeout cannot be 0")]
    ZeroResponseTimeout,

    #[error("Connect timeout cannot be 0")]
    ZeroConnectTimeout,

    #[error("Invalid status code in invalid_statuses: {0}")]
    InvalidStatusCode(u16),
}

/// Failover router configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Main listener for incoming requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Address of each upstream role
    pub upstreams: UpstreamsConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub arbitration: ArbitrationConfig,
}

impl Config {
    /// Validates the router configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.upstreams.validate()?;
        self.timeouts.validate()?;
        self.arbitration.validate()?;
        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// `host:port` of each role's upstream
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamsConfig {
    pub primary: String,
    pub secondary: String,
}

impl UpstreamsConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (role, address) in [
            (Role::Primary, &self.primary),
            (Role::Secondary, &self.secondary),
        ] {
            parse_authority(role, address)
                .map_err(|e| ValidationError::InvalidUpstream(role, e.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// Deadline for collecting upstream responses, applied once per request
    pub response_timeout_ms: u64,
    /// Bound on TCP connect plus TLS handshake for each upstream call
    pub connect_timeout_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            response_timeout_ms: 60_000,
            connect_timeout_ms: 5_000,
        }
    }
}

impl Timeouts {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.response_timeout_ms == 0 {
            return Err(ValidationError::ZeroResponseTimeout);
        }
        if self.connect_timeout_ms == 0 {
            return Err(ValidationError::ZeroConnectTimeout);
        }
        Ok(())
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArbitrationConfig {
    /// Status codes that disqualify a primary response
    pub invalid_statuses: Vec<u16>,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            invalid_statuses: DEFAULT_INVALID_STATUSES
                .iter()
                .map(StatusCode::as_u16)
                .collect(),
        }
    }
}

impl ArbitrationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.status_codes().map(|_| ())
    }

    pub fn status_codes(&self) -> Result<Vec<StatusCode>, ValidationError> {
        self.invalid_statuses
            .iter()
            .map(|code| {
                StatusCode::from_u16(*code).map_err(|_| ValidationError::InvalidStatusCode(*code))
            })
            .collect()
    }
}

use core_model::ResourceName;
use thiserror::Error;

pub type CollectorResult<T> = Result<T, CollectorError>;

/// Error kinds surfaced by collectors.
///
/// Everything except `Canceled` and `VersionDrift` is attached by the
/// orchestrator to the affected project's or resource's status field and does
/// not affect sibling plugins.
#[derive(Error, Debug)]
pub enum CollectorError {
    /// Fatal at init: required field missing, regex invalid, conflicting
    /// options.
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    /// Retryable: backend HTTP failure, timeout, decode error on a single
    /// page.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// The backend returned data that breaks a structural invariant, e.g. a
    /// topology mismatch or an ambiguous node count.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// Quota was requested for a resource the project may not use.
    #[error("project may not use resource {0}")]
    ForbiddenResource(ResourceName),

    /// The backend's declared version changed after init. The process must
    /// terminate so the orchestrator reloads the service info cleanly.
    #[error("service version drifted from {initial} to {current}")]
    VersionDrift { initial: u64, current: u64 },

    #[error("operation canceled")]
    Canceled,
}

impl CollectorError {
    pub fn misconfigured(message: impl Into<String>) -> Self {
        Self::Misconfigured(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolated(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<reqwest::Error> for CollectorError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transient(format!("cannot decode backend response: {err}"))
    }
}

impl From<core_config::ConfigError> for CollectorError {
    fn from(err: core_config::ConfigError) -> Self {
        Self::Misconfigured(err.to_string())
    }
}

impl From<core_model::TopologyError> for CollectorError {
    fn from(err: core_model::TopologyError) -> Self {
        Self::InvariantViolated(err.to_string())
    }
}

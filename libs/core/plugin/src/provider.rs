//! Connection material handed to plugins at init.

use std::collections::BTreeMap;

use core_model::ServiceType;

use crate::error::{CollectorError, CollectorResult};

/// Resolved endpoints and credentials for the backend services of one cloud.
///
/// Token issuance and catalog lookup are the orchestrator's business; plugins
/// only ever see the resolved base URLs and a bearer token.
#[derive(Clone, Debug, Default)]
pub struct ProviderClient {
    endpoints: BTreeMap<ServiceType, String>,
    token: String,
}

impl ProviderClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            endpoints: BTreeMap::new(),
            token: token.into(),
        }
    }

    pub fn with_endpoint(
        mut self,
        service: impl Into<ServiceType>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into();
        self.endpoints
            .insert(service.into(), base_url.trim_end_matches('/').to_string());
        self
    }

    /// Base URL for a service, or `Misconfigured` when the catalog has none.
    pub fn endpoint(&self, service: &ServiceType) -> CollectorResult<&str> {
        self.endpoints
            .get(service)
            .map(String::as_str)
            .ok_or_else(|| {
                CollectorError::Misconfigured(format!("no endpoint configured for {service}"))
            })
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

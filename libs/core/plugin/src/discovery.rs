//! Domain/project discovery adapters.
//!
//! Two variants: one enumerates live domains and projects from the identity
//! service, one serves a statically configured list (for tests and air-gapped
//! deployments).

use async_trait::async_trait;
use core_model::{KeystoneDomain, KeystoneProject};
use serde::Deserialize;

use crate::context::ScrapeContext;
use crate::contracts::DiscoveryPlugin;
use crate::error::{CollectorError, CollectorResult};
use crate::provider::ProviderClient;

const IDENTITY_SERVICE: &str = "identity";

/// Read access to the identity service's domain and project lists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn list_domains(&self) -> CollectorResult<Vec<KeystoneDomain>>;

    async fn list_projects(
        &self,
        domain: &KeystoneDomain,
    ) -> CollectorResult<Vec<KeystoneProject>>;
}

#[derive(Deserialize)]
struct DomainListDocument {
    domains: Vec<DomainDocument>,
}

#[derive(Deserialize)]
struct DomainDocument {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct ProjectListDocument {
    projects: Vec<ProjectDocument>,
}

#[derive(Deserialize)]
struct ProjectDocument {
    id: String,
    name: String,
    #[serde(default)]
    parent_id: Option<String>,
}

/// Identity backend speaking the v3 HTTP API.
pub struct HttpIdentityBackend {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpIdentityBackend {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl IdentityBackend for HttpIdentityBackend {
    async fn list_domains(&self) -> CollectorResult<Vec<KeystoneDomain>> {
        let url = format!("{}/v3/domains", self.base_url);
        let document: DomainListDocument = self
            .client
            .get(&url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(document
            .domains
            .into_iter()
            .map(|domain| KeystoneDomain {
                uuid: domain.id,
                name: domain.name,
            })
            .collect())
    }

    async fn list_projects(
        &self,
        domain: &KeystoneDomain,
    ) -> CollectorResult<Vec<KeystoneProject>> {
        let url = format!("{}/v3/projects?domain_id={}", self.base_url, domain.uuid);
        let document: ProjectListDocument = self
            .client
            .get(&url)
            .header("X-Auth-Token", &self.token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(document
            .projects
            .into_iter()
            .map(|project| KeystoneProject {
                uuid: project.id,
                name: project.name,
                parent_uuid: project.parent_id.unwrap_or_else(|| domain.uuid.clone()),
                domain: domain.clone(),
            })
            .collect())
    }
}

/// Discovery against the live identity service.
#[derive(Default)]
pub struct IdentityDiscovery {
    backend: Option<Box<dyn IdentityBackend>>,
}

impl IdentityDiscovery {
    pub const TYPE_ID: &'static str = "identity";

    pub fn new() -> Self {
        Self::default()
    }

    /// Test constructor wiring in a prepared backend.
    pub fn with_backend(backend: Box<dyn IdentityBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    fn backend(&self) -> CollectorResult<&dyn IdentityBackend> {
        self.backend
            .as_deref()
            .ok_or_else(|| CollectorError::Misconfigured("discovery used before init".into()))
    }
}

#[async_trait]
impl DiscoveryPlugin for IdentityDiscovery {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        provider: &ProviderClient,
    ) -> CollectorResult<()> {
        if self.backend.is_none() {
            let endpoint = provider.endpoint(&IDENTITY_SERVICE.into())?;
            self.backend = Some(Box::new(HttpIdentityBackend::new(
                endpoint,
                provider.token(),
            )));
        }
        Ok(())
    }

    fn plugin_type_id(&self) -> &'static str {
        Self::TYPE_ID
    }

    async fn list_domains(&self, ctx: &ScrapeContext) -> CollectorResult<Vec<KeystoneDomain>> {
        let backend = self.backend()?;
        ctx.round_trip(IDENTITY_SERVICE, "list-domains", backend.list_domains())
            .await
    }

    async fn list_projects(
        &self,
        ctx: &ScrapeContext,
        domain: &KeystoneDomain,
    ) -> CollectorResult<Vec<KeystoneProject>> {
        let backend = self.backend()?;
        ctx.round_trip(
            IDENTITY_SERVICE,
            "list-projects",
            backend.list_projects(domain),
        )
        .await
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticDiscoveryParams {
    domains: Vec<StaticDomain>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticDomain {
    id: String,
    name: String,
    #[serde(default)]
    projects: Vec<StaticProject>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticProject {
    id: String,
    name: String,
    parent_id: String,
}

/// Discovery from a fixed list in the configuration.
pub struct StaticDiscovery {
    domains: Vec<(KeystoneDomain, Vec<KeystoneProject>)>,
}

impl StaticDiscovery {
    pub const TYPE_ID: &'static str = "static";

    /// Builds the plugin from its parameter block, validating that every
    /// project entry carries id, name, and parent id.
    pub fn from_params(params: serde_json::Value) -> CollectorResult<Self> {
        let params: StaticDiscoveryParams = core_config::parse_params(params)?;

        let mut domains = Vec::with_capacity(params.domains.len());
        for domain in params.domains {
            if domain.id.is_empty() || domain.name.is_empty() {
                return Err(CollectorError::Misconfigured(
                    "static discovery: domain entries need id and name".into(),
                ));
            }
            let keystone_domain = KeystoneDomain {
                uuid: domain.id,
                name: domain.name,
            };
            let mut projects = Vec::with_capacity(domain.projects.len());
            for project in domain.projects {
                if project.id.is_empty() || project.name.is_empty() || project.parent_id.is_empty()
                {
                    return Err(CollectorError::Misconfigured(
                        "static discovery: project entries need id, name, and parent_id".into(),
                    ));
                }
                projects.push(KeystoneProject {
                    uuid: project.id,
                    name: project.name,
                    parent_uuid: project.parent_id,
                    domain: keystone_domain.clone(),
                });
            }
            domains.push((keystone_domain, projects));
        }
        Ok(Self { domains })
    }
}

#[async_trait]
impl DiscoveryPlugin for StaticDiscovery {
    async fn init(
        &mut self,
        _ctx: &ScrapeContext,
        _provider: &ProviderClient,
    ) -> CollectorResult<()> {
        Ok(())
    }

    fn plugin_type_id(&self) -> &'static str {
        Self::TYPE_ID
    }

    async fn list_domains(&self, _ctx: &ScrapeContext) -> CollectorResult<Vec<KeystoneDomain>> {
        Ok(self
            .domains
            .iter()
            .map(|(domain, _)| domain.clone())
            .collect())
    }

    async fn list_projects(
        &self,
        _ctx: &ScrapeContext,
        domain: &KeystoneDomain,
    ) -> CollectorResult<Vec<KeystoneProject>> {
        Ok(self
            .domains
            .iter()
            .find(|(have, _)| have.uuid == domain.uuid)
            .map(|(_, projects)| projects.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> serde_json::Value {
        serde_json::json!({
            "domains": [{
                "id": "d1",
                "name": "default",
                "projects": [
                    {"id": "p1", "name": "alpha", "parent_id": "d1"},
                    {"id": "p2", "name": "beta", "parent_id": "d1"},
                ],
            }],
        })
    }

    #[tokio::test]
    async fn static_discovery_serves_configured_entries() {
        let plugin = StaticDiscovery::from_params(params()).unwrap();
        let ctx = ScrapeContext::new();

        let domains = plugin.list_domains(&ctx).await.unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].name, "default");

        let projects = plugin.list_projects(&ctx, &domains[0]).await.unwrap();
        assert_eq!(projects.len(), 2);
        assert_eq!(projects[0].parent_uuid, "d1");
    }

    #[test]
    fn static_discovery_requires_complete_project_entries() {
        let bad = serde_json::json!({
            "domains": [{
                "id": "d1",
                "name": "default",
                "projects": [{"id": "p1", "name": "alpha", "parent_id": ""}],
            }],
        });
        assert!(matches!(
            StaticDiscovery::from_params(bad),
            Err(CollectorError::Misconfigured(_))
        ));
    }

    #[tokio::test]
    async fn identity_discovery_delegates_to_backend() {
        let mut backend = MockIdentityBackend::new();
        backend.expect_list_domains().returning(|| {
            Ok(vec![KeystoneDomain {
                uuid: "d1".into(),
                name: "default".into(),
            }])
        });
        backend.expect_list_projects().returning(|domain| {
            Ok(vec![KeystoneProject {
                uuid: "p1".into(),
                name: "alpha".into(),
                parent_uuid: domain.uuid.clone(),
                domain: domain.clone(),
            }])
        });

        let plugin = IdentityDiscovery::with_backend(Box::new(backend));
        let ctx = ScrapeContext::new();

        let domains = plugin.list_domains(&ctx).await.unwrap();
        let projects = plugin.list_projects(&ctx, &domains[0]).await.unwrap();
        assert_eq!(projects[0].uuid, "p1");
    }
}

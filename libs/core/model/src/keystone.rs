//! Identity-service domain and project references.

use serde::{Deserialize, Serialize};

/// A Keystone domain: the top-level tenancy unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoneDomain {
    pub uuid: String,
    pub name: String,
}

/// A Keystone project inside a domain.
///
/// `parent_uuid` is the domain UUID for top-level projects, or the parent
/// project UUID in nested hierarchies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeystoneProject {
    pub uuid: String,
    pub name: String,
    pub parent_uuid: String,
    pub domain: KeystoneDomain,
}

impl KeystoneProject {
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        domain: KeystoneDomain,
    ) -> Self {
        let domain_uuid = domain.uuid.clone();
        Self {
            uuid: uuid.into(),
            name: name.into(),
            parent_uuid: domain_uuid,
            domain,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::descriptor::ResourceDescriptor;
use super::url;

/// What a database looks like to API and CLI consumers. Derived fields are
/// computed here on every render and never stored.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceView {
    pub uuid: String,
    pub name: String,
    pub description: Option<String>,
    pub image: String,
    pub status: String,
    pub health: String,
    pub database_type: &'static str,
    pub internal_db_url: String,
    pub external_db_url: Option<String>,
    pub server_status: bool,
    pub is_public: bool,
    pub public_port: Option<u16>,
    pub ports_mappings: Vec<String>,
    pub last_online_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<&ResourceDescriptor> for ResourceView {
    fn from(resource: &ResourceDescriptor) -> Self {
        let status = resource.status();
        Self {
            uuid: resource.uuid.clone(),
            name: resource.name.clone(),
            description: resource.description.clone(),
            image: resource.image.clone(),
            status: status.phase,
            health: status.health,
            database_type: resource.database_type(),
            internal_db_url: url::internal_url(resource),
            external_db_url: url::external_url(resource),
            server_status: resource.server_status(),
            is_public: resource.is_public,
            public_port: resource.public_port,
            ports_mappings: resource.ports_mappings_list(),
            last_online_at: resource.last_online_at(),
            created_at: resource.created_at,
            deleted_at: resource.deleted_at(),
        }
    }
}

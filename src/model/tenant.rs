/// Identifies one database within the Organization → Project → Database
/// hierarchy. Every storage call and subscription is scoped to a tenant.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantId {
    organization_id: String,
    project_id: String,
    database_id: String,
}

impl TenantId {
    pub fn new(
        organization_id: impl Into<String>,
        project_id: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            project_id: project_id.into(),
            database_id: database_id.into(),
        }
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    /// The `projects/{p}/databases/{d}` resource name used in document
    /// reference values and subscription paths.
    pub fn database_name(&self) -> String {
        format!("projects/{}/databases/{}", self.project_id, self.database_id)
    }

    /// Resource name of a document or collection under this database.
    pub fn resource_name(&self, path: &str) -> String {
        format!("{}/documents/{}", self.database_name(), path)
    }
}

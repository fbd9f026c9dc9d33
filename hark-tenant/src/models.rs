use chrono::{DateTime, Utc};
use hark_core::{OrganizationId, PlanTier, Role, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A customer organization (one tenant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Globally unique, lowercase alphanumerics and hyphens.
    pub slug: String,
    pub plan: PlanTier,
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    pub fn schema_name(&self) -> String {
        hark_core::schema_name_for(&self.slug)
    }
}

/// A user's role inside one organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub organization_id: OrganizationId,
    pub user_id: UserId,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create an organization.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub slug: String,
    pub plan: PlanTier,
    pub settings: Value,
}

impl NewOrganization {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
            plan: PlanTier::Free,
            settings: Value::Object(Default::default()),
        }
    }

    pub fn with_plan(mut self, plan: PlanTier) -> Self {
        self.plan = plan;
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }
}

/// Fields that can be changed on an existing organization.
#[derive(Debug, Clone, Default)]
pub struct OrganizationPatch {
    pub name: Option<String>,
    pub plan: Option<PlanTier>,
    pub settings: Option<Value>,
}

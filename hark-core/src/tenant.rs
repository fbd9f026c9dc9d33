//! Core multi-tenant types.
//!
//! A tenant is one customer organization. Every request is resolved into a
//! [`TenantContext`] that names the organization's dedicated schema and the
//! resource ceilings of its plan.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::HarkError;

/// Marker value for "no ceiling" in [`PlanLimits`].
pub const UNLIMITED: i64 = -1;

/// Prefix of every tenant schema name.
pub const SCHEMA_PREFIX: &str = "org_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub Uuid);

impl OrganizationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrganizationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Schema identifier for an organization slug: `org_<slug>`.
///
/// Hyphens are not valid in unquoted identifiers, so they become underscores.
pub fn schema_name_for(slug: &str) -> String {
    format!("{SCHEMA_PREFIX}{}", slug.replace('-', "_"))
}

/// Membership role inside an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }
}

impl FromStr for Role {
    type Err = HarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "viewer" => Ok(Role::Viewer),
            other => Err(HarkError::configuration(format!("unknown role '{other}'"))),
        }
    }
}

/// Named limits profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Starter,
    Professional,
    Enterprise,
}

impl PlanTier {
    pub const ALL: [PlanTier; 4] = [
        PlanTier::Free,
        PlanTier::Starter,
        PlanTier::Professional,
        PlanTier::Enterprise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Professional => "professional",
            PlanTier::Enterprise => "enterprise",
        }
    }

    /// The static limits table. Exhaustive over every tier.
    pub fn limits(&self) -> PlanLimits {
        match self {
            PlanTier::Free => PlanLimits {
                max_projects: 3,
                max_issues: 100,
                max_members: 3,
                max_integrations: 1,
            },
            PlanTier::Starter => PlanLimits {
                max_projects: 10,
                max_issues: 1_000,
                max_members: 10,
                max_integrations: 5,
            },
            PlanTier::Professional => PlanLimits {
                max_projects: 50,
                max_issues: 10_000,
                max_members: 50,
                max_integrations: 20,
            },
            PlanTier::Enterprise => PlanLimits {
                max_projects: UNLIMITED,
                max_issues: UNLIMITED,
                max_members: UNLIMITED,
                max_integrations: UNLIMITED,
            },
        }
    }
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanTier {
    type Err = HarkError;

    /// Unknown tiers are a configuration error, never a silent fallback.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "starter" => Ok(PlanTier::Starter),
            "professional" | "pro" => Ok(PlanTier::Professional),
            "enterprise" => Ok(PlanTier::Enterprise),
            other => Err(HarkError::configuration(format!("unknown plan tier '{other}'"))),
        }
    }
}

/// Counted resources a plan caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitedAction {
    CreateProject,
    CreateIssue,
    AddMember,
    AddIntegration,
}

impl LimitedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitedAction::CreateProject => "create_project",
            LimitedAction::CreateIssue => "create_issue",
            LimitedAction::AddMember => "add_member",
            LimitedAction::AddIntegration => "add_integration",
        }
    }
}

impl FromStr for LimitedAction {
    type Err = HarkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "create_project" => Ok(LimitedAction::CreateProject),
            "create_issue" => Ok(LimitedAction::CreateIssue),
            "add_member" | "invite_member" => Ok(LimitedAction::AddMember),
            "add_integration" | "create_integration" => Ok(LimitedAction::AddIntegration),
            other => Err(HarkError::validation(format!("unknown limited action '{other}'"))),
        }
    }
}

/// Resource ceilings of a plan. [`UNLIMITED`] disables a ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_projects: i64,
    pub max_issues: i64,
    pub max_members: i64,
    pub max_integrations: i64,
}

impl PlanLimits {
    pub fn limit_for(&self, action: LimitedAction) -> i64 {
        match action {
            LimitedAction::CreateProject => self.max_projects,
            LimitedAction::CreateIssue => self.max_issues,
            LimitedAction::AddMember => self.max_members,
            LimitedAction::AddIntegration => self.max_integrations,
        }
    }

    /// True while `current_count` is below the ceiling for `action`.
    pub fn allows(&self, action: LimitedAction, current_count: u64) -> bool {
        let limit = self.limit_for(action);
        if limit == UNLIMITED {
            return true;
        }
        limit >= 0 && (current_count as i128) < limit as i128
    }
}

/// The user a request acts on behalf of, with their resolved role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActingUser {
    pub user_id: UserId,
    pub role: Role,
}

/// Context carried with every tenant-scoped operation.
///
/// Built once per request by the tenant directory; fields are read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    organization_id: OrganizationId,
    slug: String,
    schema: String,
    plan: PlanTier,
    limits: PlanLimits,
    actor: Option<ActingUser>,
}

impl TenantContext {
    pub fn new(
        organization_id: OrganizationId,
        slug: impl Into<String>,
        plan: PlanTier,
        actor: Option<ActingUser>,
    ) -> Self {
        let slug = slug.into();
        Self {
            organization_id,
            schema: schema_name_for(&slug),
            slug,
            plan,
            limits: plan.limits(),
            actor,
        }
    }

    pub fn organization_id(&self) -> OrganizationId {
        self.organization_id
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn plan(&self) -> PlanTier {
        self.plan
    }

    pub fn limits(&self) -> &PlanLimits {
        &self.limits
    }

    pub fn actor(&self) -> Option<&ActingUser> {
        self.actor.as_ref()
    }

    pub fn role(&self) -> Option<Role> {
        self.actor.as_ref().map(|a| a.role)
    }

    pub fn can_perform(&self, action: LimitedAction, current_count: u64) -> bool {
        self.limits.allows(action, current_count)
    }
}

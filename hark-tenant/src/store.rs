use std::time::Duration;

use async_trait::async_trait;
use hark_core::{OrganizationId, Role, UserId};
use serde_json::Value;

use crate::error::StoreResult;
use crate::models::{Membership, Organization};
use crate::schema::TenantSchema;

/// Relational storage primitives the tenant directory is built on.
///
/// Methods documented as transactional must apply all of their writes or
/// none. Tenant-scoped methods take the schema explicitly; implementations
/// must scope each call on its own and never rely on connection state left
/// behind by an earlier call.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>>;

    async fn find_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>>;

    async fn find_member_role(
        &self,
        organization_id: OrganizationId,
        user_id: &UserId,
    ) -> StoreResult<Option<Role>>;

    /// Insert the organization row and its owner's membership (transactional).
    ///
    /// A taken slug yields `StoreError::UniqueViolation`.
    async fn create_organization(&self, organization: &Organization, owner: &Membership) -> StoreResult<()>;

    async fn update_organization(&self, organization: &Organization) -> StoreResult<()>;

    /// Remove every membership row and the organization row (transactional).
    ///
    /// Returns `false` if the organization did not exist.
    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<bool>;

    async fn upsert_membership(&self, membership: &Membership) -> StoreResult<()>;

    async fn delete_membership(&self, organization_id: OrganizationId, user_id: &UserId) -> StoreResult<bool>;

    async fn count_members(&self, organization_id: OrganizationId) -> StoreResult<u64>;

    /// Create the schema with its tables and indexes.
    async fn create_schema(&self, schema: &TenantSchema) -> StoreResult<()>;

    /// `DROP SCHEMA ... CASCADE`; dropping a missing schema is not an error.
    async fn drop_schema(&self, schema: &str) -> StoreResult<()>;

    async fn schema_exists(&self, schema: &str) -> StoreResult<bool>;

    /// Insert a JSON object as a row of `schema.table`, returning the stored row.
    async fn insert_row(&self, schema: &str, table: &str, row: Value) -> StoreResult<Value>;

    async fn select_rows(&self, schema: &str, table: &str) -> StoreResult<Vec<Value>>;

    async fn count_rows(&self, schema: &str, table: &str) -> StoreResult<u64>;
}

/// Key/value cache with per-entry TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value`; `ttl = None` keeps it until deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;
}

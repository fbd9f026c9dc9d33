use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hark_core::{OrganizationId, Role, UserId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{Membership, Organization};
use crate::schema::{ensure_tenant_table, TenantSchema};
use crate::store::{CacheStore, TenantStore};

type SchemaTables = HashMap<&'static str, Vec<Value>>;
type LookupPause = (Arc<Notify>, Arc<Notify>);

#[derive(Default)]
struct MemoryState {
    organizations: HashMap<OrganizationId, Organization>,
    slugs: HashMap<String, OrganizationId>,
    memberships: HashMap<(OrganizationId, UserId), Membership>,
    schemas: HashMap<String, SchemaTables>,
}

/// In-memory tenant store for tests and local development.
///
/// A single lock guards all state, so every method is atomic.
pub struct MemoryTenantStore {
    state: Arc<RwLock<MemoryState>>,
    unavailable: AtomicBool,
    fail_schema_creation: AtomicBool,
    slug_lookup_pause: Mutex<Option<LookupPause>>,
}

impl Default for MemoryTenantStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTenantStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MemoryState::default())),
            unavailable: AtomicBool::new(false),
            fail_schema_creation: AtomicBool::new(false),
            slug_lookup_pause: Mutex::new(None),
        }
    }

    /// Make every call fail with `StoreError::Unavailable` (outage simulation).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make `create_schema` fail while leaving other calls working.
    pub fn fail_schema_creation(&self, fail: bool) {
        self.fail_schema_creation.store(fail, Ordering::SeqCst);
    }

    /// Park the next `find_organization_by_slug` after it has read its row.
    ///
    /// The first handle is notified once the lookup is parked; notifying the
    /// second lets it return.
    pub fn pause_next_slug_lookup(&self) -> (Arc<Notify>, Arc<Notify>) {
        let parked = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.slug_lookup_pause.lock() = Some((parked.clone(), release.clone()));
        (parked, release)
    }

    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().schemas.keys().cloned().collect();
        names.sort();
        names
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store marked unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>> {
        self.check()?;
        let found = {
            let state = self.state.read();
            state
                .slugs
                .get(slug)
                .and_then(|id| state.organizations.get(id))
                .cloned()
        };
        let pause = self.slug_lookup_pause.lock().take();
        if let Some((parked, release)) = pause {
            parked.notify_one();
            release.notified().await;
        }
        Ok(found)
    }

    async fn find_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        self.check()?;
        Ok(self.state.read().organizations.get(&id).cloned())
    }

    async fn find_member_role(
        &self,
        organization_id: OrganizationId,
        user_id: &UserId,
    ) -> StoreResult<Option<Role>> {
        self.check()?;
        Ok(self
            .state
            .read()
            .memberships
            .get(&(organization_id, user_id.clone()))
            .map(|m| m.role))
    }

    async fn create_organization(&self, organization: &Organization, owner: &Membership) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.write();
        if state.slugs.contains_key(&organization.slug) {
            return Err(StoreError::UniqueViolation(format!(
                "organizations.slug = '{}'",
                organization.slug
            )));
        }
        state.slugs.insert(organization.slug.clone(), organization.id);
        state.organizations.insert(organization.id, organization.clone());
        state
            .memberships
            .insert((owner.organization_id, owner.user_id.clone()), owner.clone());
        Ok(())
    }

    async fn update_organization(&self, organization: &Organization) -> StoreResult<()> {
        self.check()?;
        if let Some(existing) = self.state.write().organizations.get_mut(&organization.id) {
            *existing = organization.clone();
        }
        Ok(())
    }

    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<bool> {
        self.check()?;
        let mut state = self.state.write();
        let Some(org) = state.organizations.remove(&id) else {
            return Ok(false);
        };
        state.slugs.remove(&org.slug);
        state.memberships.retain(|(org_id, _), _| *org_id != id);
        Ok(true)
    }

    async fn upsert_membership(&self, membership: &Membership) -> StoreResult<()> {
        self.check()?;
        self.state.write().memberships.insert(
            (membership.organization_id, membership.user_id.clone()),
            membership.clone(),
        );
        Ok(())
    }

    async fn delete_membership(&self, organization_id: OrganizationId, user_id: &UserId) -> StoreResult<bool> {
        self.check()?;
        Ok(self
            .state
            .write()
            .memberships
            .remove(&(organization_id, user_id.clone()))
            .is_some())
    }

    async fn count_members(&self, organization_id: OrganizationId) -> StoreResult<u64> {
        self.check()?;
        Ok(self
            .state
            .read()
            .memberships
            .keys()
            .filter(|(org_id, _)| *org_id == organization_id)
            .count() as u64)
    }

    async fn create_schema(&self, schema: &TenantSchema) -> StoreResult<()> {
        self.check()?;
        if self.fail_schema_creation.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(format!(
                "cannot create schema {}",
                schema.name
            )));
        }
        let mut state = self.state.write();
        let tables = state.schemas.entry(schema.name.clone()).or_default();
        for table in &schema.tables {
            tables.entry(*table).or_default();
        }
        Ok(())
    }

    async fn drop_schema(&self, schema: &str) -> StoreResult<()> {
        self.check()?;
        self.state.write().schemas.remove(schema);
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> StoreResult<bool> {
        self.check()?;
        Ok(self.state.read().schemas.contains_key(schema))
    }

    async fn insert_row(&self, schema: &str, table: &str, row: Value) -> StoreResult<Value> {
        self.check()?;
        let table = ensure_tenant_table(table)?;
        let Value::Object(mut fields) = row else {
            return Err(StoreError::InvalidData("tenant rows must be JSON objects".to_string()));
        };
        fields
            .entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        fields
            .entry("created_at")
            .or_insert_with(|| Value::String(Utc::now().to_rfc3339()));
        let stored = Value::Object(fields);

        let mut state = self.state.write();
        let tables = state
            .schemas
            .get_mut(schema)
            .ok_or_else(|| StoreError::SchemaNotFound(schema.to_string()))?;
        tables.entry(table).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn select_rows(&self, schema: &str, table: &str) -> StoreResult<Vec<Value>> {
        self.check()?;
        let table = ensure_tenant_table(table)?;
        let state = self.state.read();
        let tables = state
            .schemas
            .get(schema)
            .ok_or_else(|| StoreError::SchemaNotFound(schema.to_string()))?;
        Ok(tables.get(table).cloned().unwrap_or_default())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> StoreResult<u64> {
        Ok(self.select_rows(schema, table).await?.len() as u64)
    }
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

/// In-memory TTL cache.
///
/// Expired entries are dropped lazily on access and by [`MemoryCache::purge_expired`].
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    pub fn keys(&self) -> HashSet<String> {
        let now = Instant::now();
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hark_core::PlanTier;
    use serde_json::json;

    fn org(slug: &str) -> Organization {
        Organization {
            id: OrganizationId::new(),
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            plan: PlanTier::Free,
            settings: json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn owner(org: &Organization) -> Membership {
        Membership {
            organization_id: org.id,
            user_id: UserId::new("owner"),
            role: Role::Admin,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_slug_is_unique_violation() {
        let store = MemoryTenantStore::new();
        let a = org("acme");
        store.create_organization(&a, &owner(&a)).await.unwrap();

        let b = org("acme");
        let err = store.create_organization(&b, &owner(&b)).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn delete_removes_memberships() {
        let store = MemoryTenantStore::new();
        let a = org("acme");
        store.create_organization(&a, &owner(&a)).await.unwrap();
        assert_eq!(store.count_members(a.id).await.unwrap(), 1);

        assert!(store.delete_organization(a.id).await.unwrap());
        assert_eq!(store.count_members(a.id).await.unwrap(), 0);
        assert!(store.find_organization_by_slug("acme").await.unwrap().is_none());
        assert!(!store.delete_organization(a.id).await.unwrap());
    }

    #[tokio::test]
    async fn rows_are_scoped_per_schema() {
        let store = MemoryTenantStore::new();
        store.create_schema(&TenantSchema::for_schema("org_a")).await.unwrap();
        store.create_schema(&TenantSchema::for_schema("org_b")).await.unwrap();

        let row = store
            .insert_row("org_a", "projects", json!({"name": "Web"}))
            .await
            .unwrap();
        assert!(row.get("id").is_some());

        assert_eq!(store.count_rows("org_a", "projects").await.unwrap(), 1);
        assert_eq!(store.count_rows("org_b", "projects").await.unwrap(), 0);
        assert!(matches!(
            store.select_rows("org_c", "projects").await,
            Err(StoreError::SchemaNotFound(_))
        ));
        assert!(matches!(
            store.insert_row("org_a", "users", json!({})).await,
            Err(StoreError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryTenantStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.find_organization_by_slug("acme").await,
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.find_organization_by_slug("acme").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v".to_string(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        cache.set("forever", "v".to_string(), None).await.unwrap();
        assert!(cache.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;

        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.exists("forever").await.unwrap());
        assert_eq!(cache.purge_expired(), 0);
        assert!(cache.delete("forever").await.unwrap());
        assert!(cache.keys().is_empty());
    }
}

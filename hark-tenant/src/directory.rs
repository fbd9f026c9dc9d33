use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use hark_core::{
    bail_hark, schema_name_for, ActingUser, HarkError, HarkResult, LimitedAction, OrganizationId, Role,
    TenantConfig, TenantContext, UserId,
};
use tracing::{debug, error, info, instrument, warn};

use crate::models::{Membership, NewOrganization, Organization, OrganizationPatch};
use crate::schema::{validate_slug, TenantSchema};
use crate::scoped::TenantData;
use crate::store::{CacheStore, TenantStore};

/// Resolves organizations into isolated tenant contexts.
///
/// Reads go cache-then-store; every write invalidates the slug's cache entry
/// after the store call has returned. A lookup that overlaps a write does not
/// leave its row in the cache.
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    cache: Arc<dyn CacheStore>,
    config: TenantConfig,
    // Bumped by every write before its cache invalidation.
    generation: AtomicU64,
}

impl TenantDirectory {
    pub fn new(store: Arc<dyn TenantStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self::with_config(store, cache, TenantConfig::default())
    }

    pub fn with_config(store: Arc<dyn TenantStore>, cache: Arc<dyn CacheStore>, config: TenantConfig) -> Self {
        Self {
            store,
            cache,
            config,
            generation: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn TenantStore> {
        &self.store
    }

    fn cache_key(&self, slug: &str) -> String {
        format!("{}{}", self.config.cache_prefix, slug)
    }

    async fn invalidate(&self, slug: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.cache.delete(&self.cache_key(slug)).await {
            warn!(slug, error = %e, "failed to invalidate tenant cache entry");
        }
    }

    /// Look up an organization by slug.
    ///
    /// Store failures are logged and reported as "no organization".
    pub async fn find_organization(&self, slug: &str) -> Option<Organization> {
        let key = self.cache_key(slug);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Organization>(&raw) {
                Ok(org) => return Some(org),
                Err(e) => warn!(slug, error = %e, "dropping unreadable tenant cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(slug, error = %e, "tenant cache read failed"),
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let org = match self.store.find_organization_by_slug(slug).await {
            Ok(Some(org)) => org,
            Ok(None) => return None,
            Err(e) => {
                warn!(slug, error = %e, "organization lookup failed; treating as not found");
                return None;
            }
        };
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(slug, "organizations changed during lookup; not caching");
            return Some(org);
        }

        match serde_json::to_string(&org) {
            Ok(raw) => {
                if let Err(e) = self.cache.set(&key, raw, Some(self.config.cache_ttl)).await {
                    debug!(slug, error = %e, "tenant cache write failed");
                }
            }
            Err(e) => debug!(slug, error = %e, "organization not cacheable"),
        }
        // A write that finished while the entry was being stored may have
        // invalidated before it landed.
        if self.generation.load(Ordering::SeqCst) != generation {
            if let Err(e) = self.cache.delete(&key).await {
                warn!(slug, error = %e, "failed to drop tenant cache entry");
            }
        }
        Some(org)
    }

    /// Resolve `slug` (and optionally the acting user's role) into a context.
    ///
    /// An acting user without a membership row is `Forbidden`; there is no
    /// default role.
    #[instrument(skip(self, acting_user), fields(user = acting_user.map(|u| u.as_str())))]
    pub async fn resolve(&self, slug: &str, acting_user: Option<&UserId>) -> HarkResult<TenantContext> {
        let org = self
            .find_organization(slug)
            .await
            .ok_or_else(|| HarkError::not_found(format!("organization '{slug}' not found")))?;

        let actor = match acting_user {
            None => None,
            Some(user_id) => {
                let role = match self.store.find_member_role(org.id, user_id).await {
                    Ok(Some(role)) => role,
                    Ok(None) => {
                        return Err(HarkError::forbidden(format!(
                            "user '{user_id}' is not a member of '{slug}'"
                        )))
                    }
                    Err(e) => {
                        warn!(slug, user = %user_id, error = %e, "role lookup failed; denying");
                        return Err(HarkError::forbidden(format!(
                            "could not verify membership of '{user_id}' in '{slug}'"
                        )));
                    }
                };
                Some(ActingUser {
                    user_id: user_id.clone(),
                    role,
                })
            }
        };

        Ok(TenantContext::new(org.id, org.slug, org.plan, actor))
    }

    /// Create an organization, its owner's admin membership and its schema.
    ///
    /// Rows are written in one transaction; the schema is created right after
    /// and, if that fails, the rows are removed again so no organization
    /// exists without its schema.
    #[instrument(skip(self, input), fields(slug = %input.slug, owner = %owner_id))]
    pub async fn create_organization(&self, input: NewOrganization, owner_id: &UserId) -> HarkResult<Organization> {
        validate_slug(&input.slug).map_err(HarkError::validation)?;
        if input.name.trim().is_empty() {
            bail_hark!(validation, "organization name must not be empty");
        }

        if self.store.find_organization_by_slug(&input.slug).await?.is_some() {
            bail_hark!(conflict, "organization slug '{}' is already taken", input.slug);
        }

        let now = Utc::now();
        let org = Organization {
            id: OrganizationId::new(),
            name: input.name,
            slug: input.slug,
            plan: input.plan,
            settings: input.settings,
            created_at: now,
            updated_at: now,
        };
        let owner = Membership {
            organization_id: org.id,
            user_id: owner_id.clone(),
            role: Role::Admin,
            created_at: now,
        };

        self.store.create_organization(&org, &owner).await?;

        let schema = TenantSchema::for_schema(&org.schema_name());
        if let Err(e) = self.store.create_schema(&schema).await {
            error!(schema = %schema.name, error = %e, "tenant schema creation failed; rolling back organization");
            if let Err(rollback) = self.store.delete_organization(org.id).await {
                error!(error = %rollback, "failed to remove organization after schema failure");
            }
            self.invalidate(&org.slug).await;
            return Err(e.into());
        }

        self.invalidate(&org.slug).await;
        info!(organization_id = %org.id, schema = %schema.name, "organization created");
        Ok(org)
    }

    /// Remove membership and organization rows, then drop the schema.
    #[instrument(skip(self))]
    pub async fn delete_organization(&self, id: OrganizationId) -> HarkResult<Organization> {
        let org = self
            .store
            .find_organization(id)
            .await?
            .ok_or_else(|| HarkError::not_found(format!("organization {id} not found")))?;

        if !self.store.delete_organization(id).await? {
            bail_hark!(not_found, "organization {} not found", id);
        }
        let result = self.store.drop_schema(&org.schema_name()).await;
        self.invalidate(&org.slug).await;
        result?;

        info!(slug = %org.slug, "organization deleted");
        Ok(org)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_organization(&self, id: OrganizationId, patch: OrganizationPatch) -> HarkResult<Organization> {
        let mut org = self
            .store
            .find_organization(id)
            .await?
            .ok_or_else(|| HarkError::not_found(format!("organization {id} not found")))?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                bail_hark!(validation, "organization name must not be empty");
            }
            org.name = name;
        }
        if let Some(plan) = patch.plan {
            org.plan = plan;
        }
        if let Some(settings) = patch.settings {
            org.settings = settings;
        }
        org.updated_at = Utc::now();

        self.store.update_organization(&org).await?;
        self.invalidate(&org.slug).await;
        Ok(org)
    }

    pub async fn add_member(&self, slug: &str, user_id: &UserId, role: Role) -> HarkResult<Membership> {
        let org = self
            .store
            .find_organization_by_slug(slug)
            .await?
            .ok_or_else(|| HarkError::not_found(format!("organization '{slug}' not found")))?;
        let membership = Membership {
            organization_id: org.id,
            user_id: user_id.clone(),
            role,
            created_at: Utc::now(),
        };
        self.store.upsert_membership(&membership).await?;
        Ok(membership)
    }

    pub async fn remove_member(&self, slug: &str, user_id: &UserId) -> HarkResult<bool> {
        let org = self
            .store
            .find_organization_by_slug(slug)
            .await?
            .ok_or_else(|| HarkError::not_found(format!("organization '{slug}' not found")))?;
        Ok(self.store.delete_membership(org.id, user_id).await?)
    }

    /// Whether the tenant's plan still allows `action` at `current_count`.
    pub async fn can_perform_action(&self, slug: &str, action: LimitedAction, current_count: u64) -> HarkResult<bool> {
        let org = self
            .find_organization(slug)
            .await
            .ok_or_else(|| HarkError::not_found(format!("organization '{slug}' not found")))?;
        Ok(org.plan.limits().allows(action, current_count))
    }

    pub async fn schema_exists(&self, slug: &str) -> HarkResult<bool> {
        Ok(self.store.schema_exists(&schema_name_for(slug)).await?)
    }

    /// Data access scoped to the context's schema.
    pub fn data(&self, tenant: &TenantContext) -> TenantData {
        TenantData::new(self.store.clone(), tenant.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryCache, MemoryTenantStore};
    use hark_core::{ErrorKind, PlanTier};
    use std::time::Duration;
    use tracing_test::traced_test;

    fn directory() -> (Arc<MemoryTenantStore>, Arc<MemoryCache>, TenantDirectory) {
        let store = Arc::new(MemoryTenantStore::new());
        let cache = Arc::new(MemoryCache::new());
        let dir = TenantDirectory::with_config(
            store.clone(),
            cache.clone(),
            TenantConfig::default().with_cache_ttl(Duration::from_secs(60)),
        );
        (store, cache, dir)
    }

    #[tokio::test]
    async fn lookup_overlapping_delete_leaves_no_cache_entry() {
        let (store, cache, dir) = directory();
        let dir = Arc::new(dir);
        let org = dir
            .create_organization(NewOrganization::new("Acme", "acme"), &UserId::new("u1"))
            .await
            .unwrap();

        let (parked, release) = store.pause_next_slug_lookup();
        let reader = {
            let dir = dir.clone();
            tokio::spawn(async move { dir.find_organization("acme").await })
        };
        parked.notified().await;
        dir.delete_organization(org.id).await.unwrap();
        release.notify_one();

        assert!(reader.await.unwrap().is_some());
        assert!(!cache.exists("tenant:org:acme").await.unwrap());
        let err = dir.resolve("acme", None).await.unwrap_err();
        assert!(err.is(ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn resolve_fills_cache() {
        let (_store, cache, dir) = directory();
        dir.create_organization(NewOrganization::new("Acme", "acme"), &UserId::new("u1"))
            .await
            .unwrap();
        assert!(!cache.exists("tenant:org:acme").await.unwrap());

        dir.resolve("acme", None).await.unwrap();
        assert!(cache.exists("tenant:org:acme").await.unwrap());
    }

    #[tokio::test]
    async fn update_invalidates_cached_plan() {
        let (_store, _cache, dir) = directory();
        let org = dir
            .create_organization(NewOrganization::new("Acme", "acme"), &UserId::new("u1"))
            .await
            .unwrap();
        assert_eq!(dir.resolve("acme", None).await.unwrap().plan(), PlanTier::Free);

        dir.update_organization(
            org.id,
            OrganizationPatch {
                plan: Some(PlanTier::Enterprise),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(dir.resolve("acme", None).await.unwrap().plan(), PlanTier::Enterprise);
    }

    #[tokio::test]
    #[traced_test]
    async fn read_failures_degrade_to_not_found() {
        let (store, _cache, dir) = directory();
        store.set_unavailable(true);

        assert!(dir.find_organization("acme").await.is_none());
        let err = dir.resolve("acme", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(logs_contain("treating as not found"));
    }

    #[tokio::test]
    async fn write_failures_propagate() {
        let (store, _cache, dir) = directory();
        store.set_unavailable(true);

        let err = dir
            .create_organization(NewOrganization::new("Acme", "acme"), &UserId::new("u1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
    }

    #[tokio::test]
    async fn schema_failure_removes_organization() {
        let (store, _cache, dir) = directory();
        store.fail_schema_creation(true);

        let err = dir
            .create_organization(NewOrganization::new("Acme", "acme"), &UserId::new("u1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Storage);
        assert!(store.find_organization_by_slug("acme").await.unwrap().is_none());
        assert!(store.schema_names().is_empty());
    }

    #[tokio::test]
    async fn role_lookup_fails_closed() {
        let (_store, _cache, dir) = directory();
        dir.create_organization(NewOrganization::new("Acme", "acme"), &UserId::new("owner"))
            .await
            .unwrap();

        let err = dir.resolve("acme", Some(&UserId::new("stranger"))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);

        dir.add_member("acme", &UserId::new("stranger"), Role::Viewer).await.unwrap();
        let ctx = dir.resolve("acme", Some(&UserId::new("stranger"))).await.unwrap();
        assert_eq!(ctx.role(), Some(Role::Viewer));

        assert!(dir.remove_member("acme", &UserId::new("stranger")).await.unwrap());
        let err = dir.resolve("acme", Some(&UserId::new("stranger"))).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let (_store, _cache, dir) = directory();
        let err = dir
            .create_organization(NewOrganization::new("Acme", "Acme Inc"), &UserId::new("u1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);

        let err = dir
            .create_organization(NewOrganization::new("  ", "acme"), &UserId::new("u1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
    }
}

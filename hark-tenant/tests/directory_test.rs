use std::sync::Arc;

use hark_core::{ErrorKind, LimitedAction, PlanTier, UserId};
use hark_tenant::{
    MemoryCache, MemoryTenantStore, NewOrganization, TenantDirectory, TenantStore, TENANT_TABLES,
};
use serde_json::json;

fn setup() -> (Arc<MemoryTenantStore>, TenantDirectory) {
    let store = Arc::new(MemoryTenantStore::new());
    let directory = TenantDirectory::new(store.clone(), Arc::new(MemoryCache::new()));
    (store, directory)
}

#[tokio::test]
async fn created_organization_resolves_to_its_own_schema() {
    let (store, directory) = setup();
    let owner = UserId::new("owner-1");

    directory
        .create_organization(NewOrganization::new("Acme", "acme"), &owner)
        .await
        .unwrap();

    let ctx = directory.resolve("acme", Some(&owner)).await.unwrap();
    assert_eq!(ctx.schema(), "org_acme");
    assert_eq!(ctx.slug(), "acme");
    assert_eq!(ctx.role(), Some(hark_core::Role::Admin));

    assert!(store.schema_exists("org_acme").await.unwrap());
    for table in TENANT_TABLES {
        assert_eq!(store.count_rows("org_acme", table).await.unwrap(), 0);
    }
}

#[tokio::test]
async fn deleted_organization_no_longer_resolves() {
    let (store, directory) = setup();
    let org = directory
        .create_organization(NewOrganization::new("Acme", "acme"), &UserId::new("owner-1"))
        .await
        .unwrap();
    // warm the cache so deletion has something to invalidate
    directory.resolve("acme", None).await.unwrap();

    directory.delete_organization(org.id).await.unwrap();

    let err = directory.resolve("acme", None).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(!store.schema_exists("org_acme").await.unwrap());
    assert_eq!(store.count_members(org.id).await.unwrap(), 0);

    let err = directory.delete_organization(org.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn duplicate_slug_conflicts() {
    let (_store, directory) = setup();
    let owner = UserId::new("owner-1");
    directory
        .create_organization(NewOrganization::new("Acme", "acme"), &owner)
        .await
        .unwrap();

    let err = directory
        .create_organization(NewOrganization::new("Other Acme", "acme"), &owner)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);
}

#[tokio::test]
async fn slugs_sharing_a_long_prefix_get_distinct_schemas() {
    let (store, directory) = setup();
    let owner = UserId::new("owner-1");
    let prefix = "a".repeat(58);

    for suffix in ["x", "y"] {
        directory
            .create_organization(NewOrganization::new("Long", format!("{prefix}{suffix}")), &owner)
            .await
            .unwrap();
    }
    assert_eq!(store.schema_names().len(), 2);

    let err = directory
        .create_organization(NewOrganization::new("Too long", "a".repeat(60)), &owner)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(store.schema_names().len(), 2);
}

#[tokio::test]
async fn plan_ceiling_follows_tier() {
    let (_store, directory) = setup();
    let owner = UserId::new("owner-1");
    directory
        .create_organization(NewOrganization::new("Acme", "acme").with_plan(PlanTier::Starter), &owner)
        .await
        .unwrap();
    directory
        .create_organization(NewOrganization::new("Big", "big").with_plan(PlanTier::Enterprise), &owner)
        .await
        .unwrap();

    let max = PlanTier::Starter.limits().max_projects as u64;
    assert!(directory
        .can_perform_action("acme", LimitedAction::CreateProject, max - 1)
        .await
        .unwrap());
    assert!(!directory
        .can_perform_action("acme", LimitedAction::CreateProject, max)
        .await
        .unwrap());
    assert!(!directory
        .can_perform_action("acme", "create_project".parse().unwrap(), max + 5)
        .await
        .unwrap());

    assert!(directory
        .can_perform_action("big", LimitedAction::CreateProject, 1_000_000)
        .await
        .unwrap());

    let err = directory
        .can_perform_action("ghost", LimitedAction::CreateProject, 0)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn tenant_data_stays_inside_its_schema() {
    let (_store, directory) = setup();
    let owner = UserId::new("owner-1");
    directory
        .create_organization(NewOrganization::new("Acme", "acme"), &owner)
        .await
        .unwrap();
    directory
        .create_organization(NewOrganization::new("Globex", "globex"), &owner)
        .await
        .unwrap();

    let acme = directory.data(&directory.resolve("acme", None).await.unwrap());
    let globex = directory.data(&directory.resolve("globex", None).await.unwrap());

    acme.insert("projects", json!({"name": "Widget", "slug": "widget"}))
        .await
        .unwrap();

    assert_eq!(acme.count("projects").await.unwrap(), 1);
    assert_eq!(globex.count("projects").await.unwrap(), 0);

    let err = acme.insert("organizations", json!({})).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Validation);
}

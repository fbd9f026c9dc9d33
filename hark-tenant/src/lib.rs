//! # hark-tenant
//!
//! Maps an organization slug to an isolated execution context: a dedicated
//! database schema (`org_<slug>`) plus the resource ceilings of the
//! organization's plan.
//!
//! ```rust
//! use std::sync::Arc;
//! use hark_core::{LimitedAction, UserId};
//! use hark_tenant::{MemoryCache, MemoryTenantStore, NewOrganization, TenantDirectory};
//!
//! # tokio_test_block_on(async {
//! let directory = TenantDirectory::new(Arc::new(MemoryTenantStore::new()), Arc::new(MemoryCache::new()));
//! directory
//!     .create_organization(NewOrganization::new("Acme", "acme"), &UserId::new("owner-1"))
//!     .await?;
//!
//! let ctx = directory.resolve("acme", Some(&UserId::new("owner-1"))).await?;
//! assert_eq!(ctx.schema(), "org_acme");
//! assert!(directory.can_perform_action("acme", LimitedAction::CreateProject, 0).await?);
//! # Ok::<(), hark_core::HarkError>(())
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod directory;
pub mod error;
pub mod memory;
pub mod models;
pub mod schema;
pub mod scoped;
pub mod store;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use directory::TenantDirectory;
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryCache, MemoryTenantStore};
pub use models::{Membership, NewOrganization, Organization, OrganizationPatch};
pub use schema::{TenantSchema, TENANT_TABLES};
pub use scoped::TenantData;
pub use store::{CacheStore, TenantStore};

#[cfg(feature = "postgres")]
pub use postgres::PgTenantStore;

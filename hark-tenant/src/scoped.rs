use std::sync::Arc;

use hark_core::{HarkResult, TenantContext};
use serde_json::Value;

use crate::store::TenantStore;

/// Data access bound to one tenant's schema.
///
/// Every call is routed to `org_<slug>` of the context it was built from,
/// and table names are limited to the tenant table set.
#[derive(Clone)]
pub struct TenantData {
    store: Arc<dyn TenantStore>,
    tenant: TenantContext,
}

impl TenantData {
    pub fn new(store: Arc<dyn TenantStore>, tenant: TenantContext) -> Self {
        Self { store, tenant }
    }

    pub fn tenant(&self) -> &TenantContext {
        &self.tenant
    }

    pub async fn insert(&self, table: &str, row: Value) -> HarkResult<Value> {
        Ok(self.store.insert_row(self.tenant.schema(), table, row).await?)
    }

    pub async fn list(&self, table: &str) -> HarkResult<Vec<Value>> {
        Ok(self.store.select_rows(self.tenant.schema(), table).await?)
    }

    pub async fn count(&self, table: &str) -> HarkResult<u64> {
        Ok(self.store.count_rows(self.tenant.schema(), table).await?)
    }
}

impl std::fmt::Debug for TenantData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantData")
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

//! PostgreSQL backend (feature `postgres`).
//!
//! Shared tables (`organizations`, `organization_members`) live in `public`.
//! Tenant data lives in one schema per organization. Tenant-scoped calls run
//! inside a transaction that starts with `SET LOCAL search_path`, so the
//! scope ends with the transaction and never sticks to a pooled connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hark_core::{OrganizationId, Role, UserId};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::models::{Membership, Organization};
use crate::schema::{ensure_tenant_table, quote_ident, TenantSchema};
use crate::store::TenantStore;

const MIGRATIONS: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS public.organizations (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        slug TEXT NOT NULL UNIQUE,
        plan TEXT NOT NULL DEFAULT 'free',
        settings JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS public.organization_members (
        organization_id UUID NOT NULL REFERENCES public.organizations(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        role TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        PRIMARY KEY (organization_id, user_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_organization_members_user ON public.organization_members(user_id)",
];

pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create the shared tables if they are missing.
    pub async fn migrate(&self) -> StoreResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn scoped(&self, schema: &str) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await?;
        let set_path = format!("SET LOCAL search_path TO {}", quote_ident(schema));
        sqlx::query(&set_path).execute(&mut *tx).await?;
        Ok(tx)
    }
}

fn organization_from_row(row: &PgRow) -> StoreResult<Organization> {
    let plan: String = row.try_get("plan")?;
    let id: Uuid = row.try_get("id")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(Organization {
        id: OrganizationId(id),
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        plan: plan
            .parse()
            .map_err(|e: hark_core::HarkError| StoreError::InvalidData(e.message))?,
        settings: row.try_get("settings")?,
        created_at,
        updated_at,
    })
}

fn column_list(row: &Value) -> StoreResult<Vec<String>> {
    let Value::Object(fields) = row else {
        return Err(StoreError::InvalidData("tenant rows must be JSON objects".to_string()));
    };
    fields
        .keys()
        .map(|key| {
            let valid = key
                .chars()
                .next()
                .map(|c| c.is_ascii_lowercase() || c == '_')
                .unwrap_or(false)
                && key
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
            if valid {
                Ok(key.clone())
            } else {
                Err(StoreError::InvalidData(format!("invalid column name '{key}'")))
            }
        })
        .collect()
}

const ORGANIZATION_COLUMNS: &str = "id, name, slug, plan, settings, created_at, updated_at";

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_organization_by_slug(&self, slug: &str) -> StoreResult<Option<Organization>> {
        let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM public.organizations WHERE slug = $1");
        let row = sqlx::query(&sql).bind(slug).fetch_optional(&self.pool).await?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn find_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM public.organizations WHERE id = $1");
        let row = sqlx::query(&sql).bind(id.0).fetch_optional(&self.pool).await?;
        row.as_ref().map(organization_from_row).transpose()
    }

    async fn find_member_role(
        &self,
        organization_id: OrganizationId,
        user_id: &UserId,
    ) -> StoreResult<Option<Role>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM public.organization_members WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(organization_id.0)
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        role.map(|r| {
            r.parse::<Role>()
                .map_err(|e| StoreError::InvalidData(e.message))
        })
        .transpose()
    }

    #[instrument(skip_all, fields(slug = %organization.slug))]
    async fn create_organization(&self, organization: &Organization, owner: &Membership) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO public.organizations (id, name, slug, plan, settings, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(organization.id.0)
        .bind(&organization.name)
        .bind(&organization.slug)
        .bind(organization.plan.as_str())
        .bind(sqlx::types::Json(&organization.settings))
        .bind(organization.created_at)
        .bind(organization.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO public.organization_members (organization_id, user_id, role, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(owner.organization_id.0)
        .bind(owner.user_id.as_str())
        .bind(owner.role.as_str())
        .bind(owner.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn update_organization(&self, organization: &Organization) -> StoreResult<()> {
        sqlx::query(
            "UPDATE public.organizations SET name = $2, plan = $3, settings = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(organization.id.0)
        .bind(&organization.name)
        .bind(organization.plan.as_str())
        .bind(sqlx::types::Json(&organization.settings))
        .bind(organization.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM public.organization_members WHERE organization_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM public.organizations WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(deleted > 0)
    }

    async fn upsert_membership(&self, membership: &Membership) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO public.organization_members (organization_id, user_id, role, created_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (organization_id, user_id) DO UPDATE SET role = EXCLUDED.role",
        )
        .bind(membership.organization_id.0)
        .bind(membership.user_id.as_str())
        .bind(membership.role.as_str())
        .bind(membership.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_membership(&self, organization_id: OrganizationId, user_id: &UserId) -> StoreResult<bool> {
        let deleted = sqlx::query(
            "DELETE FROM public.organization_members WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(organization_id.0)
        .bind(user_id.as_str())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(deleted > 0)
    }

    async fn count_members(&self, organization_id: OrganizationId) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM public.organization_members WHERE organization_id = $1",
        )
        .bind(organization_id.0)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    #[instrument(skip_all, fields(schema = %schema.name))]
    async fn create_schema(&self, schema: &TenantSchema) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for statement in &schema.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        debug!(statements = schema.statements.len(), "tenant schema created");
        Ok(())
    }

    async fn drop_schema(&self, schema: &str) -> StoreResult<()> {
        let sql = TenantSchema::drop_statement(schema);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn schema_exists(&self, schema: &str) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)",
        )
        .bind(schema)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn insert_row(&self, schema: &str, table: &str, row: Value) -> StoreResult<Value> {
        let table = ensure_tenant_table(table)?;
        let columns = column_list(&row)?;

        let sql = if columns.is_empty() {
            format!("INSERT INTO {table} AS t DEFAULT VALUES RETURNING to_jsonb(t)")
        } else {
            let cols = columns.join(", ");
            format!(
                "INSERT INTO {table} AS t ({cols}) \
                 SELECT {cols} FROM jsonb_populate_record(NULL::{table}, $1) \
                 RETURNING to_jsonb(t)"
            )
        };

        let mut tx = self.scoped(schema).await?;
        let query = sqlx::query_scalar::<_, Value>(&sql);
        let query = if columns.is_empty() {
            query
        } else {
            query.bind(sqlx::types::Json(&row))
        };
        let stored = query.fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn select_rows(&self, schema: &str, table: &str) -> StoreResult<Vec<Value>> {
        let table = ensure_tenant_table(table)?;
        let sql = format!("SELECT to_jsonb(t) FROM {table} t");
        let mut tx = self.scoped(schema).await?;
        let rows = sqlx::query_scalar::<_, Value>(&sql).fetch_all(&mut *tx).await?;
        tx.commit().await?;
        Ok(rows)
    }

    async fn count_rows(&self, schema: &str, table: &str) -> StoreResult<u64> {
        let table = ensure_tenant_table(table)?;
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let mut tx = self.scoped(schema).await?;
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *tx).await?;
        tx.commit().await?;
        Ok(count.max(0) as u64)
    }
}

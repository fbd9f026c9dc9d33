//! Per-tenant schema layout.
//!
//! Every organization gets a dedicated schema `org_<slug>` holding the same
//! table set. Table names reaching SQL are always checked against
//! [`TENANT_TABLES`]; schema names are derived from validated slugs.

use hark_core::tenant::SCHEMA_PREFIX;

use crate::error::{StoreError, StoreResult};

/// Tables created inside every tenant schema, in creation order.
pub const TENANT_TABLES: [&str; 5] = ["projects", "issues", "comments", "attachments", "integrations"];

/// Longest identifier Postgres keeps without truncation.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Longest slug whose schema name (`org_<slug>`) still fits an identifier.
pub const MAX_SLUG_LEN: usize = MAX_IDENTIFIER_LEN - SCHEMA_PREFIX.len();

/// Check a slug: 1..=59 chars of `[a-z0-9-]`, no leading or trailing hyphen.
pub fn validate_slug(slug: &str) -> Result<(), String> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(format!(
            "slug must be 1-{MAX_SLUG_LEN} characters, got {}",
            slug.len()
        ));
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(format!(
            "slug '{slug}' may only contain lowercase letters, digits and hyphens"
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(format!("slug '{slug}' may not start or end with a hyphen"));
    }
    Ok(())
}

pub fn ensure_tenant_table(table: &str) -> StoreResult<&'static str> {
    TENANT_TABLES
        .iter()
        .find(|t| **t == table)
        .copied()
        .ok_or_else(|| StoreError::UnknownTable(table.to_string()))
}

/// Double-quote an identifier for SQL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Name, tables and DDL of one tenant schema.
#[derive(Debug, Clone)]
pub struct TenantSchema {
    pub name: String,
    pub tables: Vec<&'static str>,
    pub statements: Vec<String>,
}

impl TenantSchema {
    pub fn for_schema(name: &str) -> Self {
        let s = quote_ident(name);
        let statements = vec![
            format!("CREATE SCHEMA IF NOT EXISTS {s}"),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.projects (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    name TEXT NOT NULL,
                    slug TEXT NOT NULL UNIQUE,
                    description TEXT,
                    settings JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.issues (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    project_id UUID NOT NULL REFERENCES {s}.projects(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    description TEXT,
                    kind TEXT NOT NULL DEFAULT 'bug',
                    status TEXT NOT NULL DEFAULT 'open',
                    priority TEXT NOT NULL DEFAULT 'medium',
                    reporter_email TEXT,
                    metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.comments (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    issue_id UUID NOT NULL REFERENCES {s}.issues(id) ON DELETE CASCADE,
                    author_id TEXT,
                    body TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.attachments (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    issue_id UUID NOT NULL REFERENCES {s}.issues(id) ON DELETE CASCADE,
                    file_name TEXT NOT NULL,
                    content_type TEXT,
                    size_bytes BIGINT NOT NULL DEFAULT 0,
                    url TEXT NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {s}.integrations (
                    id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                    project_id UUID REFERENCES {s}.projects(id) ON DELETE CASCADE,
                    kind TEXT NOT NULL,
                    config JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                    enabled BOOLEAN NOT NULL DEFAULT true,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )"
            ),
            format!("CREATE INDEX IF NOT EXISTS idx_issues_project ON {s}.issues(project_id)"),
            format!("CREATE INDEX IF NOT EXISTS idx_issues_status ON {s}.issues(status)"),
            format!("CREATE INDEX IF NOT EXISTS idx_comments_issue ON {s}.comments(issue_id)"),
            format!("CREATE INDEX IF NOT EXISTS idx_attachments_issue ON {s}.attachments(issue_id)"),
            format!("CREATE INDEX IF NOT EXISTS idx_integrations_project ON {s}.integrations(project_id)"),
        ];

        Self {
            name: name.to_string(),
            tables: TENANT_TABLES.to_vec(),
            statements,
        }
    }

    pub fn drop_statement(name: &str) -> String {
        format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(name))
    }
}

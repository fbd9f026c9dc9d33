//! hark-core: shared types for the Hark plugin runtime and tenant directory.

pub mod config;
pub mod errors;
pub mod events;
pub mod logging;
pub mod tenant;

pub use config::{ExecutionMode, HarkConfig, HarkConfigSnapshot, RuntimeConfig, TenantConfig};
pub use errors::{ErrorKind, HarkError, HarkResult};
pub use events::{listener, EventListener, EventPattern, HarkEventHub, HubEvent, ListenerId};
pub use tenant::{
    schema_name_for, ActingUser, LimitedAction, OrganizationId, PlanLimits, PlanTier, Role,
    TenantContext, UserId, UNLIMITED,
};

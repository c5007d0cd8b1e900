//! Tenant scoping for every request.
//!
//! Authentication happens upstream; this service trusts the gateway-supplied
//! headers and only enforces that a tenant is present. Every query and write
//! in the service layer is filtered by the tenant id extracted here.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ServiceError;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Identity attached to a request: the tenant whose ledger is being touched
/// and, when the gateway forwards one, the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub user_id: Option<Uuid>,
}

#[async_trait]
impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let tenant_id = parts
            .headers
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized(format!("missing {} header", TENANT_ID_HEADER))
            })?;
        let tenant_id = Uuid::parse_str(tenant_id).map_err(|_| {
            ServiceError::Unauthorized(format!("invalid {} header", TENANT_ID_HEADER))
        })?;

        // A malformed user id is dropped rather than rejected; the tenant
        // boundary is the only hard requirement here.
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok());

        Ok(TenantContext { tenant_id, user_id })
    }
}

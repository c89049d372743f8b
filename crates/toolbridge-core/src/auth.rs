//! Authenticator (C5): classifies a bearer token into a tenant, the admin, or neither.

use subtle::ConstantTimeEq;

use crate::error::AuthError;
use crate::tenant::{Tenant, TenantRegistry};

/// The result of classifying a presented bearer token.
pub enum Principal<'a> {
    Tenant(&'a Tenant),
    Admin,
}

/// Holds the admin token and delegates tenant lookups to the [`TenantRegistry`].
///
/// The admin token is compared in constant time to avoid leaking timing information about
/// how many leading bytes matched; tenant tokens are looked up by exact map key instead,
/// since a hash-map lookup already takes time independent of how close a guess was.
pub struct Authenticator {
    admin_token: String,
}

impl Authenticator {
    pub fn new(admin_token: String) -> Self {
        Self { admin_token }
    }

    /// Classifies a raw `Authorization` header value (expected form: `Bearer <token>`).
    pub fn classify<'a>(
        &self,
        authorization_header: Option<&str>,
        tenants: &'a TenantRegistry,
    ) -> Result<Principal<'a>, AuthError> {
        let header = authorization_header.ok_or(AuthError::MissingHeader)?;
        let token = header.strip_prefix("Bearer ").ok_or(AuthError::Malformed)?;
        self.classify_token(token, tenants)
    }

    /// Classifies a bare token value, without the `Bearer ` wire prefix.
    pub fn classify_token<'a>(
        &self,
        token: &str,
        tenants: &'a TenantRegistry,
    ) -> Result<Principal<'a>, AuthError> {
        if token.as_bytes().ct_eq(self.admin_token.as_bytes()).into() {
            return Ok(Principal::Admin);
        }
        tenants
            .get_tenant_by_token(token)
            .map(Principal::Tenant)
            .ok_or(AuthError::Unknown)
    }
}

//! Tenant Registry (C1): isolated API namespaces over a shared pool of workers.

use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// An isolated API namespace with its own bearer token and a list of admitted worker
/// tokens. Created at startup from configuration and immutable thereafter.
#[derive(Debug, Clone)]
pub struct Tenant {
    pub name: String,
    pub description: Option<String>,
    pub bearer_token: String,
    admitted_worker_tokens: HashSet<String>,
}

impl Tenant {
    /// First 16 hex characters of SHA-256 of the tenant's bearer token, used as a
    /// public-safe URL segment for description routes.
    pub fn token_hash(&self) -> String {
        token_hash_of(&self.bearer_token)
    }

    /// Whether this tenant admits a worker carrying `worker_token` into its namespace.
    pub fn admits(&self, worker_token: &str) -> bool {
        self.admitted_worker_tokens.contains(worker_token)
    }
}

/// First 16 hex characters of SHA-256 over arbitrary bearer material. Shared by tenant
/// token hashing and the admin session cookie derivation (`crate::admin`).
pub fn token_hash_of(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Input to [`TenantRegistry::new`], mirroring `server.apiSpaces[]` in configuration.
#[derive(Debug, Clone)]
pub struct TenantSpec {
    pub name: String,
    pub description: Option<String>,
    pub bearer_token: String,
    pub allowed_client_tokens: Vec<String>,
}

/// Holds tenant definitions and indexes tenant-token → tenant and worker-token →
/// tenants-admitting for constant-time-expected lookups.
pub struct TenantRegistry {
    tenants: Vec<Tenant>,
    by_bearer_token: HashMap<String, usize>,
    by_token_hash: HashMap<String, usize>,
    admitting_worker_token: HashMap<String, Vec<usize>>,
}

impl TenantRegistry {
    /// Builds the registry from configuration. Fails fatally (`ConfigError`) when tenants
    /// are empty, tokens collide across `{tenant-tokens, admin-token}`, or two tenants'
    /// `token_hash` prefixes collide. A worker-token admitted by zero tenants is a warning
    /// logged by the caller, not a construction failure — such a worker may still connect,
    /// it will simply never be dispatchable.
    pub fn new(specs: Vec<TenantSpec>, admin_token: &str) -> Result<Self, ConfigError> {
        if specs.is_empty() {
            return Err(ConfigError::NoTenants);
        }

        let mut seen_tokens: HashSet<String> = HashSet::new();
        seen_tokens.insert(admin_token.to_string());

        let mut tenants = Vec::with_capacity(specs.len());
        let mut by_bearer_token = HashMap::new();
        let mut by_token_hash: HashMap<String, usize> = HashMap::new();
        let mut admitting_worker_token: HashMap<String, Vec<usize>> = HashMap::new();

        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::EmptyName(spec.name));
            }
            if !seen_tokens.insert(spec.bearer_token.clone()) {
                return Err(ConfigError::DuplicateToken(spec.name));
            }

            let tenant = Tenant {
                name: spec.name.clone(),
                description: spec.description,
                bearer_token: spec.bearer_token.clone(),
                admitted_worker_tokens: spec.allowed_client_tokens.iter().cloned().collect(),
            };

            let idx = tenants.len();
            let hash = tenant.token_hash();
            if let Some(&other_idx) = by_token_hash.get(&hash) {
                return Err(ConfigError::HashCollision(
                    tenants[other_idx].name.clone(),
                    tenant.name.clone(),
                ));
            }
            by_token_hash.insert(hash, idx);
            by_bearer_token.insert(tenant.bearer_token.clone(), idx);

            for worker_token in &spec.allowed_client_tokens {
                admitting_worker_token
                    .entry(worker_token.clone())
                    .or_default()
                    .push(idx);
            }

            tenants.push(tenant);
        }

        Ok(Self {
            tenants,
            by_bearer_token,
            by_token_hash,
            admitting_worker_token,
        })
    }

    /// Looks up the tenant owning a given bearer token.
    pub fn get_tenant_by_token(&self, token: &str) -> Option<&Tenant> {
        self.by_bearer_token.get(token).map(|&idx| &self.tenants[idx])
    }

    /// Resolves a 16-hex `token_hash` prefix to its tenant.
    pub fn tenant_from_hash(&self, hash: &str) -> Option<&Tenant> {
        self.by_token_hash.get(hash).map(|&idx| &self.tenants[idx])
    }

    /// All tenants admitting a given worker token.
    pub fn tenants_admitting(&self, worker_token: &str) -> Vec<&Tenant> {
        self.admitting_worker_token
            .get(worker_token)
            .map(|indices| indices.iter().map(|&idx| &self.tenants[idx]).collect())
            .unwrap_or_default()
    }

    /// Whether `tenant` admits `worker_token` into its namespace.
    pub fn admits(&self, tenant: &Tenant, worker_token: &str) -> bool {
        tenant.admits(worker_token)
    }

    /// Tenants in registration order (stable).
    pub fn list_tenants(&self) -> &[Tenant] {
        &self.tenants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, bearer: &str, allowed: &[&str]) -> TenantSpec {
        TenantSpec {
            name: name.to_string(),
            description: None,
            bearer_token: bearer.to_string(),
            allowed_client_tokens: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn rejects_empty_tenant_list() {
        let err = TenantRegistry::new(vec![], "admin").unwrap_err();
        assert!(matches!(err, ConfigError::NoTenants));
    }

    #[test]
    fn rejects_duplicate_tokens_across_tenants_and_admin() {
        let err = TenantRegistry::new(
            vec![spec("t1", "shared", &[]), spec("t2", "other", &[])],
            "shared",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateToken(_)));
    }

    #[test]
    fn admits_worker_only_into_configured_tenants() {
        let registry = TenantRegistry::new(
            vec![
                spec("t1", "tok1", &["w1"]),
                spec("t2", "tok2", &["w2"]),
            ],
            "admin",
        )
        .unwrap();

        let t1 = registry.get_tenant_by_token("tok1").unwrap();
        assert!(registry.admits(t1, "w1"));
        assert!(!registry.admits(t1, "w2"));
        assert_eq!(registry.tenants_admitting("w2")[0].name, "t2");
    }

    #[test]
    fn token_hash_resolves_back_to_tenant() {
        let registry = TenantRegistry::new(vec![spec("t1", "tok1", &[])], "admin").unwrap();
        let t1 = registry.get_tenant_by_token("tok1").unwrap();
        let hash = t1.token_hash();
        assert_eq!(registry.tenant_from_hash(&hash).unwrap().name, "t1");
    }
}

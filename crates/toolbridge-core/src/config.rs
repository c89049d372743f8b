//! Typed configuration contract consumed at startup.
//!
//! Mirrors `spec.md` §6's recognized options exactly. This module only defines and
//! validates the shape; actual file discovery, env overrides and CLI flag parsing are
//! bootstrap glue that belongs to `toolbridge-server`'s `main.rs`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tenant::{TenantRegistry, TenantSpec};

/// Process mode. Only `Server` is implemented by this core; `Client`/`Combo` are accepted
/// so a shared config file doesn't fail to parse, but this crate has nothing to do with
/// them (they belong to the out-of-scope worker-side subprocess manager).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Server,
    Client,
    Combo,
}

/// `server.http.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    #[serde(rename = "publicUrl", skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            public_url: None,
        }
    }
}

/// One entry of `server.apiSpaces[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSpaceConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "bearerToken")]
    pub bearer_token: String,
    #[serde(rename = "allowedClientTokens")]
    pub allowed_client_tokens: Vec<String>,
}

impl From<ApiSpaceConfig> for TenantSpec {
    fn from(space: ApiSpaceConfig) -> Self {
        TenantSpec {
            name: space.name,
            description: space.description,
            bearer_token: space.bearer_token,
            allowed_client_tokens: space.allowed_client_tokens,
        }
    }
}

/// `server.admin.*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(rename = "adminToken", skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

/// Logging verbosity, mirroring `tracing`'s level filter names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_filter_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Output shape for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Text
    }
}

/// `server.logging.*`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
    #[serde(default)]
    pub format: LogFormat,
}

/// `server.*` — the full set of server-mode options this core understands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(rename = "apiSpaces")]
    pub api_spaces: Vec<ApiSpaceConfig>,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    pub server: ServerConfig,
}

fn default_mode() -> Mode {
    Mode::Server
}

impl ServerConfig {
    /// Validates `apiSpaces` against the bounds `spec.md` §6 requires: array non-empty,
    /// tokens at least 32 characters. Fails fast with [`ConfigError`] rather than letting
    /// an undersized token reach [`TenantRegistry::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_spaces.is_empty() {
            return Err(ConfigError::NoTenants);
        }
        const MIN_TOKEN_LEN: usize = 32;
        for space in &self.api_spaces {
            if space.bearer_token.len() < MIN_TOKEN_LEN {
                return Err(ConfigError::TokenTooShort(space.name.clone()));
            }
            if space.allowed_client_tokens.is_empty() {
                return Err(ConfigError::NoAllowedClientTokens(space.name.clone()));
            }
            for token in &space.allowed_client_tokens {
                if token.len() < MIN_TOKEN_LEN {
                    return Err(ConfigError::TokenTooShort(space.name.clone()));
                }
            }
        }
        if let Some(admin_token) = &self.admin.admin_token {
            if admin_token.len() < MIN_TOKEN_LEN {
                return Err(ConfigError::TokenTooShort("admin".to_string()));
            }
        }
        Ok(())
    }

    /// The token newly-connecting workers must present to the Session Layer, resolved per
    /// `spec.md` §9 Open Question 1 as the first configured tenant's bearer token. See
    /// `DESIGN.md` for why this (rather than a per-worker token) was chosen.
    pub fn worker_auth_token(&self) -> Option<&str> {
        self.api_spaces.first().map(|s| s.bearer_token.as_str())
    }

    /// Builds the [`TenantRegistry`], validating config bounds first.
    pub fn build_tenant_registry(&self, admin_token: &str) -> Result<TenantRegistry, ConfigError> {
        self.validate()?;
        let specs = self
            .api_spaces
            .iter()
            .cloned()
            .map(TenantSpec::from)
            .collect();
        TenantRegistry::new(specs, admin_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(name: &str, bearer_len: usize, allowed_len: usize) -> ApiSpaceConfig {
        ApiSpaceConfig {
            name: name.to_string(),
            description: None,
            bearer_token: "t".repeat(bearer_len),
            allowed_client_tokens: vec!["w".repeat(allowed_len)],
        }
    }

    #[test]
    fn rejects_empty_api_spaces() {
        let cfg = ServerConfig {
            http: HttpConfig::default(),
            api_spaces: vec![],
            admin: AdminConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(matches!(cfg.validate().unwrap_err(), ConfigError::NoTenants));
    }

    #[test]
    fn rejects_undersized_tokens() {
        let cfg = ServerConfig {
            http: HttpConfig::default(),
            api_spaces: vec![space("t1", 10, 32)],
            admin: AdminConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(matches!(cfg.validate().unwrap_err(), ConfigError::TokenTooShort(name) if name == "t1"));
    }

    #[test]
    fn rejects_api_space_with_no_allowed_client_tokens() {
        let mut space = space("t1", 32, 32);
        space.allowed_client_tokens.clear();
        let cfg = ServerConfig {
            http: HttpConfig::default(),
            api_spaces: vec![space],
            admin: AdminConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert!(matches!(cfg.validate().unwrap_err(), ConfigError::NoAllowedClientTokens(name) if name == "t1"));
    }

    #[test]
    fn worker_auth_token_is_the_first_tenants_token() {
        let cfg = ServerConfig {
            http: HttpConfig::default(),
            api_spaces: vec![space("t1", 32, 32), space("t2", 32, 32)],
            admin: AdminConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert_eq!(cfg.worker_auth_token(), Some(cfg.api_spaces[0].bearer_token.as_str()));
    }
}

//! Error types shared across the dispatcher.

use thiserror::Error;

/// Fatal errors raised while building the [`crate::tenant::TenantRegistry`] from
/// configuration. Construction of the registry aborts the process; there is no recovery.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("server.apiSpaces must contain at least one tenant")]
    NoTenants,

    #[error("duplicate bearer token: tenant {0:?} reuses a token already claimed elsewhere")]
    DuplicateToken(String),

    #[error("tenant hash collision: tenants {0:?} and {1:?} share the same token_hash prefix")]
    HashCollision(String, String),

    #[error("tenant {0:?} has an empty name")]
    EmptyName(String),

    #[error("tenant {0:?} has a bearer or worker token shorter than the required minimum")]
    TokenTooShort(String),

    #[error("tenant {0:?} has no entries in allowedClientTokens")]
    NoAllowedClientTokens(String),
}

/// Errors raised while dispatching a tool invocation, matching the taxonomy in the
/// dispatcher's HTTP-status mapping (see `toolbridge-server`'s response conversion).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("tenant unknown")]
    TenantUnknown,

    #[error("tool {0:?} not found")]
    ToolNotFound(String),

    #[error("{0}")]
    ToolExecutionError(String),

    #[error("invocation timed out")]
    Timeout,

    #[error("worker disconnected before replying")]
    WorkerDisconnected,

    #[error("worker session was replaced before replying")]
    WorkerReplaced,

    #[error("client cancelled the request")]
    ClientCancelled,

    #[error("server is shutting down")]
    ServerShutdown,

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors raised while classifying an `Authorization` header.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("malformed Authorization header")]
    Malformed,

    #[error("unknown bearer token")]
    Unknown,
}

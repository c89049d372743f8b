//! Core of the tool bridge server: tenants, workers, sessions and dispatch.
//!
//! # Overview
//! A tool bridge exposes tools hosted by remote workers as authenticated HTTP endpoints,
//! and publishes a machine-readable API description tailored per tenant. This crate owns
//! the pieces that do not depend on any particular HTTP framework:
//!
//! - [`tenant`] — isolated API namespaces with independent credentials and ACLs.
//! - [`worker`] — the registry of connected workers and the tools they offer.
//! - [`schema`] — the JSON-Schema subset used to describe tool parameters, and its
//!   sanitization for description generation.
//! - [`session`] — the wire protocol and per-connection state machine workers speak.
//! - [`router`] — correlates an incoming tool call to a worker and awaits its reply.
//! - [`auth`] — classifies a bearer token into a tenant, admin, or neither.
//! - [`description`] — generates the per-tenant API description document.
//! - [`admin`] — admin session derivation and dashboard data aggregation.
//! - [`config`] — the typed configuration contract consumed at startup.
//! - [`error`] — the error taxonomy shared across the above.

pub mod admin;
pub mod auth;
pub mod config;
pub mod description;
pub mod error;
pub mod router;
pub mod schema;
pub mod session;
pub mod tenant;
pub mod worker;

pub use error::{ConfigError, DispatchError};
pub use tenant::{Tenant, TenantRegistry};
pub use worker::{WorkerId, WorkerRecord, WorkerRegistry};

//! Client-side connection manager for DIRAC-style RPC services: resolves a
//! logical service name to a live, authenticated transport, applying
//! gateway rewriting, ban-aware retry across candidate URLs, and credential
//! delegation on the server's request.
//!
//! [`Client`] is the entry point. It owns a [`ProtocolRegistry`] of wire
//! schemes (built in, the `dips` length-delimited TCP framing), a
//! [`TransportPool`] of live connections, and a [`ConfigView`] it consults
//! for setup/VO/gateway/ConnConf lookups.

pub mod client;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod guard;
pub mod identity;
pub mod manager;
pub mod options;
pub mod pool;
pub mod transport;

pub use client::{Client, Connected};
pub use config::{ConfigView, YamlConfig};
pub use credentials::{CredentialResolver, NoSecurityHelper, SecurityHelper};
pub use discovery::{ServiceEndpointSet, UrlDiscoverer};
pub use error::ClientError;
pub use identity::{CallContext, IdentityDict};
pub use manager::ConnectionManager;
pub use options::{ClientOptions, ExtraCredentials, ProxyMaterial, UrlTuple};
pub use pool::{global_transport_pool, TransportId, TransportPool};
pub use transport::{default_registry, ProtocolPlugin, ProtocolRegistry, Transport};

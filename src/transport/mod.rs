pub mod dips;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::identity::IdentityDict;
use crate::options::ClientOptions;

/// A live, authenticated connection to a service, as handed out by a
/// [`ProtocolPlugin`]: init, send, receive, close. `close` is
/// invoked by the transport pool, never by client code directly.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn init_as_client(&mut self) -> Result<(), anyhow::Error>;
	fn set_socket_timeout(&mut self, timeout: Duration);
	async fn send_data(&mut self, payload: &[u8]) -> Result<(), anyhow::Error>;
	async fn receive_data(&mut self) -> Result<Vec<u8>, anyhow::Error>;
	async fn close(&mut self);
}

/// The sole extension point for new wire schemes. A
/// plugin is registered once under a scheme name (e.g. `dips`) and
/// thereafter only invoked through the registry.
#[async_trait]
pub trait ProtocolPlugin: Send + Sync {
	/// Opens a new transport to `(host, port)`, honoring whatever of
	/// `options` is relevant (timeout, certs, proxy...).
	async fn transport(
		&self,
		host: &str,
		port: u16,
		options: &ClientOptions,
	) -> Result<Box<dyn Transport>, anyhow::Error>;

	/// Protocol-specific precheck of the local environment, run once at
	/// client construction. Returns whatever identity facts it could
	/// establish (e.g. a host certificate's CN).
	async fn sanity(
		&self,
		host: &str,
		port: u16,
		options: &ClientOptions,
	) -> Result<IdentityDict, anyhow::Error>;

	/// Produces the bytes of a delegation payload for `request`, the
	/// opaque value the server sent under the `delegate` key.
	async fn delegation(
		&self,
		request: &[u8],
		options: &ClientOptions,
	) -> Result<Vec<u8>, anyhow::Error>;
}

/// Named table of transport factories. Write-once at startup, read-mostly
/// afterward.
#[derive(Default)]
pub struct ProtocolRegistry {
	plugins: HashMap<String, Box<dyn ProtocolPlugin>>,
}

impl ProtocolRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&mut self, scheme: impl Into<String>, plugin: Box<dyn ProtocolPlugin>) {
		self.plugins.insert(scheme.into(), plugin);
	}

	pub fn get(&self, scheme: &str) -> Option<&dyn ProtocolPlugin> {
		self.plugins.get(scheme).map(|b| b.as_ref())
	}

	pub fn schemes(&self) -> impl Iterator<Item = &str> {
		self.plugins.keys().map(String::as_str)
	}
}

/// The registry this crate ships out of the box: just the `dips` scheme.
/// Embedders that need additional schemes build their own
/// [`ProtocolRegistry`] instead of using this one.
static DEFAULT_REGISTRY: once_cell::sync::Lazy<std::sync::Arc<ProtocolRegistry>> =
	once_cell::sync::Lazy::new(|| {
		let mut registry = ProtocolRegistry::new();
		registry.register("dips", Box::new(dips::DipsPlugin));
		std::sync::Arc::new(registry)
	});

/// The default protocol registry, built once and shared process-wide.
pub fn default_registry() -> std::sync::Arc<ProtocolRegistry> {
	DEFAULT_REGISTRY.clone()
}

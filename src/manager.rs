use std::sync::Arc;
use std::time::Duration;

use crate::discovery::{ServiceEndpointSet, UrlDiscoverer};
use crate::error::ClientError;
use crate::options::{ClientOptions, UrlTuple};
use crate::pool::{TransportId, TransportPool};
use crate::transport::ProtocolRegistry;

/// Orchestrates discover -> connect -> retry/ban -> propose action ->
/// delegate.
pub struct ConnectionManager {
	registry: Arc<ProtocolRegistry>,
	pool: Arc<TransportPool>,
}

impl ConnectionManager {
	pub fn new(registry: Arc<ProtocolRegistry>, pool: Arc<TransportPool>) -> Self {
		Self { registry, pool }
	}

	/// Resolves a URL, opens a transport, and on failure applies the
	/// ban/retry policy and tries again, up to `state.retry_bound()`
	/// attempts across the whole call.
	pub async fn connect(
		&self,
		discoverer: &UrlDiscoverer,
		destination_service: &str,
		setup: &str,
		options: &mut ClientOptions,
		state: &mut ServiceEndpointSet,
	) -> Result<(TransportId, UrlTuple), ClientError> {
		loop {
			let (_url, tuple) =
				discoverer.find_service_url(destination_service, setup, options, &self.registry, state)?;

			let plugin = self
				.registry
				.get(&tuple.protocol)
				.ok_or_else(|| ClientError::UnknownScheme(tuple.protocol.clone()))?;

			let attempt = async {
				let mut transport = plugin.transport(&tuple.host, tuple.port, options).await?;
				if state.should_extend_timeout() {
					transport.set_socket_timeout(Duration::from_secs(5));
				}
				transport.init_as_client().await?;
				Ok::<_, anyhow::Error>(transport)
			};

			match attempt.await {
				Ok(transport) => {
					let id = self.pool.add(transport).await;
					return Ok((id, tuple));
				},
				Err(cause) => {
					if state.retry >= state.retry_bound() {
						return Err(ClientError::connect_failed(&tuple, cause));
					}
					let qualified = tuple.to_url();
					let sweep_delay = state.record_failure(&qualified);
					if state.banned_urls.len() < state.nb_of_urls {
						tracing::warn!(url = %qualified, "non-responding URL temporarily banned");
					}
					tracing::info!(retry = state.retry, "retry connection");
					if let Some(delay) = sweep_delay {
						tracing::info!(?delay, "waiting before retrying all service(s)");
						tokio::time::sleep(delay).await;
					}
				},
			}
		}
	}

	pub async fn disconnect(&self, id: TransportId) {
		self.pool.close(id).await;
	}

	/// Sends `((path, setup, vo), action, extraCredentials)` and reads the
	/// server's response. If the response is an OK-tagged map containing a
	/// `delegate` key, performs one delegation round-trip and returns the
	/// delegation reply instead.
	pub async fn propose_action(
		&self,
		id: TransportId,
		tuple: &UrlTuple,
		setup: &str,
		vo: &str,
		action: &str,
		extra_credentials: &crate::options::ExtraCredentials,
		options: &ClientOptions,
	) -> Result<serde_json::Value, ClientError> {
		let request = serde_json::json!({
			"ok": true,
			"value": [[tuple.path, setup, vo], action, extra_credentials],
		});
		let payload =
			serde_json::to_vec(&request).map_err(|e| ClientError::SendFailed(e.to_string()))?;
		self
			.pool
			.send(id, &payload)
			.await
			.map_err(|e| ClientError::SendFailed(e.to_string()))?;

		let response = self.receive_json(id).await?;

		let delegate_request = response
			.get("ok")
			.and_then(|v| v.as_bool())
			.filter(|ok| *ok)
			.and_then(|_| response.get("value"))
			.and_then(|v| v.as_object())
			.and_then(|m| m.get("delegate"));

		match delegate_request {
			Some(req) => self.delegate_credentials(id, tuple, req, options).await,
			None => Ok(response),
		}
	}

	async fn delegate_credentials(
		&self,
		id: TransportId,
		tuple: &UrlTuple,
		delegation_request: &serde_json::Value,
		options: &ClientOptions,
	) -> Result<serde_json::Value, ClientError> {
		let plugin = self
			.registry
			.get(&tuple.protocol)
			.ok_or_else(|| ClientError::UnknownScheme(tuple.protocol.clone()))?;
		let request_bytes = serde_json::to_vec(delegation_request)
			.map_err(|e| ClientError::DelegationFailed(e.to_string()))?;
		let delegation_payload = plugin
			.delegation(&request_bytes, options)
			.await
			.map_err(|e| ClientError::DelegationFailed(e.to_string()))?;
		self
			.pool
			.send(id, &delegation_payload)
			.await
			.map_err(|e| ClientError::SendFailed(e.to_string()))?;
		self.receive_json(id).await
	}

	async fn receive_json(&self, id: TransportId) -> Result<serde_json::Value, ClientError> {
		let bytes = self
			.pool
			.receive(id)
			.await
			.map_err(|e| ClientError::ReceiveFailed(e.to_string()))?;
		serde_json::from_slice(&bytes).map_err(|e| ClientError::ReceiveFailed(e.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::YamlConfig;
	use crate::transport::mock::{MockPlugin, Script};
	use std::sync::Arc as StdArc;

	fn setup_manager(plugin: MockPlugin) -> (ConnectionManager, UrlDiscoverer) {
		let mut registry = ProtocolRegistry::new();
		registry.register("dips", Box::new(plugin));
		let pool = StdArc::new(TransportPool::new());
		let manager = ConnectionManager::new(StdArc::new(registry), pool);
		let config: StdArc<dyn crate::config::ConfigView> = StdArc::new(
			YamlConfig::from_str(
				"Systems:\n  A/B:\n    URLs:\n      Test: \"dips://h1:9100/A/B,dips://h2:9100/A/B\"\n",
				"CERN",
			)
			.unwrap(),
		);
		(manager, UrlDiscoverer::new(config))
	}

	#[tokio::test]
	async fn single_attempt_success_bans_nothing() {
		let plugin = MockPlugin::new();
		let (manager, discoverer) = setup_manager(plugin);
		let mut state = ServiceEndpointSet::default();
		let mut opts = ClientOptions::default();
		let (_id, tuple) = manager
			.connect(&discoverer, "A/B", "Test", &mut opts, &mut state)
			.await
			.unwrap();
		assert!(tuple.host == "h1" || tuple.host == "h2");
		assert!(state.banned_urls.is_empty());
	}

	#[tokio::test]
	async fn fail_then_recover_bans_the_failing_url() {
		let plugin = MockPlugin::new();
		plugin.script("h1", 9100, Script::AlwaysFail);
		plugin.script("h2", 9100, Script::AlwaysSucceed);
		let (manager, discoverer) = setup_manager(plugin);
		let mut state = ServiceEndpointSet::default();
		let mut opts = ClientOptions::default();
		let (_id, tuple) = manager
			.connect(&discoverer, "A/B", "Test", &mut opts, &mut state)
			.await
			.unwrap();
		assert_eq!(tuple.host, "h2");
		assert_eq!(state.banned_urls.len(), 1);
		assert!(state.banned_urls.contains("dips://h1:9100/A/B"));
	}

	#[tokio::test]
	async fn exhausting_retry_budget_surfaces_connect_failed() {
		let plugin = MockPlugin::new();
		plugin.script("h1", 9100, Script::AlwaysFail);
		plugin.script("h2", 9100, Script::AlwaysFail);
		let (manager, discoverer) = setup_manager(plugin);
		let mut state = ServiceEndpointSet::default();
		let mut opts = ClientOptions::default();
		let err = manager
			.connect(&discoverer, "A/B", "Test", &mut opts, &mut state)
			.await
			.unwrap_err();
		assert!(matches!(err, ClientError::ConnectFailed { .. }));
		// nb_of_urls=2 => nb_of_retry=3, bound = 3*2-1 = 5 retries max
		assert!(state.retry <= state.retry_bound());
	}

	#[tokio::test]
	async fn propose_action_runs_delegation_round_trip_on_request() {
		let plugin = MockPlugin::new();
		plugin.script("h1", 9100, Script::AlwaysSucceed);
		plugin.script("h2", 9100, Script::AlwaysSucceed);
		// First reply asks for delegation, second is the effective response.
		plugin.push_response(serde_json::json!({"ok": true, "value": {"delegate": "req-123"}}).to_string().into_bytes());
		plugin.push_response(serde_json::json!({"ok": true, "value": "granted"}).to_string().into_bytes());
		let (manager, discoverer) = setup_manager(plugin);
		let mut state = ServiceEndpointSet::default();
		let mut opts = ClientOptions::default();
		let (id, tuple) = manager
			.connect(&discoverer, "A/B", "Test", &mut opts, &mut state)
			.await
			.unwrap();
		let response = manager
			.propose_action(
				id,
				&tuple,
				"Test",
				"unknown",
				"someAction",
				&crate::options::ExtraCredentials::Empty,
				&opts,
			)
			.await
			.unwrap();
		assert_eq!(response["value"], serde_json::json!("granted"));
	}

	#[tokio::test]
	async fn propose_action_returns_plain_response_without_delegate_key() {
		let plugin = MockPlugin::new();
		plugin.script("h1", 9100, Script::AlwaysSucceed);
		plugin.script("h2", 9100, Script::AlwaysSucceed);
		plugin.push_response(serde_json::json!({"ok": true, "value": 42}).to_string().into_bytes());
		let (manager, discoverer) = setup_manager(plugin);
		let mut state = ServiceEndpointSet::default();
		let mut opts = ClientOptions::default();
		let (id, tuple) = manager
			.connect(&discoverer, "A/B", "Test", &mut opts, &mut state)
			.await
			.unwrap();
		let response = manager
			.propose_action(
				id,
				&tuple,
				"Test",
				"unknown",
				"someAction",
				&crate::options::ExtraCredentials::Empty,
				&opts,
			)
			.await
			.unwrap();
		assert_eq!(response["value"], serde_json::json!(42));
	}
}

//! In-process mock plugin for exercising the discovery/retry/delegation
//! logic without real sockets. Only compiled for tests (`cfg(test)`) or
//! when other crates need it via the `test-util` feature.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::identity::IdentityDict;
use crate::options::ClientOptions;

use super::{ProtocolPlugin, Transport};

/// Scripted outcome for one `(host, port)` pair.
#[derive(Clone)]
pub enum Script {
	/// `init_as_client` fails `n` times in a row, then succeeds.
	FailThenSucceed(usize),
	AlwaysFail,
	AlwaysSucceed,
}

#[derive(Default)]
struct Shared {
	scripts: HashMap<(String, u16), Script>,
	attempts: HashMap<(String, u16), usize>,
	sent: Vec<Vec<u8>>,
	/// Responses returned by `receive_data`, in order, shared across every
	/// transport the plugin hands out (good enough for a single
	/// in-flight conversation per test).
	responses: Vec<Vec<u8>>,
}

#[derive(Clone, Default)]
pub struct MockPlugin {
	shared: Arc<Mutex<Shared>>,
}

impl MockPlugin {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn script(&self, host: &str, port: u16, script: Script) {
		self
			.shared
			.lock()
			.unwrap()
			.scripts
			.insert((host.to_string(), port), script);
	}

	pub fn push_response(&self, response: Vec<u8>) {
		self.shared.lock().unwrap().responses.push(response);
	}

	pub fn sent_messages(&self) -> Vec<Vec<u8>> {
		self.shared.lock().unwrap().sent.clone()
	}

	pub fn attempts(&self, host: &str, port: u16) -> usize {
		*self
			.shared
			.lock()
			.unwrap()
			.attempts
			.get(&(host.to_string(), port))
			.unwrap_or(&0)
	}
}

pub struct MockTransport {
	shared: Arc<Mutex<Shared>>,
	key: (String, u16),
	should_fail_countdown: usize,
}

#[async_trait]
impl Transport for MockTransport {
	async fn init_as_client(&mut self) -> Result<(), anyhow::Error> {
		let mut shared = self.shared.lock().unwrap();
		*shared.attempts.entry(self.key.clone()).or_insert(0) += 1;
		if self.should_fail_countdown > 0 {
			self.should_fail_countdown -= 1;
			return Err(anyhow::anyhow!("mock connect refused"));
		}
		Ok(())
	}

	fn set_socket_timeout(&mut self, _timeout: Duration) {}

	async fn send_data(&mut self, payload: &[u8]) -> Result<(), anyhow::Error> {
		self.shared.lock().unwrap().sent.push(payload.to_vec());
		Ok(())
	}

	async fn receive_data(&mut self) -> Result<Vec<u8>, anyhow::Error> {
		let mut shared = self.shared.lock().unwrap();
		if shared.responses.is_empty() {
			return Err(anyhow::anyhow!("no scripted response left"));
		}
		Ok(shared.responses.remove(0))
	}

	async fn close(&mut self) {}
}

#[async_trait]
impl ProtocolPlugin for MockPlugin {
	async fn transport(
		&self,
		host: &str,
		port: u16,
		_options: &ClientOptions,
	) -> Result<Box<dyn Transport>, anyhow::Error> {
		let key = (host.to_string(), port);
		let fail_count = match self.shared.lock().unwrap().scripts.get(&key) {
			Some(Script::FailThenSucceed(n)) => *n,
			Some(Script::AlwaysFail) => usize::MAX,
			Some(Script::AlwaysSucceed) | None => 0,
		};
		Ok(Box::new(MockTransport {
			shared: self.shared.clone(),
			key,
			should_fail_countdown: fail_count,
		}))
	}

	async fn sanity(
		&self,
		_host: &str,
		_port: u16,
		_options: &ClientOptions,
	) -> Result<IdentityDict, anyhow::Error> {
		Ok(IdentityDict::new())
	}

	async fn delegation(
		&self,
		request: &[u8],
		_options: &ClientOptions,
	) -> Result<Vec<u8>, anyhow::Error> {
		Ok(request.to_vec())
	}
}

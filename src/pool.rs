use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;

use crate::transport::Transport;

/// Opaque handle into the [`TransportPool`].
pub type TransportId = u64;

/// Process-wide registry of live transports. `add` hands
/// out a fresh id; `close` releases the transport, tolerating a second
/// `close` on the same id. Concurrency-safe: shared across every client
/// instance in the process.
#[derive(Default)]
pub struct TransportPool {
	next_id: AtomicU64,
	transports: Mutex<HashMap<TransportId, Box<dyn Transport>>>,
}

impl TransportPool {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn add(&self, transport: Box<dyn Transport>) -> TransportId {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		self.transports.lock().await.insert(id, transport);
		id
	}

	/// Closes and drops the transport for `id`. A second close on the same
	/// id, or an unknown id, is a no-op.
	pub async fn close(&self, id: TransportId) {
		let removed = self.transports.lock().await.remove(&id);
		if let Some(mut transport) = removed {
			transport.close().await;
		}
	}

	/// Sends a payload over the transport registered as `id`.
	pub async fn send(&self, id: TransportId, payload: &[u8]) -> Result<(), anyhow::Error> {
		let mut guard = self.transports.lock().await;
		let transport = guard
			.get_mut(&id)
			.ok_or_else(|| anyhow::anyhow!("unknown transport id {id}"))?;
		transport.send_data(payload).await
	}

	/// Receives the next payload from the transport registered as `id`.
	pub async fn receive(&self, id: TransportId) -> Result<Vec<u8>, anyhow::Error> {
		let mut guard = self.transports.lock().await;
		let transport = guard
			.get_mut(&id)
			.ok_or_else(|| anyhow::anyhow!("unknown transport id {id}"))?;
		transport.receive_data().await
	}

	pub async fn len(&self) -> usize {
		self.transports.lock().await.len()
	}
}

static GLOBAL_POOL: OnceLock<Arc<TransportPool>> = OnceLock::new();

/// The lazily-initialized process-wide pool: a single instance, shared
/// by every client in this process.
pub fn global_transport_pool() -> Arc<TransportPool> {
	GLOBAL_POOL
		.get_or_init(|| Arc::new(TransportPool::new()))
		.clone()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transport::mock::MockPlugin;
	use crate::transport::ProtocolPlugin;

	#[tokio::test]
	async fn add_then_close_is_idempotent() {
		let pool = TransportPool::new();
		let plugin = MockPlugin::new();
		let t = plugin
			.transport("h1", 9100, &Default::default())
			.await
			.unwrap();
		let id = pool.add(t).await;
		assert_eq!(pool.len().await, 1);
		pool.close(id).await;
		assert_eq!(pool.len().await, 0);
		// second close on the same id must not panic
		pool.close(id).await;
	}
}

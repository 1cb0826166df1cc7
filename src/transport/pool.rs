//! Connection pool for secure peer sessions.
//!
//! Generalizes the teacher's `connection.rs` `Node`/`ConnectionType` split
//! (local subprocess vs. remote SSH subprocess) from subprocess pipes to
//! `TcpStream`s: a pool entry is identified by `(host, port)`, reused while
//! idle, and re-established on demand once its idle timeout elapses or the
//! peer drops it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::TransportError;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

struct PooledConnection {
	stream: TcpStream,
	last_used: Instant,
}

/// A pool of secure sessions to remote peers, keyed by endpoint. Unlike the
/// teacher's per-location subprocess (one `Node` per sync participant, torn
/// down at the end of the run), peer connections here are long-lived and
/// reused across many sync operations and mesh-maintenance ticks.
pub struct ConnectionPool {
	idle_timeout: Duration,
	connections: Mutex<HashMap<(String, u16), PooledConnection>>,
}

impl ConnectionPool {
	pub fn new() -> Self {
		ConnectionPool { idle_timeout: DEFAULT_IDLE_TIMEOUT, connections: Mutex::new(HashMap::new()) }
	}

	pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
		ConnectionPool { idle_timeout, connections: Mutex::new(HashMap::new()) }
	}

	/// Take an existing idle connection to `(host, port)` if one is fresh
	/// enough, otherwise establish a new `TcpStream` with exponential
	/// backoff on transient connect failures.
	pub async fn acquire(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
		let key = (host.to_string(), port);

		{
			let mut connections = self.connections.lock().await;
			if let Some(entry) = connections.remove(&key) {
				if entry.last_used.elapsed() < self.idle_timeout {
					return Ok(entry.stream);
				}
			}
		}

		connect_with_backoff(host, port).await
	}

	/// Return a connection to the pool for reuse by a later `acquire`.
	pub async fn release(&self, host: &str, port: u16, stream: TcpStream) {
		let key = (host.to_string(), port);
		let mut connections = self.connections.lock().await;
		connections.insert(key, PooledConnection { stream, last_used: Instant::now() });
	}

	/// Drop any pooled connection idle past the timeout. Called from the
	/// orchestrator's periodic maintenance tick.
	pub async fn sweep_idle(&self) {
		let idle_timeout = self.idle_timeout;
		let mut connections = self.connections.lock().await;
		connections.retain(|_, entry| entry.last_used.elapsed() < idle_timeout);
	}

	pub async fn len(&self) -> usize {
		self.connections.lock().await.len()
	}
}

impl Default for ConnectionPool {
	fn default() -> Self {
		Self::new()
	}
}

async fn connect_with_backoff(host: &str, port: u16) -> Result<TcpStream, TransportError> {
	const MAX_ATTEMPTS: u32 = 4;
	let mut backoff = Duration::from_millis(50);

	let mut last_err = None;
	for attempt in 0..MAX_ATTEMPTS {
		match TcpStream::connect((host, port)).await {
			Ok(stream) => return Ok(stream),
			Err(e) => {
				last_err = Some(e);
				if attempt + 1 < MAX_ATTEMPTS {
					tokio::time::sleep(backoff).await;
					backoff *= 2;
				}
			}
		}
	}

	Err(TransportError::Io(last_err.expect("at least one attempt recorded an error")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::net::TcpListener;

	#[tokio::test]
	async fn acquire_connects_and_release_allows_reuse() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();

		tokio::spawn(async move {
			loop {
				if listener.accept().await.is_err() {
					break;
				}
			}
		});

		let pool = ConnectionPool::new();
		let stream = pool.acquire("127.0.0.1", addr.port()).await.unwrap();
		pool.release("127.0.0.1", addr.port(), stream).await;
		assert_eq!(pool.len().await, 1);

		let _reused = pool.acquire("127.0.0.1", addr.port()).await.unwrap();
		assert_eq!(pool.len().await, 0);
	}

	#[tokio::test]
	async fn sweep_idle_drops_stale_connections() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			loop {
				if listener.accept().await.is_err() {
					break;
				}
			}
		});

		let pool = ConnectionPool::with_idle_timeout(Duration::from_millis(10));
		let stream = pool.acquire("127.0.0.1", addr.port()).await.unwrap();
		pool.release("127.0.0.1", addr.port(), stream).await;

		tokio::time::sleep(Duration::from_millis(30)).await;
		pool.sweep_idle().await;
		assert_eq!(pool.len().await, 0);
	}
}

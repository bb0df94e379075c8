use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, parse_lines};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::sink::Sink;

const COMPONENT: &str = "buffer";

/// Pool of lines pre-generated by the backend, so callers do not wait on it.
///
/// # Responsibilities
/// - Hand out ready lines oldest-first (`pop_n`)
/// - Top the pool back up to its capacity with one backend call (`replenish`)
/// - Run a background replenishment loop that survives backend failures
///
/// # Invariants
/// - The queue lock is never held while the backend runs.
/// - At most one `replenish` talks to the backend at a time.
pub struct GenerationBuffer<B: Backend> {
	backend: Arc<B>,
	settings: RwLock<BackendConfig>,
	queue: Mutex<VecDeque<String>>,
	replenishing: tokio::sync::Mutex<()>,
	sink: Arc<dyn Sink>,
}

impl<B: Backend> GenerationBuffer<B> {
	/// Creates an empty buffer targeting `settings.buffer_capacity` lines.
	pub fn new(backend: Arc<B>, settings: BackendConfig, sink: Arc<dyn Sink>) -> Self {
		Self {
			backend,
			settings: RwLock::new(settings),
			queue: Mutex::new(VecDeque::new()),
			replenishing: tokio::sync::Mutex::new(()),
			sink,
		}
	}

	/// Current target size, `buffer_capacity` of the latest settings.
	pub fn capacity(&self) -> usize {
		self.settings.read().unwrap_or_else(PoisonError::into_inner).buffer_capacity
	}

	/// Number of ready lines.
	pub fn len(&self) -> usize {
		self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn settings(&self) -> BackendConfig {
		self.settings.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Backend parameters (including the capacity) used by later calls.
	pub fn update_settings(&self, settings: BackendConfig) {
		*self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
	}

	/// Removes and returns up to `n` lines from the front of the queue.
	///
	/// # Notes
	/// - When fewer than `n` lines are ready, all but one of them are
	///   returned: a single pop never drains the pool.
	/// - Never returns more than `n` lines.
	pub fn pop_n(&self, n: usize) -> Vec<String> {
		let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
		let take = if queue.len() < n { queue.len().saturating_sub(1) } else { n };
		queue.drain(..take).collect()
	}

	/// Brings the pool back up to capacity.
	///
	/// Asks the backend once for the missing number of lines and appends
	/// every non-blank line it returns. Returns how many lines were added;
	/// a full buffer is a no-op.
	///
	/// # Errors
	/// Returns `Error::Backend` if the backend call fails.
	pub async fn replenish(&self) -> Result<usize> {
		let _running = self.replenishing.lock().await;

		let shortfall = self.capacity().saturating_sub(self.len());
		if shortfall == 0 {
			return Ok(0);
		}

		let lines = self.generate_direct(shortfall).await?;
		let added = lines.len();
		self.queue.lock().unwrap_or_else(PoisonError::into_inner).extend(lines);
		Ok(added)
	}

	/// One-shot backend call that bypasses the pool.
	///
	/// # Errors
	/// Returns `Error::Backend` if the backend fails.
	pub async fn generate_direct(&self, count: usize) -> Result<Vec<String>> {
		let settings = self.settings();
		let raw = self
			.backend
			.generate_lines(&settings.save_path, settings.temperature, count, settings.max_generation_characters)
			.await
			.map_err(|e| match e {
				Error::Backend(_) => e,
				other => Error::Backend(other.to_string()),
			})?;
		Ok(parse_lines(&raw))
	}

	/// Spawns the replenishment loop on the current tokio runtime.
	///
	/// Runs `replenish` every `period` until `token` is cancelled. Failures
	/// are reported to the sink and retried on the next tick.
	pub fn spawn_replenisher(self: &Arc<Self>, period: Duration, token: CancellationToken) -> JoinHandle<()> {
		let buffer = Arc::clone(self);
		tokio::spawn(async move {
			loop {
				match buffer.replenish().await {
					Ok(0) => {}
					Ok(added) => buffer.sink.info(COMPONENT, &format!("added {added} lines")),
					Err(e) => buffer.sink.error(COMPONENT, &format!("failed repopulating buffer: {e}")),
				}

				tokio::select! {
					_ = token.cancelled() => break,
					_ = tokio::time::sleep(period) => {}
				}
			}
		})
	}

	#[cfg(test)]
	pub(crate) fn push_ready<I: IntoIterator<Item = String>>(&self, lines: I) {
		self.queue.lock().unwrap().extend(lines);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::testing::{FailingBackend, ScriptedBackend};
	use crate::sink::MemorySink;
	use std::sync::atomic::Ordering;
	use tracing::Level;

	fn settings(capacity: usize) -> BackendConfig {
		BackendConfig { buffer_capacity: capacity, ..BackendConfig::default() }
	}

	fn filled(count: usize) -> GenerationBuffer<ScriptedBackend> {
		let buffer = GenerationBuffer::new(Arc::new(ScriptedBackend::default()), settings(10), Arc::new(MemorySink::new()));
		buffer.push_ready((0..count).map(|i| format!("line {i}")));
		buffer
	}

	#[test]
	fn pop_takes_oldest_first() {
		let buffer = filled(5);
		assert_eq!(buffer.pop_n(2), vec!["line 0", "line 1"]);
		assert_eq!(buffer.len(), 3);
	}

	#[test]
	fn pop_exact_count_empties_queue() {
		let buffer = filled(3);
		assert_eq!(buffer.pop_n(3).len(), 3);
		assert!(buffer.is_empty());
	}

	#[test]
	fn short_queue_keeps_one_line() {
		let buffer = filled(3);
		assert_eq!(buffer.pop_n(10), vec!["line 0", "line 1"]);
		assert_eq!(buffer.len(), 1);

		// A single leftover line is never handed out by a larger request
		assert!(buffer.pop_n(5).is_empty());
		assert_eq!(buffer.len(), 1);
	}

	#[test]
	fn empty_queue_pops_nothing() {
		let buffer = filled(0);
		assert!(buffer.pop_n(4).is_empty());
		assert!(buffer.pop_n(0).is_empty());
		assert_eq!(buffer.len(), 0);
	}

	#[test]
	fn pop_size_invariant() {
		for ready in 0..6 {
			for requested in 0..8 {
				let buffer = filled(ready);
				let popped = buffer.pop_n(requested);
				assert!(popped.len() <= requested);
				assert_eq!(buffer.len(), ready - popped.len());
			}
		}
	}

	#[tokio::test]
	async fn replenish_requests_the_shortfall() {
		let backend = Arc::new(ScriptedBackend::default());
		let buffer = GenerationBuffer::new(backend.clone(), settings(5), Arc::new(MemorySink::new()));
		buffer.push_ready(["ready".to_owned(), "ready".to_owned()]);

		assert_eq!(buffer.replenish().await.unwrap(), 3);
		assert_eq!(buffer.len(), 5);
		assert_eq!(*backend.requested.lock().unwrap(), vec![3]);

		// Full: no backend call
		assert_eq!(buffer.replenish().await.unwrap(), 0);
		assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn capacity_follows_settings() {
		let backend = Arc::new(ScriptedBackend::default());
		let buffer = GenerationBuffer::new(backend.clone(), settings(2), Arc::new(MemorySink::new()));
		assert_eq!(buffer.replenish().await.unwrap(), 2);

		buffer.update_settings(settings(5));
		assert_eq!(buffer.capacity(), 5);
		assert_eq!(buffer.replenish().await.unwrap(), 3);
		assert_eq!(buffer.len(), 5);
		assert_eq!(*backend.requested.lock().unwrap(), vec![2, 3]);

		// Shrinking keeps ready lines but stops asking for more
		buffer.update_settings(settings(1));
		assert_eq!(buffer.replenish().await.unwrap(), 0);
		assert_eq!(buffer.len(), 5);
	}

	#[tokio::test]
	async fn replenish_failure_is_a_backend_error() {
		let buffer = GenerationBuffer::new(Arc::new(FailingBackend::default()), settings(5), Arc::new(MemorySink::new()));
		assert!(matches!(buffer.replenish().await, Err(Error::Backend(_))));
		assert!(buffer.is_empty());
	}

	#[tokio::test]
	async fn replenisher_keeps_running_after_failures() {
		let backend = Arc::new(FailingBackend::default());
		let sink = Arc::new(MemorySink::new());
		let buffer = Arc::new(GenerationBuffer::new(backend.clone(), settings(5), sink.clone()));

		let token = CancellationToken::new();
		let handle = buffer.spawn_replenisher(Duration::from_millis(5), token.clone());
		tokio::time::sleep(Duration::from_millis(100)).await;
		token.cancel();
		handle.await.unwrap();

		assert!(backend.calls.load(Ordering::SeqCst) >= 2);
		assert!(sink.contains(Level::ERROR, "failed repopulating buffer"));
	}

	#[tokio::test]
	async fn replenisher_fills_buffer() {
		let buffer = Arc::new(GenerationBuffer::new(
			Arc::new(ScriptedBackend::default()),
			settings(4),
			Arc::new(MemorySink::new()),
		));
		let token = CancellationToken::new();
		let handle = buffer.spawn_replenisher(Duration::from_millis(5), token.clone());
		tokio::time::sleep(Duration::from_millis(50)).await;
		token.cancel();
		handle.await.unwrap();

		assert_eq!(buffer.len(), 4);
	}
}

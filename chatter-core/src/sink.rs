//! Observability sinks.
//!
//! Components never log through global state: each one receives an
//! `Arc<dyn Sink>` when it is built and reports anomalies through it.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::Level;

/// Receiver for log records emitted by engine components.
pub trait Sink: Send + Sync {
	/// Records a message emitted by `component`.
	fn record(&self, level: Level, component: &'static str, message: &str);

	fn info(&self, component: &'static str, message: &str) {
		self.record(Level::INFO, component, message);
	}

	fn warn(&self, component: &'static str, message: &str) {
		self.record(Level::WARN, component, message);
	}

	fn error(&self, component: &'static str, message: &str) {
		self.record(Level::ERROR, component, message);
	}
}

/// Forwards every record to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Sink for TracingSink {
	fn record(&self, level: Level, component: &'static str, message: &str) {
		if level == Level::ERROR {
			tracing::error!(component, "{message}");
		} else if level == Level::WARN {
			tracing::warn!(component, "{message}");
		} else if level == Level::INFO {
			tracing::info!(component, "{message}");
		} else if level == Level::DEBUG {
			tracing::debug!(component, "{message}");
		} else {
			tracing::trace!(component, "{message}");
		}
	}
}

/// A single entry of a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
	/// Seconds since the Unix epoch.
	pub unix: u64,
	pub level: Level,
	pub component: &'static str,
	pub message: String,
}

/// Number of records a [`MemorySink`] keeps by default.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Keeps the most recent records in memory so they can be fetched later,
/// and mirrors every record to `tracing`.
///
/// Once `capacity` records are held, each new one evicts the oldest.
#[derive(Debug)]
pub struct MemorySink {
	capacity: usize,
	lines: Mutex<VecDeque<LogLine>>,
}

impl Default for MemorySink {
	fn default() -> Self {
		Self::with_capacity(DEFAULT_LOG_CAPACITY)
	}
}

impl MemorySink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Keeps at most `capacity` records (at least one).
	pub fn with_capacity(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self { capacity, lines: Mutex::new(VecDeque::with_capacity(capacity)) }
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Returns a copy of the retained records, oldest first.
	pub fn lines(&self) -> Vec<LogLine> {
		self.lines.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
	}

	/// Returns true if any retained record at `level` contains `needle`.
	pub fn contains(&self, level: Level, needle: &str) -> bool {
		self.lines
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.iter()
			.any(|line| line.level == level && line.message.contains(needle))
	}
}

impl Sink for MemorySink {
	fn record(&self, level: Level, component: &'static str, message: &str) {
		TracingSink.record(level, component, message);

		let unix = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map(|d| d.as_secs())
			.unwrap_or_default();
		let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
		if lines.len() == self.capacity {
			lines.pop_front();
		}
		lines.push_back(LogLine { unix, level, component, message: message.to_owned() });
	}
}

use std::sync::Arc;

use crate::backend::Backend;
use crate::brain::GenerativeBrain;
use crate::buffer::GenerationBuffer;
use crate::error::Result;
use crate::sink::Sink;

const COMPONENT: &str = "orchestrator";

/// Chooses between the neural backend and the statistical brain.
///
/// The neural path is tried first when `use_neural` is set; any failure
/// falls back to the brain, which cannot fail. `generate_n` therefore
/// always returns exactly the number of messages asked for.
pub struct GenerationOrchestrator<B: Backend> {
	brain: Arc<GenerativeBrain>,
	buffer: Arc<GenerationBuffer<B>>,
	sink: Arc<dyn Sink>,
}

impl<B: Backend> GenerationOrchestrator<B> {
	pub fn new(brain: Arc<GenerativeBrain>, buffer: Arc<GenerationBuffer<B>>, sink: Arc<dyn Sink>) -> Self {
		Self { brain, buffer, sink }
	}

	/// Generates `count` messages.
	pub async fn generate_n(&self, count: usize) -> Vec<String> {
		if count == 0 {
			return Vec::new();
		}
		if !self.brain.config().use_neural {
			return self.statistical(count);
		}

		match self.neural(count).await {
			Ok(lines) => lines,
			Err(e) => {
				self.sink.error(COMPONENT, &format!("neural generation failed, using the Markov brain: {e}"));
				self.statistical(count)
			}
		}
	}

	/// Buffered lines first, then one direct backend call for the rest.
	///
	/// If the backend returns fewer lines than asked, the brain tops up
	/// the difference.
	async fn neural(&self, count: usize) -> Result<Vec<String>> {
		let mut lines = self.buffer.pop_n(count);
		if lines.len() < count {
			let missing = count - lines.len();
			lines.extend(self.buffer.generate_direct(missing).await?);
		}

		if lines.len() < count {
			self.sink.warn(COMPONENT, &format!("backend returned {} of {count} lines", lines.len()));
			while lines.len() < count {
				lines.push(self.brain.generate());
			}
		}
		lines.truncate(count);
		Ok(lines)
	}

	fn statistical(&self, count: usize) -> Vec<String> {
		(0..count).map(|_| self.brain.generate()).collect()
	}
}

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::brain::{ConfigUpdate, GenerativeBrain};
use crate::buffer::GenerationBuffer;
use crate::config::{BackendConfig, BrainConfig};
use crate::corpus::CorpusSource;
use crate::error::Result;
use crate::orchestrator::GenerationOrchestrator;
use crate::sink::Sink;
use crate::training::{TrainingCoordinator, TrainingState};

const COMPONENT: &str = "engine";

/// Everything a caller needs, wired together.
///
/// Every method is safe to call concurrently. The background tasks
/// (`start_periodic_training`, `start_buffer_replenishment`) are spawned on
/// the tokio runtime of the caller and stopped when the engine is dropped.
pub struct Engine<B: Backend> {
	brain: Arc<GenerativeBrain>,
	buffer: Arc<GenerationBuffer<B>>,
	coordinator: Arc<TrainingCoordinator<B>>,
	orchestrator: GenerationOrchestrator<B>,
	corpus: Arc<dyn CorpusSource>,
	sink: Arc<dyn Sink>,
	// Held while the corpus and the model are brought in line
	learning: Mutex<()>,
	replenisher: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<B: Backend> Engine<B> {
	/// # Errors
	/// Returns `Error::Configuration` if `brain` is invalid.
	pub fn new(
		brain: BrainConfig,
		backend_settings: BackendConfig,
		backend: B,
		corpus: Arc<dyn CorpusSource>,
		sink: Arc<dyn Sink>,
	) -> Result<Self> {
		let backend = Arc::new(backend);
		let brain = Arc::new(GenerativeBrain::new(brain)?);
		let buffer = Arc::new(GenerationBuffer::new(Arc::clone(&backend), backend_settings.clone(), Arc::clone(&sink)));
		let coordinator = Arc::new(TrainingCoordinator::new(
			backend,
			backend_settings,
			Arc::clone(&corpus),
			Arc::clone(&sink),
		));
		let orchestrator = GenerationOrchestrator::new(Arc::clone(&brain), Arc::clone(&buffer), Arc::clone(&sink));

		Ok(Self {
			brain,
			buffer,
			coordinator,
			orchestrator,
			corpus,
			sink,
			learning: Mutex::new(()),
			replenisher: Mutex::new(None),
		})
	}

	pub fn brain(&self) -> &GenerativeBrain {
		&self.brain
	}

	pub fn buffer(&self) -> &GenerationBuffer<B> {
		&self.buffer
	}

	pub fn training_state(&self) -> TrainingState {
		self.coordinator.state()
	}

	/// Learns every retained message. Returns how many were read.
	pub fn fill_from_corpus(&self) -> Result<usize> {
		let _learning = self.learning.lock().unwrap_or_else(PoisonError::into_inner);
		self.learn_corpus()
	}

	fn learn_corpus(&self) -> Result<usize> {
		let messages = self.corpus.messages()?;
		self.brain.refill(&messages)?;
		self.sink.info(COMPONENT, &format!("learned {} messages from the corpus", messages.len()));
		Ok(messages.len())
	}

	/// Learns messages without retaining them.
	pub fn feed<I, S>(&self, messages: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.brain.feed(messages);
	}

	/// Retains messages in the corpus, then learns them.
	///
	/// Nothing is learned if storing fails, so the corpus and the model
	/// never disagree. Waits for a relearn in progress, so a message is
	/// learned exactly once.
	pub fn add_messages<S: AsRef<str>>(&self, messages: &[S]) -> Result<()> {
		let _learning = self.learning.lock().unwrap_or_else(PoisonError::into_inner);
		for message in messages {
			self.corpus.add_message(message.as_ref())?;
		}
		self.brain.feed(messages);
		Ok(())
	}

	/// One message from the statistical brain.
	pub fn generate(&self) -> String {
		self.brain.generate()
	}

	/// `count` messages, from the backend when enabled, else from the brain.
	pub async fn generate_n(&self, count: usize) -> Vec<String> {
		self.orchestrator.generate_n(count).await
	}

	/// Applies new brain settings, relearning the corpus if the context
	/// length changed.
	///
	/// Messages added meanwhile wait until the corpus is relearned.
	pub fn update_configuration(&self, config: BrainConfig) -> Result<()> {
		let _learning = self.learning.lock().unwrap_or_else(PoisonError::into_inner);
		if self.brain.update_configuration(config)? == ConfigUpdate::NeedsRefill {
			self.sink.info(COMPONENT, "context length changed, relearning the corpus");
			self.learn_corpus()?;
		}
		Ok(())
	}

	pub fn backend_settings(&self) -> BackendConfig {
		self.buffer.settings()
	}

	/// Applies new backend parameters to later generation, replenishment
	/// and training calls.
	///
	/// # Notes
	/// - The backend program and scripts are fixed when the backend is built.
	/// - A new `buffer_capacity` takes effect at the next replenish.
	pub fn update_backend_settings(&self, settings: BackendConfig) {
		self.buffer.update_settings(settings.clone());
		self.coordinator.update_settings(settings);
	}

	/// Trains the backend on the whole corpus now.
	pub async fn train_now(&self) -> Result<()> {
		self.coordinator.train_from_corpus().await
	}

	pub fn start_periodic_training(&self, interval: Duration) -> Result<()> {
		self.coordinator.start_periodic(interval)
	}

	/// Returns false if periodic training was not running.
	pub fn stop_periodic_training(&self) -> bool {
		self.coordinator.stop_periodic()
	}

	pub fn is_periodic_training_running(&self) -> bool {
		self.coordinator.is_periodic_running()
	}

	/// Starts (or restarts) the buffer replenishment loop.
	pub fn start_buffer_replenishment(&self, interval: Duration) {
		let token = CancellationToken::new();
		let handle = self.buffer.spawn_replenisher(interval, token.clone());
		let previous = self.replenisher.lock().unwrap_or_else(PoisonError::into_inner).replace((token, handle));
		if let Some((previous, _)) = previous {
			previous.cancel();
		}
	}

	/// Returns false if the replenishment loop was not running.
	pub fn stop_buffer_replenishment(&self) -> bool {
		match self.replenisher.lock().unwrap_or_else(PoisonError::into_inner).take() {
			Some((token, _)) => {
				token.cancel();
				true
			}
			None => false,
		}
	}
}

impl<B: Backend> Drop for Engine<B> {
	fn drop(&mut self) {
		self.stop_buffer_replenishment();
		self.stop_periodic_training();
	}
}

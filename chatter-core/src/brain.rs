use std::path::Path;
use std::sync::mpsc;
use std::sync::{PoisonError, RwLock};
use std::thread;

use rand::Rng;

use crate::config::BrainConfig;
use crate::error::{Error, Result};
use crate::model::transition_model::TransitionModel;
use crate::tokenizer;

/// Outcome of [`GenerativeBrain::update_configuration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigUpdate {
	/// The learned model is still valid.
	Applied,
	/// The context length changed: the model was replaced by an empty one
	/// and must be refilled from the retained corpus.
	NeedsRefill,
}

/// Tokenizer settings and a Markov chain behind a lock.
///
/// # Responsibilities
/// - Split incoming messages and learn them one by one
/// - Generate messages capped at `max_generated_length` tokens
/// - Swap in a fresh model when the context length changes
///
/// # Notes
/// - Each message is fed independently: context never leaks between messages.
/// - Generation only needs a read lock, so it runs alongside other readers;
///   a writer holds the lock for a single message at most.
#[derive(Debug)]
pub struct GenerativeBrain {
	model: RwLock<TransitionModel>,
	config: RwLock<BrainConfig>,
}

impl GenerativeBrain {
	/// # Errors
	/// Returns `Error::Configuration` if the context length is invalid.
	pub fn new(config: BrainConfig) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			model: RwLock::new(TransitionModel::new(config.chain_length)?),
			config: RwLock::new(config),
		})
	}

	/// Current configuration.
	pub fn config(&self) -> BrainConfig {
		self.config.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Copy of the learned model.
	pub fn snapshot(&self) -> TransitionModel {
		self.model.read().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Learns every message, each one starting from a fresh context.
	pub fn feed<I, S>(&self, messages: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let split_chars = self.config.read().unwrap_or_else(PoisonError::into_inner).split_chars.clone();
		for message in messages {
			let tokens = tokenizer::split(message.as_ref(), &split_chars);
			if tokens.is_empty() {
				continue;
			}
			self.model.write().unwrap_or_else(PoisonError::into_inner).feed(&tokens);
		}
	}

	/// Generates one message. Never fails; an empty model yields `""`.
	pub fn generate(&self) -> String {
		self.generate_with(&mut rand::rng())
	}

	pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> String {
		let max_tokens = self.config.read().unwrap_or_else(PoisonError::into_inner).max_generated_length;
		self.model.read().unwrap_or_else(PoisonError::into_inner).generate_with(max_tokens, rng)
	}

	/// Applies a new configuration.
	///
	/// Changing only the delimiters or the output cap keeps the model;
	/// later feeds use the new delimiters. Changing the context length
	/// discards the model, and the caller has to refill it from the corpus.
	///
	/// # Errors
	/// Returns `Error::Configuration` and keeps the old settings if
	/// `new_config` is invalid.
	pub fn update_configuration(&self, new_config: BrainConfig) -> Result<ConfigUpdate> {
		new_config.validate()?;

		let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
		let update = if config.chain_length != new_config.chain_length {
			*self.model.write().unwrap_or_else(PoisonError::into_inner) = TransitionModel::new(new_config.chain_length)?;
			ConfigUpdate::NeedsRefill
		} else {
			ConfigUpdate::Applied
		};
		*config = new_config;
		Ok(update)
	}

	/// Learns a whole corpus in parallel and merges it into the live model.
	///
	/// # Behavior
	/// - Splits the corpus into chunks (based on CPU cores * factor).
	/// - Builds one partial model per chunk on its own thread.
	/// - Merges the partial models, then merges the result into the live
	///   model under a single write lock.
	///
	/// # Notes
	/// - Equivalent to calling `feed` with the same messages, since every
	///   message starts from a fresh context anyway.
	/// - Messages fed while the refill runs are kept.
	///
	/// # Errors
	/// Returns `Error::Configuration` if the context length changed while
	/// the corpus was being learned.
	pub fn refill<S: AsRef<str> + Sync>(&self, corpus: &[S]) -> Result<()> {
		let config = self.config();
		let learned = build_model(&config, corpus)?;
		self.model.write().unwrap_or_else(PoisonError::into_inner).merge(&learned)
	}

	/// Saves the learned model as a postcard snapshot.
	pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		self.model.read().unwrap_or_else(PoisonError::into_inner).save(path)
	}

	/// Replaces the learned model with a snapshot.
	///
	/// # Errors
	/// Returns `Error::Configuration` if the snapshot was built with a
	/// different context length than the one configured.
	pub fn load_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		let loaded = TransitionModel::load(path)?;
		let chain_length = self.config.read().unwrap_or_else(PoisonError::into_inner).chain_length;
		if loaded.context_length() != chain_length {
			return Err(Error::Configuration(format!(
				"snapshot context length {} does not match configured {}",
				loaded.context_length(),
				chain_length
			)));
		}
		*self.model.write().unwrap_or_else(PoisonError::into_inner) = loaded;
		Ok(())
	}
}

/// Builds a model from `corpus` using every CPU.
fn build_model<S: AsRef<str> + Sync>(config: &BrainConfig, corpus: &[S]) -> Result<TransitionModel> {
	let mut final_model = TransitionModel::new(config.chain_length)?;
	if corpus.is_empty() {
		return Ok(final_model);
	}

	let factor = 8;
	let chunks = num_cpus::get() * factor;
	let chunk_size = corpus.len().div_ceil(chunks).max(1);

	let (tx, rx) = mpsc::channel();
	thread::scope(|scope| {
		for chunk in corpus.chunks(chunk_size) {
			let tx = tx.clone();
			scope.spawn(move || {
				let partial_model = TransitionModel::new(config.chain_length).map(|mut model| {
					for message in chunk {
						let tokens = tokenizer::split(message.as_ref(), &config.split_chars);
						model.feed(&tokens);
					}
					model
				});
				// The receiver outlives the scope, so this cannot fail
				let _ = tx.send(partial_model);
			});
		}
	});
	drop(tx);

	for partial_model in rx.iter() {
		final_model.merge(&partial_model?)?;
	}
	Ok(final_model)
}

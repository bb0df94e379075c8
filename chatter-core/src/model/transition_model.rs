use super::context::ContextWindow;
use super::successors::Successors;
use crate::error::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Word-level Markov chain over a fixed-length context window.
///
/// The `TransitionModel` maps the serialized key of a `ContextWindow`
/// to the weighted distribution of tokens observed right after it.
///
/// # Responsibilities
/// - Learn transitions from token sequences (online, one `feed` at a time)
/// - Generate new token sequences by weighted sampling
/// - Merge with another model of the same context length
/// - Persist itself as a compact postcard snapshot
///
/// # Invariants
/// - `context_length` is always >= 1
/// - A context key present in `table` has at least one successor
/// - Counts only ever grow; a model is reset by building a new one
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TransitionModel {
	/// Number of tokens in the context window (`L`)
	context_length: usize,

	/// Mapping from a context key to its successor distribution
	table: HashMap<String, Successors>,
}

impl TransitionModel {
	/// Creates an empty model with a context window of `context_length` tokens.
	///
	/// # Errors
	/// Returns `Error::Configuration` if `context_length < 1`.
	pub fn new(context_length: usize) -> Result<Self> {
		if context_length < 1 {
			return Err(Error::Configuration("context length must be >= 1".to_owned()));
		}
		Ok(Self { context_length, table: HashMap::new() })
	}

	pub fn context_length(&self) -> usize {
		self.context_length
	}

	/// Number of distinct contexts learned so far.
	pub fn len(&self) -> usize {
		self.table.len()
	}

	pub fn is_empty(&self) -> bool {
		self.table.is_empty()
	}

	/// Learns one token sequence.
	///
	/// The context window starts from placeholders at every call: context
	/// is never carried from one `feed` to the next, so each batch is
	/// treated as an independent utterance.
	///
	/// # Notes
	/// - Empty tokens are skipped, they would be indistinguishable from placeholders.
	pub fn feed<S: AsRef<str>>(&mut self, tokens: &[S]) {
		let mut window = ContextWindow::new(self.context_length);
		for token in tokens {
			let token = token.as_ref();
			if token.is_empty() {
				continue;
			}
			self.table.entry(window.key()).or_default().add(token);
			window.shift(token);
		}
	}

	/// Successor distribution of `window`, if that context was ever seen.
	pub fn successors(&self, window: &ContextWindow) -> Option<&Successors> {
		self.table.get(&window.key())
	}

	/// Generates at most `max_tokens` tokens joined by single spaces,
	/// using the thread-local random source.
	pub fn generate(&self, max_tokens: usize) -> String {
		self.generate_with(max_tokens, &mut rand::rng())
	}

	/// Generates at most `max_tokens` tokens joined by single spaces.
	///
	/// Generation stops early as soon as the current context has no
	/// successor; an empty model yields an empty string. Given the same
	/// model and an identically seeded `rng`, the output is identical.
	pub fn generate_with<R: Rng + ?Sized>(&self, max_tokens: usize, rng: &mut R) -> String {
		let mut window = ContextWindow::new(self.context_length);
		let mut words: Vec<String> = Vec::new();

		for _ in 0..max_tokens {
			let next = match self.successors(&window).and_then(|s| s.sample(rng)) {
				Some(token) => token.to_owned(),
				None => break,
			};
			window.shift(&next);
			words.push(next);
		}

		words.join(" ")
	}

	/// Merges another model into this one.
	///
	/// # Notes
	/// - Both models must have the same context length.
	/// - Occurrence counts of matching contexts and successors are summed.
	///
	/// # Errors
	/// Returns `Error::Configuration` if the context lengths differ.
	pub fn merge(&mut self, other: &Self) -> Result<()> {
		if self.context_length != other.context_length {
			return Err(Error::Configuration(format!(
				"context length mismatch: self={}, other={}",
				self.context_length, other.context_length
			)));
		}

		for (key, successors) in &other.table {
			if let Some(existing) = self.table.get_mut(key) {
				existing.merge(successors);
			} else {
				self.table.insert(key.clone(), successors.clone());
			}
		}

		Ok(())
	}

	/// Serializes the model with postcard.
	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		Ok(postcard::to_stdvec(self)?)
	}

	/// Restores a model serialized with [`TransitionModel::to_bytes`].
	///
	/// # Errors
	/// Fails on malformed input, or if the snapshot claims a zero context length.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		let model: Self = postcard::from_bytes(bytes)?;
		if model.context_length < 1 {
			return Err(Error::Configuration("snapshot has a context length of 0".to_owned()));
		}
		Ok(model)
	}

	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		std::fs::write(path, self.to_bytes()?)?;
		Ok(())
	}

	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		Self::from_bytes(&std::fs::read(path)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::SmallRng;

	fn window(tokens: &[&str], length: usize) -> ContextWindow {
		let mut window = ContextWindow::new(length);
		for token in tokens {
			window.shift(token);
		}
		window
	}

	fn alternating() -> TransitionModel {
		let mut model = TransitionModel::new(1).unwrap();
		model.feed(&["a", "b", "a", "b", "a", "b"]);
		model
	}

	#[test]
	fn zero_context_length_is_rejected() {
		assert!(matches!(TransitionModel::new(0), Err(Error::Configuration(_))));
	}

	#[test]
	fn feed_counts_every_transition() {
		let model = alternating();

		let start = model.successors(&ContextWindow::new(1)).unwrap();
		assert_eq!(start.count("a"), 1);
		assert_eq!(start.total(), 1);

		let after_a = model.successors(&window(&["a"], 1)).unwrap();
		assert_eq!(after_a.count("b"), 3);
		assert_eq!(after_a.len(), 1);

		let after_b = model.successors(&window(&["b"], 1)).unwrap();
		assert_eq!(after_b.count("a"), 2);
		assert_eq!(after_b.len(), 1);

		assert_eq!(model.len(), 3);
	}

	#[test]
	fn counts_match_occurrences_with_longer_context() {
		let tokens = ["one", "fish", "one", "fish", "two", "fish"];
		let mut model = TransitionModel::new(2).unwrap();
		model.feed(&tokens);

		assert_eq!(model.successors(&window(&["one", "fish"], 2)).unwrap().count("one"), 1);
		assert_eq!(model.successors(&window(&["one", "fish"], 2)).unwrap().count("two"), 1);
		assert_eq!(model.successors(&window(&["fish", "one"], 2)).unwrap().count("fish"), 1);
		assert_eq!(model.successors(&window(&["fish", "two"], 2)).unwrap().count("fish"), 1);
		assert_eq!(model.successors(&window(&["one"], 2)).unwrap().count("fish"), 1);
		assert!(model.successors(&window(&["two", "fish"], 2)).is_none());
	}

	#[test]
	fn context_resets_between_feeds() {
		let mut split = TransitionModel::new(1).unwrap();
		split.feed(&["a", "b"]);
		split.feed(&["c"]);

		let mut joined = TransitionModel::new(1).unwrap();
		joined.feed(&["a", "b", "c"]);

		// "c" follows the placeholder when fed alone, "b" when fed together
		assert_eq!(split.successors(&ContextWindow::new(1)).unwrap().count("c"), 1);
		assert!(split.successors(&window(&["b"], 1)).is_none());
		assert_eq!(joined.successors(&window(&["b"], 1)).unwrap().count("c"), 1);
		assert_ne!(split, joined);
	}

	#[test]
	fn generate_zero_is_empty() {
		assert_eq!(alternating().generate(0), "");
		assert_eq!(TransitionModel::new(3).unwrap().generate(0), "");
	}

	#[test]
	fn empty_model_generates_empty_string() {
		assert_eq!(TransitionModel::new(2).unwrap().generate(50), "");
	}

	#[test]
	fn alternating_golden_output() {
		let model = alternating();
		let mut rng = SmallRng::seed_from_u64(7);
		assert_eq!(model.generate_with(5, &mut rng), "a b a b a");
		assert_eq!(model.generate_with(2, &mut rng), "a b");
	}

	#[test]
	fn generation_stops_without_successors() {
		let mut model = TransitionModel::new(1).unwrap();
		model.feed(&["hello", "world"]);
		assert_eq!(model.generate(10), "hello world");
	}

	#[test]
	fn seeded_generation_is_reproducible() {
		let mut model = TransitionModel::new(1).unwrap();
		model.feed(&["the", "cat", "sat", "on", "the", "mat"]);
		model.feed(&["the", "dog", "sat", "on", "the", "cat"]);
		model.feed(&["a", "dog", "ran"]);

		let first = model.generate_with(20, &mut SmallRng::seed_from_u64(42));
		let second = model.generate_with(20, &mut SmallRng::seed_from_u64(42));
		assert_eq!(first, second);
		assert!(first.split(' ').count() <= 20);
	}

	#[test]
	fn branching_golden_output() {
		let mut model = TransitionModel::new(1).unwrap();
		model.feed(&["the", "cat", "sat", "on", "the", "mat"]);
		model.feed(&["the", "dog", "sat", "on", "the", "cat"]);
		model.feed(&["a", "dog", "ran"]);

		let mut rng = SmallRng::seed_from_u64(1);
		assert_eq!(model.generate_with(20, &mut rng), "the dog ran");
		assert_eq!(model.generate_with(20, &mut rng), "the cat sat on the cat sat on the cat sat on the dog ran");

		let mut rng = SmallRng::seed_from_u64(7);
		assert_eq!(
			model.generate_with(20, &mut rng),
			"a dog sat on the cat sat on the cat sat on the cat sat on the cat sat on"
		);
	}

	#[test]
	fn merge_equals_feeding_both() {
		let mut left = TransitionModel::new(1).unwrap();
		left.feed(&["x", "y"]);
		let mut right = TransitionModel::new(1).unwrap();
		right.feed(&["x", "z"]);
		left.merge(&right).unwrap();

		let mut both = TransitionModel::new(1).unwrap();
		both.feed(&["x", "y"]);
		both.feed(&["x", "z"]);
		assert_eq!(left, both);
	}

	#[test]
	fn merge_rejects_different_context_length() {
		let mut left = TransitionModel::new(1).unwrap();
		let right = TransitionModel::new(2).unwrap();
		assert!(matches!(left.merge(&right), Err(Error::Configuration(_))));
	}

	#[test]
	fn snapshot_survives_disk() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("model.bin");
		let model = alternating();
		model.save(&path).unwrap();
		assert_eq!(TransitionModel::load(&path).unwrap(), model);
	}
}

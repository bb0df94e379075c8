use std::collections::BTreeMap;

use rand::Rng;

use serde::{Deserialize, Serialize};

/// Frequency-weighted distribution of the tokens that followed one context.
///
/// Conceptually, this is a node in a Markov chain where outgoing edges
/// are weighted by their number of observations.
///
/// ## Responsibilities:
/// - Accumulate successor occurrences during learning
/// - Map a uniform draw in `[0, total)` to a successor (weighted sampling)
/// - Merge with the distribution of the same context from another model
///
/// ## Invariants
/// - Each occurrence count is strictly positive
/// - `total` equals the sum of all counts
/// - Successors are enumerated in a stable (sorted) order, so a given
///   random source always yields the same choices
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Successors {
	/// Example: { "cheese" => 42, "bread" => 3 }
	counts: BTreeMap<String, u64>,
	total: u64,
}

impl Successors {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records one occurrence of `token` after this context.
	pub fn add(&mut self, token: &str) {
		match self.counts.get_mut(token) {
			Some(count) => *count += 1,
			None => {
				self.counts.insert(token.to_owned(), 1);
			}
		}
		self.total += 1;
	}

	/// Occurrences of `token`, zero if it was never seen here.
	pub fn count(&self, token: &str) -> u64 {
		self.counts.get(token).copied().unwrap_or(0)
	}

	/// Sum of all occurrence counts.
	pub fn total(&self) -> u64 {
		self.total
	}

	/// Number of distinct successors.
	pub fn len(&self) -> usize {
		self.counts.len()
	}

	pub fn is_empty(&self) -> bool {
		self.counts.is_empty()
	}

	/// Iterates `(token, count)` pairs in stable order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
		self.counts.iter().map(|(token, count)| (token.as_str(), *count))
	}

	/// Maps a draw in `[0, total)` to its bucket.
	///
	/// Walks the distribution, subtracting each count until the draw falls
	/// inside a bucket. Returns `None` for an out-of-range draw.
	pub fn pick(&self, mut draw: u64) -> Option<&str> {
		for (token, count) in &self.counts {
			if draw < *count {
				return Some(token.as_str());
			}
			draw -= count;
		}
		None
	}

	/// Chooses a successor with probability proportional to its count.
	///
	/// Returns `None` if the distribution is empty.
	pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&str> {
		if self.total == 0 {
			return None;
		}
		self.pick(rng.random_range(0..self.total))
	}

	/// Adds every count of `other` into this distribution.
	pub fn merge(&mut self, other: &Self) {
		for (token, count) in &other.counts {
			*self.counts.entry(token.clone()).or_insert(0) += count;
		}
		self.total += other.total;
	}
}

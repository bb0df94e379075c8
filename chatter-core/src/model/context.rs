use std::collections::VecDeque;

/// Separator used when a window is turned into a table key.
///
/// Tokens may contain spaces when space is not a delimiter, so the key uses
/// the ASCII unit separator instead.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// The `L` most recent tokens, used as the lookup key into the transition table.
///
/// # Invariants
/// - The window always holds exactly `L` entries.
/// - A fresh window holds `L` empty-string placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextWindow {
	tokens: VecDeque<String>,
}

impl ContextWindow {
	/// Creates a window of `length` placeholders.
	pub fn new(length: usize) -> Self {
		Self { tokens: std::iter::repeat_n(String::new(), length).collect() }
	}

	pub fn len(&self) -> usize {
		self.tokens.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tokens.is_empty()
	}

	/// Drops the oldest token and appends `token`.
	pub fn shift(&mut self, token: &str) {
		if self.tokens.pop_front().is_some() {
			self.tokens.push_back(token.to_owned());
		}
	}

	/// Order-preserving serialization of the window.
	pub fn key(&self) -> String {
		let mut key = String::new();
		for (i, token) in self.tokens.iter().enumerate() {
			if i > 0 {
				key.push(KEY_SEPARATOR);
			}
			key.push_str(token);
		}
		key
	}
}

use std::{fmt, io};

/// Errors surfaced by the engine.
///
/// The statistical generation path never produces one of these; only
/// configuration, persistence, and the external backend can fail.
#[derive(Debug)]
pub enum Error {
	/// A training run was requested while another one is in flight.
	AlreadyTraining,
	/// The external generative process failed or produced unusable output.
	Backend(String),
	/// Rejected configuration (e.g. a context length of zero).
	Configuration(String),
	/// Local file I/O (corpus, settings, snapshots).
	Io(io::Error),
	/// Snapshot or settings (de)serialization.
	Serialization(String),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::AlreadyTraining => write!(f, "the backend is already training"),
			Error::Backend(msg) => write!(f, "backend error: {msg}"),
			Error::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
			Error::Io(e) => write!(f, "I/O error: {e}"),
			Error::Serialization(msg) => write!(f, "serialization error: {msg}"),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		Error::Io(e)
	}
}

impl From<postcard::Error> for Error {
	fn from(e: postcard::Error) -> Self {
		Error::Serialization(e.to_string())
	}
}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Error::Serialization(e.to_string())
	}
}

pub type Result<T> = std::result::Result<T, Error>;

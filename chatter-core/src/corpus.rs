//! Sources of the retained message corpus.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::Result;
use crate::io;

/// Store holding every message the engine has learned from.
///
/// The engine never assumes an upper bound on its size.
pub trait CorpusSource: Send + Sync {
	/// Every retained message, oldest first.
	fn messages(&self) -> Result<Vec<String>>;

	/// Retains one more message.
	fn add_message(&self, text: &str) -> Result<()>;
}

/// Corpus kept in a text file, one message per line.
///
/// Line breaks inside a message are flattened to spaces so that one line
/// always maps back to one message. A missing file is an empty corpus.
#[derive(Debug)]
pub struct FileCorpus {
	path: PathBuf,
	write_lock: Mutex<()>,
}

impl FileCorpus {
	pub fn new<P: AsRef<Path>>(path: P) -> Self {
		Self { path: path.as_ref().to_path_buf(), write_lock: Mutex::new(()) }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

impl CorpusSource for FileCorpus {
	fn messages(&self) -> Result<Vec<String>> {
		if !self.path.exists() {
			return Ok(Vec::new());
		}
		Ok(io::read_lines(&self.path)?.into_iter().filter(|line| !line.is_empty()).collect())
	}

	fn add_message(&self, text: &str) -> Result<()> {
		let line = text.replace(['\r', '\n'], " ");
		let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
		io::append_lines(&self.path, &[line])?;
		Ok(())
	}
}

/// Corpus held in memory; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryCorpus {
	messages: Mutex<Vec<String>>,
}

impl MemoryCorpus {
	pub fn new<I, S>(messages: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self { messages: Mutex::new(messages.into_iter().map(Into::into).collect()) }
	}
}

impl CorpusSource for MemoryCorpus {
	fn messages(&self) -> Result<Vec<String>> {
		Ok(self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone())
	}

	fn add_message(&self, text: &str) -> Result<()> {
		self.messages.lock().unwrap_or_else(PoisonError::into_inner).push(text.to_owned());
		Ok(())
	}
}

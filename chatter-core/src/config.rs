use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings of the statistical brain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrainConfig {
	/// Every character of this string splits tokens.
	pub split_chars: String,
	/// Token cap for one generated message.
	pub max_generated_length: usize,
	/// Context length `L` of the Markov chain.
	pub chain_length: usize,
	/// Prefer the external generative backend when generating batches.
	pub use_neural: bool,
}

impl Default for BrainConfig {
	fn default() -> Self {
		Self {
			split_chars: "-.,?!/\\\r \n\t".to_owned(),
			max_generated_length: 30,
			chain_length: 1,
			use_neural: false,
		}
	}
}

impl BrainConfig {
	/// # Errors
	/// Returns `Error::Configuration` if `chain_length < 1`.
	pub fn validate(&self) -> Result<()> {
		if self.chain_length < 1 {
			return Err(Error::Configuration(format!(
				"chain_length must be >= 1, got {}",
				self.chain_length
			)));
		}
		Ok(())
	}
}

/// Settings of the external generative backend and of the tasks driving it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
	/// Interpreter used to run the scripts.
	pub program: String,
	pub train_script: PathBuf,
	pub generate_script: PathBuf,
	/// Where the trained model artifact lives.
	pub save_path: PathBuf,
	pub epochs_per_training: u32,
	pub temperature: f64,
	pub max_generation_characters: usize,
	/// Minutes between periodic trainings, 0 disables them.
	pub training_period_mins: u64,
	/// Target size of the generation buffer.
	pub buffer_capacity: usize,
	pub replenish_interval_secs: u64,
}

impl Default for BackendConfig {
	fn default() -> Self {
		Self {
			program: "python3".to_owned(),
			train_script: PathBuf::from("./python/train.py"),
			generate_script: PathBuf::from("./python/generate.py"),
			save_path: PathBuf::from("opdata/py-rnn.bin"),
			epochs_per_training: 30,
			temperature: 0.2,
			max_generation_characters: 80,
			training_period_mins: 0,
			buffer_capacity: 100,
			replenish_interval_secs: 5,
		}
	}
}

impl BackendConfig {
	/// Period of the training loop, `None` when periodic training is off.
	pub fn training_period(&self) -> Option<Duration> {
		(self.training_period_mins > 0).then(|| Duration::from_secs(self.training_period_mins * 60))
	}

	pub fn replenish_interval(&self) -> Duration {
		Duration::from_secs(self.replenish_interval_secs.max(1))
	}
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct CorpusConfig {
	/// Text file holding one message per line.
	pub path: PathBuf,
}

impl Default for CorpusConfig {
	fn default() -> Self {
		Self { path: PathBuf::from("opdata/corpus.txt") }
	}
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
	pub host: String,
	pub port: u16,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self { host: "127.0.0.1".to_owned(), port: 5000 }
	}
}

/// Every setting category, persisted as one JSON document.
///
/// Missing sections and fields take their default value.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
	pub brain: BrainConfig,
	pub backend: BackendConfig,
	pub corpus: CorpusConfig,
	pub server: ServerConfig,
}

impl Settings {
	/// Reads and validates settings from a JSON file.
	pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
		let bytes = std::fs::read(path)?;
		let settings: Self = serde_json::from_slice(&bytes)?;
		settings.brain.validate()?;
		Ok(settings)
	}

	/// Writes settings as pretty JSON, creating parent folders as needed.
	pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
		let path = path.as_ref();
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			std::fs::create_dir_all(parent)?;
		}
		std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
		Ok(())
	}

	/// Loads settings, falling back to (and writing out) the defaults when
	/// the file is missing or unreadable.
	///
	/// The second value carries the reason defaults were used, if any.
	pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<Error>) {
		match Self::load(&path) {
			Ok(settings) => (settings, None),
			Err(e) => {
				let settings = Self::default();
				let reason = match settings.save(&path) {
					Ok(()) => e,
					Err(save_error) => Error::Configuration(format!("{e}; writing defaults also failed: {save_error}")),
				};
				(settings, Some(reason))
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn partial_document_keeps_defaults() {
		let settings: Settings =
			serde_json::from_str(r#"{ "brain": { "chain_length": 2 }, "server": { "port": 8080 } }"#).unwrap();
		assert_eq!(settings.brain.chain_length, 2);
		assert_eq!(settings.brain.max_generated_length, 30);
		assert_eq!(settings.server.port, 8080);
		assert_eq!(settings.server.host, "127.0.0.1");
		assert_eq!(settings.backend, BackendConfig::default());
	}

	#[test]
	fn zero_chain_length_is_invalid() {
		let config = BrainConfig { chain_length: 0, ..BrainConfig::default() };
		assert!(matches!(config.validate(), Err(Error::Configuration(_))));
		assert!(BrainConfig::default().validate().is_ok());
	}

	#[test]
	fn missing_file_writes_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("settings.json");

		let (settings, reason) = Settings::load_or_default(&path);
		assert_eq!(settings, Settings::default());
		assert!(matches!(reason, Some(Error::Io(_))));

		let (reloaded, reason) = Settings::load_or_default(&path);
		assert_eq!(reloaded, Settings::default());
		assert!(reason.is_none());
	}

	#[test]
	fn invalid_file_is_rejected() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("settings.json");
		std::fs::write(&path, r#"{ "brain": { "chain_length": 0 } }"#).unwrap();
		assert!(matches!(Settings::load(&path), Err(Error::Configuration(_))));
	}

	#[test]
	fn training_period() {
		let mut backend = BackendConfig::default();
		assert_eq!(backend.training_period(), None);
		backend.training_period_mins = 2;
		assert_eq!(backend.training_period(), Some(Duration::from_secs(120)));
	}
}

//! Contract with the external generative backend, and its subprocess
//! implementation.

use std::future::Future;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Opaque text-in/text-out generative process.
///
/// Calls may take minutes; no timeout is applied here.
pub trait Backend: Send + Sync + 'static {
	/// Trains on the corpus file at `corpus_path` (one message per line)
	/// and writes the resulting model to `model_path`.
	fn train(&self, corpus_path: &Path, epochs: u32, model_path: &Path) -> impl Future<Output = Result<()>> + Send;

	/// Generates `count` lines of at most `max_chars` characters each and
	/// returns the raw output.
	fn generate_lines(
		&self,
		model_path: &Path,
		temperature: f64,
		count: usize,
		max_chars: usize,
	) -> impl Future<Output = Result<String>> + Send;
}

/// Splits raw backend output into lines, ignoring blank ones.
pub fn parse_lines(raw: &str) -> Vec<String> {
	raw.lines().map(str::trim_end).filter(|line| !line.trim().is_empty()).map(str::to_owned).collect()
}

/// Runs the backend as `<program> <script> <args…>` subprocesses.
///
/// A subprocess is killed when the call waiting on it is dropped.
#[derive(Debug, Clone)]
pub struct PythonBackend {
	program: String,
	train_script: PathBuf,
	generate_script: PathBuf,
}

impl PythonBackend {
	pub fn new(program: impl Into<String>, train_script: impl Into<PathBuf>, generate_script: impl Into<PathBuf>) -> Self {
		Self { program: program.into(), train_script: train_script.into(), generate_script: generate_script.into() }
	}

	pub fn from_config(config: &BackendConfig) -> Self {
		Self::new(config.program.clone(), config.train_script.clone(), config.generate_script.clone())
	}
}

impl Backend for PythonBackend {
	async fn train(&self, corpus_path: &Path, epochs: u32, model_path: &Path) -> Result<()> {
		let output = Command::new(&self.program)
			.arg(&self.train_script)
			.arg(corpus_path)
			.arg(epochs.to_string())
			.arg(model_path)
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|e| Error::Backend(format!("failed to start training: {e}")))?;

		if !output.status.success() {
			let mut diagnostic = String::from_utf8_lossy(&output.stdout).into_owned();
			diagnostic.push_str(&String::from_utf8_lossy(&output.stderr));
			return Err(Error::Backend(format!("training failed ({}):\n{}", output.status, diagnostic.trim())));
		}
		Ok(())
	}

	async fn generate_lines(&self, model_path: &Path, temperature: f64, count: usize, max_chars: usize) -> Result<String> {
		let output = Command::new(&self.program)
			.arg(&self.generate_script)
			.arg(model_path)
			.arg(format!("{temperature:.6}"))
			.arg(count.to_string())
			.arg(max_chars.to_string())
			.kill_on_drop(true)
			.output()
			.await
			.map_err(|e| Error::Backend(format!("failed to start generation: {e}")))?;

		if !output.status.success() {
			return Err(Error::Backend(format!(
				"generation failed ({}): {}",
				output.status,
				String::from_utf8_lossy(&output.stderr).trim()
			)));
		}
		String::from_utf8(output.stdout).map_err(|_| Error::Backend("generation output is not valid UTF-8".to_owned()))
	}
}

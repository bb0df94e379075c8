use std::io::{BufWriter, Write};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backend::Backend;
use crate::config::BackendConfig;
use crate::corpus::CorpusSource;
use crate::error::{Error, Result};
use crate::sink::Sink;

const COMPONENT: &str = "training";

/// Whether a training run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingState {
	Idle,
	Training,
}

#[derive(Debug, Clone, Copy)]
enum TrainingEvent {
	Start,
	Finish,
}

impl TrainingState {
	/// The only place where the state changes.
	fn next(self, event: TrainingEvent) -> Result<Self> {
		match (self, event) {
			(TrainingState::Idle, TrainingEvent::Start) => Ok(TrainingState::Training),
			(TrainingState::Training, TrainingEvent::Start) => Err(Error::AlreadyTraining),
			(_, TrainingEvent::Finish) => Ok(TrainingState::Idle),
		}
	}
}

#[derive(Debug)]
struct StateMachine {
	state: Mutex<TrainingState>,
}

impl StateMachine {
	fn new() -> Self {
		Self { state: Mutex::new(TrainingState::Idle) }
	}

	fn current(&self) -> TrainingState {
		*self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn apply(&self, event: TrainingEvent) -> Result<TrainingState> {
		let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
		*state = state.next(event)?;
		Ok(*state)
	}

	/// Enters `Training`; the returned guard goes back to `Idle` when dropped.
	fn begin(self: &Arc<Self>) -> Result<TrainingRun> {
		self.apply(TrainingEvent::Start)?;
		Ok(TrainingRun { machine: Arc::clone(self) })
	}
}

/// Proof that a training run holds the state machine.
///
/// Owned by the spawned run, not by the caller, so an abandoned caller
/// cannot release the state while the backend is still working.
struct TrainingRun {
	machine: Arc<StateMachine>,
}

impl Drop for TrainingRun {
	fn drop(&mut self) {
		// Finish is accepted from every state
		let _ = self.machine.apply(TrainingEvent::Finish);
	}
}

/// Writes `corpus`, one message per line, to a fresh temporary file.
fn write_corpus(corpus: &[String]) -> Result<NamedTempFile> {
	let mut file = tempfile::Builder::new().prefix("chatter-corpus-").suffix(".txt").tempfile()?;
	{
		let mut writer = BufWriter::new(file.as_file_mut());
		for (i, message) in corpus.iter().enumerate() {
			if i > 0 {
				writer.write_all(b"\n")?;
			}
			writer.write_all(message.as_bytes())?;
		}
		writer.flush()?;
	}
	Ok(file)
}

fn task_failed(e: JoinError) -> Error {
	Error::Backend(format!("training task failed: {e}"))
}

struct PeriodicTask {
	token: CancellationToken,
	// Detached on stop: an in-flight run is left to complete
	_handle: JoinHandle<()>,
}

/// Serializes training runs against the backend and schedules them.
///
/// # Responsibilities
/// - Allow at most one training run at a time (`AlreadyTraining` otherwise)
/// - Hand the corpus to the backend through a temporary file that is
///   removed on every exit path
/// - Run a cancellable periodic retraining loop
///
/// # Notes
/// - No lock used by the generation path is held while the backend trains.
/// - Stopping the periodic loop never interrupts a run already in progress.
pub struct TrainingCoordinator<B: Backend> {
	backend: Arc<B>,
	settings: RwLock<BackendConfig>,
	corpus: Arc<dyn CorpusSource>,
	machine: Arc<StateMachine>,
	periodic: Mutex<Option<PeriodicTask>>,
	sink: Arc<dyn Sink>,
}

impl<B: Backend> TrainingCoordinator<B> {
	pub fn new(backend: Arc<B>, settings: BackendConfig, corpus: Arc<dyn CorpusSource>, sink: Arc<dyn Sink>) -> Self {
		Self {
			backend,
			settings: RwLock::new(settings),
			corpus,
			machine: Arc::new(StateMachine::new()),
			periodic: Mutex::new(None),
			sink,
		}
	}

	pub fn state(&self) -> TrainingState {
		self.machine.current()
	}

	/// Backend parameters used by later runs.
	pub fn update_settings(&self, settings: BackendConfig) {
		*self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
	}

	/// Trains the backend on `corpus`, blocking until the backend is done.
	///
	/// # Behavior
	/// - Writes the corpus, one message per line, to a fresh temporary file.
	/// - Runs the backend training routine on it.
	/// - Removes the file and returns to `Idle`, whatever the outcome.
	///
	/// # Notes
	/// - The run lives in its own task: dropping the returned future only
	///   stops waiting for it. The state stays `Training` until the backend
	///   is done.
	///
	/// # Errors
	/// - `Error::AlreadyTraining` if a run is in flight; nothing is touched.
	/// - `Error::Io` if the temporary file cannot be written.
	/// - Any backend failure, as reported by the backend.
	pub async fn train<S: AsRef<str>>(&self, corpus: &[S]) -> Result<()> {
		let messages: Vec<String> = corpus.iter().map(|message| message.as_ref().to_owned()).collect();
		self.run(move || Ok(messages)).await
	}

	/// Fetches the whole corpus and trains on it.
	///
	/// The corpus is only read once the run has been accepted.
	pub async fn train_from_corpus(&self) -> Result<()> {
		let corpus = Arc::clone(&self.corpus);
		self.run(move || corpus.messages()).await
	}

	async fn run<F>(&self, load: F) -> Result<()>
	where
		F: FnOnce() -> Result<Vec<String>> + Send + 'static,
	{
		let run = self.machine.begin()?;
		let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner).clone();
		let backend = Arc::clone(&self.backend);
		let sink = Arc::clone(&self.sink);

		let task = tokio::spawn(async move {
			let _run = run;

			// Blocking file I/O
			let (count, file) = tokio::task::spawn_blocking(move || {
				let messages = load()?;
				Ok::<_, Error>((messages.len(), write_corpus(&messages)?))
			})
			.await
			.map_err(task_failed)??;

			sink.info(COMPONENT, &format!("training on {count} messages"));
			let result = backend.train(file.path(), settings.epochs_per_training, &settings.save_path).await;
			match &result {
				Ok(()) => sink.info(COMPONENT, "training finished"),
				Err(e) => sink.error(COMPONENT, &format!("training failed: {e}")),
			}
			result
		});

		task.await.map_err(task_failed)?
	}

	/// Starts (or restarts) periodic training on the current tokio runtime.
	///
	/// The first run happens one `period` after the call. A previous loop,
	/// if any, is stopped first.
	///
	/// # Errors
	/// Returns `Error::Configuration` for a zero period.
	pub fn start_periodic(self: &Arc<Self>, period: Duration) -> Result<()> {
		if period.is_zero() {
			return Err(Error::Configuration("training period must be positive".to_owned()));
		}

		let token = CancellationToken::new();
		let coordinator = Arc::clone(self);
		let loop_token = token.clone();
		let handle = tokio::spawn(async move { coordinator.periodic_loop(period, loop_token).await });

		let previous = self.periodic.lock().unwrap_or_else(PoisonError::into_inner).replace(PeriodicTask { token, _handle: handle });
		if let Some(previous) = previous {
			previous.token.cancel();
		}
		self.sink.info(COMPONENT, &format!("periodic training every {}s", period.as_secs_f64()));
		Ok(())
	}

	/// Stops scheduling new runs. Returns false if no loop was running.
	pub fn stop_periodic(&self) -> bool {
		match self.periodic.lock().unwrap_or_else(PoisonError::into_inner).take() {
			Some(task) => {
				task.token.cancel();
				true
			}
			None => false,
		}
	}

	pub fn is_periodic_running(&self) -> bool {
		self.periodic.lock().unwrap_or_else(PoisonError::into_inner).is_some()
	}

	async fn periodic_loop(&self, period: Duration, token: CancellationToken) {
		let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;
				_ = token.cancelled() => break,
				_ = ticker.tick() => {}
			}

			match self.train_from_corpus().await {
				Ok(()) => {}
				Err(Error::AlreadyTraining) => self.sink.warn(COMPONENT, "skipping periodic run, already training"),
				// Already reported by `train`
				Err(Error::Backend(_)) => {}
				Err(e) => self.sink.error(COMPONENT, &format!("periodic training failed: {e}")),
			}
		}
		self.sink.info(COMPONENT, "periodic training stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::backend::testing::{FailingBackend, GatedBackend, ScriptedBackend};
	use crate::corpus::MemoryCorpus;
	use crate::sink::MemorySink;
	use std::sync::atomic::Ordering;
	use tracing::Level;

	fn coordinator<B: Backend>(backend: Arc<B>, sink: Arc<MemorySink>) -> Arc<TrainingCoordinator<B>> {
		let corpus = Arc::new(MemoryCorpus::new(["first message", "second message"]));
		Arc::new(TrainingCoordinator::new(backend, BackendConfig::default(), corpus, sink))
	}

	#[test]
	fn state_transitions() {
		use TrainingEvent::*;
		use TrainingState::*;
		assert_eq!(Idle.next(Start).unwrap(), Training);
		assert!(matches!(Training.next(Start), Err(Error::AlreadyTraining)));
		assert_eq!(Training.next(Finish).unwrap(), Idle);
		assert_eq!(Idle.next(Finish).unwrap(), Idle);
	}

	#[tokio::test]
	async fn second_run_is_rejected_while_first_is_in_flight() {
		let backend = GatedBackend::new();
		let coordinator = coordinator(backend.clone(), Arc::new(MemorySink::new()));

		let first = {
			let coordinator = coordinator.clone();
			tokio::spawn(async move { coordinator.train(&["hello world", "bye"]).await })
		};
		backend.started.notified().await;
		assert_eq!(coordinator.state(), TrainingState::Training);

		assert!(matches!(coordinator.train(&["intruder"]).await, Err(Error::AlreadyTraining)));
		assert!(matches!(coordinator.train_from_corpus().await, Err(Error::AlreadyTraining)));

		// The first run's corpus file is untouched
		let path = backend.corpus_paths.lock().unwrap()[0].clone();
		assert!(path.exists());
		assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello world\nbye");

		backend.release.notify_one();
		first.await.unwrap().unwrap();

		assert!(!path.exists());
		assert_eq!(coordinator.state(), TrainingState::Idle);
		assert_eq!(backend.corpus_paths.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn abandoned_caller_keeps_the_run_exclusive() {
		let backend = GatedBackend::new();
		let coordinator = coordinator(backend.clone(), Arc::new(MemorySink::new()));

		let caller = {
			let coordinator = coordinator.clone();
			tokio::spawn(async move { coordinator.train(&["hello world"]).await })
		};
		backend.started.notified().await;
		caller.abort();
		assert!(caller.await.unwrap_err().is_cancelled());

		// The backend is still working: the run holds the state and its file
		assert_eq!(coordinator.state(), TrainingState::Training);
		assert!(matches!(coordinator.train(&["second"]).await, Err(Error::AlreadyTraining)));
		let path = backend.corpus_paths.lock().unwrap()[0].clone();
		assert!(path.exists());

		backend.release.notify_one();
		for _ in 0..100 {
			if coordinator.state() == TrainingState::Idle {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
		assert_eq!(coordinator.state(), TrainingState::Idle);
		assert!(!path.exists());
		assert_eq!(backend.corpus_paths.lock().unwrap().len(), 1);
	}

	#[tokio::test]
	async fn failure_cleans_up_and_returns_to_idle() {
		let backend = Arc::new(FailingBackend::default());
		let sink = Arc::new(MemorySink::new());
		let coordinator = coordinator(backend.clone(), sink.clone());

		assert!(matches!(coordinator.train_from_corpus().await, Err(Error::Backend(_))));
		assert_eq!(coordinator.state(), TrainingState::Idle);

		let path = backend.corpus_paths.lock().unwrap()[0].clone();
		assert!(!path.exists());
		assert!(sink.contains(Level::ERROR, "training failed"));

		// The next run is accepted
		assert!(matches!(coordinator.train(&["again"]).await, Err(Error::Backend(_))));
		assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn periodic_training_runs_until_stopped() {
		let backend = Arc::new(ScriptedBackend::default());
		let coordinator = coordinator(backend.clone(), Arc::new(MemorySink::new()));

		coordinator.start_periodic(Duration::from_millis(10)).unwrap();
		assert!(coordinator.is_periodic_running());
		tokio::time::sleep(Duration::from_millis(100)).await;

		assert!(coordinator.stop_periodic());
		assert!(!coordinator.is_periodic_running());
		assert!(!coordinator.stop_periodic());
		tokio::time::sleep(Duration::from_millis(20)).await;

		let runs = backend.train_calls.load(Ordering::SeqCst);
		assert!(runs >= 2, "expected several runs, got {runs}");
		tokio::time::sleep(Duration::from_millis(60)).await;
		assert_eq!(backend.train_calls.load(Ordering::SeqCst), runs);

		// Restarting behaves like a fresh start
		coordinator.start_periodic(Duration::from_millis(10)).unwrap();
		tokio::time::sleep(Duration::from_millis(60)).await;
		coordinator.stop_periodic();
		assert!(backend.train_calls.load(Ordering::SeqCst) > runs);
	}

	#[tokio::test]
	async fn stopping_does_not_interrupt_a_run() {
		let backend = GatedBackend::new();
		let coordinator = coordinator(backend.clone(), Arc::new(MemorySink::new()));

		coordinator.start_periodic(Duration::from_millis(5)).unwrap();
		backend.started.notified().await;
		coordinator.stop_periodic();
		assert_eq!(coordinator.state(), TrainingState::Training);

		backend.release.notify_one();
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(coordinator.state(), TrainingState::Idle);
		assert_eq!(backend.corpus_paths.lock().unwrap().len(), 1);
		assert_eq!(backend.corpus_contents.lock().unwrap()[0], "first message\nsecond message");
	}

	#[tokio::test]
	async fn zero_period_is_rejected() {
		let coordinator = coordinator(Arc::new(ScriptedBackend::default()), Arc::new(MemorySink::new()));
		assert!(matches!(coordinator.start_periodic(Duration::ZERO), Err(Error::Configuration(_))));
		assert!(!coordinator.is_periodic_running());
	}
}

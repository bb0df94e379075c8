use std::path::PathBuf;
use std::time::Duration;

use actix_web::{get, put, web, App, HttpResponse, HttpServer, Responder};

use anyhow::Context;
use chatter_core::{BackendConfig, BrainConfig, Engine, Error, FileCorpus, MemorySink, PythonBackend, Settings};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "chatter-server", about = "HTTP front for the chatter text-generation engine")]
struct Cli {
	/// Settings file, created with defaults if missing
	#[arg(long, default_value = "opdata/settings.json")]
	config: PathBuf,

	/// Enable verbose debug output
	#[arg(long)]
	verbose: bool,
}

/// Query parameters for the `/v1/generate_n` endpoint
#[derive(Deserialize)]
struct GenerateNParams {
	count: Option<usize>,
}

#[derive(Deserialize)]
struct PeriodParams {
	minutes: Option<u64>,
}

#[derive(Serialize)]
struct LogEntry {
	unix: u64,
	level: String,
	component: &'static str,
	message: String,
}

#[derive(Serialize)]
struct TrainingStatus {
	training: bool,
	periodic: bool,
}

struct SharedData {
	engine: Engine<PythonBackend>,
	logs: Arc<MemorySink>,
	default_period: Duration,
}

/// Huge values saturate instead of overflowing.
fn minutes_to_period(minutes: u64) -> Duration {
	Duration::from_secs(minutes.saturating_mul(60))
}

/// Maps engine errors to HTTP responses.
fn error_response(e: Error) -> HttpResponse {
	match e {
		Error::AlreadyTraining => HttpResponse::Conflict().body(e.to_string()),
		Error::Configuration(_) => HttpResponse::BadRequest().body(e.to_string()),
		_ => HttpResponse::InternalServerError().body(e.to_string()),
	}
}

/// HTTP GET endpoint `/v1/generate`
///
/// One message from the Markov brain.
#[get("/v1/generate")]
async fn get_generated(data: web::Data<SharedData>) -> impl Responder {
	HttpResponse::Ok().body(data.engine.generate())
}

/// HTTP GET endpoint `/v1/generate_n`
///
/// `count` messages (default 1, capped at 100), one per line. Never fails:
/// backend trouble falls back to the Markov brain.
#[get("/v1/generate_n")]
async fn get_generated_n(data: web::Data<SharedData>, query: web::Query<GenerateNParams>) -> impl Responder {
	let count = query.count.unwrap_or(1).min(100);
	HttpResponse::Ok().body(data.engine.generate_n(count).await.join("\n"))
}

/// HTTP PUT endpoint `/v1/messages`
///
/// Body: one message per line. Messages are stored, then learned.
#[put("/v1/messages")]
async fn put_messages(data: web::Data<SharedData>, body: String) -> impl Responder {
	let messages: Vec<&str> = body.lines().map(str::trim).filter(|s| !s.is_empty()).collect();
	if messages.is_empty() {
		return HttpResponse::BadRequest().body("No message in body");
	}

	match data.engine.add_messages(&messages) {
		Ok(()) => HttpResponse::Ok().body(format!("Learned {} messages", messages.len())),
		Err(e) => error_response(e),
	}
}

#[get("/v1/config")]
async fn get_config(data: web::Data<SharedData>) -> impl Responder {
	HttpResponse::Ok().json(data.engine.brain().config())
}

#[put("/v1/config")]
async fn put_config(data: web::Data<SharedData>, config: web::Json<BrainConfig>) -> impl Responder {
	// A context length change relearns the whole corpus
	let result = web::block(move || data.engine.update_configuration(config.into_inner())).await;
	match result {
		Ok(Ok(())) => HttpResponse::Ok().body("Configuration updated"),
		Ok(Err(e)) => error_response(e),
		Err(_) => HttpResponse::InternalServerError().body("Configuration update was cancelled"),
	}
}

#[get("/v1/backend")]
async fn get_backend(data: web::Data<SharedData>) -> impl Responder {
	HttpResponse::Ok().json(data.engine.backend_settings())
}

/// HTTP PUT endpoint `/v1/backend`
///
/// Generation, buffer and training parameters. The backend program and
/// scripts only change on restart.
#[put("/v1/backend")]
async fn put_backend(data: web::Data<SharedData>, settings: web::Json<BackendConfig>) -> impl Responder {
	data.engine.update_backend_settings(settings.into_inner());
	HttpResponse::Ok().body("Backend settings updated")
}

#[get("/v1/training")]
async fn get_training(data: web::Data<SharedData>) -> impl Responder {
	HttpResponse::Ok().json(TrainingStatus {
		training: data.engine.training_state() == chatter_core::TrainingState::Training,
		periodic: data.engine.is_periodic_training_running(),
	})
}

/// HTTP PUT endpoint `/v1/training/run`
///
/// Trains the backend on the whole corpus and answers when done.
#[put("/v1/training/run")]
async fn put_training_run(data: web::Data<SharedData>) -> impl Responder {
	match data.engine.train_now().await {
		Ok(()) => HttpResponse::Ok().body("Training finished"),
		Err(e) => error_response(e),
	}
}

#[put("/v1/training/start")]
async fn put_training_start(data: web::Data<SharedData>, query: web::Query<PeriodParams>) -> impl Responder {
	let period = query.minutes.map(minutes_to_period).unwrap_or(data.default_period);
	match data.engine.start_periodic_training(period) {
		Ok(()) => HttpResponse::Ok().body(format!("Periodic training every {} minutes", period.as_secs() / 60)),
		Err(e) => error_response(e),
	}
}

#[put("/v1/training/stop")]
async fn put_training_stop(data: web::Data<SharedData>) -> impl Responder {
	if data.engine.stop_periodic_training() {
		HttpResponse::Ok().body("Periodic training stopped")
	} else {
		HttpResponse::Ok().body("Periodic training was not running")
	}
}

#[get("/v1/logs")]
async fn get_logs(data: web::Data<SharedData>) -> impl Responder {
	let entries: Vec<LogEntry> = data
		.logs
		.lines()
		.into_iter()
		.map(|line| LogEntry {
			unix: line.unix,
			level: line.level.to_string(),
			component: line.component,
			message: line.message,
		})
		.collect();
	HttpResponse::Ok().json(entries)
}

fn init_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = if verbose {
		EnvFilter::new("debug")
	} else {
		EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
	};

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(false)
		.init();
}

/// Main entry point for the server.
///
/// Loads the settings, learns the stored corpus, starts the background
/// tasks the settings ask for, and serves the engine over HTTP.
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	init_tracing(cli.verbose);

	let (settings, reason) = Settings::load_or_default(&cli.config);
	if let Some(reason) = reason {
		tracing::warn!("using default settings ({}): {reason}", cli.config.display());
	}

	let logs = Arc::new(MemorySink::new());
	let engine = Engine::new(
		settings.brain.clone(),
		settings.backend.clone(),
		PythonBackend::from_config(&settings.backend),
		Arc::new(FileCorpus::new(&settings.corpus.path)),
		logs.clone(),
	)
	.context("failed to build the engine")?;

	let learned = engine.fill_from_corpus().context("failed to learn the corpus")?;
	tracing::info!("learned {learned} messages from {}", settings.corpus.path.display());

	if settings.brain.use_neural {
		engine.start_buffer_replenishment(settings.backend.replenish_interval());
	}
	if let Some(period) = settings.backend.training_period() {
		engine.start_periodic_training(period).context("failed to start periodic training")?;
	}

	let shared_data = web::Data::new(SharedData {
		engine,
		logs,
		default_period: settings.backend.training_period().unwrap_or(Duration::from_secs(60 * 60)),
	});

	tracing::info!("listening on {}:{}", settings.server.host, settings.server.port);
	HttpServer::new(move || {
		App::new()
			.app_data(shared_data.clone())
			.service(get_generated)
			.service(get_generated_n)
			.service(put_messages)
			.service(get_config)
			.service(put_config)
			.service(get_backend)
			.service(put_backend)
			.service(get_training)
			.service(put_training_run)
			.service(put_training_start)
			.service(put_training_stop)
			.service(get_logs)
	})
		.bind((settings.server.host.as_str(), settings.server.port))?
		.run()
		.await?;

	Ok(())
}

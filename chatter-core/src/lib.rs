//! Text-generation engine for chat bots.
//!
//! This crate learns word transitions from a growing corpus of messages
//! and generates new ones, including:
//! - A word-level Markov chain with a configurable context length
//! - A multi-character delimiter tokenizer
//! - A pre-filled buffer of lines produced by an external generative backend
//! - A coordinator guarding exclusive, periodic training runs of that backend
//! - A generation policy preferring the backend and falling back to the chain
//!
//! The [`Engine`] type wires everything together and is the entry point
//! for callers.

/// Contract with the external generative backend and its subprocess implementation.
pub mod backend;

/// Statistical brain: tokenizer settings plus a Markov chain.
pub mod brain;

/// Pool of pre-generated backend lines and its replenishment loop.
pub mod buffer;

/// Settings, persisted as JSON.
pub mod config;

/// Retained message corpus.
pub mod corpus;

/// Caller-facing facade.
pub mod engine;

pub mod error;

/// File helpers (line files, path derivation).
pub mod io;

/// Core Markov chain types.
pub mod model;

/// Neural-first, statistical-fallback generation policy.
pub mod orchestrator;

/// Observability sinks.
pub mod sink;

pub mod tokenizer;

/// Exclusive and periodic backend training.
pub mod training;

pub use backend::{Backend, PythonBackend};
pub use brain::{ConfigUpdate, GenerativeBrain};
pub use config::{BackendConfig, BrainConfig, Settings};
pub use corpus::{CorpusSource, FileCorpus, MemoryCorpus};
pub use engine::Engine;
pub use error::{Error, Result};
pub use sink::{MemorySink, Sink, TracingSink};
pub use training::TrainingState;

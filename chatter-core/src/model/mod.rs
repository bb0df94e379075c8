//! Word-level Markov chain used by the statistical generation path.
//!
//! - Fixed-length context windows (`ContextWindow`)
//! - Weighted successor distributions (`Successors`)
//! - The transition table itself (`TransitionModel`)

/// Fixed-length window of the most recent tokens, used as a table key.
pub mod context;

/// Weighted distribution of the tokens observed after one context.
///
/// Accumulates occurrence counts and maps random draws to successors.
pub mod successors;

/// Context-to-successor table.
///
/// Handles online learning, weighted generation, merging and postcard snapshots.
pub mod transition_model;

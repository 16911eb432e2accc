//! Error types for model unfolding.

use thiserror::Error;

/// Errors that can occur while constructing or mapping an unfolded model.
#[derive(Error, Debug)]
pub enum UnfoldError {
    /// A state label required by the formula is not present in the model
    #[error("the model does not have the label '{0}' required by the formula")]
    MissingLabel(String),

    /// The model is not in the canonical form the unfolder relies on
    #[error("model must be canonical to be unfolded: {0}")]
    NotCanonical(String),

    /// Transition-level rewards cannot be carried over to an unfolding
    #[error("transition rewards are not supported (reward model '{0}')")]
    TransitionRewards(String),

    #[error("the model has no observation function")]
    MissingObservations,

    #[error("the model has no state labelled 'init'")]
    NoInitialState,

    /// Structural invariant of the sparse transition system is broken
    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("invalid memory automaton: {0}")]
    InvalidMemory(String),

    /// A product state matched none of the mode/label combinations of the monitor
    #[error("unexpected state in unfolding: state {state} in mode {mode}")]
    UnexpectedState { state: usize, mode: usize },

    #[error("invalid scheduler: {0}")]
    InvalidScheduler(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for unfolding operations.
pub type Result<T> = std::result::Result<T, UnfoldError>;

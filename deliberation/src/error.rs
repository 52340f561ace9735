//! Terminal error taxonomy for deliberation requests.
//!
//! Transient per-model call failures never appear here — the gateway
//! collapses them into `ModelResponse { failed: true }` and the pipeline
//! treats failed peers as absent. Everything in this enum aborts the
//! request with a single user-visible message.

use thiserror::Error;

/// Errors that terminate a deliberation request.
#[derive(Debug, Error)]
pub enum DeliberationError {
    /// The chairman call failed or returned empty content. A council
    /// without a synthesized verdict has no defined output, so there is
    /// no fallback.
    #[error("chairman model {model} produced no usable answer")]
    ChairmanFailed { model: String },

    /// The analyst call failed outright (not a parse failure — those
    /// are recovered as raw text).
    #[error("analyst model {model} produced no usable answer")]
    AnalystFailed { model: String },

    #[error("no models available from the provider catalog")]
    EmptyCatalog,

    #[error("unknown selection strategy: {0}")]
    UnknownStrategy(String),

    /// Deliberation was requested while a clarification question is
    /// still pending.
    #[error("clarification in progress; answer the pending question first")]
    ClarificationInProgress,

    /// A clarification operation was invoked without an active
    /// clarification phase.
    #[error("clarification phase is not active")]
    ClarificationNotActive,

    /// Clarification-first mode is disabled in settings.
    #[error("clarification-first mode is not enabled")]
    ClarificationDisabled,

    /// Briefing confirmation was requested before a briefing exists.
    #[error("no briefing available to confirm")]
    NoBriefing,

    #[error("conversation {0} not found")]
    ConversationNotFound(String),

    #[error("record {0} not found")]
    RecordNotFound(String),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for deliberation operations.
pub type DeliberationResult<T> = Result<T, DeliberationError>;

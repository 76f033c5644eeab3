use meshforge_core::lifecycle::TransitionError;
use meshforge_core::types::{Credits, DbId};
use meshforge_db::StoreError;
use meshforge_provider::{PollError, ProviderError};

/// A submission was refused before any record was created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits {
        required: Credits,
        available: Credits,
    },

    #[error("Invalid generation request: {0}")]
    InvalidInput(String),
}

/// Why a generation did not succeed.
///
/// The `Display` text is what gets persisted as the record's error message.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// The proxy could not be reached.
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// The proxy or provider answered with a non-2xx status.
    #[error("Provider API error ({status}): {body}")]
    Provider { status: u16, body: String },

    #[error("Malformed provider response: {0}")]
    Decode(String),

    /// The provider reported the task as failed; the message is the
    /// provider's own.
    #[error("{message}")]
    TaskFailed { message: String },

    #[error("Generation timed out after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error("Generation was canceled")]
    Canceled,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Generation {0} not found")]
    NotFound(DbId),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ProviderError> for GenerationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transport(e) => GenerationError::Transport(e.to_string()),
            ProviderError::Api { status, body } => GenerationError::Provider { status, body },
            ProviderError::Decode(e) => GenerationError::Decode(e.to_string()),
            ProviderError::InvalidRequest(msg) => {
                GenerationError::Internal(format!("invalid job request: {msg}"))
            }
        }
    }
}

impl From<PollError> for GenerationError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::Provider(e) => e.into(),
            PollError::TaskFailed { message } => GenerationError::TaskFailed { message },
            PollError::Timeout { attempts } => GenerationError::Timeout { attempts },
            PollError::Cancelled => GenerationError::Canceled,
        }
    }
}

impl GenerationError {
    /// Whether the caller asked for this outcome rather than something
    /// going wrong.
    pub fn is_canceled(&self) -> bool {
        matches!(self, GenerationError::Canceled)
    }
}

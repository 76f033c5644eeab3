/// Errors raised while checking or decoding generation data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown generation kind '{0}'")]
    UnknownKind(String),

    #[error("Unknown generation status id {0}")]
    UnknownStatus(i16),
}

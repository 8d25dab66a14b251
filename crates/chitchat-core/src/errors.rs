/// Typed error taxonomy for API operations.
/// Classifies failures as caller errors (auth, validation) or server-side.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ApiError {
    // Caller errors, returned as-is
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),

    // Server-side; detail goes to logs, not the wire
    #[error("internal: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }

    /// Short classification string for logging and wire error codes.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Internal(_) => "internal",
        }
    }
}

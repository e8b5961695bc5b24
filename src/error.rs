use thiserror::Error;

/// Failure taxonomy for the data core. Business-rule rejections carry the
/// reason that produced them so handlers can answer with a stable code
/// instead of a stringly-typed message.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed reference: {0}")]
    MalformedReference(String),

    #[error("entity not found: {collection}/{id}")]
    EntityNotFound { collection: String, id: String },

    #[error("class is at capacity")]
    CapacityExceeded,

    #[error("student is already enrolled in this class")]
    DuplicateEnrollment,

    #[error("class has already started")]
    ClassAlreadyStarted,

    #[error("remote operation failed: {0}")]
    RemoteOperationFailed(#[from] anyhow::Error),
}

impl CoreError {
    /// Stable wire code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::MalformedReference(_) => "malformed_reference",
            CoreError::EntityNotFound { .. } => "not_found",
            CoreError::CapacityExceeded => "class_full",
            CoreError::DuplicateEnrollment => "already_enrolled",
            CoreError::ClassAlreadyStarted => "class_already_started",
            CoreError::RemoteOperationFailed(_) => "store_failed",
        }
    }

    pub fn not_found(collection: &str, id: &str) -> Self {
        CoreError::EntityNotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

use crate::job::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Cannot {action} a job in the {status} state")]
    InvalidTransition {
        action: &'static str,
        status: JobStatus,
    },

    #[error("No previous manual step to rewind to")]
    NoPreviousManualStep,

    #[error("Worker environment is not ready: {0}")]
    NotReady(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

use uuid::Uuid;

use crate::outbox::RecordError;

// ============================================================================
// Profile Service Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(Uuid),

    /// Outbox insert failed; the surrounding transaction was rolled back, so
    /// the profile mutation did not commit either.
    #[error(transparent)]
    Outbox(#[from] RecordError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

use thiserror::Error;

use shared_models::AppError;

use crate::models::ConversationState;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis connection error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Redis pool error: {0}")]
    PoolError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<deadpool_redis::PoolError> for StoreError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        StoreError::PoolError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Conversation not found: {0}")]
    SessionNotFound(String),

    #[error("Utterance must not be empty")]
    EmptyUtterance,

    #[error("Conversation already finished in state {0}")]
    SessionTerminal(ConversationState),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: ConversationState,
        to: ConversationState,
    },

    #[error("Session invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Unknown doctor: {0}")]
    UnknownDoctor(String),

    #[error("Calendar unavailable: {0}")]
    CalendarUnavailable(String),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ConversationError> for AppError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::SessionNotFound(_) | ConversationError::UnknownDoctor(_) => {
                AppError::NotFound(err.to_string())
            }
            ConversationError::CalendarUnavailable(_) => AppError::ServiceUnavailable(err.to_string()),
            ConversationError::EmptyUtterance => AppError::BadRequest(err.to_string()),
            ConversationError::SessionTerminal(_) => AppError::Conflict(err.to_string()),
            ConversationError::Store(_) => AppError::Storage(err.to_string()),
            ConversationError::InvalidTransition { .. } | ConversationError::InvariantViolation(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

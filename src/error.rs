//! Error types for a3s-dispatch

use thiserror::Error;

/// Errors that can occur while registering, removing, or invoking handlers
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The value passed to a registration call is not invokable
    #[error("Handler is not a function")]
    NotAFunction,

    /// An absent callable was passed to a registration call
    #[error("Handler function is nil")]
    FunctionIsNil,

    /// Invokable but unusable callable
    #[error("Handler function is not valid: {0}")]
    InvalidFunction(String),

    /// Mutation attempted against a topic with no registered handlers
    #[error("Topic '{topic}' has no handlers")]
    NoHandlers { topic: String },

    /// A supplied argument does not match the handler's declared parameter type
    #[error("Argument {position} does not match parameter type `{expected}`")]
    ArgumentType {
        position: usize,
        expected: &'static str,
    },

    /// Task submitted to an executor that has been shut down
    #[error("Executor is closed")]
    PoolClosed,

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    pub(crate) fn no_handlers(topic: &str) -> Self {
        Self::NoHandlers {
            topic: topic.to_string(),
        }
    }
}

/// Result type alias for dispatch operations
pub type Result<T> = std::result::Result<T, DispatchError>;

use thiserror::Error;

/// Errors produced by function dispatch and execution.
#[derive(Debug, Error)]
pub enum FunctionError {
    /// No handler is registered under the requested name.
    #[error("function not found: {0}")]
    NotFound(String),

    /// The argument payload did not match the handler's expected shape.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler itself failed.
    #[error("function execution failed: {0}")]
    Execution(String),
}

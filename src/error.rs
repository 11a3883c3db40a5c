use crate::http::Method;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum ServerError {
    IoError(io::Error),
    InvalidPattern { pattern: String, reason: String },
    NoMatch,
    MethodNotAllowed(Vec<Method>),
    ParseError(String),
    RequestTimeout,
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    InternalError(String),
    ChainPanic(String),
    Exchange(String),
    PoolTimeout,
    PoolShuttingDown,
    AdmissionRejected,
}

impl ServerError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::ParseError(_) | ServerError::BadRequest(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::Forbidden(_) => 403,
            ServerError::NoMatch => 404,
            ServerError::MethodNotAllowed(_) => 405,
            ServerError::RequestTimeout => 408,
            ServerError::PoolShuttingDown | ServerError::AdmissionRejected => 503,
            ServerError::PoolTimeout => 504,
            ServerError::IoError(_)
            | ServerError::InvalidPattern { .. }
            | ServerError::InternalError(_)
            | ServerError::ChainPanic(_)
            | ServerError::Exchange(_) => 500,
        }
    }

    /// True for failures that originate in the server itself rather than the client.
    pub fn is_server_fault(&self) -> bool {
        self.status_code() >= 500
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::IoError(err) => write!(f, "IO error: {}", err),
            ServerError::InvalidPattern { pattern, reason } => {
                write!(f, "Invalid route pattern '{}': {}", pattern, reason)
            }
            ServerError::NoMatch => write!(f, "Not found"),
            ServerError::MethodNotAllowed(_) => write!(f, "Method not allowed"),
            ServerError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            ServerError::RequestTimeout => write!(f, "Request timeout"),
            ServerError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ServerError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ServerError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ServerError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ServerError::ChainPanic(msg) => write!(f, "Panic: {}", msg),
            ServerError::Exchange(msg) => write!(f, "Exchange error: {}", msg),
            ServerError::PoolTimeout => write!(f, "Pooled task timed out"),
            ServerError::PoolShuttingDown => write!(f, "Worker pool is shutting down"),
            ServerError::AdmissionRejected => write!(f, "Service unavailable, retry later"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(err: io::Error) -> Self {
        ServerError::IoError(err)
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::Exchange(err.to_string())
    }
}

pub type ServerResult<T> = Result<T, ServerError>;

//! Errors shared by every discovery and registry backend.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No registration exists for the name, or none of them is healthy.
    NotFound(String),
    /// A `host:port` string could not be parsed.
    InvalidAddress(String),
    /// The backing store rejected the request or could not be reached.
    Backend(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "No healthy instance of service '{}'", name),
            Self::InvalidAddress(s) => write!(f, "Invalid address '{}', expected host:port", s),
            Self::Backend(msg) => write!(f, "Registry backend error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

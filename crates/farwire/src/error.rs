//! # Error Definitions
//!
//! Failures of the wire layer itself, and the tagged fault a remote side
//! reports when the call it executed went wrong.

use serde::Deserialize;
use serde::Serialize;

/// Operational failures while encoding, decoding or framing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The payload could not be serialized or deserialized.
    Serialization(String),
    /// The frame length exceeds the configured maximum.
    FrameTooLarge { len: usize, max: usize },
    /// The message decoded, but its structure breaks the envelope rules.
    ProtocolViolation(String),
    /// The underlying byte stream failed.
    Io(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::FrameTooLarge { len, max } => {
                write!(f, "Frame of {} bytes exceeds limit of {} bytes", len, max)
            }
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self { Self::Serialization(e.to_string()) }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self { Self::Io(e.to_string()) }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad category of a remote failure.
///
/// These are distinct from `Error`; these represent the *remote* execution
/// failing, whereas `Error` represents the *wire* failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    /// No service is bound under the requested interface name.
    ServiceNotFound,
    /// The interface exists but has no such method.
    MethodNotFound,
    /// Arguments did not match the method signature.
    BadArguments,
    /// The method ran and reported an error of its own.
    Application,
    /// The remote runtime failed outside of the method body.
    Internal,
}

impl FaultKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::ServiceNotFound => "ServiceNotFound",
            Self::MethodNotFound => "MethodNotFound",
            Self::BadArguments => "BadArguments",
            Self::Application => "Application",
            Self::Internal => "Internal",
        }
    }
}

/// The error side of a response, carried as data rather than a foreign
/// exception object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFault {
    pub kind: FaultKind,
    pub message: String,
    /// Structured detail supplied by the remote side, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl RemoteFault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), detail: None }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

impl std::fmt::Display for RemoteFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_tag(), self.message)
    }
}

impl std::error::Error for RemoteFault {}

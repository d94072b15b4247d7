//! # Call Errors
//!
//! Every way a proxied call can end without a result. All of them surface to
//! the immediate caller; nothing here is retried.

use std::time::Duration;

use farfind::Address;
use farwire::RemoteFault;
use farwire::RequestId;

#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// Discovery has no live address for the service. No I/O was attempted.
    AddressResolution { service: String, reason: String },
    /// A connection to the resolved address could not be established.
    ConnectionUnavailable { address: Address, reason: String },
    /// The connection died before the response arrived.
    ConnectionLost { address: Address, reason: String },
    /// No response within the call deadline. The pending entry is gone.
    CallTimeout { id: RequestId, after: Duration },
    /// The remote side executed the call and reported a failure.
    RemoteInvocation(RemoteFault),
    /// The id was already pending. Indicates a broken id generator.
    DuplicateRequestId(RequestId),
    /// The call was abandoned while waiting, without any outcome.
    Interrupted(RequestId),
    /// Arguments or the request envelope could not be encoded.
    Codec(String),
    /// The result does not match the method's declared return type.
    ResultType { method: String, reason: String },
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddressResolution { service, reason } => {
                write!(f, "Cannot resolve service '{}': {}", service, reason)
            }
            Self::ConnectionUnavailable { address, reason } => {
                write!(f, "Cannot connect to {}: {}", address, reason)
            }
            Self::ConnectionLost { address, reason } => {
                write!(f, "Connection to {} lost: {}", address, reason)
            }
            Self::CallTimeout { id, after } => {
                write!(f, "Call {} timed out after {:?}", id, after)
            }
            Self::RemoteInvocation(fault) => write!(f, "Remote invocation failed: {}", fault),
            Self::DuplicateRequestId(id) => write!(f, "Request id {} is already pending", id),
            Self::Interrupted(id) => write!(f, "Call {} was interrupted", id),
            Self::Codec(msg) => write!(f, "Codec error: {}", msg),
            Self::ResultType { method, reason } => {
                write!(f, "Result of '{}' has the wrong type: {}", method, reason)
            }
        }
    }
}

impl std::error::Error for CallError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RemoteInvocation(fault) => Some(fault),
            _ => None,
        }
    }
}

impl From<farwire::Error> for CallError {
    fn from(e: farwire::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl CallError {
    /// The remote fault, if the remote side produced this error.
    pub fn remote_fault(&self) -> Option<&RemoteFault> {
        match self {
            Self::RemoteInvocation(fault) => Some(fault),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

//! # Protocol Frames
//!
//! Defines the structure of the RPC envelope (Call vs Reply).
//!
//! ## Invariants
//! - **Correlation**: A Reply carries the id of the Call it answers, byte for byte.
//! - **Exclusive Outcome**: A Reply holds a result or a fault, never both.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;
use crate::error::RemoteFault;
use crate::error::Result;

/// Opaque correlation token naming one in-flight call.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An outbound call: which method of which interface, with what arguments.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub interface: String,
    pub method: String,
    pub args: Vec<Value>,
    /// Parameter type descriptors, one per argument, as declared by the caller.
    pub param_types: Vec<String>,
}

impl Request {
    pub fn new(
        id: RequestId,
        interface: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
        param_types: Vec<String>,
    ) -> Self {
        Self {
            id,
            interface: interface.into(),
            method: method.into(),
            args,
            param_types,
        }
    }

    /// Checks that every argument has a matching type descriptor.
    pub fn validate(&self) -> Result<()> {
        if self.args.len() != self.param_types.len() {
            return Err(Error::ProtocolViolation(format!(
                "request {} has {} args but {} param types",
                self.id,
                self.args.len(),
                self.param_types.len()
            )));
        }
        Ok(())
    }
}

/// The answer to a `Request`, correlated by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<RemoteFault>,
}

impl Response {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self { id, result: Some(result), fault: None }
    }

    pub fn fault(id: RequestId, fault: RemoteFault) -> Self {
        Self { id, result: None, fault: Some(fault) }
    }

    /// Rejects replies that carry both a result and a fault.
    pub fn validate(&self) -> Result<()> {
        if self.result.is_some() && self.fault.is_some() {
            return Err(Error::ProtocolViolation(format!(
                "response {} carries both a result and a fault",
                self.id
            )));
        }
        Ok(())
    }

    /// Splits the reply into its outcome. A reply without either field is a
    /// unit result.
    pub fn into_outcome(self) -> std::result::Result<Value, RemoteFault> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Top-level envelope on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "lowercase")]
pub enum Frame {
    Call(Request),
    Reply(Response),
}

impl Frame {
    /// The correlation id of either frame kind.
    pub fn id(&self) -> &RequestId {
        match self {
            Frame::Call(req) => &req.id,
            Frame::Reply(resp) => &resp.id,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Frame::Call(req) => req.validate(),
            Frame::Reply(resp) => resp.validate(),
        }
    }
}

//! Command envelope exchanged over the daemon socket
//!
//! Every message is a single JSON document terminated by a newline. The client
//! sends an [`IpcCommand`] and the daemon answers with an [`IpcResponse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A named remote call with its parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcCommand {
    /// Remote function name, e.g. `Connect`
    pub function: String,

    /// Parameters document matching the function's request shape
    #[serde(default)]
    pub params: Value,
}

impl IpcCommand {
    pub fn new(function: impl Into<String>, params: Value) -> Self {
        Self {
            function: function.into(),
            params,
        }
    }
}

/// Successful result of a remote call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcReply {
    /// Set when the handler produced no value at all
    pub empty: bool,

    /// Reply document, present only when `empty` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl IpcReply {
    /// Reply for handlers that return nothing
    pub fn empty() -> Self {
        Self {
            empty: true,
            result: None,
        }
    }

    /// Reply carrying an encoded result
    pub fn with_result(result: Value) -> Self {
        Self {
            empty: false,
            result: Some(result),
        }
    }
}

/// Why a call did not produce a reply
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Another command is in flight
    Busy,

    /// No handler is registered under the requested name
    UnknownFunction,

    /// Parameters or results could not be (de)serialized
    Protocol,

    /// The handler ran and reported an error
    Command,
}

impl FailureKind {
    /// Protocol-level failures mean the call never reached a handler
    pub fn is_protocol(&self) -> bool {
        !matches!(self, FailureKind::Command)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Busy => write!(f, "busy"),
            FailureKind::UnknownFunction => write!(f, "unknown function"),
            FailureKind::Protocol => write!(f, "protocol error"),
            FailureKind::Command => write!(f, "command failed"),
        }
    }
}

/// Daemon response to one [`IpcCommand`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// The handler completed
    Reply {
        empty: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },

    /// The call failed, either before or inside the handler
    Error { kind: FailureKind, message: String },
}

impl From<IpcReply> for IpcResponse {
    fn from(reply: IpcReply) -> Self {
        IpcResponse::Reply {
            empty: reply.empty,
            result: reply.result,
        }
    }
}

//! WireJump wire protocol
//!
//! Shared between the daemon and its command line client: the command
//! envelope, the catalog of remote functions and the local socket transport.

pub mod catalog;
pub mod ipc;
pub mod wire;

pub use catalog::RemoteFunction;
pub use ipc::{IpcClient, IpcConnection, IpcError, IpcServer, DEFAULT_SOCKET_PATH};
pub use wire::{FailureKind, IpcCommand, IpcReply, IpcResponse};

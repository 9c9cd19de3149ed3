//! Command dispatcher
//!
//! Maps function names to typed handlers and enforces single-flight
//! execution: a command arriving while another one runs is rejected with
//! [`ExecuteError::Busy`] instead of waiting. The state lock is held for
//! the whole handler, external calls included.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, warn};
use wirejump_proto::catalog::{
    Connect, ListProviders, ManagePeers, ManageServers, Reset, SetupProvider, Status, Version,
};
use wirejump_proto::{IpcCommand, IpcReply};

use crate::error::ExecuteError;
use crate::handlers::Handler;
use crate::state::{Environment, ProcessState};

type HandlerFuture<'a> = BoxFuture<'a, Result<Option<Value>, ExecuteError>>;
type HandlerFn = for<'a> fn(&'a mut ProcessState, &'a Environment, Value) -> HandlerFuture<'a>;

/// Decode params, run `H` and encode its reply
fn invoke<'a, H: Handler + 'static>(
    state: &'a mut ProcessState,
    env: &'a Environment,
    params: Value,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        // commands without parameters may send nothing at all
        let params = match params {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        let request: H::Request =
            serde_json::from_value(params).map_err(|source| ExecuteError::InvalidParams {
                function: H::NAME.to_string(),
                source,
            })?;

        match H::handle(state, env, request).await? {
            None => Ok(None),
            Some(reply) => serde_json::to_value(reply).map(Some).map_err(|source| {
                ExecuteError::EncodeReply {
                    function: H::NAME.to_string(),
                    source,
                }
            }),
        }
    })
}

pub struct Dispatcher {
    state: Mutex<ProcessState>,
    env: Environment,
    permit: Semaphore,
    handlers: HashMap<&'static str, HandlerFn>,
}

impl Dispatcher {
    /// Dispatcher serving every catalog function
    pub fn new(state: ProcessState, env: Environment) -> Self {
        let mut dispatcher = Self {
            state: Mutex::new(state),
            env,
            permit: Semaphore::new(1),
            handlers: HashMap::new(),
        };

        dispatcher.register::<ListProviders>();
        dispatcher.register::<SetupProvider>();
        dispatcher.register::<ManageServers>();
        dispatcher.register::<ManagePeers>();
        dispatcher.register::<Connect>();
        dispatcher.register::<Status>();
        dispatcher.register::<Reset>();
        dispatcher.register::<Version>();

        dispatcher
    }

    fn register<H: Handler + 'static>(&mut self) {
        self.handlers.insert(H::NAME, invoke::<H> as HandlerFn);
    }

    /// Run one command
    pub async fn execute(&self, command: IpcCommand) -> Result<IpcReply, ExecuteError> {
        let Ok(_permit) = self.permit.try_acquire() else {
            warn!("Rejecting {}: another command is running", command.function);
            return Err(ExecuteError::Busy);
        };

        let handler = self
            .handlers
            .get(command.function.as_str())
            .copied()
            .ok_or_else(|| ExecuteError::UnknownFunction(command.function.clone()))?;

        debug!("Executing {}", command.function);

        let mut state = self.state.lock().await;
        let reply = handler(&mut *state, &self.env, command.params).await?;

        Ok(match reply {
            Some(result) => IpcReply::with_result(result),
            None => IpcReply::empty(),
        })
    }

    /// Registered function names, sorted
    pub fn functions(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Direct access to the state, bypassing single-flight
    pub fn state(&self) -> &Mutex<ProcessState> {
        &self.state
    }
}

//! Request dispatch.

use crate::error::DispatchError;
use crate::registry::FunctionRegistry;
use crate::session::Session;
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tickwire_protocol::{ControlCommand, Request, RequestBody, Response};

/// Result of handling one request payload.
#[derive(Debug)]
pub struct Handled {
    pub response: Response,
    /// The request was a HOLD that moved the session into hold mode. The
    /// caller must run the hold sub-loop once the response is on the wire.
    pub enter_hold: bool,
}

impl Handled {
    fn reply(id: u64, result: Result<Value, DispatchError>) -> Self {
        match result {
            Ok(value) => Self {
                response: Response::result(Some(id), value),
                enter_hold: false,
            },
            Err(e) => Self::failure(Some(id), &e),
        }
    }

    fn failure(id: Option<u64>, error: &DispatchError) -> Self {
        Self {
            response: Response::error(id, error.traceback()),
            enter_hold: false,
        }
    }
}

/// Turns request payloads into responses using a function registry.
pub struct CommandHandler<R> {
    registry: R,
}

impl<R: FunctionRegistry> CommandHandler<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    /// Handles one frame payload. Never fails: every problem with the
    /// request becomes an error response.
    pub fn handle(&mut self, session: &mut Session, payload: &[u8]) -> Handled {
        session.record_request();
        let addr = session.remote_addr;

        let request = match Request::parse(payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::debug!("[{}] Rejected request: {}", addr, e);
                let id = e.id;
                return Handled::failure(id, &DispatchError::from(e));
            }
        };
        tracing::debug!("[{}] #{} {}", addr, request.id, request.describe());

        match request.body {
            RequestBody::Call { name, args } => {
                let result = self.call(&name, &args);
                if let Err(ref e) = result {
                    tracing::debug!("[{}] #{} failed: {}", addr, request.id, e);
                }
                Handled::reply(request.id, result)
            }
            RequestBody::Control {
                cmd: ControlCommand::Hold,
            } => {
                let enter_hold = session.begin_hold();
                if !enter_hold {
                    tracing::debug!("[{}] HOLD while already holding", addr);
                }
                Handled {
                    response: Response::result(Some(request.id), Value::Null),
                    enter_hold,
                }
            }
            RequestBody::Control {
                cmd: ControlCommand::Release,
            } => {
                session.end_hold();
                Handled::reply(request.id, Ok(Value::Null))
            }
        }
    }

    /// Looks up and invokes a registered function.
    ///
    /// A panic inside the function is caught here so the reactor keeps
    /// running.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Value, DispatchError> {
        let function = self
            .registry
            .lookup(name)
            .ok_or_else(|| DispatchError::NotFound(name.to_string()))?;

        match catch_unwind(AssertUnwindSafe(|| function.invoke(args))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(DispatchError::Invocation {
                name: name.to_string(),
                message: e.to_string(),
            }),
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Function {} panicked: {}", name, message);
                Err(DispatchError::Panicked {
                    name: name.to_string(),
                    message,
                })
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

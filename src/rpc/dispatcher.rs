//! Inbound call routing.
//!
//! The reader forwards every inbound call (request or notification) to
//! [`run_dispatcher`], which looks the method up in a [`Dispatcher`] table.
//!
//! | Case                               | Reply                                 |
//! |------------------------------------|---------------------------------------|
//! | handler returns `Ok(value)`        | `{result: value}`                     |
//! | handler returns `Err(error)`       | `{error: error}`                      |
//! | handler panics                     | `{error: {code: -32603, ...}}`        |
//! | no handler registered              | `{error: {code: -32601, ...}}`        |
//! | call is a notification             | *(no reply in any case)*              |
//!
//! Notifications are handled one at a time in arrival order. Requests run on
//! their own tasks so a slow host callback never delays later frames.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::rpc::message::{self, RpcErrorObject, INTERNAL_ERROR, METHOD_NOT_FOUND};
use crate::rpc::writer::FrameWriter;

/// Outcome of one inbound call.
pub type HandlerResult = std::result::Result<Value, RpcErrorObject>;

/// Boxed future returned by a method handler.
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// A registered method handler.
pub type MethodHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// An inbound call extracted from a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCall {
    /// Correlation id; `None` for notifications.
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    pub params: Value,
}

/// Method-name keyed handler table.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, MethodHandler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let methods: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Dispatcher").field("methods", &methods).finish()
    }
}

impl Dispatcher {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `method`, replacing any previous handler.
    pub fn register<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |params| handler(params).boxed());
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), handler);
    }

    /// Whether a handler exists for `method`.
    #[must_use]
    pub fn contains(&self, method: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(method)
    }

    fn lookup(&self, method: &str) -> Option<MethodHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    /// Run one call to completion and build its reply.
    ///
    /// Returns `None` for notifications; failures of a notification handler
    /// are logged only.
    pub async fn dispatch(&self, call: InboundCall) -> Option<Value> {
        let InboundCall { id, method, params } = call;

        let outcome = match self.lookup(&method) {
            Some(handler) => {
                let fut = AssertUnwindSafe(async move { handler(params).await });
                match fut.catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let reason = panic_message(panic.as_ref());
                        warn!(method, reason, "rpc dispatcher: handler panicked");
                        Err(RpcErrorObject::new(INTERNAL_ERROR, reason))
                    }
                }
            }
            None => {
                debug!(method, "rpc dispatcher: no handler for inbound method");
                Err(RpcErrorObject::new(
                    METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ))
            }
        };

        let Some(id) = id else {
            if let Err(err) = outcome {
                if err.code != METHOD_NOT_FOUND {
                    warn!(
                        method,
                        code = err.code,
                        error = %err.message,
                        "rpc dispatcher: notification handler failed"
                    );
                }
            }
            return None;
        };

        Some(match outcome {
            Ok(result) => message::success(id, result),
            Err(err) => message::failure(id, &err),
        })
    }
}

/// Dispatcher task: drains `calls` until cancelled or the channel closes.
pub async fn run_dispatcher(
    dispatcher: Arc<Dispatcher>,
    writer: Arc<FrameWriter>,
    mut calls: mpsc::UnboundedReceiver<InboundCall>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("rpc dispatcher: cancellation received, stopping");
                break;
            }

            call = calls.recv() => {
                let Some(call) = call else {
                    debug!("rpc dispatcher: call channel closed, stopping");
                    break;
                };

                if call.id.is_none() {
                    // Notifications keep arrival order.
                    dispatcher.dispatch(call).await;
                    continue;
                }

                let dispatcher = Arc::clone(&dispatcher);
                let writer = Arc::clone(&writer);
                tokio::spawn(async move {
                    let method = call.method.clone();
                    if let Some(reply) = dispatcher.dispatch(call).await {
                        if let Err(err) = writer.send(reply).await {
                            debug!(method, error = %err, "rpc dispatcher: reply not delivered");
                        }
                    }
                });
            }
        }
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic in handler: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic in handler: {s}")
    } else {
        "panic in handler".to_owned()
    }
}

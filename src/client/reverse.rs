//! Handlers for the calls the CLI makes back into the host.
//!
//! | Method               | Unknown session        | Handler failure                 |
//! |----------------------|------------------------|---------------------------------|
//! | `session.event`      | ignored                | n/a                             |
//! | `session.lifecycle`  | n/a                    | logged                          |
//! | `tool.call`          | `-32602`               | failure tool result             |
//! | `permission.request` | conservative denial    | conservative denial             |
//! | `userInput.request`  | `-32602`               | `-32603`                        |
//! | `hooks.invoke`       | `-32602`               | `-32603`                        |

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::lifecycle::LifecycleListeners;
use crate::models::events::SessionEvent;
use crate::models::protocol::{
    PermissionRequestResult, SessionLifecycleEvent, ToolInvocation, ToolResultObject,
    UserInputRequest,
};
use crate::rpc::dispatcher::HandlerResult;
use crate::rpc::{Dispatcher, RpcErrorObject, INTERNAL_ERROR, INVALID_PARAMS};
use crate::session::handlers::guarded;
use crate::session::{Session, SessionRegistry};

/// Text shown to the model when a tool handler fails.
const TOOL_ERROR_TEXT: &str =
    "Invoking this tool produced an error. Detailed information is not available.";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEventParams {
    session_id: String,
    event: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PermissionParams {
    session_id: String,
    #[serde(default)]
    permission_request: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserInputParams {
    session_id: String,
    #[serde(flatten)]
    request: UserInputRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HooksParams {
    session_id: String,
    hook_type: String,
    #[serde(default)]
    input: Value,
}

/// Register the six reverse methods on `dispatcher`.
pub(crate) fn register(
    dispatcher: &Dispatcher,
    sessions: &Arc<SessionRegistry>,
    lifecycle: &Arc<LifecycleListeners>,
) {
    let registry = Arc::clone(sessions);
    dispatcher.register("session.event", move |params| {
        let registry = Arc::clone(&registry);
        async move { handle_session_event(&registry, params) }
    });

    let listeners = Arc::clone(lifecycle);
    dispatcher.register("session.lifecycle", move |params| {
        let listeners = Arc::clone(&listeners);
        async move { handle_lifecycle(&listeners, params) }
    });

    let registry = Arc::clone(sessions);
    dispatcher.register("tool.call", move |params| {
        let registry = Arc::clone(&registry);
        async move { handle_tool_call(&registry, params).await }
    });

    let registry = Arc::clone(sessions);
    dispatcher.register("permission.request", move |params| {
        let registry = Arc::clone(&registry);
        async move { handle_permission(&registry, params).await }
    });

    let registry = Arc::clone(sessions);
    dispatcher.register("userInput.request", move |params| {
        let registry = Arc::clone(&registry);
        async move { handle_user_input(&registry, params).await }
    });

    let registry = Arc::clone(sessions);
    dispatcher.register("hooks.invoke", move |params| {
        let registry = Arc::clone(&registry);
        async move { handle_hooks(&registry, params).await }
    });
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, RpcErrorObject> {
    serde_json::from_value(params)
        .map_err(|err| RpcErrorObject::new(INVALID_PARAMS, format!("Invalid params: {err}")))
}

fn lookup(registry: &SessionRegistry, session_id: &str) -> Result<Arc<Session>, RpcErrorObject> {
    registry
        .get(session_id)
        .ok_or_else(|| RpcErrorObject::new(INVALID_PARAMS, format!("Unknown session {session_id}")))
}

fn handle_session_event(registry: &SessionRegistry, params: Value) -> HandlerResult {
    let params: SessionEventParams = parse_params(params)?;
    let Some(session) = registry.get(&params.session_id) else {
        debug!(session_id = %params.session_id, "event for unknown session, dropping");
        return Ok(Value::Null);
    };
    if let Some(event) = SessionEvent::parse(&params.event) {
        session.enqueue_event(event);
    }
    Ok(Value::Null)
}

fn handle_lifecycle(listeners: &LifecycleListeners, params: Value) -> HandlerResult {
    let event: SessionLifecycleEvent = parse_params(params)?;
    debug!(event_type = %event.kind, session_id = %event.session_id, "session lifecycle");
    listeners.dispatch(&event);
    Ok(Value::Null)
}

async fn handle_tool_call(registry: &SessionRegistry, params: Value) -> HandlerResult {
    let invocation: ToolInvocation = parse_params(params)?;
    let session = lookup(registry, &invocation.session_id)?;

    let Some(tool) = session.tool(&invocation.tool_name) else {
        let name = &invocation.tool_name;
        debug!(session_id = %invocation.session_id, tool = %name, "tool not registered");
        let result = ToolResultObject::failure(
            format!("Tool '{name}' is not supported."),
            format!("tool '{name}' not supported"),
        );
        return Ok(json!({ "result": result }));
    };

    let session_id = invocation.session_id.clone();
    let result = match guarded((tool.handler)(invocation)).await {
        Ok(value) => normalize_tool_result(value),
        Err(err) => {
            warn!(session_id = %session_id, tool = %tool.name, error = %err, "tool handler failed");
            ToolResultObject::failure(TOOL_ERROR_TEXT, err.to_string())
        }
    };
    Ok(json!({ "result": result }))
}

/// Turn whatever a tool handler returned into a structured tool result.
pub(crate) fn normalize_tool_result(value: Value) -> ToolResultObject {
    if value.get("textResultForLlm").is_some() && value.get("resultType").is_some() {
        if let Ok(result) = serde_json::from_value::<ToolResultObject>(value.clone()) {
            return result;
        }
    }
    match value {
        Value::Null => ToolResultObject::failure("Tool returned no result", "tool returned no result"),
        Value::String(text) => ToolResultObject::success(text),
        other => ToolResultObject::success(other.to_string()),
    }
}

async fn handle_permission(registry: &SessionRegistry, params: Value) -> HandlerResult {
    let result = match parse_params::<PermissionParams>(params) {
        Ok(params) => match registry.get(&params.session_id) {
            Some(session) => session.handle_permission_request(params.permission_request).await,
            None => {
                debug!(session_id = %params.session_id, "permission request for unknown session");
                PermissionRequestResult::denied_default()
            }
        },
        Err(err) => {
            warn!(error = %err.message, "malformed permission request");
            PermissionRequestResult::denied_default()
        }
    };
    Ok(json!({ "result": result }))
}

async fn handle_user_input(registry: &SessionRegistry, params: Value) -> HandlerResult {
    let params: UserInputParams = parse_params(params)?;
    let session = lookup(registry, &params.session_id)?;

    match session.handle_user_input(params.request).await {
        Ok(response) => Ok(json!({
            "answer": response.answer.unwrap_or_default(),
            "wasFreeform": response.was_freeform,
        })),
        Err(err) => {
            warn!(session_id = %params.session_id, error = %err, "user input handler failed");
            Err(RpcErrorObject::new(
                INTERNAL_ERROR,
                format!("User input handler error: {err}"),
            ))
        }
    }
}

async fn handle_hooks(registry: &SessionRegistry, params: Value) -> HandlerResult {
    let params: HooksParams = parse_params(params)?;
    let session = lookup(registry, &params.session_id)?;

    match session.handle_hooks_invoke(&params.hook_type, params.input).await {
        Ok(output) => Ok(json!({ "output": output })),
        Err(err) => {
            warn!(
                session_id = %params.session_id,
                hook_type = %params.hook_type,
                error = %err,
                "hook handler failed"
            );
            Err(RpcErrorObject::new(
                INTERNAL_ERROR,
                format!("Hooks handler error: {err}"),
            ))
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

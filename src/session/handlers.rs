//! Host callback types.
//!
//! Every callback is asynchronous and fallible. Failures (including panics)
//! are contained by the session and converted into conservative replies;
//! they never surface as transport errors.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::protocol::{
    PermissionRequest, PermissionRequestResult, ToolInvocation, ToolSpec, UserInputRequest,
    UserInputResponse,
};
use crate::rpc::dispatcher::panic_message;

/// Error type returned by host callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by host callbacks.
pub type HandlerOutcome<T> = std::result::Result<T, BoxError>;

/// Executes a tool call; the returned value is normalised into a tool result.
pub type ToolHandler =
    Arc<dyn Fn(ToolInvocation) -> BoxFuture<'static, HandlerOutcome<Value>> + Send + Sync>;

/// Decides a permission request.
pub type PermissionHandler = Arc<
    dyn Fn(PermissionRequest, PermissionInvocation) -> BoxFuture<'static, HandlerOutcome<PermissionRequestResult>>
        + Send
        + Sync,
>;

/// Answers a user-input request.
pub type UserInputHandler = Arc<
    dyn Fn(UserInputRequest, UserInputInvocation) -> BoxFuture<'static, HandlerOutcome<UserInputResponse>>
        + Send
        + Sync,
>;

/// One hook callback; `Ok(None)` means "no changes".
pub type HookHandler<I, O> =
    Arc<dyn Fn(I, HookInvocation) -> BoxFuture<'static, HandlerOutcome<Option<O>>> + Send + Sync>;

/// Run a callback future, turning a panic into an error.
pub(crate) async fn guarded<T, F>(fut: F) -> HandlerOutcome<T>
where
    F: Future<Output = HandlerOutcome<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(panic_message(panic.as_ref()).into()),
    }
}

// ── Tools ────────────────────────────────────────────────────────────────────

/// A tool the host exposes to the agent.
#[derive(Clone)]
pub struct ToolDefinition {
    /// Tool name, unique within the session.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: Option<Value>,
    /// Callback executing the tool.
    pub handler: ToolHandler,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    /// Define a tool backed by an async closure.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<Value>,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerOutcome<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |invocation| handler(invocation).boxed()),
        }
    }

    /// Wire form sent in `session.create` / `session.resume`.
    #[must_use]
    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

// ── Permission and user input ────────────────────────────────────────────────

/// Context passed alongside a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionInvocation {
    /// Session asking for permission.
    pub session_id: String,
}

/// Context passed alongside a user-input request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInputInvocation {
    /// Session asking for input.
    pub session_id: String,
}

/// Wrap an async closure as a [`PermissionHandler`].
pub fn permission_handler<F, Fut>(handler: F) -> PermissionHandler
where
    F: Fn(PermissionRequest, PermissionInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome<PermissionRequestResult>> + Send + 'static,
{
    Arc::new(move |request, invocation| handler(request, invocation).boxed())
}

/// Wrap an async closure as a [`UserInputHandler`].
pub fn user_input_handler<F, Fut>(handler: F) -> UserInputHandler
where
    F: Fn(UserInputRequest, UserInputInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerOutcome<UserInputResponse>> + Send + 'static,
{
    Arc::new(move |request, invocation| handler(request, invocation).boxed())
}

// ── Hooks ────────────────────────────────────────────────────────────────────

/// Hook type names used by `hooks.invoke`.
pub mod hook_types {
    /// Before a tool runs.
    pub const PRE_TOOL_USE: &str = "preToolUse";
    /// After a tool ran.
    pub const POST_TOOL_USE: &str = "postToolUse";
    /// When the user submits a prompt.
    pub const USER_PROMPT_SUBMITTED: &str = "userPromptSubmitted";
    /// When a session starts.
    pub const SESSION_START: &str = "sessionStart";
    /// When a session ends.
    pub const SESSION_END: &str = "sessionEnd";
}

/// Context passed alongside every hook input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookInvocation {
    /// Session the hook fired in.
    pub session_id: String,
}

/// Input of the `preToolUse` hook.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreToolUseHookInput {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    /// Working directory.
    pub cwd: String,
    /// Tool about to run.
    pub tool_name: String,
    /// Arguments it will receive.
    pub tool_args: Value,
}

/// Output of the `preToolUse` hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreToolUseHookOutput {
    /// `allow`, `deny`, or `ask`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<String>,
    /// Reason shown with the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    /// Replacement arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<Value>,
    /// Extra context for the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Hide the tool output from the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
}

/// Input of the `postToolUse` hook.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostToolUseHookInput {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    /// Working directory.
    pub cwd: String,
    /// Tool that ran.
    pub tool_name: String,
    /// Arguments it received.
    pub tool_args: Value,
    /// Result it produced.
    pub tool_result: Value,
}

/// Output of the `postToolUse` hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostToolUseHookOutput {
    /// Replacement result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_result: Option<Value>,
    /// Extra context for the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Hide the tool output from the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
}

/// Input of the `userPromptSubmitted` hook.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPromptSubmittedHookInput {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    /// Working directory.
    pub cwd: String,
    /// Submitted prompt.
    pub prompt: String,
}

/// Output of the `userPromptSubmitted` hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPromptSubmittedHookOutput {
    /// Replacement prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_prompt: Option<String>,
    /// Extra context for the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Hide the prompt from the transcript.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
}

/// Input of the `sessionStart` hook.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStartHookInput {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    /// Working directory.
    pub cwd: String,
    /// `startup`, `resume`, or `new`.
    pub source: String,
    /// First prompt, when known.
    pub initial_prompt: Option<String>,
}

/// Output of the `sessionStart` hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartHookOutput {
    /// Extra context for the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Session configuration overrides.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_config: Option<serde_json::Map<String, Value>>,
}

/// Input of the `sessionEnd` hook.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionEndHookInput {
    /// Milliseconds since the epoch.
    pub timestamp: i64,
    /// Working directory.
    pub cwd: String,
    /// Why the session ended.
    pub reason: String,
    /// Last assistant message.
    pub final_message: Option<String>,
    /// Error that ended the session.
    pub error: Option<String>,
}

/// Output of the `sessionEnd` hook.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndHookOutput {
    /// Hide the end-of-session output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    /// Actions to perform on cleanup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_actions: Option<Vec<String>>,
    /// Summary to store with the session.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_summary: Option<String>,
}

/// Hook callbacks for a session; unset hooks answer `{output: null}`.
#[derive(Clone, Default)]
pub struct SessionHooks {
    on_pre_tool_use: Option<HookHandler<PreToolUseHookInput, PreToolUseHookOutput>>,
    on_post_tool_use: Option<HookHandler<PostToolUseHookInput, PostToolUseHookOutput>>,
    on_user_prompt_submitted:
        Option<HookHandler<UserPromptSubmittedHookInput, UserPromptSubmittedHookOutput>>,
    on_session_start: Option<HookHandler<SessionStartHookInput, SessionStartHookOutput>>,
    on_session_end: Option<HookHandler<SessionEndHookInput, SessionEndHookOutput>>,
}

impl std::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHooks")
            .field("pre_tool_use", &self.on_pre_tool_use.is_some())
            .field("post_tool_use", &self.on_post_tool_use.is_some())
            .field("user_prompt_submitted", &self.on_user_prompt_submitted.is_some())
            .field("session_start", &self.on_session_start.is_some())
            .field("session_end", &self.on_session_end.is_some())
            .finish()
    }
}

macro_rules! hook_setter {
    ($(#[$doc:meta])* $fn_name:ident, $field:ident, $input:ty, $output:ty) => {
        $(#[$doc])*
        #[must_use]
        pub fn $fn_name<F, Fut>(mut self, handler: F) -> Self
        where
            F: Fn($input, HookInvocation) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = HandlerOutcome<Option<$output>>> + Send + 'static,
        {
            self.$field = Some(Arc::new(move |input, invocation| handler(input, invocation).boxed()));
            self
        }
    };
}

impl SessionHooks {
    /// No hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    hook_setter!(
        /// Set the `preToolUse` hook.
        on_pre_tool_use, on_pre_tool_use, PreToolUseHookInput, PreToolUseHookOutput
    );
    hook_setter!(
        /// Set the `postToolUse` hook.
        on_post_tool_use, on_post_tool_use, PostToolUseHookInput, PostToolUseHookOutput
    );
    hook_setter!(
        /// Set the `userPromptSubmitted` hook.
        on_user_prompt_submitted,
        on_user_prompt_submitted,
        UserPromptSubmittedHookInput,
        UserPromptSubmittedHookOutput
    );
    hook_setter!(
        /// Set the `sessionStart` hook.
        on_session_start, on_session_start, SessionStartHookInput, SessionStartHookOutput
    );
    hook_setter!(
        /// Set the `sessionEnd` hook.
        on_session_end, on_session_end, SessionEndHookInput, SessionEndHookOutput
    );

    /// Whether any hook is set.
    #[must_use]
    pub fn has_hooks(&self) -> bool {
        self.on_pre_tool_use.is_some()
            || self.on_post_tool_use.is_some()
            || self.on_user_prompt_submitted.is_some()
            || self.on_session_start.is_some()
            || self.on_session_end.is_some()
    }

    /// Run the hook named `hook_type` on raw `input`.
    ///
    /// Returns `Ok(Value::Null)` for an unknown hook type or an unset hook.
    pub(crate) async fn invoke(
        &self,
        hook_type: &str,
        input: Value,
        invocation: HookInvocation,
    ) -> HandlerOutcome<Value> {
        match hook_type {
            hook_types::PRE_TOOL_USE => run_hook(self.on_pre_tool_use.as_ref(), input, invocation).await,
            hook_types::POST_TOOL_USE => run_hook(self.on_post_tool_use.as_ref(), input, invocation).await,
            hook_types::USER_PROMPT_SUBMITTED => {
                run_hook(self.on_user_prompt_submitted.as_ref(), input, invocation).await
            }
            hook_types::SESSION_START => run_hook(self.on_session_start.as_ref(), input, invocation).await,
            hook_types::SESSION_END => run_hook(self.on_session_end.as_ref(), input, invocation).await,
            _ => Ok(Value::Null),
        }
    }
}

async fn run_hook<I, O>(
    handler: Option<&HookHandler<I, O>>,
    input: Value,
    invocation: HookInvocation,
) -> HandlerOutcome<Value>
where
    I: DeserializeOwned,
    O: Serialize,
{
    let Some(handler) = handler else {
        return Ok(Value::Null);
    };
    let input: I = serde_json::from_value(input)?;
    let output = guarded(handler(input, invocation)).await?;
    Ok(match output {
        Some(output) => serde_json::to_value(output)?,
        None => Value::Null,
    })
}

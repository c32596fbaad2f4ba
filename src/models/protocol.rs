//! Request and response payloads for forward and reverse methods.
//!
//! Field names follow the wire format (`camelCase`). Unknown fields are
//! ignored on input and `None` fields are omitted on output.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version this client speaks; checked during the handshake.
pub const PROTOCOL_VERSION: u32 = 2;

// ── Connection ────────────────────────────────────────────────────────────────

/// Reply to `ping`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PingResponse {
    /// Echo of the request message.
    pub message: Option<String>,
    /// Server time in milliseconds since the epoch.
    pub timestamp: Option<i64>,
    /// Protocol version spoken by the server.
    pub protocol_version: Option<u32>,
}

/// Reply to `status.get`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetStatusResponse {
    /// CLI package version.
    pub version: Option<String>,
    /// Protocol version spoken by the server.
    pub protocol_version: Option<u32>,
}

/// Reply to `auth.getStatus`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetAuthStatusResponse {
    /// Whether the server holds valid credentials.
    pub is_authenticated: bool,
    /// Credential kind, e.g. `user` or `env`.
    pub auth_type: Option<String>,
    /// GitHub host the credentials belong to.
    pub host: Option<String>,
    /// Authenticated login.
    pub login: Option<String>,
    /// Human-readable status.
    pub status_message: Option<String>,
}

/// One entry of `models.list`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelInfo {
    /// Model identifier used in session configuration.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Capability description, passed through unmodified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
    /// Policy state, passed through unmodified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<Value>,
    /// Billing information, passed through unmodified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing: Option<Value>,
    /// Reasoning effort levels the model accepts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_reasoning_efforts: Option<Vec<String>>,
    /// Reasoning effort used when none is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_reasoning_effort: Option<String>,
}

/// Reply to `models.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GetModelsResponse {
    /// Available models.
    pub models: Vec<ModelInfo>,
}

// ── Session management ────────────────────────────────────────────────────────

/// Metadata for a resumable session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionMetadata {
    /// Session id.
    pub session_id: String,
    /// Creation time, RFC 3339.
    pub start_time: Option<String>,
    /// Last modification time, RFC 3339.
    pub modified_time: Option<String>,
    /// Short summary of the conversation.
    pub summary: Option<String>,
    /// Whether the session lives on a remote host.
    pub is_remote: bool,
}

/// Reply to `session.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListSessionsResponse {
    /// Known sessions.
    pub sessions: Vec<SessionMetadata>,
}

/// Reply to `session.create` and `session.resume`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionResponse {
    /// Id assigned to the session.
    pub session_id: String,
    /// Server-side workspace directory for the session, if any.
    pub workspace_path: Option<String>,
}

/// Reply to `session.getLastId`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetLastSessionIdResponse {
    /// Most recently used session, if one exists.
    pub session_id: Option<String>,
}

/// Reply to `session.delete` and `session.setForeground`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SuccessResponse {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Failure reason reported by the server.
    pub error: Option<String>,
}

/// Reply to `session.getForeground`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetForegroundSessionResponse {
    /// Foreground session, if any.
    pub session_id: Option<String>,
    /// Workspace of the foreground session.
    pub workspace_path: Option<String>,
}

/// Reply to `session.getMessages`; events are decoded by the caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GetMessagesResponse {
    /// Raw event objects in history order.
    pub events: Vec<Value>,
}

/// How the server combines a custom system message with its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMessageMode {
    /// Append to the default system message.
    Append,
    /// Replace the default system message.
    Replace,
}

/// Custom system message for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMessageConfig {
    /// Combination mode.
    pub mode: SystemMessageMode,
    /// Message text.
    pub content: String,
}

/// Wire form of a tool the host exposes to the agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    /// Tool name, unique within the session.
    pub name: String,
    /// Description shown to the model.
    pub description: String,
    /// JSON Schema of the arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Params of `session.create` and `session.resume`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    /// Requested session id; the server picks one when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Model id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Reasoning effort level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Host tools exposed to the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSpec>>,
    /// Custom system message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<SystemMessageConfig>,
    /// Allow-list of built-in tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_tools: Option<Vec<String>>,
    /// Deny-list of built-in tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_tools: Option<Vec<String>>,
    /// Custom model provider settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<Value>,
    /// Route permission checks to the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_permission: Option<bool>,
    /// Route user-input requests to the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_user_input: Option<bool>,
    /// Route hook invocations to the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hooks: Option<bool>,
    /// Working directory for the agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Configuration directory override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<String>,
    /// Resume without replaying history.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_resume: Option<bool>,
    /// Emit delta events while generating.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    /// MCP server definitions keyed by name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<HashMap<String, Value>>,
    /// How environment values in server definitions are interpreted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_value_mode: Option<String>,
    /// Custom agent definitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_agents: Option<Vec<Value>>,
    /// Directories searched for skills.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_directories: Option<Vec<String>>,
    /// Skills to disable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_skills: Option<Vec<String>>,
    /// Context compaction settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub infinite_sessions: Option<Value>,
}

// ── Messaging ─────────────────────────────────────────────────────────────────

/// File or directory attached to a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Attachment kind, `file` or `directory`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Absolute path.
    pub path: String,
    /// Label shown to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// A prompt to send to a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessageOptions {
    /// Prompt text.
    pub prompt: String,
    /// Attached files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    /// Delivery mode, e.g. `enqueue` or `immediate`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl MessageOptions {
    /// Plain prompt without attachments.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

impl From<&str> for MessageOptions {
    fn from(prompt: &str) -> Self {
        Self::prompt(prompt)
    }
}

impl From<String> for MessageOptions {
    fn from(prompt: String) -> Self {
        Self::prompt(prompt)
    }
}

/// Reply to `session.send`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageResponse {
    /// Server-assigned message id.
    pub message_id: String,
}

// ── Reverse calls ─────────────────────────────────────────────────────────────

/// Params of `tool.call`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolInvocation {
    /// Session the call belongs to.
    pub session_id: String,
    /// Correlates the call with `tool.execution_*` events.
    pub tool_call_id: String,
    /// Registered tool name.
    pub tool_name: String,
    /// Arguments produced by the model.
    pub arguments: Value,
}

/// Binary content returned by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolBinaryResult {
    /// Base64 payload.
    pub data: String,
    /// MIME type of the payload.
    pub mime_type: String,
    /// Content kind, e.g. `image`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Structured tool outcome sent back to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultObject {
    /// Text the model sees.
    pub text_result_for_llm: String,
    /// `success` or `failure`.
    pub result_type: String,
    /// Binary content the model sees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_results_for_llm: Option<Vec<ToolBinaryResult>>,
    /// Failure detail, not shown to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Text recorded in the session log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_log: Option<String>,
    /// Free-form telemetry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_telemetry: Option<HashMap<String, Value>>,
}

impl ToolResultObject {
    /// Successful result with `text`.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text_result_for_llm: text.into(),
            result_type: "success".into(),
            binary_results_for_llm: None,
            error: None,
            session_log: None,
            tool_telemetry: None,
        }
    }

    /// Failed result showing `text` to the model and recording `error`.
    pub fn failure(text: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            result_type: "failure".into(),
            error: Some(error.into()),
            ..Self::success(text)
        }
    }
}

/// Permission decision kind used when no decision can be obtained.
pub const PERMISSION_DENIED_DEFAULT: &str =
    "denied-no-approval-rule-and-could-not-request-from-user";

/// Permission request carried by `permission.request`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionRequest {
    /// Permission category, e.g. `shell`, `write`, `url`.
    pub kind: String,
    /// Tool call the request belongs to.
    pub tool_call_id: Option<String>,
    /// Category-specific details.
    #[serde(flatten)]
    pub extension_data: HashMap<String, Value>,
}

/// Host decision for a permission request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequestResult {
    /// Decision kind, e.g. `approved`.
    pub kind: String,
    /// Rules to remember for later requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Value>>,
}

impl PermissionRequestResult {
    /// Approve the request.
    #[must_use]
    pub fn approved() -> Self {
        Self {
            kind: "approved".into(),
            rules: None,
        }
    }

    /// The conservative denial used when no decision is available.
    #[must_use]
    pub fn denied_default() -> Self {
        Self {
            kind: PERMISSION_DENIED_DEFAULT.into(),
            rules: None,
        }
    }
}

/// Params of `userInput.request` (minus `sessionId`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserInputRequest {
    /// Question to ask.
    pub question: String,
    /// Suggested answers.
    pub choices: Option<Vec<String>>,
    /// Whether an answer outside `choices` is accepted.
    pub allow_freeform: Option<bool>,
}

/// Host answer to a user-input request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInputResponse {
    /// Answer text; `None` is sent as an empty string.
    pub answer: Option<String>,
    /// Whether the answer was typed rather than chosen.
    pub was_freeform: bool,
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

/// Lifecycle notification types.
pub mod lifecycle_types {
    /// A session was created.
    pub const CREATED: &str = "session.created";
    /// A session was deleted.
    pub const DELETED: &str = "session.deleted";
    /// A session's metadata changed.
    pub const UPDATED: &str = "session.updated";
    /// A session moved to the foreground.
    pub const FOREGROUND: &str = "session.foreground";
    /// A session moved to the background.
    pub const BACKGROUND: &str = "session.background";
}

/// Params of `session.lifecycle`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionLifecycleEvent {
    /// One of [`lifecycle_types`].
    #[serde(rename = "type")]
    pub kind: String,
    /// Session the event refers to.
    pub session_id: String,
    /// Optional session metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionLifecycleEventMetadata>,
}

/// Metadata attached to lifecycle notifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionLifecycleEventMetadata {
    /// Creation time.
    pub start_time: Option<String>,
    /// Last modification time.
    pub modified_time: Option<String>,
    /// Short summary.
    pub summary: Option<String>,
}

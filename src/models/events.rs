//! Session events pushed by the server.
//!
//! Every event is a JSON object `{type, data, id?, timestamp?, parentId?,
//! ephemeral?}`. The `type` discriminator selects one variant of
//! [`EventKind`]; [`EVENT_TYPES`] lists every discriminator this client
//! understands. Events with any other discriminator are dropped by
//! [`SessionEvent::parse`] and never reach subscribers.
//!
//! Payloads that callers commonly inspect are typed; the rest keep the raw
//! `data` object as a [`Value`].

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

// ── Typed payloads ────────────────────────────────────────────────────────────

/// Data of `session.start`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionStartData {
    /// Session id.
    pub session_id: String,
    /// Event schema version.
    pub version: Option<f64>,
    /// Producer name.
    pub producer: Option<String>,
    /// CLI version.
    pub copilot_version: Option<String>,
    /// Session start time.
    pub start_time: Option<DateTime<FixedOffset>>,
    /// Model chosen for the session.
    pub selected_model: Option<String>,
}

/// Data of `session.error`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionErrorData {
    /// Error category.
    pub error_type: Option<String>,
    /// Error message.
    pub message: Option<String>,
    /// Server-side stack trace.
    pub stack: Option<String>,
    /// Upstream HTTP status, when the error came from a model provider.
    pub status_code: Option<f64>,
    /// Provider request id.
    pub provider_call_id: Option<String>,
}

/// Data of `session.idle`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionIdleData {}

/// Data of `user.message`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserMessageData {
    /// Prompt as sent.
    pub content: String,
    /// Prompt after server-side expansion.
    pub transformed_content: Option<String>,
    /// Attachments, passed through unmodified.
    pub attachments: Vec<Value>,
    /// Origin of the message.
    pub source: Option<String>,
}

/// A tool call requested by the assistant.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolRequest {
    /// Tool call id.
    pub tool_call_id: String,
    /// Tool name.
    pub name: String,
    /// Arguments.
    pub arguments: Value,
}

/// Data of `assistant.message`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantMessageData {
    /// Message id.
    pub message_id: String,
    /// Message text.
    pub content: String,
    /// Tool calls issued with this message.
    pub tool_requests: Vec<ToolRequest>,
    /// Enclosing tool call, for sub-agent output.
    pub parent_tool_call_id: Option<String>,
    /// Opaque reasoning state.
    pub reasoning_opaque: Option<String>,
    /// Reasoning text.
    pub reasoning_text: Option<String>,
    /// Encrypted content.
    pub encrypted_content: Option<String>,
}

/// Data of `assistant.message_delta`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantMessageDeltaData {
    /// Message id the delta belongs to.
    pub message_id: String,
    /// Appended text.
    pub delta_content: String,
    /// Size of the message so far.
    pub total_response_size_bytes: Option<f64>,
    /// Enclosing tool call, for sub-agent output.
    pub parent_tool_call_id: Option<String>,
}

/// Data of `assistant.usage`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantUsageData {
    /// Model that served the call.
    pub model: Option<String>,
    /// Prompt tokens.
    pub input_tokens: Option<f64>,
    /// Completion tokens.
    pub output_tokens: Option<f64>,
    /// Tokens served from cache.
    pub cache_read_tokens: Option<f64>,
    /// Tokens written to cache.
    pub cache_write_tokens: Option<f64>,
    /// Cost in premium requests.
    pub cost: Option<f64>,
    /// Call duration in milliseconds.
    pub duration: Option<f64>,
    /// Initiator of the call.
    pub initiator: Option<String>,
    /// API call id.
    pub api_call_id: Option<String>,
    /// Provider request id.
    pub provider_call_id: Option<String>,
    /// Enclosing tool call.
    pub parent_tool_call_id: Option<String>,
    /// Quota state after the call.
    pub quota_snapshots: Option<Map<String, Value>>,
}

/// Data of `tool.execution_start`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolExecutionStartData {
    /// Tool call id.
    pub tool_call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Arguments.
    pub arguments: Value,
    /// MCP server hosting the tool.
    pub mcp_server_name: Option<String>,
    /// Tool name on the MCP server.
    pub mcp_tool_name: Option<String>,
    /// Enclosing tool call.
    pub parent_tool_call_id: Option<String>,
}

/// Output of a completed tool execution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolExecutionOutput {
    /// Text shown to the model.
    pub content: String,
    /// Full output.
    pub detailed_content: Option<String>,
}

/// Failure of a tool execution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ToolExecutionError {
    /// Error message.
    pub message: String,
    /// Error code.
    pub code: Option<String>,
}

/// Data of `tool.execution_complete`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolExecutionCompleteData {
    /// Tool call id.
    pub tool_call_id: String,
    /// Whether the tool succeeded.
    pub success: bool,
    /// Whether the user invoked the tool directly.
    pub is_user_requested: Option<bool>,
    /// Output on success.
    pub result: Option<ToolExecutionOutput>,
    /// Failure on error.
    pub error: Option<ToolExecutionError>,
    /// Free-form telemetry.
    pub tool_telemetry: Option<Map<String, Value>>,
    /// Enclosing tool call.
    pub parent_tool_call_id: Option<String>,
}

// ── Event kinds ───────────────────────────────────────────────────────────────

macro_rules! session_events {
    ($( $(#[$doc:meta])* $variant:ident($payload:ty) = $tag:literal, )*) => {
        /// Closed set of session event payloads, keyed by discriminator.
        #[derive(Debug, Clone, PartialEq)]
        pub enum EventKind {
            $( $(#[$doc])* $variant($payload), )*
        }

        impl EventKind {
            /// Wire discriminator of this variant.
            #[must_use]
            pub fn event_type(&self) -> &'static str {
                match self {
                    $( Self::$variant(_) => $tag, )*
                }
            }

            fn decode(event_type: &str, data: Value) -> Option<serde_json::Result<Self>> {
                match event_type {
                    $( $tag => Some(serde_json::from_value::<$payload>(data).map(Self::$variant)), )*
                    _ => None,
                }
            }
        }

        /// Every discriminator this client decodes.
        pub const EVENT_TYPES: &[&str] = &[ $( $tag, )* ];
    };
}

session_events! {
    /// Session created.
    SessionStart(SessionStartData) = "session.start",
    /// Session resumed.
    SessionResume(Value) = "session.resume",
    /// Session-level failure.
    SessionError(SessionErrorData) = "session.error",
    /// The session finished processing and awaits input.
    SessionIdle(SessionIdleData) = "session.idle",
    /// Informational notice.
    SessionInfo(Value) = "session.info",
    /// Model switched.
    SessionModelChange(Value) = "session.model_change",
    /// Mode switched.
    SessionModeChanged(Value) = "session.mode_changed",
    /// Plan updated.
    SessionPlanChanged(Value) = "session.plan_changed",
    /// Workspace file changed.
    SessionWorkspaceFileChanged(Value) = "session.workspace_file_changed",
    /// Session handed off.
    SessionHandoff(Value) = "session.handoff",
    /// History truncated.
    SessionTruncation(Value) = "session.truncation",
    /// Snapshot rewound.
    SessionSnapshotRewind(Value) = "session.snapshot_rewind",
    /// Context usage report.
    SessionUsageInfo(Value) = "session.usage_info",
    /// Context compaction started.
    SessionCompactionStart(Value) = "session.compaction_start",
    /// Context compaction finished.
    SessionCompactionComplete(Value) = "session.compaction_complete",
    /// Working context changed.
    SessionContextChanged(Value) = "session.context_changed",
    /// User prompt recorded.
    UserMessage(UserMessageData) = "user.message",
    /// Pending message queue changed.
    PendingMessagesModified(Value) = "pending_messages.modified",
    /// Assistant turn started.
    AssistantTurnStart(Value) = "assistant.turn_start",
    /// Assistant stated its intent.
    AssistantIntent(Value) = "assistant.intent",
    /// Assistant reasoning block.
    AssistantReasoning(Value) = "assistant.reasoning",
    /// Streaming reasoning chunk.
    AssistantReasoningDelta(Value) = "assistant.reasoning_delta",
    /// Complete assistant message.
    AssistantMessage(AssistantMessageData) = "assistant.message",
    /// Streaming message chunk.
    AssistantMessageDelta(AssistantMessageDeltaData) = "assistant.message_delta",
    /// Assistant turn finished.
    AssistantTurnEnd(Value) = "assistant.turn_end",
    /// Model usage report.
    AssistantUsage(AssistantUsageData) = "assistant.usage",
    /// Processing aborted.
    Abort(Value) = "abort",
    /// User invoked a tool directly.
    ToolUserRequested(Value) = "tool.user_requested",
    /// Tool execution started.
    ToolExecutionStart(ToolExecutionStartData) = "tool.execution_start",
    /// Partial tool output.
    ToolExecutionPartialResult(Value) = "tool.execution_partial_result",
    /// Tool progress message.
    ToolExecutionProgress(Value) = "tool.execution_progress",
    /// Tool execution finished.
    ToolExecutionComplete(ToolExecutionCompleteData) = "tool.execution_complete",
    /// Sub-agent started.
    SubagentStarted(Value) = "subagent.started",
    /// Sub-agent completed.
    SubagentCompleted(Value) = "subagent.completed",
    /// Sub-agent failed.
    SubagentFailed(Value) = "subagent.failed",
    /// Sub-agent selected.
    SubagentSelected(Value) = "subagent.selected",
    /// Hook started.
    HookStart(Value) = "hook.start",
    /// Hook finished.
    HookEnd(Value) = "hook.end",
    /// System message recorded.
    SystemMessage(Value) = "system.message",
    /// Session shut down.
    SessionShutdown(Value) = "session.shutdown",
    /// Skill invoked.
    SkillInvoked(Value) = "skill.invoked",
}

/// One parsed session event.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    /// Event id.
    pub id: Option<Uuid>,
    /// Emission time.
    pub timestamp: Option<DateTime<FixedOffset>>,
    /// Causing event.
    pub parent_id: Option<Uuid>,
    /// Whether the event is excluded from persisted history.
    pub ephemeral: Option<bool>,
    /// Payload.
    pub kind: EventKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(rename = "type")]
    event_type: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    timestamp: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    parent_id: Option<Uuid>,
    #[serde(default)]
    ephemeral: Option<bool>,
}

impl SessionEvent {
    /// Decode a raw event object.
    ///
    /// Returns `None` for a missing or unknown discriminator and for payloads
    /// that do not match their variant's shape.
    #[must_use]
    pub fn parse(raw: &Value) -> Option<Self> {
        let envelope = match Envelope::deserialize(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "session event: malformed envelope, skipping");
                return None;
            }
        };

        let Some(event_type) = envelope.event_type else {
            warn!("session event: missing type, skipping");
            return None;
        };

        let data = match envelope.data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        match EventKind::decode(&event_type, data) {
            None => {
                debug!(event_type, "session event: unknown type, skipping");
                None
            }
            Some(Err(err)) => {
                warn!(event_type, error = %err, "session event: malformed payload, skipping");
                None
            }
            Some(Ok(kind)) => Some(Self {
                id: envelope.id,
                timestamp: envelope.timestamp,
                parent_id: envelope.parent_id,
                ephemeral: envelope.ephemeral,
                kind,
            }),
        }
    }

    /// Wire discriminator.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Wrap a payload without envelope metadata.
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: None,
            timestamp: None,
            parent_id: None,
            ephemeral: None,
            kind,
        }
    }
}

/// Payload types that typed subscriptions can filter on.
pub trait TypedEvent: Sized + Send + Sync + 'static {
    /// Discriminator of the variant carrying this payload.
    const EVENT_TYPE: &'static str;

    /// Borrow the payload when `kind` is this type's variant.
    fn extract(kind: &EventKind) -> Option<&Self>;
}

macro_rules! typed_event {
    ($payload:ty, $variant:ident, $tag:literal) => {
        impl TypedEvent for $payload {
            const EVENT_TYPE: &'static str = $tag;

            fn extract(kind: &EventKind) -> Option<&Self> {
                match kind {
                    EventKind::$variant(data) => Some(data),
                    _ => None,
                }
            }
        }
    };
}

typed_event!(SessionStartData, SessionStart, "session.start");
typed_event!(SessionErrorData, SessionError, "session.error");
typed_event!(SessionIdleData, SessionIdle, "session.idle");
typed_event!(UserMessageData, UserMessage, "user.message");
typed_event!(AssistantMessageData, AssistantMessage, "assistant.message");
typed_event!(AssistantMessageDeltaData, AssistantMessageDelta, "assistant.message_delta");
typed_event!(AssistantUsageData, AssistantUsage, "assistant.usage");
typed_event!(ToolExecutionStartData, ToolExecutionStart, "tool.execution_start");
typed_event!(ToolExecutionCompleteData, ToolExecutionComplete, "tool.execution_complete");

//! Options for creating or resuming a session.

use std::collections::HashMap;

use serde_json::Value;

use crate::models::protocol::{SessionRequest, SystemMessageConfig};
use crate::session::handlers::{PermissionHandler, SessionHooks, ToolDefinition, UserInputHandler};

/// Session options plus the host callbacks to register on the new session.
///
/// Callbacks are registered before the session becomes visible to reverse
/// calls, so no `tool.call` can arrive for a half-configured session.
#[derive(Clone, Default)]
pub struct SessionConfig {
    /// Requested session id (create only).
    pub session_id: Option<String>,
    /// Model id.
    pub model: Option<String>,
    /// Reasoning effort level.
    pub reasoning_effort: Option<String>,
    /// Host tools.
    pub tools: Vec<ToolDefinition>,
    /// Custom system message.
    pub system_message: Option<SystemMessageConfig>,
    /// Allow-list of built-in tools.
    pub available_tools: Option<Vec<String>>,
    /// Deny-list of built-in tools.
    pub excluded_tools: Option<Vec<String>>,
    /// Custom model provider settings.
    pub provider: Option<Value>,
    /// Working directory for the agent.
    pub working_directory: Option<String>,
    /// Configuration directory override.
    pub config_dir: Option<String>,
    /// Emit delta events while generating.
    pub streaming: bool,
    /// Resume without replaying history (resume only).
    pub disable_resume: bool,
    /// MCP server definitions keyed by name.
    pub mcp_servers: Option<HashMap<String, Value>>,
    /// Custom agent definitions.
    pub custom_agents: Option<Vec<Value>>,
    /// Directories searched for skills.
    pub skill_directories: Option<Vec<String>>,
    /// Skills to disable.
    pub disabled_skills: Option<Vec<String>>,
    /// Context compaction settings.
    pub infinite_sessions: Option<Value>,
    /// Permission callback.
    pub on_permission_request: Option<PermissionHandler>,
    /// User-input callback.
    pub on_user_input_request: Option<UserInputHandler>,
    /// Hook callbacks.
    pub hooks: Option<SessionHooks>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("session_id", &self.session_id)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field("streaming", &self.streaming)
            .field("permission_handler", &self.on_permission_request.is_some())
            .field("user_input_handler", &self.on_user_input_request.is_some())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl SessionConfig {
    /// Build `session.create` params.
    #[must_use]
    pub fn create_request(&self) -> SessionRequest {
        SessionRequest {
            session_id: self.session_id.clone(),
            disable_resume: None,
            ..self.base_request()
        }
    }

    /// Build `session.resume` params for `session_id`.
    #[must_use]
    pub fn resume_request(&self, session_id: &str) -> SessionRequest {
        SessionRequest {
            session_id: Some(session_id.to_owned()),
            disable_resume: self.disable_resume.then_some(true),
            ..self.base_request()
        }
    }

    fn base_request(&self) -> SessionRequest {
        SessionRequest {
            session_id: None,
            model: self.model.clone(),
            reasoning_effort: self.reasoning_effort.clone(),
            tools: (!self.tools.is_empty())
                .then(|| self.tools.iter().map(ToolDefinition::spec).collect()),
            system_message: self.system_message.clone(),
            available_tools: self.available_tools.clone(),
            excluded_tools: self.excluded_tools.clone(),
            provider: self.provider.clone(),
            request_permission: self.on_permission_request.is_some().then_some(true),
            request_user_input: self.on_user_input_request.is_some().then_some(true),
            hooks: self
                .hooks
                .as_ref()
                .is_some_and(SessionHooks::has_hooks)
                .then_some(true),
            working_directory: self.working_directory.clone(),
            config_dir: self.config_dir.clone(),
            disable_resume: None,
            streaming: self.streaming.then_some(true),
            mcp_servers: self.mcp_servers.clone(),
            env_value_mode: Some("direct".into()),
            custom_agents: self.custom_agents.clone(),
            skill_directories: self.skill_directories.clone(),
            disabled_skills: self.disabled_skills.clone(),
            infinite_sessions: self.infinite_sessions.clone(),
        }
    }
}

#![forbid(unsafe_code)]

//! Client for driving a Copilot CLI agent process over JSON-RPC.
//!
//! The CLI is launched in server mode (or reached over TCP), frames are
//! exchanged with `Content-Length` headers, and the CLI calls back into the
//! host for tool execution, permission checks, user input and hooks.

pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod process;
pub mod rpc;
pub mod session;

pub use client::{ConnectionState, CopilotClient};
pub use config::ClientOptions;
pub use errors::{ClientError, Result};
pub use models::events::{EventKind, SessionEvent, TypedEvent};
pub use models::protocol::{MessageOptions, PermissionRequestResult, ToolResultObject};
pub use session::{ErrorPolicy, Session, SessionConfig, SessionHooks, Subscription, ToolDefinition};

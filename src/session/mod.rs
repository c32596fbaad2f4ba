//! Per-session event fan-out, send/await correlation and callback routing.
//!
//! Inbound `session.event` notifications are queued on the session and
//! delivered by a pump task, so subscribers run off the transport reader and
//! see events in arrival order. Reverse calls (tools, permission, user input,
//! hooks) look up the single handler registered for their category.

pub mod config;
pub mod handlers;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::models::events::{AssistantMessageData, EventKind, SessionEvent, TypedEvent};
use crate::models::protocol::{
    GetMessagesResponse, MessageOptions, PermissionRequest, PermissionRequestResult,
    SendMessageResponse, UserInputRequest, UserInputResponse,
};
use crate::rpc::dispatcher::panic_message;
use crate::rpc::RpcClient;
use crate::{ClientError, Result};

pub use config::SessionConfig;
pub use handlers::{
    BoxError, HandlerOutcome, HookInvocation, PermissionHandler, PermissionInvocation,
    SessionHooks, ToolDefinition, ToolHandler, UserInputHandler, UserInputInvocation,
};

use handlers::guarded;

/// Timeout applied by [`Session::send_and_wait`].
pub const DEFAULT_SEND_AND_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Synchronous event subscriber.
pub type EventHandler = Arc<dyn Fn(&SessionEvent) -> HandlerOutcome<()> + Send + Sync>;

/// Called with the event and the error whenever a subscriber fails.
///
/// Returning an error (or panicking) stops delivery of that event to the
/// remaining subscribers regardless of the [`ErrorPolicy`].
pub type EventErrorHandler = Arc<
    dyn Fn(&SessionEvent, &(dyn std::error::Error + Send + Sync)) -> HandlerOutcome<()>
        + Send
        + Sync,
>;

/// What happens to the remaining subscribers after one fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Log the failure and stop delivering the current event.
    #[default]
    PropagateAndLogErrors,
    /// Log the failure and keep delivering to later subscribers.
    SuppressAndLogErrors,
}

/// Token returned by subscription methods; pass it to
/// [`Session::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

// ── Registry ─────────────────────────────────────────────────────────────────

/// Live sessions of one connection, keyed by session id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session`.
    ///
    /// A live session already registered under the same id is terminated
    /// locally and replaced.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::SessionState`] if the session was already
    /// closed; closed sessions never come back.
    pub fn insert(&self, session: Arc<Session>) -> Result<()> {
        if session.is_closed() {
            return Err(ClientError::SessionState(format!(
                "session {} is closed",
                session.session_id()
            )));
        }
        let replaced = self
            .write()
            .insert(session.session_id().to_owned(), Arc::clone(&session));
        if let Some(previous) = replaced.filter(|previous| !Arc::ptr_eq(previous, &session)) {
            warn!(session_id = previous.session_id(), "replacing live session with the same id");
            previous.terminate_local();
        }
        Ok(())
    }

    /// Look up a session by id.
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.read().get(session_id).cloned()
    }

    /// Remove a session by id.
    pub fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.write().remove(session_id)
    }

    /// Remove `session` only if it is the handle registered under its id.
    fn remove_exact(&self, session: &Session) {
        let mut sessions = self.write();
        if sessions
            .get(session.session_id())
            .is_some_and(|registered| std::ptr::eq(Arc::as_ptr(registered), session))
        {
            sessions.remove(session.session_id());
        }
    }

    /// Remove and return every session.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        self.write().drain().map(|(_, session)| session).collect()
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SessionState {
    next_subscription: u64,
    subscribers: Vec<(Subscription, EventHandler)>,
    error_handler: Option<EventErrorHandler>,
    error_policy: ErrorPolicy,
    tools: HashMap<String, ToolDefinition>,
    permission: Option<PermissionHandler>,
    user_input: Option<UserInputHandler>,
    hooks: Option<SessionHooks>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageRequest<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    options: &'a MessageOptions,
}

/// One conversation with the agent.
pub struct Session {
    session_id: String,
    workspace_path: Option<String>,
    rpc: Arc<RpcClient>,
    registry: Weak<SessionRegistry>,
    destroy_timeout: Duration,
    state: Mutex<SessionState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    close_started: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("workspace_path", &self.workspace_path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session handle and start its event pump.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        session_id: String,
        workspace_path: Option<String>,
        rpc: Arc<RpcClient>,
        registry: Weak<SessionRegistry>,
        destroy_timeout: Duration,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            session_id,
            workspace_path,
            rpc,
            registry,
            destroy_timeout,
            state: Mutex::new(SessionState::default()),
            events: tx,
            close_started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(run_event_pump(Arc::downgrade(&session), rx));
        session
    }

    /// Server-assigned session id.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Workspace directory, when infinite sessions are enabled.
    #[must_use]
    pub fn workspace_path(&self) -> Option<&str> {
        self.workspace_path.as_deref()
    }

    /// Whether [`close`](Self::close) has run or the client tore it down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::SessionState(format!(
                "session {} is closed",
                self.session_id
            )));
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state of an open session.
    ///
    /// The closed flag is set before the state is reset, so a change made
    /// under this guard is either rejected or cleared by the teardown.
    fn lock_open(&self) -> Result<std::sync::MutexGuard<'_, SessionState>> {
        let state = self.lock();
        self.ensure_open()?;
        Ok(state)
    }

    // ── Messaging ────────────────────────────────────────────────────────────

    /// Send a prompt; returns the server-assigned message id.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionState`] once closed, or any RPC error.
    pub async fn send(&self, options: impl Into<MessageOptions>) -> Result<String> {
        self.ensure_open()?;
        let options = options.into();
        let request = SendMessageRequest {
            session_id: &self.session_id,
            options: &options,
        };
        let response: SendMessageResponse = self.rpc.invoke_as("session.send", &request).await?;
        debug!(session_id = %self.session_id, message_id = %response.message_id, "prompt sent");
        Ok(response.message_id)
    }

    /// Send a prompt and wait up to 60 s for the session to go idle.
    ///
    /// # Errors
    ///
    /// See [`send_and_wait_timeout`](Self::send_and_wait_timeout).
    pub async fn send_and_wait(
        &self,
        options: impl Into<MessageOptions>,
    ) -> Result<Option<AssistantMessageData>> {
        self.send_and_wait_timeout(options, DEFAULT_SEND_AND_WAIT_TIMEOUT)
            .await
    }

    /// Send a prompt and wait for the session to go idle.
    ///
    /// Resolves with the last `assistant.message` seen before `session.idle`,
    /// if any.
    ///
    /// # Errors
    ///
    /// - [`ClientError::SessionFailed`] when a `session.error` event arrives.
    /// - [`ClientError::Timeout`] when the send and the wait together take
    ///   longer than `timeout`.
    /// - Any error from [`send`](Self::send).
    pub async fn send_and_wait_timeout(
        &self,
        options: impl Into<MessageOptions>,
        timeout: Duration,
    ) -> Result<Option<AssistantMessageData>> {
        self.ensure_open()?;

        let (tx, rx) = oneshot::channel::<Result<Option<AssistantMessageData>>>();
        let waiter = Mutex::new((Some(tx), None::<AssistantMessageData>));
        let subscription = self.on(move |event| {
            let mut waiter = waiter.lock().unwrap_or_else(PoisonError::into_inner);
            let outcome = match &event.kind {
                EventKind::AssistantMessage(message) => {
                    waiter.1 = Some(message.clone());
                    return Ok(());
                }
                EventKind::SessionIdle(_) => Ok(waiter.1.take()),
                EventKind::SessionError(error) => Err(ClientError::SessionFailed(
                    error
                        .message
                        .clone()
                        .unwrap_or_else(|| "session error".to_owned()),
                )),
                _ => return Ok(()),
            };
            if let Some(tx) = waiter.0.take() {
                let _ = tx.send(outcome);
            }
            Ok(())
        })?;

        let exchange = async {
            if let Err(err) = self.send(options).await {
                return Err(err);
            }
            match rx.await {
                Ok(outcome) => outcome,
                Err(_dropped) => Err(ClientError::SessionState(format!(
                    "session {} closed while waiting",
                    self.session_id
                ))),
            }
        };
        let outcome = match tokio::time::timeout(timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(ClientError::Timeout(format!(
                "send_and_wait timed out after {timeout:?}"
            ))),
        };

        self.remove_subscriber(subscription);
        outcome
    }

    /// Every event recorded for this session, oldest first.
    ///
    /// Entries that do not decode into a known event are skipped.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionState`] once closed, or any RPC error.
    pub async fn get_messages(&self) -> Result<Vec<SessionEvent>> {
        self.ensure_open()?;
        let response: GetMessagesResponse = self
            .rpc
            .invoke_as("session.getMessages", &json!({ "sessionId": self.session_id }))
            .await?;
        Ok(response.events.iter().filter_map(SessionEvent::parse).collect())
    }

    /// Abort the message currently being processed.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionState`] once closed, or any RPC error.
    pub async fn abort(&self) -> Result<()> {
        self.ensure_open()?;
        self.rpc
            .invoke("session.abort", json!({ "sessionId": self.session_id }))
            .await?;
        Ok(())
    }

    /// Destroy the session on the server and clear all local state.
    ///
    /// Idempotent. The destroy RPC is sent at most once and bounded by the
    /// configured timeout; its failure is logged, not returned.
    pub async fn close(&self) {
        if let Err(err) = self.close_with_result().await {
            debug!(session_id = %self.session_id, error = %err, "session destroy failed");
        }
    }

    /// Like [`close`](Self::close) but reports the destroy RPC outcome.
    pub(crate) async fn close_with_result(&self) -> Result<()> {
        if self.close_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let destroy = self
            .rpc
            .invoke("session.destroy", json!({ "sessionId": self.session_id }));
        let outcome = match tokio::time::timeout(self.destroy_timeout, destroy).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(ClientError::Timeout(format!(
                "session.destroy for {} timed out after {:?}",
                self.session_id, self.destroy_timeout
            ))),
        };

        self.terminate_local();
        info!(session_id = %self.session_id, "session closed");
        outcome
    }

    /// Clear local state and reject further calls, without contacting the
    /// server.
    pub(crate) fn terminate_local(&self) {
        self.close_started.store(true, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        *self.lock() = SessionState::default();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove_exact(self);
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────────────

    /// Subscribe to every event.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionState`] once closed. The same applies to every
    /// subscription and registration method below.
    pub fn on<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(&SessionEvent) -> HandlerOutcome<()> + Send + Sync + 'static,
    {
        let mut state = self.lock_open()?;
        state.next_subscription += 1;
        let subscription = Subscription(state.next_subscription);
        state.subscribers.push((subscription, Arc::new(handler)));
        Ok(subscription)
    }

    /// Subscribe to events carrying payload `T`.
    pub fn on_event<T, F>(&self, handler: F) -> Result<Subscription>
    where
        T: TypedEvent,
        F: Fn(&T) -> HandlerOutcome<()> + Send + Sync + 'static,
    {
        self.on(move |event| match T::extract(&event.kind) {
            Some(data) => handler(data),
            None => Ok(()),
        })
    }

    /// Subscribe to events whose discriminator equals `event_type`.
    pub fn on_type<F>(&self, event_type: impl Into<String>, handler: F) -> Result<Subscription>
    where
        F: Fn(&SessionEvent) -> HandlerOutcome<()> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        self.on(move |event| {
            if event.event_type() == event_type {
                handler(event)
            } else {
                Ok(())
            }
        })
    }

    /// Remove a subscription; returns whether it was present.
    pub fn unsubscribe(&self, subscription: Subscription) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.remove_subscriber(subscription))
    }

    fn remove_subscriber(&self, subscription: Subscription) -> bool {
        let mut state = self.lock();
        let before = state.subscribers.len();
        state.subscribers.retain(|(id, _)| *id != subscription);
        state.subscribers.len() != before
    }

    /// Number of active event subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Install the callback invoked when a subscriber fails.
    pub fn set_error_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&SessionEvent, &(dyn std::error::Error + Send + Sync)) -> HandlerOutcome<()>
            + Send
            + Sync
            + 'static,
    {
        self.lock_open()?.error_handler = Some(Arc::new(handler));
        Ok(())
    }

    /// Choose what happens after a subscriber fails.
    pub fn set_error_policy(&self, policy: ErrorPolicy) -> Result<()> {
        self.lock_open()?.error_policy = policy;
        Ok(())
    }

    /// Deliver `event` to every current subscriber, in subscription order.
    ///
    /// Each subscriber runs inside its own failure boundary; errors and
    /// panics are logged and handled according to the error policy.
    pub fn dispatch_event(&self, event: &SessionEvent) {
        let (subscribers, error_handler, policy) = {
            let state = self.lock();
            let subscribers: Vec<EventHandler> =
                state.subscribers.iter().map(|(_, h)| Arc::clone(h)).collect();
            (subscribers, state.error_handler.clone(), state.error_policy)
        };

        for handler in subscribers {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)))
                .unwrap_or_else(|panic| Err(panic_message(panic.as_ref()).into()));
            let Err(err) = outcome else {
                continue;
            };

            warn!(
                session_id = %self.session_id,
                event_type = event.event_type(),
                error = %err,
                "session event handler failed"
            );

            if let Some(on_error) = &error_handler {
                let handled =
                    std::panic::catch_unwind(AssertUnwindSafe(|| on_error(event, &*err)))
                        .unwrap_or_else(|panic| Err(panic_message(panic.as_ref()).into()));
                if let Err(nested) = handled {
                    warn!(
                        session_id = %self.session_id,
                        error = %nested,
                        "session error handler failed, stopping dispatch"
                    );
                    return;
                }
            }

            if policy == ErrorPolicy::PropagateAndLogErrors {
                return;
            }
        }
    }

    /// Queue an inbound event for the pump task.
    pub(crate) fn enqueue_event(&self, event: SessionEvent) {
        if self.is_closed() {
            return;
        }
        if self.events.send(event).is_err() {
            debug!(session_id = %self.session_id, "event pump gone, dropping event");
        }
    }

    // ── Host callbacks ───────────────────────────────────────────────────────

    /// Replace the session's tool set.
    pub fn register_tools(&self, tools: impl IntoIterator<Item = ToolDefinition>) -> Result<()> {
        let tools = tools.into_iter().map(|t| (t.name.clone(), t)).collect();
        self.lock_open()?.tools = tools;
        Ok(())
    }

    /// Install (or clear) the permission callback.
    pub fn register_permission_handler(&self, handler: Option<PermissionHandler>) -> Result<()> {
        self.lock_open()?.permission = handler;
        Ok(())
    }

    /// Install (or clear) the user-input callback.
    pub fn register_user_input_handler(&self, handler: Option<UserInputHandler>) -> Result<()> {
        self.lock_open()?.user_input = handler;
        Ok(())
    }

    /// Install (or clear) the hook callbacks.
    pub fn register_hooks(&self, hooks: Option<SessionHooks>) -> Result<()> {
        self.lock_open()?.hooks = hooks;
        Ok(())
    }

    pub(crate) fn tool(&self, name: &str) -> Option<ToolDefinition> {
        self.lock().tools.get(name).cloned()
    }

    /// Decide a permission request, falling back to the conservative denial.
    pub(crate) async fn handle_permission_request(&self, raw: Value) -> PermissionRequestResult {
        let Some(handler) = self.lock().permission.clone() else {
            return PermissionRequestResult::denied_default();
        };

        let request: PermissionRequest = match serde_json::from_value(raw) {
            Ok(request) => request,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "malformed permission request");
                return PermissionRequestResult::denied_default();
            }
        };

        let invocation = PermissionInvocation {
            session_id: self.session_id.clone(),
        };
        match guarded(handler(request, invocation)).await {
            Ok(result) => result,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "permission handler failed");
                PermissionRequestResult::denied_default()
            }
        }
    }

    /// Ask the host for user input.
    pub(crate) async fn handle_user_input(
        &self,
        request: UserInputRequest,
    ) -> HandlerOutcome<UserInputResponse> {
        let Some(handler) = self.lock().user_input.clone() else {
            return Err("no user input handler registered".into());
        };
        let invocation = UserInputInvocation {
            session_id: self.session_id.clone(),
        };
        guarded(handler(request, invocation)).await
    }

    /// Run a hook; `Ok(Value::Null)` when none applies.
    pub(crate) async fn handle_hooks_invoke(
        &self,
        hook_type: &str,
        input: Value,
    ) -> HandlerOutcome<Value> {
        let Some(hooks) = self.lock().hooks.clone() else {
            return Ok(Value::Null);
        };
        let invocation = HookInvocation {
            session_id: self.session_id.clone(),
        };
        hooks.invoke(hook_type, input, invocation).await
    }
}

async fn run_event_pump(session: Weak<Session>, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.dispatch_event(&event);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

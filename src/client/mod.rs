//! Connection orchestrator.
//!
//! [`CopilotClient`] owns one connection at a time: the CLI process (unless
//! the server is external), the RPC transport, the session registry, the
//! models cache and the lifecycle subscribers. Connecting is single-flight:
//! concurrent callers of [`CopilotClient::start`] await one shared future.

pub mod lifecycle;
pub(crate) mod reverse;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{parse_cli_url, ClientOptions};
use crate::models::protocol::{
    GetAuthStatusResponse, GetForegroundSessionResponse, GetLastSessionIdResponse,
    GetModelsResponse, GetStatusResponse, ListSessionsResponse, ModelInfo, PingResponse,
    SessionLifecycleEvent, SessionMetadata, SessionResponse, SuccessResponse, PROTOCOL_VERSION,
};
use crate::process::{spawn_cli, CliProcess, CliTransport, PortAnnouncement, ReadinessProbe, TERMINATE_GRACE};
use crate::rpc::{Dispatcher, RpcClient};
use crate::session::{Session, SessionConfig, SessionRegistry};
use crate::{ClientError, Result};

pub use lifecycle::{LifecycleHandler, LifecycleSubscription};

use lifecycle::LifecycleListeners;

/// Connection status, derived from the shared connect future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never started, or stopped.
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Handshake completed and the transport is open.
    Connected,
    /// Connect failed, or the transport closed underneath the client.
    Error,
}

type ConnectFuture = Shared<BoxFuture<'static, Result<Arc<Connection>>>>;

/// One live transport plus the process serving it.
///
/// Per-connection caches live here so they go away with the transport.
struct Connection {
    rpc: Arc<RpcClient>,
    process: tokio::sync::Mutex<Option<CliProcess>>,
    models: OnceCell<Vec<ModelInfo>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("rpc", &self.rpc).finish_non_exhaustive()
    }
}

impl Connection {
    async fn shutdown(&self) {
        self.rpc.close().await;
        if let Some(mut process) = self.process.lock().await.take() {
            process.terminate(TERMINATE_GRACE).await;
        }
    }

    async fn kill(&self) {
        self.rpc.close().await;
        if let Some(mut process) = self.process.lock().await.take() {
            process.force_kill();
        }
    }
}

/// Client for a Copilot CLI server.
pub struct CopilotClient {
    options: ClientOptions,
    probe: Arc<dyn ReadinessProbe>,
    sessions: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleListeners>,
    connect: Mutex<Option<ConnectFuture>>,
}

impl std::fmt::Debug for CopilotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopilotClient")
            .field("state", &self.state())
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl CopilotClient {
    /// Validate `options` and build a client using the default port probe.
    ///
    /// Nothing is spawned until [`start`](Self::start) or the first call.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when `options` are inconsistent.
    pub fn new(options: ClientOptions) -> Result<Self> {
        Self::with_probe(options, Arc::new(PortAnnouncement::new()?))
    }

    /// Like [`new`](Self::new) with a custom readiness probe.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] when `options` are inconsistent.
    pub fn with_probe(options: ClientOptions, probe: Arc<dyn ReadinessProbe>) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            probe,
            sessions: Arc::new(SessionRegistry::new()),
            lifecycle: Arc::new(LifecycleListeners::default()),
            connect: Mutex::new(None),
        })
    }

    /// Options this client was built with.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn connect_slot(&self) -> std::sync::MutexGuard<'_, Option<ConnectFuture>> {
        self.connect.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current connection status.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        let slot = self.connect_slot();
        let Some(connect) = slot.as_ref() else {
            return ConnectionState::Disconnected;
        };
        match connect.peek() {
            None => ConnectionState::Connecting,
            Some(Ok(connection)) if !connection.rpc.is_closed() => ConnectionState::Connected,
            Some(_) => ConnectionState::Error,
        }
    }

    // ── Connection management ────────────────────────────────────────────────

    /// Connect, spawning the CLI unless an external server is configured.
    ///
    /// Concurrent callers share one attempt. After a failure every caller
    /// sees the same error until [`stop`](Self::stop) resets the client.
    ///
    /// # Errors
    ///
    /// [`ClientError::Startup`], [`ClientError::Transport`] or
    /// [`ClientError::Handshake`] depending on which phase failed.
    pub async fn start(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn connection(&self) -> Result<Arc<Connection>> {
        let connect = {
            let mut slot = self.connect_slot();
            if let Some(connect) = slot.as_ref() {
                connect.clone()
            } else {
                let connect = establish(
                    self.options.clone(),
                    Arc::clone(&self.probe),
                    Arc::clone(&self.sessions),
                    Arc::clone(&self.lifecycle),
                )
                .boxed()
                .shared();
                *slot = Some(connect.clone());
                connect
            }
        };
        connect.await
    }

    async fn connected(&self) -> Result<Arc<Connection>> {
        if !self.options.auto_start && self.connect_slot().is_none() {
            return Err(ClientError::Transport(
                "client not connected; call start() first".into(),
            ));
        }
        self.connection().await
    }

    async fn rpc(&self) -> Result<Arc<RpcClient>> {
        let connection = self.connected().await?;
        Ok(Arc::clone(&connection.rpc))
    }

    fn take_connect(&self) -> Option<ConnectFuture> {
        self.connect_slot().take()
    }

    /// Close every session, then tear the connection down.
    ///
    /// Session close failures are collected and returned; the connection is
    /// torn down regardless. The client can be started again afterwards.
    pub async fn stop(&self) -> Vec<ClientError> {
        let connect = self.take_connect();
        let mut errors = Vec::new();

        for session in self.sessions.drain() {
            if let Err(err) = session.close_with_result().await {
                warn!(session_id = session.session_id(), error = %err, "session close failed during stop");
                errors.push(ClientError::SessionState(format!(
                    "failed to close session {}: {err}",
                    session.session_id()
                )));
            }
        }

        if let Some(connect) = connect {
            if let Ok(connection) = connect.await {
                connection.shutdown().await;
            }
        }
        info!(errors = errors.len(), "client stopped");
        errors
    }

    /// Tear the connection down immediately.
    ///
    /// Sessions are terminated locally without destroy calls and the CLI
    /// process is killed.
    pub async fn force_stop(&self) {
        let connect = self.take_connect();
        for session in self.sessions.drain() {
            session.terminate_local();
        }

        if let Some(Ok(connection)) = connect.as_ref().and_then(|c| c.peek()).cloned() {
            connection.kill().await;
        }
        info!("client force-stopped");
    }

    // ── Forward calls ────────────────────────────────────────────────────────

    /// Round-trip a ping.
    ///
    /// # Errors
    ///
    /// Any connection or RPC error.
    pub async fn ping(&self, message: Option<&str>) -> Result<PingResponse> {
        self.rpc()
            .await?
            .invoke_as("ping", &json!({ "message": message }))
            .await
    }

    /// CLI version and protocol information.
    ///
    /// # Errors
    ///
    /// Any connection or RPC error.
    pub async fn get_status(&self) -> Result<GetStatusResponse> {
        self.rpc().await?.invoke_as("status.get", &json!({})).await
    }

    /// Authentication status of the CLI.
    ///
    /// # Errors
    ///
    /// Any connection or RPC error.
    pub async fn get_auth_status(&self) -> Result<GetAuthStatusResponse> {
        self.rpc().await?.invoke_as("auth.getStatus", &json!({})).await
    }

    /// Available models, fetched once per connection.
    ///
    /// Concurrent first callers share one `models.list` request. The cached
    /// list is never served once the transport has closed.
    ///
    /// # Errors
    ///
    /// [`ClientError::Transport`] when the connection has dropped, or any
    /// connection or RPC error.
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let connection = self.connected().await?;
        if connection.rpc.is_closed() {
            return Err(ClientError::Transport("connection to cli server closed".into()));
        }

        let models = connection
            .models
            .get_or_try_init(|| async {
                let response: GetModelsResponse =
                    connection.rpc.invoke_as("models.list", &json!({})).await?;
                debug!(count = response.models.len(), "models cached");
                Ok::<_, ClientError>(response.models)
            })
            .await?;
        Ok(models.clone())
    }

    /// Create a session and register its callbacks.
    ///
    /// # Errors
    ///
    /// Any connection or RPC error.
    pub async fn create_session(&self, config: SessionConfig) -> Result<Arc<Session>> {
        let rpc = self.rpc().await?;
        let response: SessionResponse = rpc
            .invoke_as("session.create", &config.create_request())
            .await?;
        self.attach_session(rpc, response, config)
    }

    /// Resume an existing session and register its callbacks.
    ///
    /// # Errors
    ///
    /// Any connection or RPC error.
    pub async fn resume_session(
        &self,
        session_id: &str,
        config: SessionConfig,
    ) -> Result<Arc<Session>> {
        let rpc = self.rpc().await?;
        let response: SessionResponse = rpc
            .invoke_as("session.resume", &config.resume_request(session_id))
            .await?;
        self.attach_session(rpc, response, config)
    }

    fn attach_session(
        &self,
        rpc: Arc<RpcClient>,
        response: SessionResponse,
        config: SessionConfig,
    ) -> Result<Arc<Session>> {
        let session = Session::new(
            response.session_id,
            response.workspace_path,
            rpc,
            Arc::downgrade(&self.sessions),
            self.options.session_destroy_timeout(),
        );
        session.register_tools(config.tools)?;
        session.register_permission_handler(config.on_permission_request)?;
        session.register_user_input_handler(config.on_user_input_request)?;
        session.register_hooks(config.hooks)?;
        self.sessions.insert(Arc::clone(&session))?;
        info!(session_id = session.session_id(), "session attached");
        Ok(session)
    }

    /// A live session of this client, by id.
    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id)
    }

    /// Id of the most recently used session, if any.
    ///
    /// # Errors
    ///
    /// Any connection or RPC error.
    pub async fn get_last_session_id(&self) -> Result<Option<String>> {
        let response: GetLastSessionIdResponse = self
            .rpc()
            .await?
            .invoke_as("session.getLastId", &json!({}))
            .await?;
        Ok(response.session_id)
    }

    /// Delete a session's persisted data and drop it locally.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionState`] when the server refuses, or any
    /// connection or RPC error.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let response: SuccessResponse = self
            .rpc()
            .await?
            .invoke_as("session.delete", &json!({ "sessionId": session_id }))
            .await?;
        if !response.success {
            return Err(ClientError::SessionState(format!(
                "failed to delete session {session_id}: {}",
                response.error.as_deref().unwrap_or("unknown error")
            )));
        }
        if let Some(session) = self.sessions.remove(session_id) {
            session.terminate_local();
        }
        debug!(session_id, "session deleted");
        Ok(())
    }

    /// Metadata of every persisted session.
    ///
    /// # Errors
    ///
    /// Any connection or RPC error.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let response: ListSessionsResponse = self
            .rpc()
            .await?
            .invoke_as("session.list", &json!({}))
            .await?;
        Ok(response.sessions)
    }

    /// Session currently shown in the CLI's foreground, if any.
    ///
    /// # Errors
    ///
    /// Any connection or RPC error.
    pub async fn get_foreground_session_id(&self) -> Result<Option<String>> {
        let response: GetForegroundSessionResponse = self
            .rpc()
            .await?
            .invoke_as("session.getForeground", &json!({}))
            .await?;
        Ok(response.session_id)
    }

    /// Move a session to the CLI's foreground.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionState`] when the server refuses, or any
    /// connection or RPC error.
    pub async fn set_foreground_session_id(&self, session_id: &str) -> Result<()> {
        let response: SuccessResponse = self
            .rpc()
            .await?
            .invoke_as("session.setForeground", &json!({ "sessionId": session_id }))
            .await?;
        if response.success {
            Ok(())
        } else {
            Err(ClientError::SessionState(format!(
                "failed to set foreground session {session_id}: {}",
                response.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Subscribe to every `session.lifecycle` notification.
    pub fn on_lifecycle<F>(&self, handler: F) -> LifecycleSubscription
    where
        F: Fn(&SessionLifecycleEvent) + Send + Sync + 'static,
    {
        self.lifecycle.subscribe(None, Arc::new(handler))
    }

    /// Subscribe to lifecycle notifications of one type, e.g.
    /// [`lifecycle_types::CREATED`](crate::models::protocol::lifecycle_types::CREATED).
    pub fn on_lifecycle_type<F>(&self, event_type: &str, handler: F) -> LifecycleSubscription
    where
        F: Fn(&SessionLifecycleEvent) + Send + Sync + 'static,
    {
        self.lifecycle.subscribe(Some(event_type), Arc::new(handler))
    }

    /// Remove a lifecycle subscription; returns whether it was present.
    pub fn off_lifecycle(&self, subscription: LifecycleSubscription) -> bool {
        self.lifecycle.unsubscribe(subscription)
    }
}

// ── Connect ──────────────────────────────────────────────────────────────────

async fn establish(
    options: ClientOptions,
    probe: Arc<dyn ReadinessProbe>,
    sessions: Arc<SessionRegistry>,
    lifecycle: Arc<LifecycleListeners>,
) -> Result<Arc<Connection>> {
    let dispatcher = Arc::new(Dispatcher::new());
    reverse::register(&dispatcher, &sessions, &lifecycle);

    let (rpc, process) = if let Some(url) = &options.cli_url {
        let (host, port) = parse_cli_url(url)?;
        let stream = connect_tcp(&host, port).await?;
        let (read, write) = stream.into_split();
        info!(%host, port, "connected to external cli server");
        (RpcClient::new(read, write, dispatcher), None)
    } else {
        let (mut process, transport) = spawn_cli(&options, probe.as_ref()).await?;
        match transport {
            CliTransport::Stdio { stdin, stdout } => {
                (RpcClient::new(stdout, stdin, dispatcher), Some(process))
            }
            CliTransport::Tcp { port } => match connect_tcp("localhost", port).await {
                Ok(stream) => {
                    let (read, write) = stream.into_split();
                    (RpcClient::new(read, write, dispatcher), Some(process))
                }
                Err(err) => {
                    process.force_kill();
                    return Err(err);
                }
            },
        }
    };

    let connection = Arc::new(Connection {
        rpc: Arc::new(rpc),
        process: tokio::sync::Mutex::new(process),
        models: OnceCell::new(),
    });

    if let Err(err) = verify_protocol_version(&connection.rpc, options.request_timeout()).await {
        warn!(error = %err, "handshake failed, tearing connection down");
        connection.kill().await;
        return Err(err);
    }
    Ok(connection)
}

async fn connect_tcp(host: &str, port: u16) -> Result<TcpStream> {
    TcpStream::connect((host, port))
        .await
        .map_err(|err| ClientError::Transport(format!("failed to connect to {host}:{port}: {err}")))
}

/// Ping the server and require the expected protocol version.
async fn verify_protocol_version(rpc: &RpcClient, timeout: Duration) -> Result<()> {
    let params = json!({ "message": null });
    let ping = rpc.invoke_as::<_, PingResponse>("ping", &params);
    let response = match tokio::time::timeout(timeout, ping).await {
        Ok(response) => response?,
        Err(_elapsed) => {
            return Err(ClientError::Timeout(format!(
                "handshake ping timed out after {timeout:?}"
            )))
        }
    };

    match response.protocol_version {
        Some(version) if version == PROTOCOL_VERSION => {
            debug!(version, "protocol version verified");
            Ok(())
        }
        Some(version) => Err(ClientError::Handshake(format!(
            "protocol version mismatch: client expects {PROTOCOL_VERSION}, server reports {version}"
        ))),
        None => Err(ClientError::Handshake(format!(
            "server did not report a protocol version; client expects {PROTOCOL_VERSION}"
        ))),
    }
}

//! Integration tests for connecting, the handshake, and forward calls.

use serde_json::json;

use copilot_client::config::ClientOptions;
use copilot_client::{ClientError, ConnectionState, CopilotClient};

use super::test_helpers::{connected_client, external_options, listen, FakeCli};

// ── Handshake ───────────────────────────────────────────────────────────────

/// A matching protocol version completes the connect.
#[tokio::test]
async fn matching_version_connects() {
    let (client, _cli) = connected_client().await;
    assert_eq!(client.state(), ConnectionState::Connected);
}

/// A mismatched version is a handshake error and leaves the client in Error.
#[tokio::test]
async fn version_mismatch_fails_handshake() {
    let (listener, port) = listen().await;
    let client = CopilotClient::new(external_options(port)).expect("options");

    let (started, _cli) = tokio::join!(client.start(), async {
        let mut cli = FakeCli::accept(&listener).await;
        cli.handshake_with(json!(1)).await;
        cli
    });

    let err = started.expect_err("must fail");
    assert!(matches!(err, ClientError::Handshake(_)), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Error);

    let again = client.start().await.expect_err("failure is sticky until stop");
    assert_eq!(again, err);
}

/// A ping reply without a version is a handshake error.
#[tokio::test]
async fn missing_version_fails_handshake() {
    let (listener, port) = listen().await;
    let client = CopilotClient::new(external_options(port)).expect("options");

    let (started, _cli) = tokio::join!(client.start(), async {
        let mut cli = FakeCli::accept(&listener).await;
        let (id, _) = cli.expect_request("ping").await;
        cli.reply(id, json!({"message": "pong"})).await;
        cli
    });

    assert!(matches!(started, Err(ClientError::Handshake(_))));
}

/// Concurrent `start` calls share one connection and one handshake.
#[tokio::test]
async fn concurrent_starts_share_one_connect() {
    let (listener, port) = listen().await;
    let client = CopilotClient::new(external_options(port)).expect("options");

    let (a, b, c, mut cli) = tokio::join!(client.start(), client.start(), client.start(), async {
        let mut cli = FakeCli::accept(&listener).await;
        cli.handshake().await;
        cli
    });
    a.expect("first");
    b.expect("second");
    c.expect("third");

    // A second connection attempt would queue on the listener; a single
    // ping/pong round trip proves the handshake ran once.
    let (pong, ()) = tokio::join!(client.ping(Some("again")), async {
        let (id, params) = cli.expect_request("ping").await;
        assert_eq!(params["message"], "again");
        cli.reply(id, json!({"message": "again", "protocolVersion": 2})).await;
    });
    assert_eq!(pong.expect("ping").message.as_deref(), Some("again"));
}

/// Unreachable servers surface as transport errors.
#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let (listener, port) = listen().await;
    drop(listener);
    let client = CopilotClient::new(external_options(port)).expect("options");

    let err = client.start().await.expect_err("must fail");
    assert!(matches!(err, ClientError::Transport(_)), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Error);
}

/// Invalid options are rejected when the client is built.
#[test]
fn invalid_options_are_rejected_up_front() {
    let options = ClientOptions {
        use_stdio: true,
        ..ClientOptions::external("8080")
    };
    assert!(matches!(CopilotClient::new(options), Err(ClientError::Config(_))));
}

// ── Auto start ──────────────────────────────────────────────────────────────

/// Without auto start, calls before `start` fail fast.
#[tokio::test]
async fn calls_fail_fast_without_auto_start() {
    let (_listener, port) = listen().await;
    let options = ClientOptions {
        auto_start: false,
        ..external_options(port)
    };
    let client = CopilotClient::new(options).expect("options");

    let err = client.get_status().await.expect_err("must fail");
    assert!(matches!(err, ClientError::Transport(_)), "got {err:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

/// With auto start, the first call connects.
#[tokio::test]
async fn first_call_connects_with_auto_start() {
    let (listener, port) = listen().await;
    let client = CopilotClient::new(external_options(port)).expect("options");
    assert_eq!(client.state(), ConnectionState::Disconnected);

    let (status, _cli) = tokio::join!(client.get_status(), async {
        let mut cli = FakeCli::accept(&listener).await;
        cli.handshake().await;
        let (id, _) = cli.expect_request("status.get").await;
        cli.reply(id, json!({"version": "1.2.3", "protocolVersion": 2})).await;
        cli
    });

    let status = status.expect("status");
    assert_eq!(status.version.as_deref(), Some("1.2.3"));
    assert_eq!(client.state(), ConnectionState::Connected);
}

// ── Forward calls ───────────────────────────────────────────────────────────

/// The models list is fetched once and then served from the cache.
#[tokio::test]
async fn models_are_cached_per_connection() {
    let (client, mut cli) = connected_client().await;

    let (first, ()) = tokio::join!(client.list_models(), async {
        let (id, _) = cli.expect_request("models.list").await;
        cli.reply(id, json!({"models": [{"id": "gpt-5", "name": "GPT-5"}]})).await;
    });
    let first = first.expect("models");
    let second = client.list_models().await.expect("cached models");

    assert_eq!(first, second);
    assert_eq!(second[0].id, "gpt-5");
}

/// Concurrent first callers share one `models.list` request.
#[tokio::test]
async fn concurrent_model_lists_share_one_request() {
    let (client, mut cli) = connected_client().await;

    let (a, b, ()) = tokio::join!(client.list_models(), client.list_models(), async {
        let (id, _) = cli.expect_request("models.list").await;
        cli.reply(id, json!({"models": [{"id": "gpt-5", "name": "GPT-5"}]})).await;
    });
    assert_eq!(a.expect("first"), b.expect("second"));

    // The next frame is the ping, not a second models.list.
    let (pong, ()) = tokio::join!(client.ping(None), async {
        let (id, _) = cli.expect_request("ping").await;
        cli.reply(id, json!({})).await;
    });
    pong.expect("ping");
}

/// Cached models are not served once the transport has dropped.
#[tokio::test]
async fn models_cache_dies_with_the_connection() {
    let (client, mut cli) = connected_client().await;

    let (models, ()) = tokio::join!(client.list_models(), async {
        let (id, _) = cli.expect_request("models.list").await;
        cli.reply(id, json!({"models": [{"id": "gpt-5", "name": "GPT-5"}]})).await;
    });
    assert_eq!(models.expect("models").len(), 1);

    drop(cli);
    wait_for_state(&client, ConnectionState::Error).await;

    let err = client.list_models().await.expect_err("stale cache must not be served");
    assert!(matches!(err, ClientError::Transport(_)), "got {err:?}");
}

/// Stop clears the cache, resets state and allows reconnecting.
#[tokio::test]
async fn stop_resets_and_allows_restart() {
    let (listener, port) = listen().await;
    let client = CopilotClient::new(external_options(port)).expect("options");

    let (started, mut cli) = tokio::join!(client.start(), async {
        let mut cli = FakeCli::accept(&listener).await;
        cli.handshake().await;
        cli
    });
    started.expect("start");

    let errors = client.stop().await;
    assert!(errors.is_empty(), "clean stop: {errors:?}");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(cli.next_or_eof().await, None, "connection closed by stop");

    let (restarted, _cli) = tokio::join!(client.start(), async {
        let mut cli = FakeCli::accept(&listener).await;
        cli.handshake().await;
        cli
    });
    restarted.expect("restart");
    assert_eq!(client.state(), ConnectionState::Connected);
}

/// The server dropping the connection is visible through `state`.
#[tokio::test]
async fn server_disconnect_is_reported_as_error() {
    let (client, cli) = connected_client().await;
    drop(cli);

    wait_for_state(&client, ConnectionState::Error).await;
}

async fn wait_for_state(client: &CopilotClient, expected: ConnectionState) {
    for _ in 0..100 {
        if client.state() == expected {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("state never became {expected:?}");
}

/// Session listing and foreground calls map their replies.
#[tokio::test]
async fn session_metadata_calls_map_replies() {
    let (client, mut cli) = connected_client().await;

    let (listed, ()) = tokio::join!(client.list_sessions(), async {
        let (id, _) = cli.expect_request("session.list").await;
        cli.reply(
            id,
            json!({"sessions": [{"sessionId": "s-1", "summary": "fix tests", "isRemote": false}]}),
        )
        .await;
    });
    let listed = listed.expect("list");
    assert_eq!(listed[0].session_id, "s-1");
    assert_eq!(listed[0].summary.as_deref(), Some("fix tests"));

    let (last, ()) = tokio::join!(client.get_last_session_id(), async {
        let (id, _) = cli.expect_request("session.getLastId").await;
        cli.reply(id, json!({"sessionId": "s-1"})).await;
    });
    assert_eq!(last.expect("last id").as_deref(), Some("s-1"));

    let (foreground, ()) = tokio::join!(client.get_foreground_session_id(), async {
        let (id, _) = cli.expect_request("session.getForeground").await;
        cli.reply(id, json!({})).await;
    });
    assert_eq!(foreground.expect("foreground"), None);

    let (set, ()) = tokio::join!(client.set_foreground_session_id("s-1"), async {
        let (id, params) = cli.expect_request("session.setForeground").await;
        assert_eq!(params["sessionId"], "s-1");
        cli.reply(id, json!({"success": false, "error": "not in TUI mode"})).await;
    });
    assert!(matches!(set, Err(ClientError::SessionState(_))));
}

/// Auth status decodes its fields.
#[tokio::test]
async fn auth_status_decodes() {
    let (client, mut cli) = connected_client().await;

    let (auth, ()) = tokio::join!(client.get_auth_status(), async {
        let (id, _) = cli.expect_request("auth.getStatus").await;
        cli.reply(
            id,
            json!({"isAuthenticated": true, "authType": "user", "login": "octocat"}),
        )
        .await;
    });

    let auth = auth.expect("auth");
    assert!(auth.is_authenticated);
    assert_eq!(auth.login.as_deref(), Some("octocat"));
}

/// Peer error replies surface unchanged to the caller.
#[tokio::test]
async fn peer_error_surfaces_as_protocol_error() {
    let (client, mut cli) = connected_client().await;

    let (status, ()) = tokio::join!(client.get_status(), async {
        let (id, _) = cli.expect_request("status.get").await;
        cli.reply_error(id, -32000, "internal failure").await;
    });

    assert_eq!(
        status.expect_err("must fail"),
        ClientError::Protocol {
            code: -32000,
            message: "internal failure".into()
        }
    );
}

//! Integration tests for the session lifecycle and event delivery.

use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;

use copilot_client::models::events::AssistantMessageData;
use copilot_client::{ClientError, EventKind, SessionConfig};

use super::test_helpers::{connected_client, open_session, STEP_TIMEOUT};

// ── Create and resume ───────────────────────────────────────────────────────

/// Create registers the session under the server-assigned id.
#[tokio::test]
async fn create_registers_session() {
    let (client, mut cli) = connected_client().await;

    let (session, ()) = tokio::join!(
        client.create_session(SessionConfig {
            model: Some("gpt-5".into()),
            ..SessionConfig::default()
        }),
        async {
            let (id, params) = cli.expect_request("session.create").await;
            assert_eq!(params["model"], "gpt-5");
            assert_eq!(params["envValueMode"], "direct");
            cli.reply(id, json!({"sessionId": "s-1"})).await;
        }
    );

    let session = session.expect("session");
    assert_eq!(session.session_id(), "s-1");
    assert!(client.get_session("s-1").is_some());
}

/// Resume targets the given id and keeps the reported workspace.
#[tokio::test]
async fn resume_keeps_workspace_path() {
    let (client, mut cli) = connected_client().await;

    let (session, ()) = tokio::join!(
        client.resume_session("s-7", SessionConfig::default()),
        async {
            let (id, params) = cli.expect_request("session.resume").await;
            assert_eq!(params["sessionId"], "s-7");
            cli.reply(id, json!({"sessionId": "s-7", "workspacePath": "/tmp/ws"}))
                .await;
        }
    );

    let session = session.expect("session");
    assert_eq!(session.workspace_path(), Some("/tmp/ws"));
}

// ── send_and_wait ───────────────────────────────────────────────────────────

/// The last assistant message before idle is returned.
#[tokio::test]
async fn send_and_wait_returns_last_assistant_message() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (reply, ()) = tokio::join!(session.send_and_wait("hello"), async {
        let (id, params) = cli.expect_request("session.send").await;
        assert_eq!(params["sessionId"], "s-1");
        assert_eq!(params["prompt"], "hello");
        cli.reply(id, json!({"messageId": "m-1"})).await;
        cli.push_event("s-1", "assistant.message", json!({"messageId": "a", "content": "A"}))
            .await;
        cli.push_event("s-1", "assistant.message", json!({"messageId": "b", "content": "B"}))
            .await;
        cli.push_event("s-1", "session.idle", json!({})).await;
    });

    let message: Option<AssistantMessageData> = reply.expect("reply");
    assert_eq!(message.map(|m| m.content).as_deref(), Some("B"));
}

/// Idle without any assistant message resolves with nothing.
#[tokio::test]
async fn send_and_wait_without_message_is_none() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (reply, ()) = tokio::join!(session.send_and_wait("hello"), async {
        let (id, _) = cli.expect_request("session.send").await;
        cli.reply(id, json!({"messageId": "m-1"})).await;
        cli.push_event("s-1", "session.idle", json!({})).await;
    });

    assert_eq!(reply.expect("reply"), None);
}

/// A session error fails the wait with the server's message.
#[tokio::test]
async fn send_and_wait_fails_on_session_error() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (reply, ()) = tokio::join!(session.send_and_wait("hello"), async {
        let (id, _) = cli.expect_request("session.send").await;
        cli.reply(id, json!({"messageId": "m-1"})).await;
        cli.push_event(
            "s-1",
            "session.error",
            json!({"errorType": "model", "message": "rate limited"}),
        )
        .await;
    });

    assert_eq!(
        reply.expect_err("must fail"),
        ClientError::SessionFailed("rate limited".into())
    );
}

/// No idle within the timeout is a timeout error, and the temporary
/// subscription is removed.
#[tokio::test]
async fn send_and_wait_times_out() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;
    assert_eq!(session.subscriber_count(), 0);

    let (reply, ()) = tokio::join!(
        session.send_and_wait_timeout("hello", Duration::from_millis(200)),
        async {
            let (id, _) = cli.expect_request("session.send").await;
            cli.reply(id, json!({"messageId": "m-1"})).await;
        }
    );

    assert!(matches!(reply, Err(ClientError::Timeout(_))), "got {reply:?}");
    assert_eq!(session.subscriber_count(), 0);

    // The next wait resolves on its own idle and message.
    let (reply, ()) = tokio::join!(session.send_and_wait("again"), async {
        let (id, _) = cli.expect_request("session.send").await;
        cli.reply(id, json!({"messageId": "m-2"})).await;
        cli.push_event("s-1", "assistant.message", json!({"messageId": "b", "content": "fresh"}))
            .await;
        cli.push_event("s-1", "session.idle", json!({})).await;
    });
    assert_eq!(reply.expect("reply").map(|m| m.content).as_deref(), Some("fresh"));
    assert_eq!(session.subscriber_count(), 0);
}

/// A send the server never answers is still bounded by the deadline.
#[tokio::test]
async fn send_and_wait_deadline_covers_the_send() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (reply, ()) = tokio::join!(
        tokio::time::timeout(
            STEP_TIMEOUT,
            session.send_and_wait_timeout("hello", Duration::from_millis(200)),
        ),
        async {
            cli.expect_request("session.send").await;
        }
    );

    let reply = reply.expect("resolved by its own deadline");
    assert!(matches!(reply, Err(ClientError::Timeout(_))), "got {reply:?}");
    assert_eq!(session.subscriber_count(), 0);
}

// ── Event delivery ──────────────────────────────────────────────────────────

/// Events reach subscribers in arrival order; unknown types and other
/// sessions' events are skipped.
#[tokio::test]
async fn events_are_delivered_in_order() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    session
        .on(move |event| {
            let _ = tx.send(event.event_type());
            Ok(())
        })
        .expect("subscribe");

    cli.push_event("s-1", "user.message", json!({"content": "hi"})).await;
    cli.push_event("s-1", "mystery.kind", json!({})).await;
    cli.push_event("s-2", "session.idle", json!({})).await;
    cli.push_event("s-1", "assistant.turn_start", json!({"turnId": "t"})).await;
    cli.push_event("s-1", "session.idle", json!({})).await;

    let mut seen = Vec::new();
    for _ in 0..3 {
        let kind = tokio::time::timeout(STEP_TIMEOUT, rx.recv())
            .await
            .expect("event in time")
            .expect("channel open");
        seen.push(kind);
    }
    assert_eq!(seen, ["user.message", "assistant.turn_start", "session.idle"]);
}

/// Typed subscriptions only see their own payload.
#[tokio::test]
async fn typed_subscription_filters_by_payload() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    session
        .on_event::<AssistantMessageData, _>(move |message| {
            let _ = tx.send(message.content.clone());
            Ok(())
        })
        .expect("subscribe");

    cli.push_event("s-1", "session.idle", json!({})).await;
    cli.push_event("s-1", "assistant.message", json!({"messageId": "a", "content": "only me"}))
        .await;

    let content = tokio::time::timeout(STEP_TIMEOUT, rx.recv())
        .await
        .expect("event in time")
        .expect("channel open");
    assert_eq!(content, "only me");
}

/// History decodes known events and skips the rest.
#[tokio::test]
async fn get_messages_skips_undecodable_entries() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (history, ()) = tokio::join!(session.get_messages(), async {
        let (id, params) = cli.expect_request("session.getMessages").await;
        assert_eq!(params["sessionId"], "s-1");
        cli.reply(
            id,
            json!({"events": [
                {"type": "user.message", "data": {"content": "hi"}},
                {"type": "not.a.real.event", "data": {}},
                {"type": "assistant.message", "data": {"messageId": "a", "content": "hello"}},
            ]}),
        )
        .await;
    });

    let history = history.expect("history");
    assert_eq!(history.len(), 2);
    assert!(matches!(history[0].kind, EventKind::UserMessage(_)));
    assert!(matches!(history[1].kind, EventKind::AssistantMessage(_)));
}

/// Abort addresses the session.
#[tokio::test]
async fn abort_sends_session_id() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (aborted, ()) = tokio::join!(session.abort(), async {
        let (id, params) = cli.expect_request("session.abort").await;
        assert_eq!(params["sessionId"], "s-1");
        cli.reply(id, json!({})).await;
    });

    aborted.expect("abort");
}

// ── Close ───────────────────────────────────────────────────────────────────

/// Closing twice sends one destroy; the closed session rejects calls.
#[tokio::test]
async fn close_is_idempotent() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let ((), ()) = tokio::join!(session.close(), async {
        let (id, params) = cli.expect_request("session.destroy").await;
        assert_eq!(params["sessionId"], "s-1");
        cli.reply(id, json!({})).await;
    });
    session.close().await;

    assert!(session.is_closed());
    assert!(client.get_session("s-1").is_none());
    assert!(matches!(
        session.send("again").await,
        Err(ClientError::SessionState(_))
    ));
    assert!(matches!(
        session.on(|_| Ok(())),
        Err(ClientError::SessionState(_))
    ));
    assert!(matches!(
        session.set_error_policy(copilot_client::ErrorPolicy::SuppressAndLogErrors),
        Err(ClientError::SessionState(_))
    ));

    // The next frame on the wire is the ping, not a second destroy.
    let (pong, ()) = tokio::join!(client.ping(Some("after")), async {
        let (id, _) = cli.expect_request("ping").await;
        cli.reply(id, json!({"message": "after"})).await;
    });
    pong.expect("ping");
}

/// A destroy failure still closes the session locally.
#[tokio::test]
async fn close_survives_destroy_failure() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let ((), ()) = tokio::join!(session.close(), async {
        let (id, _) = cli.expect_request("session.destroy").await;
        cli.reply_error(id, -32000, "already gone").await;
    });

    assert!(session.is_closed());
    assert!(client.get_session("s-1").is_none());
}

/// Deleting a live session terminates it locally.
#[tokio::test]
async fn delete_terminates_local_session() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (deleted, ()) = tokio::join!(client.delete_session("s-1"), async {
        let (id, params) = cli.expect_request("session.delete").await;
        assert_eq!(params["sessionId"], "s-1");
        cli.reply(id, json!({"success": true})).await;
    });

    deleted.expect("delete");
    assert!(session.is_closed());
    assert!(client.get_session("s-1").is_none());
}

/// A refused delete is reported and leaves the session alone.
#[tokio::test]
async fn refused_delete_is_session_state_error() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (deleted, ()) = tokio::join!(client.delete_session("s-1"), async {
        let (id, _) = cli.expect_request("session.delete").await;
        cli.reply(id, json!({"success": false, "error": "locked"})).await;
    });

    let err = deleted.expect_err("must fail");
    assert!(matches!(&err, ClientError::SessionState(msg) if msg.contains("locked")));
    assert!(!session.is_closed());
}

// ── Stop ────────────────────────────────────────────────────────────────────

/// Stop destroys every session and reports the failures.
#[tokio::test]
async fn stop_closes_sessions_and_collects_errors() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    let (errors, ()) = tokio::join!(client.stop(), async {
        let (id, _) = cli.expect_request("session.destroy").await;
        cli.reply_error(id, -32000, "boom").await;
    });

    assert_eq!(errors.len(), 1);
    assert!(matches!(&errors[0], ClientError::SessionState(msg) if msg.contains("s-1")));
    assert!(session.is_closed());
}

/// Force stop skips destroy calls and drops the connection.
#[tokio::test]
async fn force_stop_skips_destroy() {
    let (client, mut cli) = connected_client().await;
    let session = open_session(&client, &mut cli, "s-1", SessionConfig::default()).await;

    client.force_stop().await;

    assert!(session.is_closed());
    assert!(client.get_session("s-1").is_none());
    assert_eq!(cli.next_or_eof().await, None, "no destroy, only EOF");
}

//! Integration tests for the JSON-RPC endpoint over an in-memory duplex pipe.
//!
//! The test owns the far end of the pipe and speaks framed JSON to the
//! `RpcClient` under test.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::DuplexStream;
use tokio_util::codec::Framed;

use copilot_client::rpc::codec::FrameCodec;
use copilot_client::rpc::{Dispatcher, RpcClient, RpcErrorObject, INTERNAL_ERROR, METHOD_NOT_FOUND};
use copilot_client::ClientError;

use super::test_helpers::STEP_TIMEOUT;

fn pair(dispatcher: Dispatcher) -> (Arc<RpcClient>, Framed<DuplexStream, FrameCodec>) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let (read, write) = tokio::io::split(ours);
    let client = Arc::new(RpcClient::new(read, write, Arc::new(dispatcher)));
    (client, Framed::new(theirs, FrameCodec::new()))
}

async fn next(peer: &mut Framed<DuplexStream, FrameCodec>) -> Value {
    tokio::time::timeout(STEP_TIMEOUT, peer.next())
        .await
        .expect("frame in time")
        .expect("stream open")
        .expect("valid frame")
}

async fn wait_for_pending(client: &RpcClient, count: usize) {
    for _ in 0..100 {
        if client.pending_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pending count never reached {count}");
}

// ── Correlation ─────────────────────────────────────────────────────────────

/// Concurrent requests each receive the reply carrying their own id, even
/// when replies arrive in reverse order.
#[tokio::test]
async fn concurrent_invokes_resolve_by_id() {
    let (client, mut peer) = pair(Dispatcher::new());

    let calls: Vec<_> = (0..5)
        .map(|n| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke("echo", json!({ "n": n })).await })
        })
        .collect();

    let mut requests = Vec::new();
    for _ in 0..5 {
        requests.push(next(&mut peer).await);
    }
    for request in requests.iter().rev() {
        peer.send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "result": { "n": request["params"]["n"] },
        }))
        .await
        .expect("reply");
    }

    for (n, call) in calls.into_iter().enumerate() {
        let reply = call.await.expect("task").expect("reply");
        assert_eq!(reply, json!({ "n": n }));
    }
    assert_eq!(client.pending_count(), 0);
}

/// An error reply surfaces as a protocol error with code and message.
#[tokio::test]
async fn error_reply_is_protocol_error() {
    let (client, mut peer) = pair(Dispatcher::new());

    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.invoke("session.send", json!({})).await })
    };
    let request = next(&mut peer).await;
    peer.send(json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "error": {"code": -32000, "message": "Session not found"},
    }))
    .await
    .expect("reply");

    let err = call.await.expect("task").expect_err("must fail");
    assert_eq!(
        err,
        ClientError::Protocol {
            code: -32000,
            message: "Session not found".into()
        }
    );
}

/// Outbound requests carry increasing integer ids; notifications carry none.
#[tokio::test]
async fn request_ids_increase_and_notifications_have_none() {
    let (client, mut peer) = pair(Dispatcher::new());

    client.notify("log", json!({"line": "hi"})).await.expect("notify");
    let note = next(&mut peer).await;
    assert_eq!(note["method"], "log");
    assert!(note.get("id").is_none());

    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.invoke("a", Value::Null).await })
    };
    let a = next(&mut peer).await;
    let second = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.invoke("b", Value::Null).await })
    };
    let b = next(&mut peer).await;

    assert!(b["id"].as_u64() > a["id"].as_u64());
    first.abort();
    second.abort();
}

// ── Close ───────────────────────────────────────────────────────────────────

/// Closing with K pending requests fails exactly K of them and leaves none.
#[tokio::test]
async fn close_fails_every_pending_request() {
    let (client, mut peer) = pair(Dispatcher::new());

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.invoke("slow", Value::Null).await })
        })
        .collect();
    for _ in 0..3 {
        next(&mut peer).await;
    }
    wait_for_pending(&client, 3).await;

    client.close().await;

    for call in calls {
        let err = call.await.expect("task").expect_err("must fail");
        assert!(err.is_closed(), "got {err:?}");
    }
    assert_eq!(client.pending_count(), 0);
    assert!(client.is_closed());
    assert!(client.invoke("late", Value::Null).await.is_err());
}

/// The peer closing the stream fails pending requests and marks the client closed.
#[tokio::test]
async fn peer_eof_fails_pending_requests() {
    let (client, mut peer) = pair(Dispatcher::new());

    let call = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.invoke("never", Value::Null).await })
    };
    next(&mut peer).await;
    drop(peer);

    let err = call.await.expect("task").expect_err("must fail");
    assert!(matches!(err, ClientError::Transport(_)), "got {err:?}");
    tokio::time::timeout(STEP_TIMEOUT, client.closed())
        .await
        .expect("client observes close");
}

// ── Inbound calls ───────────────────────────────────────────────────────────

/// A registered handler's result is sent back under the caller's id.
#[tokio::test]
async fn inbound_request_gets_handler_result() {
    let dispatcher = Dispatcher::new();
    dispatcher.register("add", |params: Value| async move {
        let sum = params["a"].as_i64().unwrap_or(0) + params["b"].as_i64().unwrap_or(0);
        Ok(json!({ "sum": sum }))
    });
    let (_client, mut peer) = pair(dispatcher);

    peer.send(json!({"jsonrpc": "2.0", "id": "req-1", "method": "add", "params": {"a": 2, "b": 3}}))
        .await
        .expect("send");

    let reply = next(&mut peer).await;
    assert_eq!(reply["id"], "req-1");
    assert_eq!(reply["result"]["sum"], 5);
}

/// An unknown method with an id is answered with method-not-found, and later
/// frames are still processed.
#[tokio::test]
async fn unknown_method_does_not_stop_the_loop() {
    let dispatcher = Dispatcher::new();
    dispatcher.register("known", |_| async { Ok(json!("ok")) });
    let (_client, mut peer) = pair(dispatcher);

    peer.send(json!({"jsonrpc": "2.0", "method": "mystery.notify", "params": {}}))
        .await
        .expect("send");
    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "mystery.call", "params": {}}))
        .await
        .expect("send");
    let reply = next(&mut peer).await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["error"]["code"], METHOD_NOT_FOUND);

    peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "known", "params": {}}))
        .await
        .expect("send");
    let reply = next(&mut peer).await;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"], "ok");
}

/// Handler errors and panics become error replies; the connection survives.
#[tokio::test]
async fn failing_handlers_produce_error_replies() {
    let dispatcher = Dispatcher::new();
    dispatcher.register("refuse", |_| async {
        Err(RpcErrorObject::new(-32602, "Unknown session s-9"))
    });
    dispatcher.register("explode", |params: Value| async move {
        assert!(!params.is_null(), "handler blew up");
        Ok(params)
    });
    let (client, mut peer) = pair(dispatcher);

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "refuse"}))
        .await
        .expect("send");
    let reply = next(&mut peer).await;
    assert_eq!(reply["error"]["code"], -32602);
    assert_eq!(reply["error"]["message"], "Unknown session s-9");

    peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "explode"}))
        .await
        .expect("send");
    let reply = next(&mut peer).await;
    assert_eq!(reply["error"]["code"], INTERNAL_ERROR);

    assert!(!client.is_closed());
}

/// A slow request handler does not hold up later frames.
#[tokio::test]
async fn slow_handler_does_not_block_reader() {
    let dispatcher = Dispatcher::new();
    dispatcher.register("slow", |_| async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(json!("slow"))
    });
    dispatcher.register("fast", |_| async { Ok(json!("fast")) });
    let (_client, mut peer) = pair(dispatcher);

    peer.send(json!({"jsonrpc": "2.0", "id": 1, "method": "slow"}))
        .await
        .expect("send");
    peer.send(json!({"jsonrpc": "2.0", "id": 2, "method": "fast"}))
        .await
        .expect("send");

    let first = next(&mut peer).await;
    assert_eq!(first["result"], "fast");
    let second = next(&mut peer).await;
    assert_eq!(second["result"], "slow");
}

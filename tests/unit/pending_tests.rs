//! Unit tests for the outbound pending-request table.

use serde_json::json;

use copilot_client::rpc::pending::PendingTable;
use copilot_client::ClientError;

/// Ids start at 1 and increase by one per registration.
#[test]
fn ids_are_monotonic_from_one() {
    let table = PendingTable::new();
    let (first, _rx1) = table.register().expect("register");
    let (second, _rx2) = table.register().expect("register");

    assert_eq!(first, 1);
    assert_eq!(second, 2);
    assert_eq!(table.len(), 2);
}

/// Completing an entry delivers the outcome and removes it.
#[tokio::test]
async fn complete_delivers_and_removes() {
    let table = PendingTable::new();
    let (id, rx) = table.register().expect("register");

    assert!(table.complete(id, Ok(json!({"pong": true}))));
    assert!(!table.complete(id, Ok(json!(null))), "second completion finds nothing");

    let reply = rx.await.expect("sender kept").expect("ok reply");
    assert_eq!(reply, json!({"pong": true}));
    assert!(table.is_empty());
}

/// `fail_all` fails exactly the outstanding entries and closes the table.
#[tokio::test]
async fn fail_all_fails_every_waiter() {
    let table = PendingTable::new();
    let receivers: Vec<_> = (0..3)
        .map(|_| table.register().expect("register").1)
        .collect();

    let failed = table.fail_all(&ClientError::closed());

    assert_eq!(failed, 3);
    assert!(table.is_empty());
    for rx in receivers {
        let outcome = rx.await.expect("sender kept");
        assert_eq!(outcome, Err(ClientError::closed()));
    }
}

/// A closed table refuses new registrations.
#[test]
fn closed_table_refuses_registration() {
    let table = PendingTable::new();
    table.fail_all(&ClientError::closed());

    assert!(table.is_closed());
    let err = table.register().expect_err("must refuse");
    assert!(err.is_closed());
}

/// Removing an id drops its waiter.
#[tokio::test]
async fn remove_drops_waiter() {
    let table = PendingTable::new();
    let (id, rx) = table.register().expect("register");

    table.remove(id);

    assert!(rx.await.is_err(), "sender must be dropped");
    assert!(table.is_empty());
}

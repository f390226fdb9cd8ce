//! Integration tests for connection loss and session teardown.
//!
//! When the server goes away every suspended caller must be released with
//! `ConnectionLost`, and later calls must fail fast with the same error.

use std::time::Duration;

use serde_json::json;

use robot_session::protocol::messages::{self, ActionGoto};
use robot_session::{ClientError, ConnectionState};

use super::test_helpers::{connect_pair, eventually};

// ── Connection loss ─────────────────────────────────────────────────────────

/// Two action waits and one periodic stream in flight all fail with
/// `ConnectionLost` when the server disconnects; diagnostics are no longer
/// available afterwards. The dispatch task drains its tables before it
/// exits; `session::dispatch` tests that state directly.
#[tokio::test]
async fn disconnect_fails_every_waiter() {
    let (session, mut server) = connect_pair();
    assert!(
        matches!(session.state(), ConnectionState::Connecting | ConnectionState::Open),
        "fresh session is connecting or open"
    );

    let (granted, ()) = tokio::join!(session.request_privilege("change-action-command"), server.grant_next());
    granted.expect("privilege granted");
    assert_eq!(session.state(), ConnectionState::Open);

    let (first, _) = tokio::join!(
        session.submit_action(ActionGoto::new(json!({ "xy": [1, 0] }))),
        server.accept_action(1),
    );
    let (second, _) = tokio::join!(
        session.submit_action(ActionGoto::new(json!({ "xy": [2, 0] }))),
        server.accept_action(2),
    );
    let (stream, _) = tokio::join!(
        session.periodic_query(vec![messages::get_timestamp()], Duration::from_millis(100)),
        server.accept_periodic(5),
    );
    let (first, second) = (first.expect("first"), second.expect("second"));
    let mut stream = stream.expect("subscribed");

    let (a, b, c, ()) = tokio::join!(
        session.wait(&first, true),
        session.wait(&second, true),
        stream.next(),
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(server);
        },
    );

    assert_eq!(a.expect_err("first wait"), ClientError::ConnectionLost);
    assert_eq!(b.expect_err("second wait"), ClientError::ConnectionLost);
    assert_eq!(
        c.expect("stream yields a terminal item"),
        Err(ClientError::ConnectionLost)
    );
    assert!(stream.next().await.is_none());

    assert_eq!(session.state(), ConnectionState::Failed);
    assert_eq!(
        session.diagnostics().await.expect_err("dispatch task stopped"),
        ClientError::ConnectionLost
    );
}

/// A query in flight when the connection drops fails with `ConnectionLost`.
#[tokio::test]
async fn disconnect_fails_pending_query() {
    let (session, mut server) = connect_pair();

    let (result, ()) = tokio::join!(session.query(messages::get_robot_info()), async move {
        server.expect("get-robot-info").await;
        drop(server);
    });
    assert_eq!(result.expect_err("lost"), ClientError::ConnectionLost);
}

/// Calls made after the connection dropped fail fast.
#[tokio::test]
async fn calls_after_disconnect_fail_fast() {
    let (session, server) = connect_pair();
    drop(server);

    eventually(|| session.state() == ConnectionState::Failed).await;

    let started = tokio::time::Instant::now();
    assert_eq!(
        session.query(messages::get_timestamp()).await.expect_err("lost"),
        ClientError::ConnectionLost
    );
    assert_eq!(
        session
            .periodic_query(vec![messages::get_timestamp()], Duration::from_millis(100))
            .await
            .expect_err("lost"),
        ClientError::ConnectionLost
    );
    assert!(started.elapsed() < Duration::from_secs(1), "no request timeout involved");

    // Closing an already failed session still succeeds.
    session.close().await.expect("close after loss");
}

// ── Orderly shutdown ────────────────────────────────────────────────────────

/// `close` closes the transport and leaves the session in `Closed`.
#[tokio::test]
async fn close_shuts_transport() {
    let (session, mut server) = connect_pair();

    let (result, ()) = tokio::join!(session.query(messages::get_timestamp()), async {
        let sent = server.expect("get-timestamp").await;
        server.reply("timestamp", json!({}), sent.id).await;
    });
    result.expect("timestamp");

    session.close().await.expect("close");
    assert!(server.try_recv().await.is_none(), "server sees EOF");
}

/// Dropping a session without closing it also tears the transport down.
#[tokio::test]
async fn drop_shuts_transport() {
    let (session, mut server) = connect_pair();
    drop(session);
    assert!(server.try_recv().await.is_none(), "server sees EOF");
}

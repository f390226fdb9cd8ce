//! Integration tests for request/response correlation.
//!
//! | Scenario | Behaviour |
//! |----------|-----------|
//! | out of order | responses resolve the caller whose id they carry |
//! | remote error | an `error` frame with a pending id fails that caller |
//! | timeout | an unanswered query fails and its entry is released |
//! | cancellation | dropping a query future releases its entry |
//! | unmatched id | a frame with an unknown id is delivered as an event |

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use robot_session::protocol::messages;
use robot_session::{ClientError, Command};

use super::test_helpers::{connect_pair, connect_pair_with, eventually, test_config};

// ── Out-of-order responses ──────────────────────────────────────────────────

/// Two concurrent queries answered in reverse order each receive their own
/// response, and the pending table is empty afterwards.
#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let (session, mut server) = connect_pair();

    let script = async {
        let first = server.expect("get-robot-info").await;
        let second = server.expect("get-timestamp").await;
        assert_ne!(first.id, second.id, "correlation ids must be unique");

        server
            .reply("timestamp", json!({ "run-time": 12.5 }), second.id)
            .await;
        server
            .reply("robot-info", json!({ "robot-name": "atlas" }), first.id)
            .await;
    };

    let (info, timestamp, ()) = tokio::join!(
        session.query(messages::get_robot_info()),
        async {
            // Keep frame order on the wire deterministic.
            tokio::time::sleep(Duration::from_millis(20)).await;
            session.query(messages::get_timestamp()).await
        },
        script,
    );

    let info = info.expect("robot info");
    assert_eq!(info.kind, "robot-info");
    assert_eq!(info.get("robot-name"), Some(&json!("atlas")));

    let timestamp = timestamp.expect("timestamp");
    assert_eq!(timestamp.kind, "timestamp");
    assert_eq!(timestamp.get("run-time"), Some(&json!(12.5)));

    let diagnostics = session.diagnostics().await.expect("diagnostics");
    assert_eq!(diagnostics.pending_requests, 0);
}

/// Correlation ids increase monotonically across requests.
#[tokio::test]
async fn correlation_ids_are_monotonic() {
    let (session, mut server) = connect_pair();

    let script = async {
        let mut last = 0;
        for _ in 0..3 {
            let sent = server.expect("get-timestamp").await;
            assert!(sent.id > last, "id {} must exceed {last}", sent.id);
            last = sent.id;
            server.reply("timestamp", json!({}), sent.id).await;
        }
    };

    let queries = async {
        for _ in 0..3 {
            session
                .query(messages::get_timestamp())
                .await
                .expect("timestamp");
        }
    };

    tokio::join!(queries, script);
}

// ── Remote errors ───────────────────────────────────────────────────────────

/// An `error` frame correlated with a pending request fails that request
/// with the server's code and message.
#[tokio::test]
async fn error_frame_resolves_as_remote_error() {
    let (session, mut server) = connect_pair();

    let script = async {
        let sent = server.expect("get-object-kinematics").await;
        server
            .reply(
                "error",
                json!({ "code": "unknown-object", "info": "no such object: ghost" }),
                sent.id,
            )
            .await;
    };

    let (result, ()) = tokio::join!(
        session.query(messages::get_object_kinematics(messages::owned_object("ghost"))),
        script,
    );

    assert_eq!(
        result.expect_err("remote error expected"),
        ClientError::RemoteError {
            code: "unknown-object".into(),
            message: "no such object: ghost".into(),
        }
    );
}

// ── Timeouts and cancellation ───────────────────────────────────────────────

/// A query with no response fails with `RequestTimeout` and its pending
/// entry is released.
#[tokio::test]
async fn unanswered_query_times_out_and_is_released() {
    let mut config = test_config();
    config.timeouts.request_seconds = 1;
    let (session, mut server) = connect_pair_with(config);

    let (result, sent) = tokio::join!(
        session.query(messages::get_robot_info()),
        server.expect("get-robot-info"),
    );

    assert_eq!(
        result.expect_err("timeout expected"),
        ClientError::RequestTimeout(Duration::from_secs(1))
    );

    let diagnostics = session.diagnostics().await.expect("diagnostics");
    assert_eq!(diagnostics.pending_requests, 0);

    // A late response is treated as an event and must not disturb the session.
    server.reply("robot-info", json!({}), sent.id).await;
    let follow_up = tokio::join!(session.query(messages::get_timestamp()), async {
        let next = server.expect("get-timestamp").await;
        server.reply("timestamp", json!({ "run-time": 1.0 }), next.id).await;
    });
    assert!(follow_up.0.is_ok(), "session stays usable after a timeout");
}

/// Dropping a query future mid-flight releases its pending entry.
#[tokio::test]
async fn cancelled_query_releases_pending_entry() {
    let (session, mut server) = connect_pair();

    let cancelled = tokio::time::timeout(Duration::from_millis(100), async {
        tokio::join!(
            session.query(messages::get_robot_info()),
            server.expect("get-robot-info"),
        )
    })
    .await;
    assert!(cancelled.is_err(), "the query must still be pending when cancelled");

    let diagnostics = session.diagnostics().await.expect("diagnostics");
    assert_eq!(diagnostics.pending_requests, 0);
}

// ── Unmatched responses ─────────────────────────────────────────────────────

/// A frame carrying an id nobody waits for is delivered to event handlers.
#[tokio::test]
async fn unmatched_id_is_dispatched_as_event() {
    let (session, mut server) = connect_pair();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    session.handle("robot-info", move |event| {
        sink.lock().unwrap().push(event.payload.clone());
        true
    });

    server
        .reply("robot-info", json!({ "robot-name": "stray" }), 9999)
        .await;

    eventually(|| !seen.lock().unwrap().is_empty()).await;
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[json!({ "robot-name": "stray" })]
    );
}

/// `send` returns once the frame is written and leaves nothing pending.
#[tokio::test]
async fn send_does_not_wait_for_a_response() {
    let (session, mut server) = connect_pair();

    session
        .send(Command::new("set-display-text", Default::default()).with_attribute("text", "hi"))
        .await
        .expect("send");

    let sent = server.expect("set-display-text").await;
    assert_eq!(sent.attributes, json!({ "text": "hi" }));

    let diagnostics = session.diagnostics().await.expect("diagnostics");
    assert_eq!(diagnostics.pending_requests, 0);
}

//! Integration tests for periodic query streams.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use robot_session::protocol::messages::{self, RobotFrame};
use robot_session::{ClientError, Command};

use super::test_helpers::{connect_pair, MockServer};

fn position_queries() -> Vec<Command> {
    vec![
        messages::get_timestamp(),
        messages::get_object_kinematics(RobotFrame::Base.reference()),
    ]
}

fn pair(tick: u64) -> serde_json::Value {
    json!([
        ["timestamp", { "run-time": tick }],
        ["kinematics", { "transform": { "rpyxyz": [0, 0, 0, tick, 0, 0] } }]
    ])
}

/// Round-trip one query so every frame the server wrote earlier has been
/// processed by the session.
async fn sync(session: &robot_session::Session, server: &mut MockServer) {
    let (result, ()) = tokio::join!(session.query(messages::get_timestamp()), async {
        let sent = server.expect("get-timestamp").await;
        server.reply("timestamp", json!({}), sent.id).await;
    });
    result.expect("sync query");
}

// ── Batch delivery ──────────────────────────────────────────────────────────

/// A two-query subscription at 0.1 s yields five batches, each with two
/// results in query order and consecutive ticks.
#[tokio::test]
async fn five_batches_arrive_in_tick_order() {
    let (session, mut server) = connect_pair();

    let (stream, sent) = tokio::join!(
        session.periodic_query(position_queries(), Duration::from_millis(100)),
        server.accept_periodic(4),
    );
    let mut stream = stream.expect("subscribed");
    assert_eq!(stream.query_id(), 4);
    assert_eq!(sent.attributes["period"], json!(0.1));
    assert_eq!(
        sent.attributes["queries"],
        json!([
            ["get-timestamp", {}],
            ["get-object-kinematics", { "object": { "robot-frame": "base" } }]
        ])
    );

    let producer = async {
        for tick in 0..5 {
            server.batch(4, pair(tick)).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };
    let consumer = async {
        let mut batches = Vec::new();
        while batches.len() < 5 {
            let batch = stream.next().await.expect("stream open").expect("batch");
            batches.push(batch);
        }
        batches
    };
    let ((), batches) = tokio::join!(producer, consumer);

    for (expected, batch) in batches.iter().enumerate() {
        assert_eq!(batch.tick, expected as u64);
        assert_eq!(batch.results.len(), 2);
        assert_eq!(batch.results[0].kind, "timestamp");
        assert_eq!(batch.results[1].kind, "kinematics");
        assert_eq!(batch.results[0].get("run-time"), Some(&json!(expected)));
    }
    assert!(batches.windows(2).all(|w| w[0].received_at <= w[1].received_at));
}

/// A slow consumer sees only the newest batch.
#[tokio::test]
async fn slow_consumer_sees_latest_batch() {
    let (session, mut server) = connect_pair();
    let (stream, _) = tokio::join!(
        session.periodic_query(position_queries(), Duration::from_millis(100)),
        server.accept_periodic(1),
    );
    let mut stream = stream.expect("subscribed");

    for tick in 0..3 {
        server.batch(1, pair(tick)).await;
    }
    sync(&session, &mut server).await;

    let batch = stream.next().await.expect("open").expect("batch");
    assert_eq!(batch.tick, 2);
    assert_eq!(batch.results[0].get("run-time"), Some(&json!(2)));
}

/// A batch whose size does not match the query group is dropped.
#[tokio::test]
async fn mismatched_batch_is_dropped() {
    let (session, mut server) = connect_pair();
    let (stream, _) = tokio::join!(
        session.periodic_query(position_queries(), Duration::from_millis(100)),
        server.accept_periodic(2),
    );
    let mut stream = stream.expect("subscribed");

    server
        .batch(2, json!([["timestamp", { "run-time": 0 }]]))
        .await;
    server.batch(2, pair(7)).await;

    let batch = stream.next().await.expect("open").expect("batch");
    assert_eq!(batch.tick, 0);
    assert_eq!(batch.results.len(), 2);
    assert_eq!(batch.results[0].get("run-time"), Some(&json!(7)));
}

// ── Release ─────────────────────────────────────────────────────────────────

/// Closing a stream releases the server subscription; a new subscription
/// starts again at tick zero.
#[tokio::test]
async fn cancel_then_resubscribe_restarts_ticks() {
    let (session, mut server) = connect_pair();

    let (first, _) = tokio::join!(
        session.periodic_query(position_queries(), Duration::from_millis(100)),
        server.accept_periodic(10),
    );
    let mut first = first.expect("subscribed");
    server.batch(10, pair(0)).await;
    server.batch(10, pair(1)).await;
    sync(&session, &mut server).await;
    assert_eq!(first.next().await.expect("open").expect("batch").tick, 1);

    first.close();
    let removal = server.expect("remove-periodic-query").await;
    assert_eq!(removal.attributes, json!({ "query-id": 10 }));
    assert!(first.next().await.is_none(), "closed stream yields nothing");
    assert_eq!(session.diagnostics().await.expect("diagnostics").subscriptions, 0);

    // Stray results for the released query are ignored.
    server.batch(10, pair(2)).await;

    let (second, _) = tokio::join!(
        session.periodic_query(position_queries(), Duration::from_millis(100)),
        server.accept_periodic(11),
    );
    let mut second = second.expect("resubscribed");
    server.batch(11, pair(0)).await;
    let batch = second.next().await.expect("open").expect("batch");
    assert_eq!(batch.tick, 0);
    assert_eq!(session.diagnostics().await.expect("diagnostics").subscriptions, 1);
}

/// Dropping the stream, including through task cancellation, releases it.
#[tokio::test]
async fn dropped_stream_is_released() {
    let (session, mut server) = connect_pair();
    let (stream, _) = tokio::join!(
        session.periodic_query(position_queries(), Duration::from_millis(100)),
        server.accept_periodic(3),
    );
    let stream = stream.expect("subscribed");

    let consumer = tokio::spawn(async move {
        let mut stream = Box::pin(stream.into_stream());
        while stream.next().await.is_some() {}
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    consumer.abort();
    let _ = consumer.await;

    let removal = server.expect("remove-periodic-query").await;
    assert_eq!(removal.attributes, json!({ "query-id": 3 }));
    assert_eq!(session.diagnostics().await.expect("diagnostics").subscriptions, 0);
}

/// Closing the session ends open streams with `SessionClosed`.
#[tokio::test]
async fn session_close_ends_streams() {
    let (session, mut server) = connect_pair();
    let (stream, _) = tokio::join!(
        session.periodic_query(position_queries(), Duration::from_millis(100)),
        server.accept_periodic(8),
    );
    let mut stream = stream.expect("subscribed");

    session.close().await.expect("close");

    assert_eq!(
        stream.next().await.expect("one terminal item"),
        Err(ClientError::SessionClosed)
    );
    assert!(stream.next().await.is_none());

    let removal = server.expect("remove-periodic-query").await;
    assert_eq!(removal.attributes, json!({ "query-id": 8 }));
    assert!(server.try_recv().await.is_none(), "transport closed after shutdown");
}

// ── Argument checks ─────────────────────────────────────────────────────────

/// Empty query groups and zero intervals are rejected locally.
#[tokio::test]
async fn invalid_subscriptions_are_rejected() {
    let (session, mut server) = connect_pair();

    let empty = session
        .periodic_query(Vec::new(), Duration::from_millis(100))
        .await
        .expect_err("empty group");
    assert!(matches!(empty, ClientError::Protocol(_)));

    let zero = session
        .periodic_query(position_queries(), Duration::ZERO)
        .await
        .expect_err("zero interval");
    assert!(matches!(zero, ClientError::Protocol(_)));

    server.expect_silence(Duration::from_millis(100)).await;
}

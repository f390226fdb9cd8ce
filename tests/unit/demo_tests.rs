//! Unit tests for the demonstration helpers.

use chrono::Utc;
use serde_json::{json, Value};

use robot_session::demo::{
    log_notice, position_queries, scene_commands, DemoOptions, PositionSample, NOTICE_KINDS,
};
use robot_session::{Batch, Event, Reply};

fn reply(kind: &str, payload: Value) -> Reply {
    Reply {
        kind: kind.to_owned(),
        payload,
    }
}

fn batch(results: Vec<Reply>) -> Batch {
    Batch {
        tick: 0,
        received_at: Utc::now(),
        results,
    }
}

#[test]
fn position_sample_reads_time_and_xy() {
    let sample = PositionSample::from_batch(&batch(vec![
        reply("timestamp", json!({ "run-time": 12.25 })),
        reply(
            "kinematics",
            json!({ "transform": { "rpyxyz": [0.0, 0.0, 0.3, 1.5, -0.5, 0.9] } }),
        ),
    ]))
    .expect("sample");

    assert_eq!(
        sample,
        PositionSample {
            run_time: 12.25,
            x: 1.5,
            y: -0.5
        }
    );
}

#[test]
fn position_sample_needs_both_results() {
    assert!(PositionSample::from_batch(&batch(vec![reply(
        "timestamp",
        json!({ "run-time": 1.0 })
    )]))
    .is_none());

    assert!(PositionSample::from_batch(&batch(vec![
        reply("timestamp", json!({ "run-time": 1.0 })),
        reply("kinematics", json!({ "transform": { "rpyxyz": [0, 0, 0] } })),
    ]))
    .is_none());
}

#[test]
fn scene_adds_box_tag_and_two_tables() {
    let scene = scene_commands();
    assert_eq!(scene.len(), 4);
    assert!(scene.iter().all(|cmd| cmd.kind() == "add-object"));

    let names: Vec<Option<&str>> = scene
        .iter()
        .map(|cmd| cmd.attributes()["attributes"].get("name").and_then(Value::as_str))
        .collect();
    assert_eq!(
        names,
        [Some("my-box"), None, Some("pick-table"), Some("place-table")]
    );
}

#[test]
fn monitor_samples_clock_and_base() {
    let kinds: Vec<String> = position_queries()
        .iter()
        .map(|cmd| cmd.kind().to_owned())
        .collect();
    assert_eq!(kinds, ["get-timestamp", "get-object-kinematics"]);
}

#[test]
fn default_options() {
    let options = DemoOptions::default();
    assert_eq!(options.monitor_interval.as_millis(), 100);
    assert_eq!(options.pause.as_millis(), 500);
}

#[test]
fn notices_cover_server_error_and_warn_kinds() {
    assert_eq!(NOTICE_KINDS, ["error", "warn"]);
    assert!(log_notice(&Event {
        kind: "warn".to_owned(),
        payload: json!({ "info": "low battery" }),
    }));
}

//! Pick-and-place demonstration sequence.
//!
//! Builds a small scene (a pickable box with an april tag and two tables),
//! streams the robot base position in the background, and walks the robot
//! through a pick from one table and a place onto the other and back.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::protocol::messages::{
    self, ActionEndEffectorMove, ActionGoto, ActionPlace, RobotFrame,
};
use crate::protocol::{Command, Event, ACTION_PRIVILEGE};
use crate::session::periodic::{Batch, PeriodicQuery};
use crate::{Result, Session};

/// Tunables for [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemoOptions {
    /// Position monitor period.
    pub monitor_interval: Duration,
    /// Settling pause inserted between some steps.
    pub pause: Duration,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_millis(100),
            pause: Duration::from_millis(500),
        }
    }
}

/// Robot base position extracted from one monitor batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    /// Server run time in seconds.
    pub run_time: f64,
    /// World x in metres.
    pub x: f64,
    /// World y in metres.
    pub y: f64,
}

impl PositionSample {
    /// Read `[timestamp, kinematics]` results; `rpyxyz[3]` is x, `[4]` is y.
    #[must_use]
    pub fn from_batch(batch: &Batch) -> Option<Self> {
        let [timestamp, kinematics] = batch.results.as_slice() else {
            return None;
        };
        let run_time = timestamp.get("run-time").and_then(Value::as_f64)?;
        let rpyxyz = kinematics.get("transform")?.get("rpyxyz")?.as_array()?;
        Some(Self {
            run_time,
            x: rpyxyz.get(3)?.as_f64()?,
            y: rpyxyz.get(4)?.as_f64()?,
        })
    }
}

/// Event kinds the server uses for errors and warnings.
pub const NOTICE_KINDS: [&str; 2] = ["error", "warn"];

/// Event handler that logs server errors and warnings.
pub fn log_notice(event: &Event) -> bool {
    warn!(kind = event.kind.as_str(), info = event.info(), "server notice");
    true
}

/// Query group sampled by the position monitor.
#[must_use]
pub fn position_queries() -> Vec<Command> {
    vec![
        messages::get_timestamp(),
        messages::get_object_kinematics(RobotFrame::Base.reference()),
    ]
}

/// Scene objects added before any action runs.
#[must_use]
pub fn scene_commands() -> Vec<Command> {
    let table_polygon = json!([[0.2, 0.5], [0.2, -0.5], [-0.2, -0.5], [-0.2, 0.5]]);
    vec![
        messages::add_object(json!({
            "name": "my-box",
            "box-geometry": [0.4, 0.4, 0.4],
            "mass": 1.0,
            "pickable": true
        })),
        messages::add_object_with(
            json!({ "april-tag-id": 0 }),
            json!({ "xy": [0.2, 0] }),
            Some(messages::owned_object("my-box")),
        ),
        messages::add_object_with(
            json!({
                "name": "pick-table",
                "box-geometry": [0.4, 1, 0.05],
                "polygon": table_polygon,
                "keep-out": true
            }),
            json!({ "xyz": [5.5, 0, 0.7] }),
            None,
        ),
        messages::add_object_with(
            json!({
                "name": "place-table",
                "box-geometry": [0.4, 1, 0.05],
                "polygon": table_polygon,
                "keep-out": true
            }),
            json!({ "xyz": [-1.5, 0, 0.7] }),
            None,
        ),
    ]
}

/// Log robot position for every batch until the stream ends.
///
/// Returns the number of batches seen.
pub async fn monitor_position(mut query: PeriodicQuery) -> u64 {
    let mut seen = 0;
    while let Some(item) = query.next().await {
        match item {
            Ok(batch) => {
                seen += 1;
                match PositionSample::from_batch(&batch) {
                    Some(sample) => info!(
                        tick = batch.tick,
                        time = sample.run_time,
                        x = sample.x,
                        y = sample.y,
                        "robot position"
                    ),
                    None => warn!(tick = batch.tick, "position batch missing fields"),
                }
            }
            Err(e) => {
                warn!(error = %e, "position monitor stopped");
                break;
            }
        }
    }
    seen
}

/// Run the full demonstration on an open session.
///
/// The position monitor is stopped before returning, whether the action
/// sequence succeeded or not.
///
/// # Errors
///
/// Returns the first error raised by any step.
pub async fn run(session: &Session, options: DemoOptions) -> Result<()> {
    for kind in NOTICE_KINDS {
        session.handle(kind, log_notice);
    }

    let robot = session.query(messages::get_robot_info()).await?;
    let robot_name = robot
        .get("robot-name")
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    info!(robot_name, "robot info received");
    tokio::time::sleep(options.pause).await;

    session.request_privilege(ACTION_PRIVILEGE).await?;

    for command in scene_commands() {
        session.send(command).await?;
    }

    let monitor = session
        .periodic_query(position_queries(), options.monitor_interval)
        .await?;
    let monitor_task = tokio::spawn(monitor_position(monitor));

    let result = run_actions(session, options.pause).await;

    monitor_task.abort();
    if let Ok(seen) = monitor_task.await {
        info!(batches = seen, "position monitor finished");
    }
    result
}

async fn run_actions(session: &Session, pause: Duration) -> Result<()> {
    session
        .wait_action(
            ActionEndEffectorMove::new(
                RobotFrame::LeftHand.as_str(),
                vec![json!({ "xy": [0.1, 0.1] }), json!({ "xy": [0.2, 0.2] })],
            )
            .reference_frame(json!({ "command-frame": "base" }))
            .cyclic(false)
            .max_speed(0.5)
            .duration(1.0),
            true,
        )
        .await?;

    session
        .wait_action(
            ActionGoto::new(json!({ "xy": [6.5, 0] }))
                .position_tolerance(0.05)
                .mobility_parameters(json!({
                    "step-clearance": 0.01,
                    "velocity-max": [2, 2, 1.0]
                })),
            false,
        )
        .await?;
    tokio::time::sleep(pause).await;

    pick_and_place(session, "place-table").await?;
    tokio::time::sleep(pause).await;
    pick_and_place(session, "pick-table").await
}

async fn pick_and_place(session: &Session, table: &str) -> Result<()> {
    session
        .wait_action(messages::action_pick(messages::owned_object("my-box")), true)
        .await?;
    session
        .wait_action(
            ActionPlace::new(json!({ "xyz": [0, 0, 0.24] }))
                .reference_frame(messages::owned_object(table))
                .position_tolerance(0.1),
            true,
        )
        .await?;
    info!(table, "box placed");
    Ok(())
}

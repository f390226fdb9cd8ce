//! Constructors for commonly used robot commands.
//!
//! The command surface is open-ended; these helpers only spell the kind
//! names and attribute keys the server expects. Anything not covered here can
//! be sent with [`Command::new`] or [`Command::from_value`].
//!
//! | Helper                         | Kind                        | Privilege               |
//! |--------------------------------|-----------------------------|-------------------------|
//! | [`get_robot_info`]             | `get-robot-info`            | none                    |
//! | [`get_timestamp`]              | `get-timestamp`             | none                    |
//! | [`get_object_kinematics`]      | `get-object-kinematics`     | none                    |
//! | [`request_privilege`]          | `request-privilege`         | none                    |
//! | [`add_object`]                 | `add-object`                | none                    |
//! | [`ActionGoto`]                 | `action-goto`               | `change-action-command` |
//! | [`action_pick`]                | `action-pick`               | `change-action-command` |
//! | [`ActionPlace`]                | `action-place`              | `change-action-command` |
//! | [`ActionEndEffectorMove`]      | `action-end-effector-move`  | `change-action-command` |

use serde_json::{json, Value};

use super::{Attributes, Command};

/// Coordinate frames attached to the robot body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotFrame {
    /// Floating base frame.
    Base,
    /// Left hand end effector.
    LeftHand,
    /// Right hand end effector.
    RightHand,
}

impl RobotFrame {
    /// Wire name of the frame.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::LeftHand => "left-hand",
            Self::RightHand => "right-hand",
        }
    }

    /// `{"robot-frame": name}` object reference.
    #[must_use]
    pub fn reference(self) -> Value {
        json!({ "robot-frame": self.as_str() })
    }
}

/// `{"owned-object-name": name}` reference to a scene object.
#[must_use]
pub fn owned_object(name: &str) -> Value {
    json!({ "owned-object-name": name })
}

/// Query static robot information (name, model, ...).
#[must_use]
pub fn get_robot_info() -> Command {
    Command::new("get-robot-info", Attributes::new())
}

/// Query the server clock.
#[must_use]
pub fn get_timestamp() -> Command {
    Command::new("get-timestamp", Attributes::new())
}

/// Query the pose and velocity of an object or robot frame.
#[must_use]
pub fn get_object_kinematics(object: Value) -> Command {
    Command::new("get-object-kinematics", Attributes::new()).with_attribute("object", object)
}

/// Ask the server for a named privilege.
#[must_use]
pub fn request_privilege(privilege: &str) -> Command {
    Command::new("request-privilege", Attributes::new())
        .with_attribute("privilege", privilege)
        .with_attribute("priority", 0)
}

/// Add an object to the world with the given attributes.
#[must_use]
pub fn add_object(attributes: Value) -> Command {
    Command::new("add-object", Attributes::new()).with_attribute("attributes", attributes)
}

/// Add an object with an explicit transform and optional parent frame.
#[must_use]
pub fn add_object_with(attributes: Value, transform: Value, relative_to: Option<Value>) -> Command {
    let cmd = add_object(attributes).with_attribute("transform", transform);
    match relative_to {
        Some(parent) => cmd.with_attribute("relative-to", parent),
        None => cmd,
    }
}

/// Walk to a target pose.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionGoto {
    target: Value,
    position_tolerance: Option<f64>,
    orientation_tolerance: Option<f64>,
    mobility_parameters: Option<Value>,
}

impl ActionGoto {
    /// Goto `target` (e.g. `{"xy": [6.5, 0]}`).
    #[must_use]
    pub fn new(target: Value) -> Self {
        Self {
            target,
            position_tolerance: None,
            orientation_tolerance: None,
            mobility_parameters: None,
        }
    }

    /// Accepted position error in metres.
    #[must_use]
    pub fn position_tolerance(mut self, metres: f64) -> Self {
        self.position_tolerance = Some(metres);
        self
    }

    /// Accepted heading error in radians.
    #[must_use]
    pub fn orientation_tolerance(mut self, radians: f64) -> Self {
        self.orientation_tolerance = Some(radians);
        self
    }

    /// Gait options (`step-clearance`, `velocity-max`, `avoid-obstacles`, ...).
    #[must_use]
    pub fn mobility_parameters(mut self, params: Value) -> Self {
        self.mobility_parameters = Some(params);
        self
    }
}

impl From<ActionGoto> for Command {
    fn from(goto: ActionGoto) -> Self {
        let mut cmd = Command::new("action-goto", Attributes::new()).with_attribute("target", goto.target);
        if let Some(tol) = goto.position_tolerance {
            cmd = cmd.with_attribute("position-tolerance", tol);
        }
        if let Some(tol) = goto.orientation_tolerance {
            cmd = cmd.with_attribute("orientation-tolerance", tol);
        }
        if let Some(params) = goto.mobility_parameters {
            cmd = cmd.with_attribute("mobility-parameters", params);
        }
        cmd
    }
}

/// Pick up an object.
#[must_use]
pub fn action_pick(object: Value) -> Command {
    Command::new("action-pick", Attributes::new()).with_attribute("object", object)
}

/// Place the held object at a pose.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlace {
    pose: Value,
    reference_frame: Option<Value>,
    position_tolerance: Option<f64>,
}

impl ActionPlace {
    /// Place at `pose` (e.g. `{"xyz": [0, 0, 0.24]}`).
    #[must_use]
    pub fn new(pose: Value) -> Self {
        Self {
            pose,
            reference_frame: None,
            position_tolerance: None,
        }
    }

    /// Frame `pose` is expressed in.
    #[must_use]
    pub fn reference_frame(mut self, frame: Value) -> Self {
        self.reference_frame = Some(frame);
        self
    }

    /// Accepted position error in metres.
    #[must_use]
    pub fn position_tolerance(mut self, metres: f64) -> Self {
        self.position_tolerance = Some(metres);
        self
    }
}

impl From<ActionPlace> for Command {
    fn from(place: ActionPlace) -> Self {
        let mut cmd = Command::new("action-place", Attributes::new()).with_attribute("pose", place.pose);
        if let Some(frame) = place.reference_frame {
            cmd = cmd.with_attribute("reference-frame", frame);
        }
        if let Some(tol) = place.position_tolerance {
            cmd = cmd.with_attribute("position-tolerance", tol);
        }
        cmd
    }
}

/// Move an end effector through a list of waypoints.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionEndEffectorMove {
    end_effector: String,
    waypoints: Vec<Value>,
    reference_frame: Option<Value>,
    cyclic: bool,
    max_speed: Option<f64>,
    duration: Option<f64>,
}

impl ActionEndEffectorMove {
    /// Move `end_effector` (e.g. `left-hand`) through `waypoints`.
    #[must_use]
    pub fn new(end_effector: impl Into<String>, waypoints: Vec<Value>) -> Self {
        Self {
            end_effector: end_effector.into(),
            waypoints,
            reference_frame: None,
            cyclic: false,
            max_speed: None,
            duration: None,
        }
    }

    /// Frame the waypoints are expressed in.
    #[must_use]
    pub fn reference_frame(mut self, frame: Value) -> Self {
        self.reference_frame = Some(frame);
        self
    }

    /// Repeat the waypoint list until cancelled.
    #[must_use]
    pub fn cyclic(mut self, cyclic: bool) -> Self {
        self.cyclic = cyclic;
        self
    }

    /// Speed cap in metres per second.
    #[must_use]
    pub fn max_speed(mut self, speed: f64) -> Self {
        self.max_speed = Some(speed);
        self
    }

    /// Target duration of one pass in seconds.
    #[must_use]
    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }
}

impl From<ActionEndEffectorMove> for Command {
    fn from(mv: ActionEndEffectorMove) -> Self {
        let mut cmd = Command::new("action-end-effector-move", Attributes::new())
            .with_attribute("end-effector", mv.end_effector)
            .with_attribute("waypoints", mv.waypoints)
            .with_attribute("cyclic", mv.cyclic);
        if let Some(frame) = mv.reference_frame {
            cmd = cmd.with_attribute("reference-frame", frame);
        }
        if let Some(speed) = mv.max_speed {
            cmd = cmd.with_attribute("max-speed", speed);
        }
        if let Some(secs) = mv.duration {
            cmd = cmd.with_attribute("duration", secs);
        }
        cmd
    }
}

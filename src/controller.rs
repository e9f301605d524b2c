// src/controller.rs - Routes trajectory commands to per-group simulators
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{Config, ConfigError};
use crate::feedback::NamespaceSnapshot;
use crate::motion::{MotionError, MotionSettings, MotionSimulator, Waypoint};
use crate::registry::{JointGroup, JointGroupRegistry};
use crate::robot_info::RobotInfoResponse;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RoutingError {
    #[error("Joint '{joint}' of group {group} is missing from the command")]
    MissingJoint { group: i64, joint: String },
    #[error("Point {index} has {actual} positions for {expected} joint names")]
    PointLength { index: usize, expected: usize, actual: usize },
    #[error("Point {index} has invalid time_from_start {seconds}")]
    InvalidTime { index: usize, seconds: f64 },
    #[error("Waypoint rejected: {0}")]
    Enqueue(#[from] MotionError),
}

/// One point of an inbound trajectory, in the command's joint order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TrajectoryPoint {
    pub positions: Vec<f64>,
    /// Seconds since trajectory start.
    pub time_from_start: f64,
}

/// Inbound trajectory for one namespace. No points means "stop".
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TrajectoryCommand {
    pub joint_names: Vec<String>,
    #[serde(default)]
    pub points: Vec<TrajectoryPoint>,
}

impl TrajectoryCommand {
    pub fn new(joint_names: Vec<String>, points: Vec<TrajectoryPoint>) -> Self {
        Self { joint_names, points }
    }

    /// An empty trajectory over `joint_names`, which stops those groups.
    pub fn stop(joint_names: Vec<String>) -> Self {
        Self::new(joint_names, Vec::new())
    }
}

/// Outcome of routing one command.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    /// Groups that accepted the command, with the number of waypoints queued.
    pub routed: Vec<(i64, usize)>,
    pub rejected: Vec<(i64, RoutingError)>,
    /// Groups whose motion was aborted before routing.
    pub stopped: Vec<i64>,
}

impl DispatchReport {
    pub fn is_unrouted(&self) -> bool {
        self.routed.is_empty() && self.rejected.is_empty()
    }
}

/// Reorder `positions`, given in `source` joint order, into `group`'s order.
pub fn remap_positions(
    source: &[String],
    positions: &[f64],
    group: &JointGroup,
) -> Result<Vec<f64>, RoutingError> {
    let lookup: HashMap<&str, f64> = source
        .iter()
        .map(String::as_str)
        .zip(positions.iter().copied())
        .collect();
    group
        .joints
        .iter()
        .map(|joint| {
            lookup
                .get(joint.as_str())
                .copied()
                .ok_or_else(|| RoutingError::MissingJoint {
                    group: group.id,
                    joint: joint.clone(),
                })
        })
        .collect()
}

/// Convert a whole command into waypoints for `group`, or reject it.
///
/// Every point is checked here, so a rejected command never reaches the
/// simulator.
pub fn remap_command(command: &TrajectoryCommand, group: &JointGroup) -> Result<Vec<Waypoint>, RoutingError> {
    command
        .points
        .iter()
        .enumerate()
        .map(|(index, point)| {
            if point.positions.len() != command.joint_names.len() {
                return Err(RoutingError::PointLength {
                    index,
                    expected: command.joint_names.len(),
                    actual: point.positions.len(),
                });
            }
            let time_from_start = Duration::try_from_secs_f64(point.time_from_start).map_err(|_| {
                RoutingError::InvalidTime { index, seconds: point.time_from_start }
            })?;
            let positions = remap_positions(&command.joint_names, &point.positions, group)?;
            let waypoint = Waypoint::new(positions, time_from_start);
            waypoint.validate(group.joints.len())?;
            Ok(waypoint)
        })
        .collect()
}

/// Owns one motion simulator per joint group and routes commands to them.
pub struct RobotController {
    registry: JointGroupRegistry,
    // Same order as `registry.groups()`.
    simulators: Vec<MotionSimulator>,
    robot_info: RobotInfoResponse,
    shutdown_tx: broadcast::Sender<()>,
}

impl RobotController {
    /// Build the registry and start one worker per group. Must be called
    /// from within a tokio runtime.
    pub fn new(config: &Config) -> Result<Self, ControllerError> {
        let registry = JointGroupRegistry::build(&config.controller);
        let joint_counts: Vec<usize> = registry.groups().iter().map(|g| g.joints.len()).collect();
        let initial = config.controller.initial_positions_for(&joint_counts);
        Self::from_parts(
            registry,
            initial,
            config.controller.motion_settings(),
            RobotInfoResponse::from_config(config.robot_info.as_ref()),
        )
    }

    pub fn from_parts(
        registry: JointGroupRegistry,
        initial_positions: Vec<Vec<f64>>,
        settings: MotionSettings,
        robot_info: RobotInfoResponse,
    ) -> Result<Self, ControllerError> {
        if initial_positions.len() != registry.len() {
            return Err(ConfigError::InvalidInitialPositions(format!(
                "{} position lists for {} joint groups",
                initial_positions.len(),
                registry.len()
            ))
            .into());
        }
        let simulators = registry
            .groups()
            .iter()
            .zip(initial_positions)
            .map(|(group, initial)| MotionSimulator::new(group.clone(), initial, settings.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        tracing::info!("Robot controller ready with {} joint group(s)", simulators.len());
        Ok(Self { registry, simulators, robot_info, shutdown_tx })
    }

    pub fn registry(&self) -> &JointGroupRegistry {
        &self.registry
    }

    pub fn simulator(&self, group_id: i64) -> Option<&MotionSimulator> {
        self.simulators.iter().find(|s| s.group().id == group_id)
    }

    pub fn robot_info(&self) -> &RobotInfoResponse {
        &self.robot_info
    }

    /// Route a trajectory to every group in `ns` that shares a joint with it.
    ///
    /// A moving group is stopped first; the old trajectory is discarded, not
    /// blended. A group whose joints cannot all be found in the command keeps
    /// its state and is reported as rejected.
    pub async fn handle_trajectory(&self, ns: &str, command: &TrajectoryCommand) -> DispatchReport {
        let mut report = DispatchReport::default();
        let targets = self.registry.by_joint_overlap(ns, command.joint_names.as_slice());
        if targets.is_empty() {
            tracing::warn!(
                namespace = ns,
                "No joint group matches command joints {:?}",
                command.joint_names
            );
            return report;
        }

        for group in targets {
            let Some(simulator) = self.simulator(group.id) else {
                continue;
            };
            let waypoints = match remap_command(command, group) {
                Ok(waypoints) => waypoints,
                Err(e) => {
                    tracing::error!(group = group.id, "Dropping trajectory: {}", e);
                    report.rejected.push((group.id, e));
                    continue;
                }
            };

            if simulator.is_in_motion() {
                if !command.points.is_empty() {
                    tracing::warn!(
                        group = group.id,
                        "Trajectory splicing not supported, discarding current motion"
                    );
                }
                simulator.stop();
                report.stopped.push(group.id);
            }

            let count = waypoints.len();
            let mut queued = Ok(());
            for waypoint in waypoints {
                queued = simulator.enqueue(waypoint).await;
                if queued.is_err() {
                    break;
                }
            }
            match queued {
                Ok(()) => {
                    tracing::debug!(group = group.id, "Queued {} waypoint(s)", count);
                    report.routed.push((group.id, count));
                }
                Err(e) => {
                    tracing::error!(group = group.id, "Failed to queue trajectory: {}", e);
                    report.rejected.push((group.id, e.into()));
                }
            }
        }
        report
    }

    /// Consolidated state of every group in `ns`, in group order.
    pub fn snapshot(&self, ns: &str) -> Option<NamespaceSnapshot> {
        let simulators: Vec<&MotionSimulator> = self
            .registry
            .by_namespace(ns)
            .filter_map(|g| self.simulator(g.id))
            .collect();
        if simulators.is_empty() {
            return None;
        }
        let mut names = Vec::new();
        let mut positions = Vec::new();
        let mut in_motion = false;
        for simulator in simulators {
            names.extend(simulator.group().joints.iter().cloned());
            positions.extend(simulator.current_positions());
            in_motion |= simulator.is_in_motion();
        }
        Some(NamespaceSnapshot::new(ns, names, positions, in_motion))
    }

    pub fn snapshots(&self) -> Vec<NamespaceSnapshot> {
        self.registry
            .namespaces()
            .iter()
            .filter_map(|ns| self.snapshot(ns))
            .collect()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop background loops and every motion worker, waiting for the
    /// workers to exit. Safe to call more than once.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down robot controller");
        let _ = self.shutdown_tx.send(());
        for simulator in &self.simulators {
            simulator.shutdown();
        }
        for simulator in &self.simulators {
            simulator.join().await;
        }
    }
}

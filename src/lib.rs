//! Multi-group industrial robot motion simulator.
//!
//! Trajectory commands are routed by [`controller::RobotController`] to one
//! [`motion::MotionSimulator`] per joint group, each of which interpolates
//! its queued waypoints on a background tokio task. Feedback is sampled
//! periodically and handed to a [`feedback::FeedbackPublisher`].

pub mod config;
pub mod controller;
pub mod feedback;
pub mod motion;
pub mod registry;
pub mod robot_info;

pub use config::{load_config, Config, ConfigError, ControllerConfig};
pub use controller::{DispatchReport, RobotController, RoutingError, TrajectoryCommand, TrajectoryPoint};
pub use feedback::{FeedbackPublisher, NamespaceSnapshot, RobotStatus};
pub use motion::{MotionError, MotionSettings, MotionSimulator, Waypoint};
pub use registry::{JointGroup, JointGroupRegistry};
pub use robot_info::{DeviceInfo, RobotInfoResponse};

//! # Simulator Configuration
//!
//! Loaded from a single TOML file. The joint map may be given flat (one group
//! in the root namespace) or structured (any number of groups):
//!
//! ```toml
//! [controller]
//! publish_rate = 10.0
//! motion_update_rate = 100.0
//! joint_names = ["joint_1", "joint_2"]
//!
//! [[controller.joint_map]]
//! id = 1
//! namespace = "left"
//! joints = ["l_shoulder", "l_elbow"]
//!
//! [[controller.joint_map]]
//! id = 2
//! namespace = "right"
//! joints = ["r_shoulder", "r_elbow"]
//! ```
//!
//! `joint_map` and `initial_positions` are kept as raw TOML and normalized by
//! [`parse_joint_map`] and [`parse_initial_positions`], so a malformed entry
//! falls back to a safe default instead of failing the whole load.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::motion::MotionSettings;
use crate::registry::JointGroup;
use crate::robot_info::RobotInfoConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Duplicate joint group id: {0}")]
    DuplicateGroupId(i64),
    #[error("Malformed joint map: {0}")]
    MalformedJointMap(String),
    #[error("Invalid initial positions: {0}")]
    InvalidInitialPositions(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub robot_info: Option<RobotInfoConfig>,
}

/// Joint layout, rates and buffering for the simulated controller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Outbound feedback rate in Hz.
    #[serde(default = "default_publish_rate")]
    pub publish_rate: f64,
    /// Interpolation rate in Hz. Zero disables sub-interpolation.
    #[serde(default = "default_motion_update_rate")]
    pub motion_update_rate: f64,
    #[serde(default)]
    pub buffer_capacity: Option<usize>,
    #[serde(default)]
    pub joint_names: Option<Vec<String>>,
    #[serde(default)]
    pub joint_map: Option<toml::Value>,
    #[serde(default)]
    pub initial_positions: Option<toml::Value>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            publish_rate: default_publish_rate(),
            motion_update_rate: default_motion_update_rate(),
            buffer_capacity: None,
            joint_names: None,
            joint_map: None,
            initial_positions: None,
        }
    }
}

impl ControllerConfig {
    pub fn motion_settings(&self) -> MotionSettings {
        if self.motion_update_rate < 0.0 {
            tracing::warn!(
                "Negative motion_update_rate {} treated as 0 (no sub-interpolation)",
                self.motion_update_rate
            );
        }
        MotionSettings::from_rate(self.motion_update_rate, self.buffer_capacity)
    }

    /// Initial positions for groups with the given joint counts, falling back
    /// to all zeros when the configured value does not fit.
    pub fn initial_positions_for(&self, joint_counts: &[usize]) -> Vec<Vec<f64>> {
        let zeros = || joint_counts.iter().map(|n| vec![0.0; *n]).collect();
        match &self.initial_positions {
            None => zeros(),
            Some(value) => match parse_initial_positions(value, joint_counts) {
                Ok(positions) => positions,
                Err(e) => {
                    tracing::warn!("{}; using all-zero initial positions", e);
                    zeros()
                }
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct JointMapEntry {
    #[serde(alias = "group")]
    id: i64,
    #[serde(alias = "ns", default)]
    namespace: String,
    joints: Vec<String>,
}

/// Normalize a structured joint map into groups, in configuration order.
pub fn parse_joint_map(value: &toml::Value) -> Result<Vec<JointGroup>, ConfigError> {
    let entries = value
        .as_array()
        .ok_or_else(|| ConfigError::MalformedJointMap("expected an array of groups".to_string()))?;
    let mut ids = HashSet::new();
    let mut groups = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let entry: JointMapEntry = entry
            .clone()
            .try_into()
            .map_err(|e| ConfigError::MalformedJointMap(format!("entry {}: {}", index, e)))?;
        if !ids.insert(entry.id) {
            return Err(ConfigError::DuplicateGroupId(entry.id));
        }
        check_joint_names(&entry.joints)
            .map_err(|msg| ConfigError::MalformedJointMap(format!("group {}: {}", entry.id, msg)))?;
        groups.push(JointGroup::new(entry.id, entry.namespace, entry.joints));
    }
    if groups.is_empty() {
        return Err(ConfigError::MalformedJointMap("no groups listed".to_string()));
    }
    Ok(groups)
}

pub(crate) fn check_joint_names(joints: &[String]) -> Result<(), String> {
    if joints.is_empty() {
        return Err("no joints listed".to_string());
    }
    let mut seen = HashSet::new();
    for joint in joints {
        if !seen.insert(joint.as_str()) {
            return Err(format!("joint '{}' listed twice", joint));
        }
    }
    Ok(())
}

/// Validate initial positions against group joint counts.
///
/// Accepts an array with one numeric array per group, or, for a single group,
/// a bare numeric array.
pub fn parse_initial_positions(
    value: &toml::Value,
    joint_counts: &[usize],
) -> Result<Vec<Vec<f64>>, ConfigError> {
    let invalid = |msg: String| ConfigError::InvalidInitialPositions(msg);
    let rows = value
        .as_array()
        .ok_or_else(|| invalid("expected an array".to_string()))?;

    let nested = rows.iter().all(|row| row.is_array());
    let rows: Vec<&toml::Value> = if nested {
        rows.iter().collect()
    } else if joint_counts.len() == 1 {
        vec![value]
    } else {
        return Err(invalid("expected one array per joint group".to_string()));
    };

    if rows.len() != joint_counts.len() {
        return Err(invalid(format!(
            "{} position lists for {} joint groups",
            rows.len(),
            joint_counts.len()
        )));
    }

    rows.iter()
        .zip(joint_counts)
        .enumerate()
        .map(|(group, (row, expected))| {
            let row = row.as_array().map(Vec::as_slice).unwrap_or_default();
            if row.len() != *expected {
                return Err(invalid(format!(
                    "group {} has {} positions, expected {}",
                    group,
                    row.len(),
                    expected
                )));
            }
            row.iter()
                .map(|v| match v {
                    toml::Value::Float(f) if f.is_finite() => Ok(*f),
                    toml::Value::Integer(i) => Ok(*i as f64),
                    other => Err(invalid(format!("group {} has non-numeric value {}", group, other))),
                })
                .collect::<Result<Vec<f64>, ConfigError>>()
        })
        .collect()
}

fn default_publish_rate() -> f64 { 10.0 }
fn default_motion_update_rate() -> f64 { 100.0 }

/// Load the simulator configuration from a TOML file.
///
/// A missing file is only logged at debug level; the caller decides whether
/// defaults are acceptable.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::debug!("Cannot read simulator config '{}': {}", path, e);
        ConfigError::Io(e)
    })?;
    toml::from_str(&contents).map_err(|e| {
        tracing::error!("Simulator config '{}' is not valid: {}", path, e);
        ConfigError::Toml(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn value(src: &str) -> toml::Value {
        let table: toml::Table = toml::from_str(&format!("v = {}", src)).unwrap();
        table["v"].clone()
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.controller.publish_rate, 10.0);
        assert_eq!(config.controller.motion_update_rate, 100.0);
        assert!(config.controller.buffer_capacity.is_none());
        assert!(config.controller.joint_names.is_none());
        assert!(config.robot_info.is_none());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("robosim.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[controller]\nmotion_update_rate = 0.0\njoint_names = ['a', 'b']\n\n[[controller.joint_map]]\ngroup = 3\nns = 'arm'\njoints = ['x']"
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.controller.motion_update_rate, 0.0);
        assert_eq!(config.controller.joint_names, Some(vec!["a".to_string(), "b".to_string()]));
        // Defaults for missing fields
        assert_eq!(config.controller.publish_rate, 10.0);

        let groups = parse_joint_map(config.controller.joint_map.as_ref().unwrap()).unwrap();
        assert_eq!(groups, vec![JointGroup::new(3, "arm", vec!["x".to_string()])]);
    }

    #[test]
    fn test_load_config_reports_missing_file_as_io() {
        let dir = tempdir().unwrap();
        let absent = dir.path().join("robosim.toml");
        let result = load_config(absent.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_load_config_rejects_mistyped_rate() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("robosim.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[controller]\npublish_rate = 'fast'").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_joint_map_rejects_duplicate_ids() {
        let map = value("[{ id = 1, joints = ['a'] }, { id = 1, namespace = 'x', joints = ['b'] }]");
        assert!(matches!(parse_joint_map(&map), Err(ConfigError::DuplicateGroupId(1))));
    }

    #[test]
    fn test_joint_map_rejects_malformed_entries() {
        let missing_joints = value("[{ id = 1 }]");
        assert!(matches!(parse_joint_map(&missing_joints), Err(ConfigError::MalformedJointMap(_))));
        let repeated_joint = value("[{ id = 1, joints = ['a', 'a'] }]");
        assert!(matches!(parse_joint_map(&repeated_joint), Err(ConfigError::MalformedJointMap(_))));
        let not_a_list = value("{ id = 1 }");
        assert!(matches!(parse_joint_map(&not_a_list), Err(ConfigError::MalformedJointMap(_))));
    }

    #[test]
    fn test_initial_positions_nested_and_flat() {
        let nested = value("[[1, 2.5], [3]]");
        assert_eq!(
            parse_initial_positions(&nested, &[2, 1]).unwrap(),
            vec![vec![1.0, 2.5], vec![3.0]]
        );
        let flat = value("[0.5, 1]");
        assert_eq!(parse_initial_positions(&flat, &[2]).unwrap(), vec![vec![0.5, 1.0]]);
    }

    #[test]
    fn test_initial_positions_fallback_to_zero() {
        let mut controller = ControllerConfig::default();
        controller.initial_positions = Some(value("[[1, 2], [3]]"));
        // Wrong group count
        assert_eq!(controller.initial_positions_for(&[2]), vec![vec![0.0, 0.0]]);
        // Wrong joint count
        assert_eq!(controller.initial_positions_for(&[2, 2]), vec![vec![0.0; 2], vec![0.0; 2]]);

        controller.initial_positions = Some(value("[['a', 2]]"));
        assert_eq!(controller.initial_positions_for(&[2]), vec![vec![0.0, 0.0]]);

        controller.initial_positions = Some(value("[[1, 2]]"));
        assert_eq!(controller.initial_positions_for(&[2]), vec![vec![1.0, 2.0]]);
    }

    #[test]
    fn test_motion_settings_from_rate() {
        let mut controller = ControllerConfig::default();
        assert_eq!(
            controller.motion_settings().update_period,
            std::time::Duration::from_millis(10)
        );
        controller.motion_update_rate = 0.0;
        controller.buffer_capacity = Some(8);
        let settings = controller.motion_settings();
        assert!(settings.update_period.is_zero());
        assert_eq!(settings.buffer_capacity, Some(8));
    }
}

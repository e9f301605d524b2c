//! Static controller/robot descriptor returned by the robot info query.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one device. Only fields that are known are reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Optional `[robot_info]` override section.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RobotInfoConfig {
    #[serde(default)]
    pub controller: DeviceInfo,
    #[serde(default)]
    pub robots: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceReturnCode {
    Success,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RobotInfoResponse {
    pub controller: DeviceInfo,
    /// Always exactly one entry.
    pub robots: Vec<DeviceInfo>,
    pub code: ServiceReturnCode,
}

impl RobotInfoResponse {
    /// Build the cached response from the override section, or generate a
    /// placeholder identity when no override is configured.
    pub fn from_config(config: Option<&RobotInfoConfig>) -> Self {
        let info = match config {
            Some(info) => info.clone(),
            None => generated_info(),
        };
        if info.robots.len() > 1 {
            tracing::warn!(
                "robot_info lists {} robots, only the first is reported",
                info.robots.len()
            );
        }
        let robot = info.robots.into_iter().next().unwrap_or_else(|| {
            tracing::warn!("robot_info lists no robots, reporting an empty descriptor");
            DeviceInfo::default()
        });
        Self {
            controller: info.controller,
            robots: vec![robot],
            code: ServiceReturnCode::Success,
        }
    }
}

fn generated_info() -> RobotInfoConfig {
    let version = env!("CARGO_PKG_VERSION").to_string();
    RobotInfoConfig {
        controller: DeviceInfo {
            model: Some("Simulated Robot Controller".to_string()),
            serial_number: Some(Uuid::new_v4().simple().to_string()),
            sw_version: Some(version.clone()),
            ..Default::default()
        },
        robots: vec![DeviceInfo {
            model: Some("Simulated Manipulator".to_string()),
            serial_number: Some(Uuid::new_v4().simple().to_string()),
            sw_version: Some(version),
            ..Default::default()
        }],
    }
}

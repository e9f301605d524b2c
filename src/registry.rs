//! Joint groups and the read-only registry that routes commands to them.
//!
//! The registry is built once from [`ControllerConfig`] and never mutated, so
//! lookups need no synchronization. Building never fails: every configuration
//! problem falls back to the next safest layout with a warning.
//!
//! Fallback order: structured `joint_map`, then flat `joint_names`, then six
//! placeholder joints `joint_1`..`joint_6` in the root namespace.

use std::collections::HashSet;

use crate::config::{check_joint_names, parse_joint_map, ConfigError, ControllerConfig};

/// Group id assigned to a flat joint list.
pub const FLAT_GROUP_ID: i64 = 1;
pub const DEFAULT_JOINT_COUNT: usize = 6;

/// A named, ordered set of joints moved together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JointGroup {
    pub id: i64,
    pub namespace: String,
    pub joints: Vec<String>,
}

impl JointGroup {
    pub fn new(id: i64, namespace: impl Into<String>, joints: Vec<String>) -> Self {
        Self { id, namespace: namespace.into(), joints }
    }

    pub fn contains(&self, joint: &str) -> bool {
        self.joints.iter().any(|j| j == joint)
    }

    pub fn overlaps<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|n| self.contains(n.as_ref()))
    }
}

/// Placeholder layout used when nothing usable is configured.
pub fn default_group() -> JointGroup {
    let joints = (1..=DEFAULT_JOINT_COUNT).map(|i| format!("joint_{}", i)).collect();
    JointGroup::new(FLAT_GROUP_ID, "", joints)
}

#[derive(Debug, Clone, PartialEq)]
pub struct JointGroupRegistry {
    groups: Vec<JointGroup>,
}

impl JointGroupRegistry {
    /// Build from explicit groups, rejecting duplicate ids.
    pub fn from_groups(groups: Vec<JointGroup>) -> Result<Self, ConfigError> {
        let mut ids = HashSet::new();
        for group in &groups {
            if !ids.insert(group.id) {
                return Err(ConfigError::DuplicateGroupId(group.id));
            }
        }
        Ok(Self { groups })
    }

    /// Build from configuration, falling back on any error.
    pub fn build(config: &ControllerConfig) -> Self {
        let flat = config.joint_names.as_ref().filter(|names| !names.is_empty());

        if let Some(map) = &config.joint_map {
            if flat.is_some() {
                tracing::warn!("Both joint_names and joint_map are configured, using joint_map");
            }
            match parse_joint_map(map) {
                Ok(groups) => {
                    tracing::info!("Loaded {} joint group(s) from joint_map", groups.len());
                    return Self { groups };
                }
                Err(e) => tracing::warn!("Ignoring joint_map: {}", e),
            }
        }

        if let Some(names) = flat {
            match check_joint_names(names) {
                Ok(()) => {
                    tracing::info!("Loaded flat joint list with {} joint(s)", names.len());
                    return Self {
                        groups: vec![JointGroup::new(FLAT_GROUP_ID, "", names.clone())],
                    };
                }
                Err(msg) => tracing::warn!("Ignoring joint_names: {}", msg),
            }
        }

        tracing::warn!(
            "No usable joint configuration, using {} default joints",
            DEFAULT_JOINT_COUNT
        );
        Self { groups: vec![default_group()] }
    }

    pub fn groups(&self) -> &[JointGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group_ids(&self) -> Vec<i64> {
        self.groups.iter().map(|g| g.id).collect()
    }

    /// Distinct namespaces in configuration order.
    pub fn namespaces(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.groups
            .iter()
            .filter(|g| seen.insert(g.namespace.as_str()))
            .map(|g| g.namespace.clone())
            .collect()
    }

    pub fn by_id(&self, id: i64) -> Option<&JointGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn by_namespace<'a>(&'a self, ns: &'a str) -> impl Iterator<Item = &'a JointGroup> + 'a {
        self.groups.iter().filter(move |g| g.namespace == ns)
    }

    /// Groups in `ns` sharing at least one joint with `names`.
    pub fn by_joint_overlap<'a, S: AsRef<str>>(&'a self, ns: &'a str, names: &'a [S]) -> Vec<&'a JointGroup> {
        self.by_namespace(ns).filter(|g| g.overlaps(names)).collect()
    }
}

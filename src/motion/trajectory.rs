// src/motion/trajectory.rs - Waypoints and linear interpolation between them
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MotionError {
    #[error("Waypoint has {actual} positions, group expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Non-finite position {value} at joint index {index}")]
    NonFinite { index: usize, value: f64 },
    #[error("Motion simulator is shut down")]
    Shutdown,
}

/// One target joint vector with its cumulative offset from trajectory start.
#[derive(Debug, Clone, PartialEq)]
pub struct Waypoint {
    pub positions: Vec<f64>,
    pub time_from_start: Duration,
}

impl Waypoint {
    pub fn new(positions: Vec<f64>, time_from_start: Duration) -> Self {
        Self { positions, time_from_start }
    }

    /// A zero-time waypoint sitting at `positions`; used to seed the worker.
    pub fn at_rest(positions: Vec<f64>) -> Self {
        Self::new(positions, Duration::ZERO)
    }

    pub fn validate(&self, joint_count: usize) -> Result<(), MotionError> {
        if self.positions.len() != joint_count {
            return Err(MotionError::DimensionMismatch {
                expected: joint_count,
                actual: self.positions.len(),
            });
        }
        if let Some((index, value)) = self
            .positions
            .iter()
            .enumerate()
            .find(|(_, p)| !p.is_finite())
        {
            return Err(MotionError::NonFinite { index, value: *value });
        }
        Ok(())
    }
}

/// Per joint: `last + fraction * (next - last)`.
pub fn interpolate_positions(last: &[f64], next: &[f64], fraction: f64) -> Vec<f64> {
    last.iter()
        .zip(next.iter())
        .map(|(l, n)| l + fraction * (n - l))
        .collect()
}

/// Intermediate waypoint one `step` along the move from `last` to `next`.
///
/// Returns `None` when `step` does not fall strictly inside the remaining
/// move, i.e. the next commit should be `next` itself.
pub fn interpolate_step(last: &Waypoint, next: &Waypoint, step: Duration) -> Option<Waypoint> {
    let remaining = next.time_from_start.checked_sub(last.time_from_start)?;
    if step.is_zero() || step >= remaining {
        return None;
    }
    let fraction = step.as_secs_f64() / remaining.as_secs_f64();
    Some(Waypoint {
        positions: interpolate_positions(&last.positions, &next.positions, fraction),
        // last + fraction * (next - last) collapses to last + step
        time_from_start: last.time_from_start + step,
    })
}

// src/motion/simulator.rs - Per-group buffered interpolation worker
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::motion::buffer::MotionBuffer;
use crate::motion::trajectory::{interpolate_step, MotionError, Waypoint};
use crate::registry::JointGroup;

const COMMIT_CHANNEL_CAPACITY: usize = 256;

/// Timing and buffering knobs shared by every simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSettings {
    /// Sub-interpolation cadence. Zero commits only final waypoint positions.
    pub update_period: Duration,
    pub buffer_capacity: Option<usize>,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            update_period: Duration::from_millis(10),
            buffer_capacity: None,
        }
    }
}

impl MotionSettings {
    /// Build settings from an update rate in Hz; a rate of zero disables
    /// sub-interpolation.
    pub fn from_rate(update_rate_hz: f64, buffer_capacity: Option<usize>) -> Self {
        let update_period = if update_rate_hz > 0.0 && update_rate_hz.is_finite() {
            Duration::from_secs_f64(1.0 / update_rate_hz)
        } else {
            Duration::ZERO
        };
        Self { update_period, buffer_capacity }
    }
}

#[derive(Debug)]
struct MotionState {
    current_positions: Vec<f64>,
    stop_requested: bool,
}

/// State shared between the simulator handle and its worker task.
#[derive(Debug)]
struct Shared {
    group: JointGroup,
    state: Mutex<MotionState>,
    buffer: MotionBuffer,
    commits: broadcast::Sender<Vec<f64>>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, MotionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit an intermediate point unless a stop is pending.
    ///
    /// A pending stop is consumed here and ends the in-flight goal.
    fn commit_intermediate(&self, positions: &[f64]) -> bool {
        let committed = {
            let mut state = self.lock_state();
            if state.stop_requested {
                state.stop_requested = false;
                self.buffer.finish();
                false
            } else {
                state.current_positions.clear();
                state.current_positions.extend_from_slice(positions);
                true
            }
        };
        if committed {
            let _ = self.commits.send(positions.to_vec());
        } else {
            tracing::info!(group = self.group.id, "Stopping motion immediately, discarding goal");
        }
        committed
    }

    /// Finish the in-flight goal, committing `positions` unless a stop is
    /// pending. Returns whether the goal was committed.
    fn settle(&self, positions: Option<&[f64]>) -> bool {
        let committed = {
            let mut state = self.lock_state();
            let committed = match positions {
                Some(p) if !state.stop_requested => {
                    state.current_positions.clear();
                    state.current_positions.extend_from_slice(p);
                    true
                }
                _ => false,
            };
            state.stop_requested = false;
            self.buffer.finish();
            committed
        };
        if let (true, Some(p)) = (committed, positions) {
            let _ = self.commits.send(p.to_vec());
        }
        committed
    }
}

/// Simulated motion for one joint group.
///
/// Owns a waypoint buffer and a background worker that interpolates towards
/// each waypoint in turn, committing positions at the configured cadence.
/// Must be created from within a tokio runtime.
#[derive(Debug)]
pub struct MotionSimulator {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MotionSimulator {
    pub fn new(
        group: JointGroup,
        initial_positions: Vec<f64>,
        settings: MotionSettings,
    ) -> Result<Self, MotionError> {
        Waypoint::at_rest(initial_positions.clone()).validate(group.joints.len())?;
        let (commits, _) = broadcast::channel(COMMIT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            group,
            state: Mutex::new(MotionState {
                current_positions: initial_positions,
                stop_requested: false,
            }),
            buffer: MotionBuffer::new(settings.buffer_capacity),
            commits,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            group = shared.group.id,
            namespace = %shared.group.namespace,
            joints = shared.group.joints.len(),
            update_period = ?settings.update_period,
            "Starting motion worker"
        );
        let worker = MotionWorker::new(shared.clone(), settings.update_period, shutdown_rx);
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            shared,
            shutdown_tx,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn group(&self) -> &JointGroup {
        &self.shared.group
    }

    pub fn joint_count(&self) -> usize {
        self.shared.group.joints.len()
    }

    /// Queue a waypoint for execution, waiting for space if the buffer is
    /// bounded and full.
    pub async fn enqueue(&self, waypoint: Waypoint) -> Result<(), MotionError> {
        waypoint.validate(self.joint_count())?;
        if *self.shutdown_tx.borrow() {
            return Err(MotionError::Shutdown);
        }
        tracing::debug!(
            group = self.shared.group.id,
            time_from_start = ?waypoint.time_from_start,
            "Queueing waypoint"
        );
        self.shared.buffer.push(waypoint).await
    }

    pub fn current_positions(&self) -> Vec<f64> {
        self.shared.lock_state().current_positions.clone()
    }

    pub fn is_in_motion(&self) -> bool {
        !self.shared.buffer.is_empty()
    }

    /// Pending waypoints, not counting the one being executed.
    pub fn queue_length(&self) -> usize {
        self.shared.buffer.len()
    }

    /// Discard all pending waypoints and abort the goal in flight, if any.
    ///
    /// The worker stays alive for later waypoints.
    pub fn stop(&self) {
        let mut state = self.shared.lock_state();
        let (dropped, in_flight) = self.shared.buffer.clear();
        if in_flight {
            state.stop_requested = true;
        }
        if in_flight || dropped > 0 {
            tracing::info!(group = self.shared.group.id, dropped, in_flight, "Motion stop requested");
        }
    }

    /// Signal the worker to exit. Safe to call more than once.
    pub fn shutdown(&self) {
        let first = !self.shutdown_tx.send_replace(true);
        self.shared.buffer.close();
        if first {
            tracing::info!(group = self.shared.group.id, "Motion worker shutdown requested");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Shut down and wait for the worker task to exit.
    pub async fn join(&self) {
        self.shutdown();
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(group = self.shared.group.id, "Motion worker panicked: {}", e);
            }
        }
    }

    /// Every committed position vector, intermediate and final.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<f64>> {
        self.shared.commits.subscribe()
    }
}

impl Drop for MotionSimulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct MotionWorker {
    shared: Arc<Shared>,
    update_period: Duration,
    shutdown_rx: watch::Receiver<bool>,
    last_goal: Waypoint,
}

enum Outcome {
    Committed,
    Stopped,
    Shutdown,
}

impl MotionWorker {
    fn new(shared: Arc<Shared>, update_period: Duration, shutdown_rx: watch::Receiver<bool>) -> Self {
        let last_goal = Waypoint::at_rest(shared.lock_state().current_positions.clone());
        Self { shared, update_period, shutdown_rx, last_goal }
    }

    async fn run(mut self) {
        while let Some(goal) = self.shared.buffer.pop().await {
            match self.execute(goal).await {
                Ok(Outcome::Shutdown) => break,
                Ok(Outcome::Committed) | Ok(Outcome::Stopped) => {}
                Err(e) => {
                    tracing::error!(group = self.shared.group.id, "Motion worker error: {}", e);
                    self.shared.settle(None);
                }
            }
        }
        tracing::info!(group = self.shared.group.id, "Motion worker exiting");
    }

    async fn execute(&mut self, goal: Waypoint) -> Result<Outcome, MotionError> {
        goal.validate(self.shared.group.joints.len())?;

        if goal.time_from_start < self.last_goal.time_from_start {
            tracing::debug!(
                group = self.shared.group.id,
                "Trajectory restart, moving over {:?}",
                goal.time_from_start
            );
            self.last_goal.time_from_start = Duration::ZERO;
        }

        if !self.update_period.is_zero() {
            while let Some(mid) = interpolate_step(&self.last_goal, &goal, self.update_period) {
                if !self.pause(self.update_period).await {
                    return Ok(Outcome::Shutdown);
                }
                if !self.shared.commit_intermediate(&mid.positions) {
                    self.abandon(&goal);
                    return Ok(Outcome::Stopped);
                }
                self.last_goal = mid;
            }
        }

        let remaining = goal
            .time_from_start
            .saturating_sub(self.last_goal.time_from_start);
        if !self.pause(remaining).await {
            return Ok(Outcome::Shutdown);
        }
        if self.shared.settle(Some(&goal.positions)) {
            self.last_goal = goal;
            Ok(Outcome::Committed)
        } else {
            tracing::info!(group = self.shared.group.id, "Stop signal consumed, goal discarded");
            self.abandon(&goal);
            Ok(Outcome::Stopped)
        }
    }

    /// Advance the nominal time to the aborted goal while keeping the
    /// positions actually committed.
    fn abandon(&mut self, goal: &Waypoint) {
        self.last_goal = Waypoint::new(
            self.shared.lock_state().current_positions.clone(),
            goal.time_from_start,
        );
    }

    /// Sleep for `duration`. Returns false if shutdown was signaled first.
    async fn pause(&mut self, duration: Duration) -> bool {
        if *self.shutdown_rx.borrow() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown_rx.wait_for(|stop| *stop) => false,
        }
    }
}

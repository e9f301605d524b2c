// src/feedback.rs - Outbound joint state, feedback and status records
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::controller::RobotController;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Feedback channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JointStateRecord {
    pub timestamp: DateTime<Utc>,
    pub names: Vec<String>,
    pub positions: Vec<f64>,
}

/// Trajectory feedback; only the actual positions are simulated.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FeedbackRecord {
    pub timestamp: DateTime<Utc>,
    pub joint_names: Vec<String>,
    pub actual: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotMode {
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RobotStatus {
    pub mode: RobotMode,
    pub e_stopped: bool,
    pub drives_powered: bool,
    pub motion_possible: bool,
    pub in_motion: bool,
    pub in_error: bool,
    pub error_code: i32,
}

impl RobotStatus {
    /// A healthy controller in auto mode; only `in_motion` varies.
    pub fn simulated(in_motion: bool) -> Self {
        Self {
            mode: RobotMode::Auto,
            e_stopped: false,
            drives_powered: true,
            motion_possible: true,
            in_motion,
            in_error: false,
            error_code: 0,
        }
    }
}

/// Everything published for one namespace on one tick.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NamespaceSnapshot {
    pub namespace: String,
    pub joint_state: JointStateRecord,
    pub feedback: FeedbackRecord,
    pub status: RobotStatus,
}

impl NamespaceSnapshot {
    pub fn new(namespace: &str, names: Vec<String>, positions: Vec<f64>, in_motion: bool) -> Self {
        let timestamp = Utc::now();
        Self {
            namespace: namespace.to_string(),
            feedback: FeedbackRecord {
                timestamp,
                joint_names: names.clone(),
                actual: positions.clone(),
            },
            joint_state: JointStateRecord { timestamp, names, positions },
            status: RobotStatus::simulated(in_motion),
        }
    }
}

/// Sink for periodic snapshots; the transport lives behind this trait.
#[async_trait]
pub trait FeedbackPublisher: Send + Sync {
    async fn publish(&self, snapshot: &NamespaceSnapshot) -> Result<(), PublishError>;
}

/// Forwards snapshots into a tokio channel.
pub struct ChannelPublisher {
    sender: mpsc::Sender<NamespaceSnapshot>,
}

impl ChannelPublisher {
    pub fn new(sender: mpsc::Sender<NamespaceSnapshot>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl FeedbackPublisher for ChannelPublisher {
    async fn publish(&self, snapshot: &NamespaceSnapshot) -> Result<(), PublishError> {
        self.sender
            .send(snapshot.clone())
            .await
            .map_err(|_| PublishError::ChannelClosed)
    }
}

/// Writes one JSON document per line.
pub struct JsonLinesPublisher<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesPublisher<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub async fn write_line<T: Serialize + Sync>(&self, value: &T) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FeedbackPublisher for JsonLinesPublisher<W> {
    async fn publish(&self, snapshot: &NamespaceSnapshot) -> Result<(), PublishError> {
        self.write_line(snapshot).await
    }
}

/// Logs snapshots at debug level instead of emitting them.
pub struct LogPublisher;

#[async_trait]
impl FeedbackPublisher for LogPublisher {
    async fn publish(&self, snapshot: &NamespaceSnapshot) -> Result<(), PublishError> {
        tracing::debug!(
            namespace = %snapshot.namespace,
            in_motion = snapshot.status.in_motion,
            "positions: {:?}",
            snapshot.joint_state.positions
        );
        Ok(())
    }
}

pub const DEFAULT_PUBLISH_RATE: f64 = 10.0;

fn publish_period(rate_hz: f64) -> Duration {
    if rate_hz > 0.0 && rate_hz.is_finite() {
        Duration::from_secs_f64(1.0 / rate_hz)
    } else {
        tracing::warn!(
            "Invalid publish rate {}, using {} Hz",
            rate_hz,
            DEFAULT_PUBLISH_RATE
        );
        Duration::from_secs_f64(1.0 / DEFAULT_PUBLISH_RATE)
    }
}

/// Publish every namespace's snapshot at `rate_hz` until shutdown.
///
/// Publish failures are logged and do not stop the loop.
pub async fn run_publish_loop(
    controller: Arc<RobotController>,
    publisher: Arc<dyn FeedbackPublisher>,
    rate_hz: f64,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(publish_period(rate_hz));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Feedback publisher shutting down");
                break;
            }
            _ = interval.tick() => {
                for snapshot in controller.snapshots() {
                    if let Err(e) = publisher.publish(&snapshot).await {
                        tracing::error!(namespace = %snapshot.namespace, "Feedback publish error: {}", e);
                    }
                }
            }
        }
    }
}

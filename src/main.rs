// src/main.rs - Simulator entry point with a JSON-lines transport on stdin/stdout
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader, Stdout};
use tokio::sync::mpsc;

use robosim_rs::config::{self, Config, ConfigError};
use robosim_rs::controller::{RobotController, TrajectoryCommand};
use robosim_rs::feedback::{run_publish_loop, FeedbackPublisher, JsonLinesPublisher, LogPublisher};

#[derive(Debug, Parser)]
#[command(name = "robosim", version, about = "Multi-group industrial robot motion simulator")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(default_value = "robosim.toml")]
    config: String,

    /// Maximum log level written to stderr
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,

    /// Where periodic feedback goes
    #[arg(long, value_enum, default_value_t = FeedbackSink::Stdout)]
    feedback: FeedbackSink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FeedbackSink {
    /// JSON lines on stdout
    Stdout,
    /// Debug-level log records on stderr
    Log,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Request {
    RobotInfo,
}

/// One line of input: either a query or a trajectory for a namespace.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Inbound {
    Query {
        request: Request,
    },
    Trajectory {
        #[serde(default)]
        ns: String,
        #[serde(flatten)]
        command: TrajectoryCommand,
    },
}

/// Parse stdin lines and forward them to the command task until input ends.
async fn read_commands(command_tx: mpsc::Sender<Inbound>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Inbound>(line) {
                    Ok(inbound) => {
                        if command_tx.send(inbound).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!("Ignoring malformed input line: {}", e),
                }
            }
            Ok(None) => {
                tracing::info!("Input closed, running until interrupted");
                break;
            }
            Err(e) => {
                tracing::error!("Failed to read input: {}", e);
                break;
            }
        }
    }
}

/// Apply inbound requests in arrival order. May wait on a full motion buffer.
async fn run_commands(
    controller: Arc<RobotController>,
    output: Arc<JsonLinesPublisher<Stdout>>,
    mut command_rx: mpsc::Receiver<Inbound>,
) {
    while let Some(inbound) = command_rx.recv().await {
        match inbound {
            Inbound::Query { request: Request::RobotInfo } => {
                if let Err(e) = output.write_line(controller.robot_info()).await {
                    tracing::error!("Failed to write robot info: {}", e);
                }
            }
            Inbound::Trajectory { ns, command } => {
                let report = controller.handle_trajectory(&ns, &command).await;
                if report.is_unrouted() {
                    tracing::warn!(namespace = %ns, "Trajectory was not routed to any group");
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    // Initialize logging; stdout carries the feedback stream
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting robot motion simulator");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", args.config);

    let config = match config::load_config(&args.config) {
        Ok(config) => config,
        Err(ConfigError::Io(e)) => {
            tracing::warn!("Cannot read '{}' ({}), using default configuration", args.config, e);
            Config::default()
        }
        Err(e) => {
            tracing::error!("Please ensure the simulator configuration is properly formatted");
            return Err(e.into());
        }
    };

    let controller = Arc::new(RobotController::new(&config)?);
    for group in controller.registry().groups() {
        tracing::info!(
            "Joint group {} in namespace '{}': {:?}",
            group.id,
            group.namespace,
            group.joints
        );
    }

    let output = Arc::new(JsonLinesPublisher::new(tokio::io::stdout()));
    let sink: Arc<dyn FeedbackPublisher> = match args.feedback {
        FeedbackSink::Stdout => output.clone(),
        FeedbackSink::Log => Arc::new(LogPublisher),
    };
    let publisher = tokio::spawn(run_publish_loop(
        controller.clone(),
        sink,
        config.controller.publish_rate,
        controller.subscribe_shutdown(),
    ));

    let (command_tx, command_rx) = mpsc::channel::<Inbound>(16);
    let commands = tokio::spawn(run_commands(controller.clone(), output, command_rx));
    let reader = tokio::spawn(read_commands(command_tx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for interrupt: {}", e);
    } else {
        tracing::info!("Interrupt received");
    }

    // Closing the motion buffers releases a command blocked on a full buffer.
    controller.shutdown().await;
    reader.abort();
    if let Err(e) = commands.await {
        tracing::error!("Command task failed: {}", e);
    }
    if let Err(e) = publisher.await {
        tracing::error!("Feedback publisher task failed: {}", e);
    }
    Ok(())
}

// src/motion/mod.rs - Buffered per-group motion simulation

pub mod buffer;
pub mod simulator;
pub mod trajectory;

pub use buffer::MotionBuffer;
pub use simulator::{MotionSettings, MotionSimulator};
pub use trajectory::{MotionError, Waypoint};

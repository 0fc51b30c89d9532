//! # Core Module
//!
//! Clock abstraction, configuration, and retry policy shared by every feature.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false

pub mod clock;
pub mod config;
pub mod retry;

// Re-export commonly used items
pub use clock::{Clock, FireFn, ManualClock, Timer, TimerPhase, TokioClock};
pub use config::Config;
pub use retry::RetryPolicy;

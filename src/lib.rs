//! mover-link - Host-side command bridge for the OpenMover platform controller
//!
//! The controller speaks newline-terminated JSON over a serial line (or a
//! serial-over-network bridge). This crate frames that byte stream, pairs
//! each command with the next reply, and builds two workflows on top:
//! uploading a waypoint mission parsed from a KML track, and cancellable
//! polling (status, magnetometer logging) that flushes its samples on stop.
//!
//! ## Layers
//!
//! - [`transport`]: serial, raw TCP, telnet and mock byte pipes
//! - [`protocol`]: commands, replies and the tolerant line decoder
//! - [`link`]: one-at-a-time exchanges over a shared transport
//! - [`waypoint`] / [`track`]: mission payload encoding and KML parsing
//! - [`poll`] / [`storage`]: repeating exchanges and sample persistence
//! - [`platform`]: typed operations for each controller intent

pub mod config;
pub mod error;
pub mod link;
pub mod platform;
pub mod poll;
pub mod protocol;
pub mod storage;
pub mod track;
pub mod transport;
pub mod waypoint;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use link::Link;
pub use platform::Platform;
pub use poll::{PollOptions, PollReport, PollSession, PollState};
pub use protocol::{Command, Intent, Response};
pub use storage::{JsonFileSink, MemorySink, SampleSink};
pub use waypoint::{Waypoint, WaypointSet};

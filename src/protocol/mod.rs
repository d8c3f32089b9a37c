//! OpenMover wire protocol
//!
//! Every message is one JSON object terminated by `\n`:
//!
//! ```text
//! host -> controller   {"intent":4,"leftPWM":120,"rightPWM":-80}\n
//! controller -> host   {"batteryVoltage":12.4,"fix":true,...}\n
//! ```
//!
//! Commands carry an integer `intent`; responses carry whatever fields the
//! intent produces. There is no request ID, so a response is paired with a
//! command only by arriving next.

pub mod command;
pub mod decoder;
pub mod response;

pub use command::{Command, Intent};
pub use decoder::{LineReader, decode_line};
pub use response::{MagSample, Response, StatusSnapshot, StoredCoordinates};

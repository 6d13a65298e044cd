//! ME-series ECU serial protocol
//!
//! Implements the length-prefixed, Fletcher-16-checksummed binary framing
//! used by ME-series ECUs, with request/response correlation and the
//! realtime telemetry sub-protocol. The same engine runs over a serial
//! port, a TCP socket, or any other duplex byte stream.

pub mod codec;
pub mod command;
mod error;
pub mod frame;
mod interaction;
mod session;
pub mod transport;

pub use error::ProtocolError;
pub use frame::{fletcher16, FrameCodec, Message, MAX_CONTENT_SIZE, SYNC};
pub use interaction::{CommandTimeouts, EcuClient, RealtimeStream};
pub use session::{ConnectionState, Session};
pub use transport::{open, open_serial, open_tcp, ByteStream};

use std::time::Duration;

/// Default baud rate for ECU communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Cadence of the realtime keep-alive push while streaming
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Pause after disabling realtime reporting, before the session is reused
pub const DISABLE_SETTLE_DELAY: Duration = Duration::from_millis(100);

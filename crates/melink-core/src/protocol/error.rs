//! Protocol errors

use thiserror::Error;

/// Errors that can occur during protocol communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No response arrived before the command deadline
    #[error("Operation timed out")]
    Timeout,

    /// A request with the same correlation key is already outstanding
    #[error("Command 0x{class:02X}/0x{command:02X} is already in flight")]
    InFlight {
        /// Message class of the conflicting command
        class: u8,
        /// Command of the conflicting command
        command: u8,
    },

    /// The device answered a mutating command with a non-success status
    #[error("Device rejected {operation} for object {id}")]
    Rejected {
        /// The operation the device refused
        operation: &'static str,
        /// Object id the operation targeted
        id: u16,
    },

    /// The session closed while the request was outstanding
    #[error("Connection closed")]
    ConnectionClosed,

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The session is not connected
    #[error("Not connected to ECU")]
    NotConnected,

    /// The endpoint name is not a serial path or a `host:port` address
    #[error("Invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// Message content exceeds the frame ceiling
    #[error("Frame too large: {size} bytes of message content")]
    FrameTooLarge {
        /// Size of the offending message content
        size: usize,
    },

    /// Underlying transport failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

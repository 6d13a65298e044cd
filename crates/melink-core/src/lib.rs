//! # MELink Core Library
//!
//! Device communication engine for ME-series engine control units.

#![warn(missing_docs)]

//!
//! This library provides:
//! - The length-prefixed, Fletcher-16-checksummed wire framing
//! - Binary (de)serialization of ECU objects (info, tables, drivers,
//!   reporting maps, realtime telemetry)
//! - A transport session with request/response correlation over serial
//!   or TCP byte streams
//! - The command-level client API, including realtime streaming with
//!   keep-alive
//! - A protocol-compatible device simulator for benchless development
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use melink_core::definitions::DefinitionStore;
//! use melink_core::protocol::{EcuClient, DEFAULT_BAUD_RATE};
//!
//! let defs = Arc::new(DefinitionStore::demo());
//! let client = EcuClient::connect("/dev/ttyUSB0", DEFAULT_BAUD_RATE, defs).await?;
//! let info = client.get_info().await?;
//! println!("connected to {:?}", info.map(|i| i.product_name));
//! ```

pub mod definitions;
pub mod model;
pub mod protocol;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::definitions::{DefinitionLookup, DefinitionStore};
    pub use crate::model::{
        DataType, DriverData, EcuInfo, EcuObjectDefinition, EcuObjectKind, RealtimeDataPoint,
        ReportingEntry, TableData,
    };
    pub use crate::protocol::{
        CommandTimeouts, ConnectionState, EcuClient, Message, ProtocolError, RealtimeStream,
        Session, DEFAULT_BAUD_RATE,
    };
    pub use crate::sim::Simulator;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

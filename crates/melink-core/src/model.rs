//! ECU domain objects
//!
//! Value types exchanged with the device: identity info, configuration
//! tables, driver blocks, catalog entries, and realtime telemetry points.

use serde::{Deserialize, Serialize};

/// Device identity record, reported by the get-info command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcuInfo {
    /// Product family name
    pub product_name: String,
    /// Model/variant name
    pub model_name: String,
    /// Definition catalog version the firmware was built against
    pub def_version: String,
    /// Firmware version string
    pub firmware_version: String,
    /// Unique unit identifier
    pub uuid: String,
    /// Firmware/configuration hash
    pub hash: String,
}

/// Kind of object exposed by the ECU's catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EcuObjectKind {
    /// Lookup table, read/written as a whole unit
    Table,
    /// Parametrized algorithm block
    Driver,
    /// Telemetry channel
    DataLink,
}

impl EcuObjectKind {
    /// Label used for the `"<Kind>_<Id>"` naming fallback
    pub fn label(&self) -> &'static str {
        match self {
            EcuObjectKind::Table => "Table",
            EcuObjectKind::Driver => "Driver",
            EcuObjectKind::DataLink => "DataLink",
        }
    }
}

/// Catalog entry describing one device-exposed object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcuObjectDefinition {
    /// Object id on the wire
    pub id: u16,
    /// Human-readable name
    pub name: String,
    /// Grouping category (for presentation layers)
    pub category: String,
    /// Object kind
    pub kind: EcuObjectKind,
}

/// A lookup table read from (or written to) the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    /// Object id
    pub id: u16,
    /// Human-readable name from the catalog, or the naming fallback
    pub name: String,
    /// Device-defined table type code
    pub table_type: u8,
    /// Whether the table is active
    pub enabled: bool,
    /// Row count; 1 for a 1-D table
    pub rows: u8,
    /// Column count
    pub cols: u8,
    /// X axis breakpoints, `cols` entries
    pub x_axis: Vec<f32>,
    /// Y axis breakpoints, `rows` entries; empty when `rows <= 1`
    pub y_axis: Vec<f32>,
    /// Output values, `rows * cols` entries in row-major order
    pub output: Vec<f32>,
}

/// A driver block read from (or written to) the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverData {
    /// Object id
    pub id: u16,
    /// Human-readable name from the catalog, or the naming fallback
    pub name: String,
    /// Configuration parameters (at most 255)
    pub config_params: Vec<f32>,
    /// Input datalink ids (at most 255)
    pub input_link_ids: Vec<u16>,
    /// Output datalink ids (at most 255)
    pub output_link_ids: Vec<u16>,
}

/// Wire encoding of one realtime item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// IEEE-754 single precision, 4 bytes
    Float32,
    /// Signed 16-bit, 2 bytes
    Int16,
    /// Unsigned 16-bit, 2 bytes
    Uint16,
    /// Signed 8-bit, 1 byte
    Int8,
    /// Unsigned 8-bit, 1 byte
    Uint8,
    /// Boolean encoded as one byte
    Bool,
}

impl DataType {
    /// Decode a wire type code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(DataType::Float32),
            0x01 => Some(DataType::Int16),
            0x02 => Some(DataType::Uint16),
            0x03 => Some(DataType::Int8),
            0x04 => Some(DataType::Uint8),
            0x05 => Some(DataType::Bool),
            _ => None,
        }
    }

    /// Wire type code
    pub fn code(&self) -> u8 {
        match self {
            DataType::Float32 => 0x00,
            DataType::Int16 => 0x01,
            DataType::Uint16 => 0x02,
            DataType::Int8 => 0x03,
            DataType::Uint8 => 0x04,
            DataType::Bool => 0x05,
        }
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        match self {
            DataType::Float32 => 4,
            DataType::Int16 | DataType::Uint16 => 2,
            DataType::Int8 | DataType::Uint8 | DataType::Bool => 1,
        }
    }
}

/// One entry of the reporting map: the device's declared order and
/// encoding of realtime items for a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingEntry {
    /// Datalink id
    pub id: u16,
    /// Wire encoding of this item
    pub data_type: DataType,
}

/// Current value of one telemetry channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeDataPoint {
    /// Datalink id
    pub id: u16,
    /// Human-readable name from the catalog, or the naming fallback
    pub name: String,
    /// Current value
    pub value: f32,
}

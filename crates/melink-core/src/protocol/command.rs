//! Command-table constants
//!
//! One logical command is the `(class, command)` pair carried in every
//! frame. The same table drives both sides: the client builds requests
//! from it and the simulator dispatches on it. Useful alongside
//! [`Message`] for ad hoc command construction.
//!
//! [`Message`]: super::Message

/// Realtime telemetry class (streaming control, data pushes, keep-alive)
pub const CLASS_REALTIME: u8 = 0x00;

/// Table class (get/set/store lookup tables)
pub const CLASS_TABLE: u8 = 0x01;

/// Driver class (get/set/store driver blocks)
pub const CLASS_DRIVER: u8 = 0x02;

/// Device class (identity info, object list)
pub const CLASS_DEVICE: u8 = 0x04;

/// Realtime class: unsolicited data frame pushed by the device
pub const CMD_REALTIME_DATA: u8 = 0x00;

/// Realtime class: fire-and-forget keep-alive acknowledgement
pub const CMD_KEEPALIVE: u8 = 0x01;

/// Realtime class: enable/disable reporting (payload `[1]` / `[0]`)
pub const CMD_REPORTING_STATE: u8 = 0x02;

/// Table/driver classes: replace the object on the device
pub const CMD_SET: u8 = 0x00;

/// Table/driver classes: read the object from the device
pub const CMD_GET: u8 = 0x01;

/// Table class: persist the table to flash
pub const CMD_STORE_TABLE: u8 = 0x06;

/// Driver class: persist the driver to flash
pub const CMD_STORE_DRIVER: u8 = 0x02;

/// Device class: identity info
pub const CMD_GET_INFO: u8 = 0x00;

/// Device class: list of device-held object ids
pub const CMD_GET_OBJECT_LIST: u8 = 0x01;

/// Success status byte leading most response payloads
pub const STATUS_OK: u8 = 0x00;

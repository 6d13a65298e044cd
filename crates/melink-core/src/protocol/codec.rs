//! ECU object payload codec
//!
//! Pure (de)serialization between command payloads and domain objects.
//! No I/O happens here. Parsers never panic on malformed input: a payload
//! that is too short or inconsistent yields `None` (or an empty list),
//! and the caller sees an absent object rather than an error.
//!
//! Multi-byte fields are little-endian throughout.

use byteorder::{ByteOrder, LittleEndian};

use crate::definitions::DefinitionLookup;
use crate::model::{
    DataType, DriverData, EcuInfo, EcuObjectDefinition, EcuObjectKind, RealtimeDataPoint,
    ReportingEntry, TableData,
};

/// Bounds-checked cursor over a payload slice
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16(&mut self) -> Option<u16> {
        let bytes = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(LittleEndian::read_u16(bytes))
    }

    fn f32(&mut self) -> Option<f32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(LittleEndian::read_f32(bytes))
    }
}

fn object_name(defs: Option<&dyn DefinitionLookup>, id: u16, kind: EcuObjectKind) -> String {
    defs.and_then(|d| d.lookup(id))
        .map(|def| def.name)
        .unwrap_or_else(|| format!("{}_{}", kind.label(), id))
}

/// Parse the get-info response: one status byte, then six NUL-joined
/// ASCII fields
pub fn parse_ecu_info(payload: &[u8]) -> Option<EcuInfo> {
    if payload.len() < 2 {
        return None;
    }
    let text = std::str::from_utf8(&payload[1..]).ok()?;
    let mut parts = text.split('\0');
    Some(EcuInfo {
        product_name: parts.next()?.to_string(),
        model_name: parts.next()?.to_string(),
        def_version: parts.next()?.to_string(),
        firmware_version: parts.next()?.to_string(),
        uuid: parts.next()?.to_string(),
        hash: parts.next()?.to_string(),
    })
}

/// Parse the object-list response: a 4-byte header (status + reserved),
/// an entry count, then `count` entries of id plus two reserved bytes.
/// Ids without a catalog entry are silently omitted.
pub fn parse_object_list(
    payload: &[u8],
    defs: &dyn DefinitionLookup,
) -> Vec<EcuObjectDefinition> {
    let mut out = Vec::new();
    let mut r = Reader::new(payload);
    for _ in 0..4 {
        if r.u8().is_none() {
            return out;
        }
    }
    let count = match r.u16() {
        Some(c) => c,
        None => return out,
    };
    for _ in 0..count {
        let id = match r.u16() {
            Some(id) => id,
            None => break,
        };
        if r.u16().is_none() {
            break;
        }
        if let Some(def) = defs.lookup(id) {
            out.push(def);
        }
    }
    out
}

/// Parse the enable/disable-reporting response into the reporting map.
/// A malformed or short payload yields an empty map, not an error.
pub fn parse_reporting_map(payload: &[u8]) -> Vec<ReportingEntry> {
    let mut r = Reader::new(payload);
    match r.u8() {
        Some(0) => {}
        _ => return Vec::new(),
    }
    let count = match r.u16() {
        Some(c) => c as usize,
        None => return Vec::new(),
    };
    if payload.len() < 3 + count * 3 {
        return Vec::new();
    }
    let mut map = Vec::with_capacity(count);
    for _ in 0..count {
        let id = match r.u16() {
            Some(id) => id,
            None => return Vec::new(),
        };
        let data_type = match r.u8().and_then(DataType::from_code) {
            Some(t) => t,
            None => return Vec::new(),
        };
        map.push(ReportingEntry { id, data_type });
    }
    map
}

/// Decode one realtime frame by walking the reporting map in its
/// original order. Stops early, returning partial results, if the
/// payload runs out of bytes.
pub fn parse_realtime_data(
    payload: &[u8],
    reporting_map: &[ReportingEntry],
    defs: Option<&dyn DefinitionLookup>,
) -> Vec<RealtimeDataPoint> {
    let mut points = Vec::new();
    let mut r = Reader::new(payload);
    match r.u8() {
        Some(0) => {}
        _ => return points,
    }
    for entry in reporting_map {
        let value = match entry.data_type {
            DataType::Float32 => match r.f32() {
                Some(v) => v,
                None => break,
            },
            DataType::Int16 => match r.u16() {
                Some(v) => v as i16 as f32,
                None => break,
            },
            DataType::Uint16 => match r.u16() {
                Some(v) => v as f32,
                None => break,
            },
            DataType::Int8 => match r.u8() {
                Some(v) => v as i8 as f32,
                None => break,
            },
            DataType::Uint8 | DataType::Bool => match r.u8() {
                Some(v) => v as f32,
                None => break,
            },
        };
        points.push(RealtimeDataPoint {
            id: entry.id,
            name: object_name(defs, entry.id, EcuObjectKind::DataLink),
            value,
        });
    }
    points
}

fn parse_table_body(
    r: &mut Reader<'_>,
    id: u16,
    defs: Option<&dyn DefinitionLookup>,
) -> Option<TableData> {
    let table_type = r.u8()?;
    let enabled = r.u8()? == 1;
    let rows = r.u8()?;
    let cols = r.u8()?;

    let mut y_axis = Vec::new();
    if rows > 1 {
        for _ in 0..rows {
            y_axis.push(r.f32()?);
        }
    }

    let mut x_axis = Vec::with_capacity(cols as usize);
    for _ in 0..cols {
        x_axis.push(r.f32()?);
    }

    let cells = rows as usize * cols as usize;
    let mut output = Vec::with_capacity(cells);
    for _ in 0..cells {
        output.push(r.f32()?);
    }

    Some(TableData {
        id,
        name: object_name(defs, id, EcuObjectKind::Table),
        table_type,
        enabled,
        rows,
        cols,
        x_axis,
        y_axis,
        output,
    })
}

/// Parse a set-table payload (or the body of a get-table response):
/// id, serialized size, then the serialized table
pub fn parse_set_table_payload(
    payload: &[u8],
    defs: Option<&dyn DefinitionLookup>,
) -> Option<TableData> {
    let mut r = Reader::new(payload);
    let id = r.u16()?;
    let size = r.u16()? as usize;
    if payload.len() < 4 + size {
        return None;
    }
    parse_table_body(&mut r, id, defs)
}

/// Parse a get-table response: one status byte (must be 0) followed by a
/// set-table payload
pub fn parse_table_response(
    payload: &[u8],
    defs: Option<&dyn DefinitionLookup>,
) -> Option<TableData> {
    match payload.first() {
        Some(0) => parse_set_table_payload(&payload[1..], defs),
        _ => None,
    }
}

fn serialize_table(table: &TableData) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + 4 * (table.y_axis.len() + table.x_axis.len() + table.output.len()));
    body.push(table.table_type);
    body.push(table.enabled as u8);
    body.push(table.rows);
    body.push(table.cols);
    if table.rows > 1 {
        for v in &table.y_axis {
            body.extend_from_slice(&v.to_le_bytes());
        }
    }
    for v in &table.x_axis {
        body.extend_from_slice(&v.to_le_bytes());
    }
    for v in &table.output {
        body.extend_from_slice(&v.to_le_bytes());
    }
    body
}

/// Build a set-table payload: id, serialized size, serialized table
pub fn build_set_table_payload(table: &TableData) -> Vec<u8> {
    let body = serialize_table(table);
    let mut payload = Vec::with_capacity(4 + body.len());
    payload.extend_from_slice(&table.id.to_le_bytes());
    payload.extend_from_slice(&(body.len() as u16).to_le_bytes());
    payload.extend_from_slice(&body);
    payload
}

/// Parse a set-driver payload (or the body of a get-driver response)
pub fn parse_set_driver_payload(
    payload: &[u8],
    defs: Option<&dyn DefinitionLookup>,
) -> Option<DriverData> {
    let mut r = Reader::new(payload);
    let id = r.u16()?;
    let size = r.u16()? as usize;
    if payload.len() < 4 + size {
        return None;
    }

    let num_configs = r.u8()?;
    let num_outputs = r.u8()?;
    let num_inputs = r.u8()?;

    let mut config_params = Vec::with_capacity(num_configs as usize);
    for _ in 0..num_configs {
        config_params.push(r.f32()?);
    }
    let mut output_link_ids = Vec::with_capacity(num_outputs as usize);
    for _ in 0..num_outputs {
        output_link_ids.push(r.u16()?);
    }
    let mut input_link_ids = Vec::with_capacity(num_inputs as usize);
    for _ in 0..num_inputs {
        input_link_ids.push(r.u16()?);
    }

    Some(DriverData {
        id,
        name: object_name(defs, id, EcuObjectKind::Driver),
        config_params,
        input_link_ids,
        output_link_ids,
    })
}

/// Parse a get-driver response: one status byte (must be 0) followed by
/// a set-driver payload
pub fn parse_driver_response(
    payload: &[u8],
    defs: Option<&dyn DefinitionLookup>,
) -> Option<DriverData> {
    match payload.first() {
        Some(0) => parse_set_driver_payload(&payload[1..], defs),
        _ => None,
    }
}

/// Build a set-driver payload: id, serialized size, then counts followed
/// by config params, output ids, input ids
pub fn build_set_driver_payload(driver: &DriverData) -> Vec<u8> {
    let mut body = Vec::with_capacity(
        3 + 4 * driver.config_params.len()
            + 2 * (driver.output_link_ids.len() + driver.input_link_ids.len()),
    );
    body.push(driver.config_params.len() as u8);
    body.push(driver.output_link_ids.len() as u8);
    body.push(driver.input_link_ids.len() as u8);
    for v in &driver.config_params {
        body.extend_from_slice(&v.to_le_bytes());
    }
    for v in &driver.output_link_ids {
        body.extend_from_slice(&v.to_le_bytes());
    }
    for v in &driver.input_link_ids {
        body.extend_from_slice(&v.to_le_bytes());
    }

    let mut payload = Vec::with_capacity(4 + body.len());
    payload.extend_from_slice(&driver.id.to_le_bytes());
    payload.extend_from_slice(&(body.len() as u16).to_le_bytes());
    payload.extend_from_slice(&body);
    payload
}

// --- device-side response builders ------------------------------------
//
// These produce the payloads a real device answers with. The simulator
// is their primary consumer; tests use them to fabricate responses.

/// Build a get-info response payload: success status, then the six
/// fields NUL-joined with a trailing NUL
pub fn build_info_response(info: &EcuInfo) -> Vec<u8> {
    let mut payload = vec![0x00];
    for field in [
        &info.product_name,
        &info.model_name,
        &info.def_version,
        &info.firmware_version,
        &info.uuid,
        &info.hash,
    ] {
        payload.extend_from_slice(field.as_bytes());
        payload.push(0);
    }
    payload
}

/// Build an object-list response payload
pub fn build_object_list_response(objects: &[EcuObjectDefinition]) -> Vec<u8> {
    let mut payload = vec![0x00, 0x00, 0x00, 0x00];
    payload.extend_from_slice(&(objects.len() as u16).to_le_bytes());
    for object in objects {
        payload.extend_from_slice(&object.id.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
    }
    payload
}

/// Build an enable/disable-reporting response payload carrying the
/// reporting map
pub fn build_reporting_map_response(map: &[ReportingEntry]) -> Vec<u8> {
    let mut payload = vec![0x00];
    payload.extend_from_slice(&(map.len() as u16).to_le_bytes());
    for entry in map {
        payload.extend_from_slice(&entry.id.to_le_bytes());
        payload.push(entry.data_type.code());
    }
    payload
}

/// Build a get-table response payload: success status plus the
/// set-table form of the table
pub fn build_table_response(table: &TableData) -> Vec<u8> {
    let mut payload = vec![0x00];
    payload.extend_from_slice(&build_set_table_payload(table));
    payload
}

/// Build a get-driver response payload
pub fn build_driver_response(driver: &DriverData) -> Vec<u8> {
    let mut payload = vec![0x00];
    payload.extend_from_slice(&build_set_driver_payload(driver));
    payload
}

/// Build a realtime frame payload: success status, then one value per
/// reporting-map entry, encoded per the entry's type, in map order.
/// Entries with no matching data point are skipped.
pub fn build_realtime_payload(
    map: &[ReportingEntry],
    points: &[RealtimeDataPoint],
) -> Vec<u8> {
    let mut payload = vec![0x00];
    for entry in map {
        let Some(point) = points.iter().find(|p| p.id == entry.id) else {
            continue;
        };
        match entry.data_type {
            DataType::Float32 => payload.extend_from_slice(&point.value.to_le_bytes()),
            DataType::Int16 => payload.extend_from_slice(&(point.value as i16).to_le_bytes()),
            DataType::Uint16 => payload.extend_from_slice(&(point.value as u16).to_le_bytes()),
            DataType::Int8 => payload.push(point.value as i8 as u8),
            DataType::Uint8 => payload.push(point.value as u8),
            DataType::Bool => payload.push((point.value != 0.0) as u8),
        }
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::DefinitionStore;
    use pretty_assertions::assert_eq;

    fn sample_table(rows: u8, cols: u8) -> TableData {
        let cells = rows as usize * cols as usize;
        TableData {
            id: 42,
            name: "Table_42".to_string(),
            table_type: 3,
            enabled: true,
            rows,
            cols,
            x_axis: (0..cols).map(|i| i as f32 * 500.0).collect(),
            y_axis: if rows > 1 {
                (0..rows).map(|i| i as f32 * 10.0).collect()
            } else {
                Vec::new()
            },
            output: (0..cells).map(|i| i as f32 * 1.5).collect(),
        }
    }

    #[test]
    fn table_round_trip_one_dimensional() {
        let table = sample_table(1, 16);
        let parsed = parse_set_table_payload(&build_set_table_payload(&table), None)
            .expect("round trip parses");
        assert_eq!(parsed, table);
    }

    #[test]
    fn table_round_trip_two_dimensional() {
        let table = sample_table(8, 8);
        let parsed = parse_set_table_payload(&build_set_table_payload(&table), None)
            .expect("round trip parses");
        assert_eq!(parsed, table);
    }

    #[test]
    fn table_response_requires_success_status() {
        let table = sample_table(1, 4);
        let mut payload = build_table_response(&table);
        assert!(parse_table_response(&payload, None).is_some());
        payload[0] = 0x01;
        assert!(parse_table_response(&payload, None).is_none());
    }

    #[test]
    fn truncated_table_payload_yields_none() {
        let table = sample_table(4, 4);
        let payload = build_set_table_payload(&table);
        assert!(parse_set_table_payload(&payload[..payload.len() - 1], None).is_none());
        assert!(parse_set_table_payload(&payload[..3], None).is_none());
    }

    #[test]
    fn driver_round_trip() {
        let driver = DriverData {
            id: 20,
            name: "Driver_20".to_string(),
            config_params: vec![0.0, 1.5, 3.0, 4.5],
            input_link_ids: vec![1, 2, 3],
            output_link_ids: vec![10, 11],
        };
        let parsed = parse_set_driver_payload(&build_set_driver_payload(&driver), None)
            .expect("round trip parses");
        assert_eq!(parsed, driver);
    }

    #[test]
    fn driver_name_resolved_from_catalog() {
        let store = DefinitionStore::demo();
        let driver = DriverData {
            id: 20,
            name: String::new(),
            config_params: vec![],
            input_link_ids: vec![],
            output_link_ids: vec![],
        };
        let parsed = parse_driver_response(&build_driver_response(&driver), Some(&store))
            .expect("parses");
        assert_eq!(parsed.name, "Fuel Driver");
    }

    #[test]
    fn ecu_info_round_trip() {
        let info = EcuInfo {
            product_name: "ME-SIM".to_string(),
            model_name: "PnP".to_string(),
            def_version: "SIM-1.0".to_string(),
            firmware_version: "SIM-FW-1.0".to_string(),
            uuid: "0000-0000".to_string(),
            hash: "abcd".to_string(),
        };
        let parsed = parse_ecu_info(&build_info_response(&info)).expect("parses");
        assert_eq!(parsed, info);
    }

    #[test]
    fn ecu_info_with_missing_fields_yields_none() {
        assert!(parse_ecu_info(&[]).is_none());
        assert!(parse_ecu_info(&[0x00]).is_none());
        // Only three fields present
        assert!(parse_ecu_info(b"\x00one\0two\0three").is_none());
    }

    #[test]
    fn object_list_omits_unknown_ids() {
        let store = DefinitionStore::demo();
        let known = store.lookup(1).expect("table 1 in demo catalog");
        let unknown = EcuObjectDefinition {
            id: 9999,
            name: "ghost".to_string(),
            category: String::new(),
            kind: EcuObjectKind::Table,
        };
        let payload = build_object_list_response(&[known.clone(), unknown]);
        let parsed = parse_object_list(&payload, &store);
        assert_eq!(parsed, vec![known]);
    }

    #[test]
    fn reporting_map_round_trip() {
        let map = vec![
            ReportingEntry { id: 10, data_type: DataType::Float32 },
            ReportingEntry { id: 11, data_type: DataType::Int16 },
        ];
        assert_eq!(parse_reporting_map(&build_reporting_map_response(&map)), map);
    }

    #[test]
    fn malformed_reporting_map_yields_empty() {
        assert!(parse_reporting_map(&[]).is_empty());
        // Non-zero status
        assert!(parse_reporting_map(&[0x01, 0x01, 0x00, 10, 0, 0]).is_empty());
        // Declared count exceeds the payload
        assert!(parse_reporting_map(&[0x00, 0x05, 0x00, 10, 0, 0]).is_empty());
    }

    #[test]
    fn realtime_decode_preserves_map_order() {
        let map = [
            ReportingEntry { id: 10, data_type: DataType::Float32 },
            ReportingEntry { id: 11, data_type: DataType::Int16 },
        ];
        let payload = [0x00, 0x00, 0x00, 0x80, 0x3F, 0x05, 0x00];
        let points = parse_realtime_data(&payload, &map, None);
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].id, 10);
        assert_eq!(points[0].value, 1.0);
        assert_eq!(points[0].name, "DataLink_10");
        assert_eq!(points[1].id, 11);
        assert_eq!(points[1].value, 5.0);
    }

    #[test]
    fn realtime_decode_stops_on_truncation() {
        let map = [
            ReportingEntry { id: 10, data_type: DataType::Float32 },
            ReportingEntry { id: 11, data_type: DataType::Int16 },
        ];
        // Only the float fits
        let payload = [0x00, 0x00, 0x00, 0x80, 0x3F, 0x05];
        let points = parse_realtime_data(&payload, &map, None);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].id, 10);
    }

    #[test]
    fn realtime_payload_encodes_negative_and_bool_values() {
        let map = [
            ReportingEntry { id: 1, data_type: DataType::Int8 },
            ReportingEntry { id: 2, data_type: DataType::Bool },
        ];
        let points = [
            RealtimeDataPoint { id: 1, name: String::new(), value: -4.0 },
            RealtimeDataPoint { id: 2, name: String::new(), value: 17.0 },
        ];
        let payload = build_realtime_payload(&map, &points);
        assert_eq!(payload, vec![0x00, 0xFC, 0x01]);

        let decoded = parse_realtime_data(&payload, &map, None);
        assert_eq!(decoded[0].value, -4.0);
        assert_eq!(decoded[1].value, 1.0);
    }
}

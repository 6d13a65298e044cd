//! Device simulator
//!
//! A server-side peer speaking the same wire format as a real ECU. It
//! holds synthetic device state (tables, drivers, telemetry generators)
//! and serves the full command table, so the client stack can be
//! exercised end-to-end with no hardware on the bench.
//!
//! Telemetry is synthetic but engine-shaped: the RPM channel follows a
//! slow idle waveform, every other channel follows a phase-offset sine
//! with per-channel amplitude, and all values carry a little jitter.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::definitions::DefinitionStore;
use crate::model::{
    DataType, DriverData, EcuInfo, EcuObjectKind, RealtimeDataPoint, ReportingEntry, TableData,
};
use crate::protocol::codec;
use crate::protocol::command::{
    CLASS_DEVICE, CLASS_DRIVER, CLASS_REALTIME, CLASS_TABLE, CMD_GET, CMD_GET_INFO,
    CMD_GET_OBJECT_LIST, CMD_KEEPALIVE, CMD_REALTIME_DATA, CMD_REPORTING_STATE, CMD_SET,
    CMD_STORE_DRIVER, CMD_STORE_TABLE, STATUS_OK,
};
use crate::protocol::frame::{FrameCodec, Message, MSG_RESPONSE};
use crate::protocol::ByteStream;

/// Cadence of the simulator's realtime pushes while reporting is enabled
pub const PUSH_INTERVAL: Duration = Duration::from_millis(50);

const STATUS_UNKNOWN: u8 = 0x01;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct SimState {
    catalog: DefinitionStore,
    info: EcuInfo,
    tables: HashMap<u16, TableData>,
    drivers: HashMap<u16, DriverData>,
    reporting_map: Vec<ReportingEntry>,
    points: Vec<RealtimeDataPoint>,
    phase: f32,
    rng: StdRng,
}

impl SimState {
    fn seed(catalog: DefinitionStore) -> Self {
        let info = EcuInfo {
            product_name: "ME-SIM".to_string(),
            model_name: "PnP".to_string(),
            def_version: "SIM-1.0".to_string(),
            firmware_version: "SIM-FW-1.0".to_string(),
            uuid: Uuid::new_v4().to_string(),
            hash: "0badc0de".to_string(),
        };

        let mut tables = HashMap::new();
        for def in catalog.objects_of_kind(EcuObjectKind::Table) {
            tables.insert(def.id, seed_table(&def.name, def.id));
        }

        let datalinks = catalog.objects_of_kind(EcuObjectKind::DataLink);
        let link_ids: Vec<u16> = datalinks.iter().map(|d| d.id).collect();

        let mut drivers = HashMap::new();
        for def in catalog.objects_of_kind(EcuObjectKind::Driver) {
            drivers.insert(
                def.id,
                DriverData {
                    id: def.id,
                    name: def.name.clone(),
                    config_params: vec![1.0, 2.5, 0.5],
                    input_link_ids: link_ids.iter().copied().take(3).collect(),
                    output_link_ids: link_ids.iter().copied().skip(3).take(2).collect(),
                },
            );
        }

        // Cycle the wire encodings across the channels so every
        // TypeCode gets exercised on the stream
        let cycle = [
            DataType::Float32,
            DataType::Int16,
            DataType::Uint16,
            DataType::Int8,
            DataType::Uint8,
            DataType::Bool,
        ];
        let reporting_map = link_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| ReportingEntry {
                id,
                data_type: cycle[i % cycle.len()],
            })
            .collect();

        let points = datalinks
            .iter()
            .map(|d| RealtimeDataPoint {
                id: d.id,
                name: d.name.clone(),
                value: 0.0,
            })
            .collect();

        Self {
            catalog,
            info,
            tables,
            drivers,
            reporting_map,
            points,
            phase: 0.0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Advance the phase angle one push tick and recompute every channel
    fn advance(&mut self) {
        self.phase = (self.phase + 0.15) % std::f32::consts::TAU;
        let phase = self.phase;
        for (index, point) in self.points.iter_mut().enumerate() {
            let jitter: f32 = self.rng.gen_range(-1.0..1.0);
            point.value = if point.name == "RPM" {
                // Idle waveform: slow swell around 850 with fast wobble
                850.0 + 120.0 * (phase * 0.4).sin() + 25.0 * (phase * 3.0).sin() + jitter * 8.0
            } else {
                let amplitude = 20.0 * (index as f32 + 1.0);
                amplitude + amplitude * 0.5 * (phase + 0.5 * index as f32).sin() + jitter
            };
        }
    }
}

fn seed_table(name: &str, id: u16) -> TableData {
    // Odd ids get the 2-D shape, even ids the 1-D shape, so both forms
    // of the wire format stay live on the bench
    let (rows, cols) = if id % 2 == 1 { (8u8, 8u8) } else { (1u8, 12u8) };
    let cells = rows as usize * cols as usize;
    TableData {
        id,
        name: name.to_string(),
        table_type: 2,
        enabled: true,
        rows,
        cols,
        x_axis: (0..cols).map(|c| 500.0 * (c as f32 + 1.0)).collect(),
        y_axis: if rows > 1 {
            (0..rows).map(|r| 10.0 * (r as f32 + 1.0)).collect()
        } else {
            Vec::new()
        },
        output: (0..cells).map(|i| 50.0 + i as f32 * 1.5).collect(),
    }
}

/// Protocol-compatible device simulator
pub struct Simulator {
    state: Arc<Mutex<SimState>>,
}

impl Simulator {
    /// Create a simulator seeded from a definition catalog: one table
    /// per catalog table, one driver per catalog driver, one telemetry
    /// generator per datalink
    pub fn new(catalog: DefinitionStore) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::seed(catalog))),
        }
    }

    /// Create a simulator over the built-in demo catalog
    pub fn with_demo_catalog() -> Self {
        Self::new(DefinitionStore::demo())
    }

    /// Accept and serve TCP peers until the listener fails. Device
    /// state is shared across peers; the reporting flag is per peer.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        info!(addr = %listener.local_addr()?, "simulator listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            info!(%peer, "peer connected");
            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(state, stream).await {
                    debug!(%peer, error = %e, "connection ended with error");
                }
                info!(%peer, "peer disconnected");
            });
        }
    }

    /// Serve one already-open byte stream (a TCP peer, a serial line,
    /// or an in-memory pipe in tests)
    pub async fn serve_stream<S: ByteStream>(&self, stream: S) -> io::Result<()> {
        serve_connection(Arc::clone(&self.state), stream).await
    }
}

/// Run one peer: a read/dispatch loop and a fixed-cadence push loop
/// against the same stream. The connection ends when either loop does,
/// like a real device dropping the link on a fatal framing break.
async fn serve_connection<S: ByteStream>(
    state: Arc<Mutex<SimState>>,
    stream: S,
) -> io::Result<()> {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FramedRead::new(read_half, FrameCodec::default());
    let writer = Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
        write_half,
        FrameCodec::default(),
    )));
    let reporting = Arc::new(AtomicBool::new(false));

    let read = async {
        while let Some(frame) = reader.next().await {
            let request = frame?;
            if let Some(reply) = handle_request(&state, &reporting, &request) {
                writer.lock().await.send(reply).await?;
            }
        }
        Ok(())
    };

    tokio::select! {
        result = read => result,
        result = push_loop(&state, &writer, &reporting) => result,
    }
}

async fn push_loop<W>(
    state: &Mutex<SimState>,
    writer: &tokio::sync::Mutex<FramedWrite<W, FrameCodec>>,
    reporting: &AtomicBool,
) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(PUSH_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if !reporting.load(Ordering::Acquire) {
            continue;
        }
        let frame = {
            let mut state = lock(state);
            state.advance();
            let payload = codec::build_realtime_payload(&state.reporting_map, &state.points);
            Message::push(CLASS_REALTIME, CMD_REALTIME_DATA, payload)
        };
        writer.lock().await.send(frame).await?;
    }
}

/// Compute the reply for one request, or `None` for frames that take no
/// reply (the keep-alive)
fn handle_request(
    state: &Mutex<SimState>,
    reporting: &AtomicBool,
    request: &Message,
) -> Option<Message> {
    if request.msg_type == MSG_RESPONSE
        && request.class == CLASS_REALTIME
        && request.command == CMD_KEEPALIVE
    {
        trace!("keep-alive received");
        return None;
    }

    let payload = match (request.class, request.command) {
        (CLASS_DEVICE, CMD_GET_INFO) => {
            let state = lock(state);
            codec::build_info_response(&state.info)
        }
        (CLASS_DEVICE, CMD_GET_OBJECT_LIST) => {
            let state = lock(state);
            let objects: Vec<_> = [
                state.catalog.objects_of_kind(EcuObjectKind::Table),
                state.catalog.objects_of_kind(EcuObjectKind::Driver),
            ]
            .concat();
            codec::build_object_list_response(&objects)
        }
        (CLASS_TABLE, CMD_GET) => {
            let state = lock(state);
            match requested_id(&request.payload).and_then(|id| state.tables.get(&id)) {
                Some(table) => codec::build_table_response(table),
                None => vec![STATUS_UNKNOWN],
            }
        }
        (CLASS_TABLE, CMD_SET) => {
            let mut state = lock(state);
            let catalog = state.catalog.clone();
            if let Some(table) = codec::parse_set_table_payload(&request.payload, Some(&catalog)) {
                debug!(id = table.id, "table replaced");
                state.tables.insert(table.id, table);
            } else {
                warn!("set-table payload failed to parse, state unchanged");
            }
            vec![STATUS_OK]
        }
        (CLASS_TABLE, CMD_STORE_TABLE) => vec![STATUS_OK],
        (CLASS_DRIVER, CMD_GET) => {
            let state = lock(state);
            match requested_id(&request.payload).and_then(|id| state.drivers.get(&id)) {
                Some(driver) => codec::build_driver_response(driver),
                None => vec![STATUS_UNKNOWN],
            }
        }
        (CLASS_DRIVER, CMD_SET) => {
            let mut state = lock(state);
            let catalog = state.catalog.clone();
            if let Some(driver) = codec::parse_set_driver_payload(&request.payload, Some(&catalog))
            {
                debug!(id = driver.id, "driver replaced");
                state.drivers.insert(driver.id, driver);
            } else {
                warn!("set-driver payload failed to parse, state unchanged");
            }
            vec![STATUS_OK]
        }
        (CLASS_DRIVER, CMD_STORE_DRIVER) => vec![STATUS_OK],
        (CLASS_REALTIME, CMD_REPORTING_STATE) => {
            let enable = request.payload.first().copied().unwrap_or(0) != 0;
            reporting.store(enable, Ordering::Release);
            debug!(enable, "reporting state changed");
            let state = lock(state);
            codec::build_reporting_map_response(&state.reporting_map)
        }
        (class, command) => {
            debug!(class, command, "unrecognized command rejected");
            vec![STATUS_UNKNOWN]
        }
    };

    Some(Message::push(request.class, request.command, payload))
}

fn requested_id(payload: &[u8]) -> Option<u16> {
    let bytes = payload.get(..2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

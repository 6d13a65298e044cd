//! Command-level device interaction
//!
//! [`EcuClient`] wraps a [`Session`] with the command vocabulary of the
//! device: identity info, object listing, whole-unit table and driver
//! reads/writes, store-to-flash, and the realtime streaming sub-protocol
//! with its keep-alive cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::definitions::DefinitionLookup;
use crate::model::{
    DriverData, EcuInfo, EcuObjectDefinition, RealtimeDataPoint, ReportingEntry, TableData,
};

use super::command::{
    CLASS_DEVICE, CLASS_DRIVER, CLASS_REALTIME, CLASS_TABLE, CMD_GET, CMD_GET_INFO,
    CMD_GET_OBJECT_LIST, CMD_KEEPALIVE, CMD_REALTIME_DATA, CMD_REPORTING_STATE, CMD_SET,
    CMD_STORE_DRIVER, CMD_STORE_TABLE, STATUS_OK,
};
use super::frame::{Message, MSG_RESPONSE};
use super::session::Session;
use super::{codec, ProtocolError, DISABLE_SETTLE_DELAY, KEEPALIVE_INTERVAL};

/// Per-command response deadlines.
///
/// Info and reporting-state commands answer from RAM and get short
/// deadlines; table and driver transfers move whole objects and get
/// longer ones.
#[derive(Debug, Clone, Copy)]
pub struct CommandTimeouts {
    /// Get-info deadline
    pub info: Duration,
    /// Object-list deadline
    pub object_list: Duration,
    /// Table get/set/store deadline
    pub table: Duration,
    /// Driver get/set/store deadline
    pub driver: Duration,
    /// Enable/disable-reporting deadline
    pub reporting: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            info: Duration::from_secs(2),
            object_list: Duration::from_secs(5),
            table: Duration::from_secs(5),
            driver: Duration::from_secs(5),
            reporting: Duration::from_secs(2),
        }
    }
}

/// Command-level client for one device connection
pub struct EcuClient {
    session: Arc<Session>,
    defs: Arc<dyn DefinitionLookup>,
    timeouts: CommandTimeouts,
}

impl EcuClient {
    /// Connect to a device endpoint and wrap the session
    pub async fn connect(
        endpoint: &str,
        baud_rate: u32,
        defs: Arc<dyn DefinitionLookup>,
    ) -> Result<Self, ProtocolError> {
        let session = Session::connect(endpoint, baud_rate).await?;
        Ok(Self::over_session(Arc::new(session), defs))
    }

    /// Wrap an already-established session
    pub fn over_session(session: Arc<Session>, defs: Arc<dyn DefinitionLookup>) -> Self {
        Self {
            session,
            defs,
            timeouts: CommandTimeouts::default(),
        }
    }

    /// Replace the default per-command deadlines
    pub fn with_timeouts(mut self, timeouts: CommandTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The underlying session, for raw send/receive alongside the
    /// command methods
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Close the underlying session
    pub async fn close(&self) {
        self.session.close().await;
    }

    /// Read the device identity record. `None` if the device answered
    /// with a payload that does not carry all six fields.
    pub async fn get_info(&self) -> Result<Option<EcuInfo>, ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_DEVICE, CMD_GET_INFO, vec![]),
                self.timeouts.info,
            )
            .await?;
        Ok(codec::parse_ecu_info(&response.payload))
    }

    /// List the objects the device holds, labeled from the catalog.
    /// Ids the catalog does not know are omitted.
    pub async fn get_objects(&self) -> Result<Vec<EcuObjectDefinition>, ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_DEVICE, CMD_GET_OBJECT_LIST, vec![1]),
                self.timeouts.object_list,
            )
            .await?;
        Ok(codec::parse_object_list(&response.payload, self.defs.as_ref()))
    }

    /// Telemetry channels known to the catalog. The device does not
    /// enumerate these itself; the catalog is authoritative.
    pub fn datalinks(&self) -> Vec<EcuObjectDefinition> {
        self.defs.datalinks()
    }

    /// Read one table from the device. `None` if the device does not
    /// hold the id.
    pub async fn get_table(&self, id: u16) -> Result<Option<TableData>, ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_TABLE, CMD_GET, id.to_le_bytes().to_vec()),
                self.timeouts.table,
            )
            .await?;
        Ok(codec::parse_table_response(&response.payload, Some(self.defs.as_ref())))
    }

    /// Replace one table on the device, whole-unit
    pub async fn update_table(&self, table: &TableData) -> Result<(), ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_TABLE, CMD_SET, codec::build_set_table_payload(table)),
                self.timeouts.table,
            )
            .await?;
        check_status(&response, "update table", table.id)
    }

    /// Persist one table to device flash
    pub async fn store_table(&self, id: u16) -> Result<(), ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_TABLE, CMD_STORE_TABLE, id.to_le_bytes().to_vec()),
                self.timeouts.table,
            )
            .await?;
        check_status(&response, "store table", id)
    }

    /// Read one driver block from the device. `None` if the device does
    /// not hold the id.
    pub async fn get_driver(&self, id: u16) -> Result<Option<DriverData>, ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_DRIVER, CMD_GET, id.to_le_bytes().to_vec()),
                self.timeouts.driver,
            )
            .await?;
        Ok(codec::parse_driver_response(&response.payload, Some(self.defs.as_ref())))
    }

    /// Replace one driver block on the device, whole-unit
    pub async fn update_driver(&self, driver: &DriverData) -> Result<(), ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_DRIVER, CMD_SET, codec::build_set_driver_payload(driver)),
                self.timeouts.driver,
            )
            .await?;
        check_status(&response, "update driver", driver.id)
    }

    /// Persist one driver block to device flash
    pub async fn store_driver(&self, id: u16) -> Result<(), ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_DRIVER, CMD_STORE_DRIVER, id.to_le_bytes().to_vec()),
                self.timeouts.driver,
            )
            .await?;
        check_status(&response, "store driver", id)
    }

    /// Take one realtime sample: enable reporting, wait for the first
    /// frame, then disable. Empty when no telemetry is configured.
    pub async fn realtime_snapshot(&self) -> Result<Vec<RealtimeDataPoint>, ProtocolError> {
        let mut stream = self.stream_realtime().await?;
        let points = stream.next().await.unwrap_or_default();
        stream.stop().await;
        Ok(points)
    }

    /// Send an ad hoc request and await its correlated response
    pub async fn send_raw(
        &self,
        request: Message,
        timeout: Duration,
    ) -> Result<Message, ProtocolError> {
        self.session.send_request(request, timeout).await
    }

    /// Write an ad hoc message, awaiting no reply
    pub async fn post_raw(&self, message: Message) -> Result<(), ProtocolError> {
        self.session.post(message).await
    }

    /// Enable realtime reporting and return the telemetry stream.
    ///
    /// The device answers the enable request with the reporting map
    /// that fixes the order and encoding of every subsequent data
    /// frame. An empty map means no telemetry is configured; the
    /// returned stream then yields nothing.
    ///
    /// While the stream lives, a background task keeps the device
    /// emitting by acknowledging once per second. Call
    /// [`RealtimeStream::stop`] to end the session cleanly; merely
    /// dropping the stream stops the keep-alive but skips the
    /// disable handshake.
    pub async fn stream_realtime(&self) -> Result<RealtimeStream, ProtocolError> {
        let response = self
            .session
            .send_request(
                Message::request(CLASS_REALTIME, CMD_REPORTING_STATE, vec![1]),
                self.timeouts.reporting,
            )
            .await?;
        let map = codec::parse_reporting_map(&response.payload);
        debug!(entries = map.len(), "realtime reporting enabled");

        let keepalive = CancellationToken::new();
        let keepalive_task = if map.is_empty() {
            None
        } else {
            Some(tokio::spawn(keepalive_loop(
                Arc::clone(&self.session),
                keepalive.clone(),
            )))
        };

        Ok(RealtimeStream {
            session: Arc::clone(&self.session),
            defs: Arc::clone(&self.defs),
            map,
            keepalive,
            keepalive_task,
            reporting_timeout: self.timeouts.reporting,
            stopped: false,
        })
    }
}

fn check_status(
    response: &Message,
    operation: &'static str,
    id: u16,
) -> Result<(), ProtocolError> {
    match response.payload.first() {
        Some(&STATUS_OK) => Ok(()),
        _ => Err(ProtocolError::Rejected { operation, id }),
    }
}

async fn keepalive_loop(session: Arc<Session>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately; the device already knows we are
    // alive from the enable request itself
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let ack = Message::push(CLASS_REALTIME, CMD_KEEPALIVE, vec![0x00]);
                if let Err(e) = session.post(ack).await {
                    warn!(error = %e, "keep-alive write failed, stopping");
                    break;
                }
                trace!("keep-alive sent");
            }
        }
    }
}

/// An active realtime streaming session
pub struct RealtimeStream {
    session: Arc<Session>,
    defs: Arc<dyn DefinitionLookup>,
    map: Vec<ReportingEntry>,
    keepalive: CancellationToken,
    keepalive_task: Option<JoinHandle<()>>,
    reporting_timeout: Duration,
    stopped: bool,
}

impl RealtimeStream {
    /// The reporting map the device declared for this session
    pub fn reporting_map(&self) -> &[ReportingEntry] {
        &self.map
    }

    /// Receive the next decoded realtime frame.
    ///
    /// Returns `None` when no telemetry is configured, after [`stop`]
    /// has run, or once the session closes. Unsolicited frames that are
    /// not realtime data pushes are skipped; they belong to other
    /// concurrent interactions.
    ///
    /// [`stop`]: RealtimeStream::stop
    pub async fn next(&mut self) -> Option<Vec<RealtimeDataPoint>> {
        if self.map.is_empty() || self.stopped {
            return None;
        }
        loop {
            let message = self.session.recv_unsolicited().await?;
            if message.msg_type == MSG_RESPONSE
                && message.class == CLASS_REALTIME
                && message.command == CMD_REALTIME_DATA
            {
                return Some(codec::parse_realtime_data(
                    &message.payload,
                    &self.map,
                    Some(self.defs.as_ref()),
                ));
            }
            trace!(
                class = message.class,
                command = message.command,
                "skipping non-realtime unsolicited frame"
            );
        }
    }

    /// End the streaming session: stop the keep-alive task, ask the
    /// device to disable reporting (best-effort), and pause briefly so
    /// the device settles before the session carries another command.
    pub async fn stop(mut self) {
        self.shutdown_keepalive().await;
        self.stopped = true;

        let disable = Message::request(CLASS_REALTIME, CMD_REPORTING_STATE, vec![0]);
        if let Err(e) = self.session.send_request(disable, self.reporting_timeout).await {
            debug!(error = %e, "disable-reporting request failed, continuing teardown");
        }
        tokio::time::sleep(DISABLE_SETTLE_DELAY).await;
    }

    async fn shutdown_keepalive(&mut self) {
        self.keepalive.cancel();
        if let Some(task) = self.keepalive_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RealtimeStream {
    fn drop(&mut self) {
        // stop() already ran or the caller bailed out early; either way
        // the keep-alive task must not outlive the stream
        self.keepalive.cancel();
        if let Some(task) = self.keepalive_task.take() {
            task.abort();
        }
        if self.stopped {
            return;
        }
        // The consumer exited without stop(), so the device still has
        // reporting enabled; post the disable best-effort. Without a
        // runtime there is no live connection to post on.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let session = Arc::clone(&self.session);
            handle.spawn(async move {
                let disable = Message::request(CLASS_REALTIME, CMD_REPORTING_STATE, vec![0]);
                if let Err(e) = session.post(disable).await {
                    debug!(error = %e, "disable-reporting post failed during drop");
                }
            });
        }
    }
}

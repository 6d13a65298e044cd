//! End-to-end tests: the full client stack against the device simulator,
//! over an in-memory pipe and over real TCP.

use std::sync::Arc;
use std::time::Duration;

use melink_core::definitions::{DefinitionLookup, DefinitionStore};
use melink_core::model::EcuObjectKind;
use melink_core::protocol::{EcuClient, ProtocolError, Session};
use melink_core::sim::Simulator;

fn demo_defs() -> Arc<dyn DefinitionLookup> {
    Arc::new(DefinitionStore::demo())
}

fn client_against_sim() -> (EcuClient, tokio::task::JoinHandle<std::io::Result<()>>) {
    let (near, far) = tokio::io::duplex(16 * 1024);
    let sim = Simulator::with_demo_catalog();
    let server = tokio::spawn(async move { sim.serve_stream(far).await });
    let session = Arc::new(Session::connect_stream(Box::new(near)));
    (EcuClient::over_session(session, demo_defs()), server)
}

#[tokio::test]
async fn get_info_returns_identity_record() {
    let (client, _server) = client_against_sim();
    let info = client
        .get_info()
        .await
        .expect("round trip")
        .expect("all six fields present");
    assert_eq!(info.product_name, "ME-SIM");
    assert_eq!(info.model_name, "PnP");
    assert!(!info.firmware_version.is_empty());
    assert!(!info.uuid.is_empty());
}

#[tokio::test]
async fn object_list_contains_only_tables_and_drivers() {
    let (client, _server) = client_against_sim();
    let objects = client.get_objects().await.expect("round trip");
    assert!(!objects.is_empty());
    assert!(objects.iter().any(|o| o.kind == EcuObjectKind::Table));
    assert!(objects.iter().any(|o| o.kind == EcuObjectKind::Driver));
    assert!(objects.iter().all(|o| o.kind != EcuObjectKind::DataLink));
}

#[tokio::test]
async fn table_update_and_read_back_round_trip() {
    let (client, _server) = client_against_sim();

    let mut table = client
        .get_table(1)
        .await
        .expect("round trip")
        .expect("demo table 1 exists");
    assert_eq!(table.name, "VE Table");
    assert_eq!(table.output.len(), table.rows as usize * table.cols as usize);

    table.output[0] = 99.5;
    client.update_table(&table).await.expect("update accepted");
    client.store_table(table.id).await.expect("store accepted");

    let read_back = client
        .get_table(1)
        .await
        .expect("round trip")
        .expect("still present");
    assert_eq!(read_back.output[0], 99.5);
    assert_eq!(read_back, table);
}

#[tokio::test]
async fn unknown_ids_come_back_absent() {
    let (client, _server) = client_against_sim();
    assert!(client.get_table(9999).await.expect("round trip").is_none());
    assert!(client.get_driver(9999).await.expect("round trip").is_none());
}

#[tokio::test]
async fn driver_update_and_read_back_round_trip() {
    let (client, _server) = client_against_sim();

    let mut driver = client
        .get_driver(20)
        .await
        .expect("round trip")
        .expect("demo driver 20 exists");
    assert_eq!(driver.name, "Fuel Driver");

    driver.config_params = vec![4.0, 8.0];
    client.update_driver(&driver).await.expect("update accepted");
    client.store_driver(driver.id).await.expect("store accepted");

    let read_back = client
        .get_driver(20)
        .await
        .expect("round trip")
        .expect("still present");
    assert_eq!(read_back.config_params, vec![4.0, 8.0]);
}

#[tokio::test]
async fn realtime_stream_delivers_channels_in_map_order() {
    let (client, _server) = client_against_sim();

    let mut stream = client.stream_realtime().await.expect("enable");
    let map = stream.reporting_map().to_vec();
    assert_eq!(map.len(), 6);

    let points = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("frame arrives within cadence")
        .expect("stream yields");
    assert_eq!(points.len(), map.len());
    for (point, entry) in points.iter().zip(&map) {
        assert_eq!(point.id, entry.id);
    }
    let rpm = points.iter().find(|p| p.name == "RPM").expect("RPM channel");
    assert!(rpm.value > 0.0);

    stream.stop().await;
}

#[tokio::test]
async fn stream_enable_disable_twice_leaves_session_usable() {
    let (client, _server) = client_against_sim();

    for _ in 0..2 {
        let mut stream = client.stream_realtime().await.expect("enable");
        assert_eq!(stream.reporting_map().len(), 6);
        let points = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("frame arrives")
            .expect("stream yields");
        assert!(!points.is_empty());
        stream.stop().await;
    }

    // One-shot commands still work after the streaming sessions
    let info = client.get_info().await.expect("round trip").expect("parses");
    assert_eq!(info.product_name, "ME-SIM");
}

#[tokio::test]
async fn realtime_snapshot_takes_one_sample() {
    let (client, _server) = client_against_sim();
    let points = tokio::time::timeout(Duration::from_secs(2), client.realtime_snapshot())
        .await
        .expect("completes within cadence")
        .expect("round trip");
    assert_eq!(points.len(), 6);
    assert!(points.iter().any(|p| p.name == "RPM"));

    // The session is back to one-shot commands afterwards
    let info = client.get_info().await.expect("round trip").expect("parses");
    assert_eq!(info.product_name, "ME-SIM");
}

#[tokio::test]
async fn raw_requests_share_the_correlator() {
    let (client, _server) = client_against_sim();
    let reply = client
        .send_raw(
            melink_core::protocol::Message::request(0x04, 0x00, vec![]),
            Duration::from_secs(2),
        )
        .await
        .expect("round trip");
    assert_eq!(reply.correlation_key(), 0x0400);
    assert_eq!(reply.payload.first(), Some(&0x00));
}

#[tokio::test]
async fn tcp_end_to_end_round_trip() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    tokio::spawn(Simulator::with_demo_catalog().serve(listener));

    let client = EcuClient::connect(&addr, melink_core::protocol::DEFAULT_BAUD_RATE, demo_defs())
        .await
        .expect("connect");
    let info = client.get_info().await.expect("round trip").expect("parses");
    assert_eq!(info.product_name, "ME-SIM");

    let table = client.get_table(2).await.expect("round trip").expect("exists");
    assert_eq!(table.name, "Ignition Timing");

    client.close().await;
    let err = client.get_info().await.expect_err("closed");
    assert!(matches!(err, ProtocolError::NotConnected));
}

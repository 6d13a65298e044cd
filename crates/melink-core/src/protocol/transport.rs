//! Transport adapters
//!
//! The session state machine is transport-agnostic; it only needs a
//! duplex byte stream. The adapters here produce that capability for a
//! serial port or a TCP socket. Anything else (USB bulk endpoints, an
//! in-memory pipe in tests) plugs in through [`Session::connect_stream`]
//! with its own setup code.
//!
//! [`Session::connect_stream`]: super::Session::connect_stream

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::{SerialPort, SerialPortBuilderExt};
use tracing::debug;

use super::ProtocolError;

/// Minimal duplex byte-stream capability the session runs over
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Open a byte stream by endpoint name.
///
/// Names containing `:` are treated as `host:port` TCP endpoints;
/// everything else is a serial port path (`/dev/ttyUSB0`, `COM3`).
pub async fn open(endpoint: &str, baud_rate: u32) -> Result<Box<dyn ByteStream>, ProtocolError> {
    if endpoint.is_empty() {
        return Err(ProtocolError::InvalidEndpoint(endpoint.to_string()));
    }
    if endpoint.contains(':') {
        open_tcp(endpoint).await
    } else {
        open_serial(endpoint, baud_rate).await
    }
}

/// Connect to a TCP endpoint (`host:port`)
pub async fn open_tcp(addr: &str) -> Result<Box<dyn ByteStream>, ProtocolError> {
    let stream = TcpStream::connect(addr).await?;
    // Frames are small and latency matters more than throughput
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY, continuing");
    }
    Ok(Box::new(stream))
}

/// Open a serial port with standard 8N1 framing
pub async fn open_serial(path: &str, baud_rate: u32) -> Result<Box<dyn ByteStream>, ProtocolError> {
    #[allow(unused_mut)]
    let mut port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(io::Error::from)?;

    // Only one session may own a physical port at a time
    #[cfg(unix)]
    if let Err(e) = port.set_exclusive(true) {
        debug!(error = %e, "failed to set exclusive port access, continuing");
    }

    // Keep DTR asserted: opening the port toggles DTR, which resets
    // bootloader-based boards; holding it high keeps the link stable
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!(error = %e, "failed to assert DTR, continuing");
    }

    Ok(Box::new(port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_endpoint_is_rejected() {
        match open("", 115200).await {
            Err(ProtocolError::InvalidEndpoint(name)) => assert!(name.is_empty()),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("empty endpoint must not open"),
        }
    }

    #[tokio::test]
    async fn tcp_endpoint_round_trips_bytes() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 4];
            tokio::io::AsyncReadExt::read_exact(&mut peer, &mut buf)
                .await
                .expect("read");
            tokio::io::AsyncWriteExt::write_all(&mut peer, &buf)
                .await
                .expect("write");
        });

        let mut stream = open(&addr.to_string(), 115200).await.expect("connect");
        tokio::io::AsyncWriteExt::write_all(&mut stream, b"ping")
            .await
            .expect("write");
        let mut echo = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut stream, &mut echo)
            .await
            .expect("read");
        assert_eq!(&echo, b"ping");
        server.await.expect("server task");
    }
}

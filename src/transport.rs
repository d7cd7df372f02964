//! TCP transport layer for ISO-on-TCP.
//!
//! [`TcpTransport`] moves complete TPKT frames over a blocking TCP stream. It
//! knows the TPKT length field and nothing about COTP or S7.
//!
//! # Constants
//!
//! - [`DEFAULT_S7_PORT`] - ISO-on-TCP port (102)
//! - [`DEFAULT_TIMEOUT`] - connect, read and write timeout (30 seconds)
//!
//! # Example
//!
//! ```no_run
//! use s7_driver::{ConnectRequest, TcpTransport, LOCAL_TSAP};
//! use std::time::Duration;
//!
//! let mut transport = TcpTransport::connect(
//!     "192.168.0.10:102".parse().unwrap(),
//!     Duration::from_secs(5),
//! ).unwrap();
//!
//! let confirm = transport.send_receive(&ConnectRequest::new(LOCAL_TSAP, 0x0102).to_bytes());
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::error::{Result, S7Error};
use crate::header::{frame_length, TPKT_HEADER_SIZE};

/// Default ISO-on-TCP port.
pub const DEFAULT_S7_PORT: u16 = 102;

/// Default timeout for connect and socket operations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Blocking TCP transport carrying TPKT frames.
pub struct TcpTransport {
    stream: TcpStream,
    remote_addr: SocketAddr,
    last_activity: Instant,
}

impl TcpTransport {
    /// Opens a TCP connection to the PLC.
    ///
    /// `timeout` bounds the connect and every later read and write; zero
    /// means [`DEFAULT_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns `S7Error::Timeout` if the connect times out, an I/O error
    /// otherwise.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };
        let stream = TcpStream::connect_timeout(&addr, timeout).map_err(map_io)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            remote_addr: addr,
            last_activity: Instant::now(),
        })
    }

    /// Sends a complete frame.
    pub fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame).map_err(map_io)?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Receives one complete TPKT frame.
    ///
    /// # Errors
    ///
    /// - `S7Error::Timeout` if nothing arrives in time
    /// - `S7Error::ConnectionClosed` if the peer closes mid-frame
    /// - `S7Error::InvalidFrame` on a malformed TPKT header
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        let mut tpkt = [0u8; TPKT_HEADER_SIZE];
        self.stream.read_exact(&mut tpkt).map_err(map_io)?;
        let len = frame_length(&tpkt)?;

        let mut frame = vec![0u8; len];
        frame[..TPKT_HEADER_SIZE].copy_from_slice(&tpkt);
        self.stream
            .read_exact(&mut frame[TPKT_HEADER_SIZE..])
            .map_err(map_io)?;
        self.last_activity = Instant::now();
        Ok(frame)
    }

    /// Sends a frame and waits for the answer frame.
    pub fn send_receive(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        self.send(frame)?;
        self.receive()
    }

    /// Time since the last frame went out or came in.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Returns the remote PLC address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.stream.local_addr().ok())
            .finish()
    }
}

fn map_io(e: io::Error) -> S7Error {
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => S7Error::Timeout,
        io::ErrorKind::UnexpectedEof => S7Error::ConnectionClosed,
        _ => S7Error::Io(e),
    }
}

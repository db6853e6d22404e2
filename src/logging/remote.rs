//! Line collector over TLS
//!
//! Each formatted event is written to the collector as-is: no framing, no
//! acknowledgement. The connection is opened on the first event and
//! dropped after a failed write. A failed connect or write starts a
//! backoff during which events are discarded without touching the
//! network; the first event after it reconnects. Like the
//! gateway dial, the collector's certificate is not verified.

use crate::transport::{insecure_client_config, server_name, TransportError};
use rustls::{ClientConnection, StreamOwned};
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::MakeWriter;

/// Socket timeout for collector I/O, connect included
const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Events are dropped without a connect attempt for this long after a failure
const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

type Connection = StreamOwned<ClientConnection, TcpStream>;

#[derive(Default)]
struct State {
    conn: Option<Connection>,
    retry_at: Option<Instant>,
}

/// `MakeWriter` forwarding events to a remote collector
pub struct RemoteSink {
    addr: String,
    tls: Arc<rustls::ClientConfig>,
    io_timeout: Duration,
    backoff: Duration,
    state: Mutex<State>,
}

impl RemoteSink {
    pub fn new(addr: impl Into<String>) -> Result<Self, TransportError> {
        Ok(Self {
            addr: addr.into(),
            tls: Arc::new(insecure_client_config()?),
            io_timeout: IO_TIMEOUT,
            backoff: RECONNECT_BACKOFF,
            state: Mutex::new(State::default()),
        })
    }

    fn connect(&self) -> io::Result<Connection> {
        let mut last_err = io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} did not resolve", self.addr),
        );
        let mut tcp = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.io_timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => last_err = e,
            }
        }
        let tcp = tcp.ok_or(last_err)?;
        tcp.set_write_timeout(Some(self.io_timeout))?;
        tcp.set_read_timeout(Some(self.io_timeout))?;
        tcp.set_nodelay(true)?;

        let name = server_name(&self.addr).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let session = ClientConnection::new(Arc::clone(&self.tls), name)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(StreamOwned::new(session, tcp))
    }

    /// Write one formatted event, connecting first if needed
    ///
    /// After a failed connect or write, events are refused without any
    /// network activity until the backoff has passed.
    pub fn send(&self, line: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.conn.is_none() {
            if let Some(retry_at) = state.retry_at {
                if Instant::now() < retry_at {
                    return Err(io::Error::new(
                        io::ErrorKind::WouldBlock,
                        "collector unavailable, backing off",
                    ));
                }
            }
            match self.connect() {
                Ok(conn) => {
                    state.conn = Some(conn);
                    state.retry_at = None;
                }
                Err(e) => {
                    state.retry_at = Some(Instant::now() + self.backoff);
                    return Err(e);
                }
            }
        }

        let result = match state.conn.as_mut() {
            Some(stream) => stream.write_all(line).and_then(|_| stream.flush()),
            None => Ok(()),
        };
        if result.is_err() {
            state.conn = None;
            state.retry_at = Some(Instant::now() + self.backoff);
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .conn
            .is_some()
    }
}

/// Buffers one event and hands it to the sink when dropped
pub struct RemoteWriter<'a> {
    sink: &'a RemoteSink,
    buf: Vec<u8>,
}

impl Write for RemoteWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RemoteWriter<'_> {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            // Nowhere to report a failed diagnostic write
            let _ = self.sink.send(&self.buf);
        }
    }
}

impl<'a> MakeWriter<'a> for RemoteSink {
    type Writer = RemoteWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        RemoteWriter {
            sink: self,
            buf: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_unreachable_collector() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = RemoteSink::new(addr.to_string()).unwrap();
        assert!(sink.send(b"hello\n").is_err());
        assert!(!sink.is_connected());
    }

    #[test]
    fn test_blackholed_collector_is_bounded_then_skipped() {
        let mut sink = RemoteSink::new("10.255.255.1:6514").unwrap();
        sink.io_timeout = Duration::from_millis(300);

        let started = Instant::now();
        assert!(sink.send(b"first\n").is_err());
        assert!(started.elapsed() < Duration::from_secs(2));

        let started = Instant::now();
        let err = sink.send(b"second\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(started.elapsed() < Duration::from_millis(50));
        assert!(!sink.is_connected());
    }

    #[test]
    fn test_reconnects_after_backoff() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut sink = RemoteSink::new(addr.to_string()).unwrap();
        sink.backoff = Duration::ZERO;

        assert!(sink.send(b"one\n").is_err());
        // no backoff configured, so the second event tries the network again
        let err = sink.send(b"two\n").unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_speaks_tls_and_drops_broken_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let collector = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut first = [0u8; 1];
            socket.read_exact(&mut first).unwrap();
            first[0]
        });

        let sink = RemoteSink::new(addr.to_string()).unwrap();
        {
            let mut writer = sink.make_writer();
            writer.write_all(b"event line\n").unwrap();
        }

        // 0x16 is the TLS handshake record type
        assert_eq!(collector.join().unwrap(), 0x16);
        assert!(!sink.is_connected());
    }
}

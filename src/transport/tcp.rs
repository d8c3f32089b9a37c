//! Raw TCP transport (serial-over-network bridges such as ser2net in raw mode)

use super::{MIN_OS_TIMEOUT, Transport};
use crate::error::{Error, Result};
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// TCP transport: bytes pass through the socket unchanged
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpTransport {
    /// Connect to `host:port`, trying every resolved address in turn
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let target = format!("{host}:{port}");
        let stream = connect_stream(&target, timeout)?;
        log::info!("Connected to {} (raw tcp)", target);
        Ok(Self::from_stream(stream, target))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, peer: String) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY on {}: {}", peer, e);
        }
        Self {
            stream: Some(stream),
            peer,
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::Closed)
    }
}

/// Resolve and connect with a bounded wait per address
pub(super) fn connect_stream(target: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = target
        .to_socket_addrs()
        .map_err(|e| Error::Connection {
            target: target.to_string(),
            reason: e.to_string(),
        })?
        .collect();

    let mut last_error = format!("no addresses resolved for {target}");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout.max(MIN_OS_TIMEOUT)) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                log::debug!("Connect to {} failed: {}", addr, e);
                last_error = e.to_string();
            }
        }
    }

    Err(Error::Connection {
        target: target.to_string(),
        reason: last_error,
    })
}

/// Read from a socket, mapping timeouts to `Ok(0)` and EOF to an error
pub(super) fn read_stream(
    stream: &mut TcpStream,
    buffer: &mut [u8],
    timeout: Duration,
) -> Result<usize> {
    stream.set_read_timeout(Some(timeout.max(MIN_OS_TIMEOUT)))?;
    match stream.read(buffer) {
        Ok(0) if !buffer.is_empty() => Err(Error::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "peer closed the connection",
        ))),
        Ok(n) => Ok(n),
        Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => Ok(0),
        Err(e) => Err(e.into()),
    }
}

impl Transport for TcpTransport {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        read_stream(self.stream_mut()?, buffer, timeout)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream_mut()?.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stream_mut()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            // Peer may already be gone
            let _ = stream.shutdown(Shutdown::Both);
            log::info!("Closed connection to {}", self.peer);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).unwrap();
            sock.write_all(&buf[..n]).unwrap();
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        transport.write_all(b"{\"intent\":6}\n").unwrap();

        let mut buf = [0u8; 64];
        let mut got = Vec::new();
        while got.len() < 13 {
            let n = transport.read(&mut buf, Duration::from_secs(1)).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"{\"intent\":6}\n");
        server.join().unwrap();
    }

    #[test]
    fn test_read_timeout_returns_zero() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = thread::spawn(move || {
            let (_sock, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(300));
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        let mut buf = [0u8; 16];
        let n = transport.read(&mut buf, Duration::from_millis(50)).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let _server = thread::spawn(move || {
            let _ = listener.accept();
        });

        let mut transport =
            TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        assert!(transport.is_open());
        transport.close().unwrap();
        transport.close().unwrap();
        assert!(!transport.is_open());
        assert!(matches!(transport.write_all(b"x"), Err(Error::Closed)));
    }

    #[test]
    fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port with nothing listening
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let result = TcpTransport::connect("127.0.0.1", port, Duration::from_millis(200));
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}

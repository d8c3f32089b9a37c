//! Telnet-style serial-over-network transport
//!
//! Network serial servers in telnet mode interleave IAC command sequences
//! with the data stream. This transport strips them on read, escapes 0xFF on
//! write, and refuses every option the server offers so the link stays a
//! plain 8-bit pipe.
//!
//! ```text
//! IAC IAC          -> data byte 0xFF
//! IAC DO   <opt>   -> reply IAC WONT <opt>
//! IAC WILL <opt>   -> reply IAC DONT <opt>
//! IAC SB ... IAC SE -> dropped
//! IAC <other>      -> dropped
//! ```

use super::Transport;
use super::tcp::{connect_stream, read_stream};
use crate::error::{Error, Result};
use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

const IAC: u8 = 0xFF;
const DONT: u8 = 0xFE;
const DO: u8 = 0xFD;
const WONT: u8 = 0xFC;
const WILL: u8 = 0xFB;
const SB: u8 = 0xFA;
const SE: u8 = 0xF0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Data,
    Iac,
    Negotiate(u8),
    Subneg,
    SubnegIac,
}

/// Incremental telnet command stripper
///
/// Sequences may be split across reads; state carries over between calls.
#[derive(Debug)]
pub(crate) struct TelnetFilter {
    state: FilterState,
}

impl TelnetFilter {
    pub(crate) fn new() -> Self {
        Self {
            state: FilterState::Data,
        }
    }

    /// Feed raw socket bytes; data goes to `data`, negotiation replies to `replies`
    pub(crate) fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (FilterState::Data, IAC) => FilterState::Iac,
                (FilterState::Data, b) => {
                    data.push(b);
                    FilterState::Data
                }
                (FilterState::Iac, IAC) => {
                    data.push(IAC);
                    FilterState::Data
                }
                (FilterState::Iac, DO | DONT | WILL | WONT) => FilterState::Negotiate(byte),
                (FilterState::Iac, SB) => FilterState::Subneg,
                (FilterState::Iac, _) => FilterState::Data,
                (FilterState::Negotiate(verb), option) => {
                    match verb {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        _ => {}
                    }
                    log::trace!("telnet negotiation: verb=0x{:02X} option={}", verb, option);
                    FilterState::Data
                }
                (FilterState::Subneg, IAC) => FilterState::SubnegIac,
                (FilterState::Subneg, _) => FilterState::Subneg,
                (FilterState::SubnegIac, SE) => FilterState::Data,
                (FilterState::SubnegIac, _) => FilterState::Subneg,
            };
        }
    }
}

/// Double every 0xFF so the server does not read it as a command
pub(crate) fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

/// Telnet transport over TCP
pub struct TelnetTransport {
    stream: Option<TcpStream>,
    peer: String,
    filter: TelnetFilter,
    raw: Vec<u8>,
    data: Vec<u8>,
    replies: Vec<u8>,
}

impl TelnetTransport {
    /// Connect to a telnet-mode serial server
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let target = format!("{host}:{port}");
        let stream = connect_stream(&target, timeout)?;
        if let Err(e) = stream.set_nodelay(true) {
            log::warn!("Failed to set TCP_NODELAY on {}: {}", target, e);
        }
        log::info!("Connected to {} (telnet)", target);
        Ok(Self {
            stream: Some(stream),
            peer: target,
            filter: TelnetFilter::new(),
            raw: vec![0u8; 512],
            data: Vec::with_capacity(512),
            replies: Vec::new(),
        })
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::Closed)
    }
}

impl Transport for TelnetTransport {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        // Leftover filtered data from a previous read that did not fit
        if self.data.is_empty() {
            let want = buffer.len().min(self.raw.len());
            let stream = self.stream.as_mut().ok_or(Error::Closed)?;
            let n = read_stream(stream, &mut self.raw[..want], timeout)?;
            self.filter
                .feed(&self.raw[..n], &mut self.data, &mut self.replies);

            if !self.replies.is_empty() {
                let replies = std::mem::take(&mut self.replies);
                self.stream_mut()?.write_all(&replies)?;
            }
        }

        let n = self.data.len().min(buffer.len());
        buffer[..n].copy_from_slice(&self.data[..n]);
        self.data.drain(..n);
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let escaped = escape_iac(data);
        self.stream_mut()?.write_all(&escaped)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stream_mut()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::info!("Closed telnet connection to {}", self.peer);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn describe(&self) -> String {
        format!("telnet://{}", self.peer)
    }
}

impl Drop for TelnetTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

//! Exchange engine: one command out, at most one document back
//!
//! # Correlation
//!
//! The wire protocol carries no request ID. A response is matched to a
//! command purely by timing: the first well-formed JSON object decoded after
//! the write is taken as the answer, whatever it contains. Two consequences
//! follow and are not hidden:
//!
//! - a late reply to a timed-out exchange can be mistaken for the reply to
//!   the next one (stale bytes buffered before a write are discarded, which
//!   narrows but does not close the window)
//! - an unsolicited document from the controller is indistinguishable from
//!   an answer
//!
//! # Concurrency
//!
//! A [`Link`] owns its transport behind one mutex and is shared as
//! `Arc<Link>`. Each exchange holds the lock from the write until the
//! response or the timeout, so commands never interleave on the wire and at
//! most one is outstanding.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::{Command, LineReader, Response};
use crate::transport::{self, Transport};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct LinkInner {
    /// `None` once closed
    transport: Option<Box<dyn Transport>>,
    reader: LineReader,
}

/// Serialized command/response channel to the controller
pub struct Link {
    inner: Mutex<LinkInner>,
    default_timeout: Duration,
}

impl Link {
    /// Wrap an already open transport
    pub fn new(transport: Box<dyn Transport>, default_timeout: Duration) -> Self {
        log::info!("Link ready on {}", transport.describe());
        Self {
            inner: Mutex::new(LinkInner {
                transport: Some(transport),
                reader: LineReader::new(),
            }),
            default_timeout,
        }
    }

    /// Open the transport described by `config`
    pub fn open(config: &Config) -> Result<Self> {
        let transport = transport::open(&config.link)?;
        Ok(Self::new(transport, config.exchange.timeout()))
    }

    fn lock(&self) -> Result<MutexGuard<'_, LinkInner>> {
        Ok(self.inner.lock()?)
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `command` and wait up to `timeout` for the next document
    ///
    /// Returns `Ok(None)` when nothing decodable arrived in time, or when the
    /// whole budget went to waiting for another caller (nothing is written
    /// then). Write failures are returned as errors. Never returns later than `timeout`
    /// plus one transport read slice.
    pub fn exchange(&self, command: &Command, timeout: Duration) -> Result<Option<Response>> {
        let start = Instant::now();
        let mut guard = self.lock()?;
        let LinkInner { transport, reader } = &mut *guard;
        let transport = transport.as_mut().ok_or(Error::Closed)?;

        // Lock wait counts against the caller's budget; with none left,
        // nothing is written
        if start.elapsed() >= timeout {
            log::debug!(
                "{} not sent: budget of {:?} spent waiting for the link",
                command.intent(),
                timeout
            );
            return Ok(None);
        }

        Self::write_command(&mut **transport, reader, command)?;

        let remaining = timeout.saturating_sub(start.elapsed());
        let response = reader.read_message(&mut **transport, remaining)?;
        match &response {
            Some(_) => log::debug!(
                "{} answered in {:?}",
                command.intent(),
                start.elapsed()
            ),
            None => log::debug!("{} timed out after {:?}", command.intent(), timeout),
        }
        Ok(response)
    }

    /// [`exchange`](Self::exchange) with the configured default timeout
    pub fn exchange_default(&self, command: &Command) -> Result<Option<Response>> {
        self.exchange(command, self.default_timeout)
    }

    /// Write a command the controller never answers
    pub fn send(&self, command: &Command) -> Result<()> {
        let mut guard = self.lock()?;
        let LinkInner { transport, reader } = &mut *guard;
        let transport = transport.as_mut().ok_or(Error::Closed)?;
        Self::write_command(&mut **transport, reader, command)
    }

    fn write_command(
        transport: &mut dyn Transport,
        reader: &mut LineReader,
        command: &Command,
    ) -> Result<()> {
        let stale = reader.clear();
        if stale > 0 {
            log::debug!("Discarded {} stale bytes before write", stale);
        }

        let bytes = command.encode()?;
        log::debug!(
            "Sent: {}",
            String::from_utf8_lossy(&bytes[..bytes.len().saturating_sub(1)])
        );
        transport.write_all(&bytes)?;
        transport.flush()?;
        Ok(())
    }

    /// Release the transport; later calls are no-ops
    pub fn close(&self) -> Result<()> {
        let mut guard = self.lock()?;
        if let Some(mut transport) = guard.transport.take() {
            log::info!("Closing link on {}", transport.describe());
            transport.close()?;
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .map(|g| g.transport.as_ref().is_some_and(|t| t.is_open()))
            .unwrap_or(false)
    }

    /// Endpoint of the underlying transport, or `"closed"`
    pub fn describe(&self) -> String {
        self.inner
            .lock()
            .ok()
            .and_then(|g| g.transport.as_ref().map(|t| t.describe()))
            .unwrap_or_else(|| "closed".to_string())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Error closing link: {}", e);
        }
    }
}

//! Mock transport for testing
//!
//! Clones share state, so a test keeps one handle for scripting and
//! inspection while the [`Link`](crate::link::Link) owns another.

use super::Transport;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Produces the bytes the fake controller sends back for one written command
pub type Responder = Box<dyn FnMut(&[u8]) -> Option<MockReply> + Send>;

/// A scripted reply, delivered after `delay`
#[derive(Debug, Clone)]
pub struct MockReply {
    pub bytes: Vec<u8>,
    pub delay: Duration,
}

impl MockReply {
    /// Reply immediately
    pub fn now(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            delay: Duration::ZERO,
        }
    }

    /// Reply after a delay
    pub fn after(delay: Duration, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            delay,
        }
    }
}

/// Mock transport for unit testing
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<(Mutex<MockTransportInner>, Condvar)>,
}

struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    /// Replies not yet due, ordered by delivery time
    scheduled: Vec<(Instant, Vec<u8>)>,
    /// Every byte written, in wire order
    wire: Vec<u8>,
    /// One entry per `write_all` call
    writes: Vec<Vec<u8>>,
    responder: Option<Responder>,
    /// Push written bytes one at a time, yielding between them
    byte_by_byte: bool,
    fail_writes: bool,
    open: bool,
    close_calls: usize,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        MockTransport {
            inner: Arc::new((
                Mutex::new(MockTransportInner {
                    read_buffer: VecDeque::new(),
                    scheduled: Vec::new(),
                    wire: Vec::new(),
                    writes: Vec::new(),
                    responder: None,
                    byte_by_byte: false,
                    fail_writes: false,
                    open: true,
                    close_calls: 0,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Create a mock that answers every write through `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Option<MockReply> + Send + 'static,
    {
        let mock = Self::new();
        mock.set_responder(responder);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install or replace the responder
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<MockReply> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Inject data to be read
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_buffer.extend(data);
        self.inner.1.notify_all();
    }

    /// Inject data that becomes readable after `delay`
    pub fn inject_after(&self, delay: Duration, data: &[u8]) {
        let mut inner = self.lock();
        inner.scheduled.push((Instant::now() + delay, data.to_vec()));
        inner.scheduled.sort_by_key(|(due, _)| *due);
        drop(inner);
        self.inner.1.notify_all();
    }

    /// Get all written data
    pub fn get_written(&self) -> Vec<u8> {
        self.lock().wire.clone()
    }

    /// Written data split per `write_all` call
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Clear written data
    pub fn clear_written(&self) {
        let mut inner = self.lock();
        inner.wire.clear();
        inner.writes.clear();
    }

    /// Clear read buffer and pending scheduled replies
    pub fn clear_read(&self) {
        let mut inner = self.lock();
        inner.read_buffer.clear();
        inner.scheduled.clear();
    }

    /// Slow writes down so unsynchronized writers would interleave
    pub fn set_byte_by_byte(&self, enabled: bool) {
        self.lock().byte_by_byte = enabled;
    }

    /// Make every subsequent write fail with a broken pipe
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Number of times `close` was called
    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }

    fn promote_due(inner: &mut MockTransportInner, now: Instant) {
        while let Some((due, _)) = inner.scheduled.first() {
            if *due > now {
                break;
            }
            let (_, bytes) = inner.scheduled.remove(0);
            inner.read_buffer.extend(bytes);
        }
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock().unwrap_or_else(|e| e.into_inner());

        loop {
            if !inner.open {
                return Err(Error::Closed);
            }

            let now = Instant::now();
            Self::promote_due(&mut inner, now);

            if !inner.read_buffer.is_empty() {
                let available = inner.read_buffer.len().min(buffer.len());
                for (slot, byte) in buffer
                    .iter_mut()
                    .zip(inner.read_buffer.drain(..available))
                {
                    *slot = byte;
                }
                return Ok(available);
            }

            if now >= deadline {
                return Ok(0);
            }

            let wake_at = match inner.scheduled.first() {
                Some((due, _)) => (*due).min(deadline),
                None => deadline,
            };
            let wait = wake_at.saturating_duration_since(now);
            inner = cvar
                .wait_timeout(inner, wait)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let byte_by_byte = {
            let inner = self.lock();
            if !inner.open {
                return Err(Error::Closed);
            }
            if inner.fail_writes {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "mock write failure",
                )));
            }
            inner.byte_by_byte
        };

        if byte_by_byte {
            for &b in data {
                self.lock().wire.push(b);
                thread::yield_now();
            }
        } else {
            self.lock().wire.extend_from_slice(data);
        }

        let mut inner = self.lock();
        inner.writes.push(data.to_vec());

        let reply = inner.responder.as_mut().and_then(|respond| respond(data));
        if let Some(reply) = reply {
            if reply.delay.is_zero() {
                inner.read_buffer.extend(reply.bytes);
            } else {
                inner
                    .scheduled
                    .push((Instant::now() + reply.delay, reply.bytes));
                inner.scheduled.sort_by_key(|(due, _)| *due);
            }
        }
        drop(inner);
        self.inner.1.notify_all();
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.lock().open {
            Ok(())
        } else {
            Err(Error::Closed)
        }
    }

    fn close(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.open = false;
        inner.close_calls += 1;
        drop(inner);
        self.inner.1.notify_all();
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

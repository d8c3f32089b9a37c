//! Line framing and opportunistic JSON extraction
//!
//! The controller shares its serial console between JSON replies and plain
//! debug prints ("Emergency Stop", "deserializeJson() failed: ..."), and a
//! reply can be preceded by garbage left over from a reset. Each line is
//! therefore tried twice:
//!
//! 1. the whole line as a JSON object
//! 2. the span from the first `{` to the last `}`
//!
//! Anything else is noise: logged at debug and dropped. Malformed input is
//! never an error.

use super::response::Response;
use crate::error::Result;
use crate::transport::Transport;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

/// Longest line kept while waiting for a terminator
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Bytes requested from the transport per read
const READ_CHUNK: usize = 256;

/// Try to extract one JSON object from a single line
///
/// Returns `None` for blank lines and noise; never a partial value.
pub fn decode_line(line: &[u8]) -> Option<Response> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(fields) = serde_json::from_str::<Map<String, Value>>(text) {
        return Some(Response::new(fields));
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Map<String, Value>>(&text[start..=end])
        .ok()
        .map(Response::new)
}

/// Accumulates transport bytes into `\n`-terminated lines
///
/// Bytes that arrive after a terminator stay buffered for the next call, so
/// a read that straddles two lines loses nothing.
pub struct LineReader {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no terminator
    scanned: usize,
    chunk: [u8; READ_CHUNK],
    /// Lines dropped as noise since creation
    noise_lines: u64,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(READ_CHUNK),
            scanned: 0,
            chunk: [0u8; READ_CHUNK],
            noise_lines: 0,
        }
    }

    /// Bytes buffered but not yet returned as a line
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn noise_lines(&self) -> u64 {
        self.noise_lines
    }

    /// Drop everything buffered; returns the number of bytes discarded
    pub fn clear(&mut self) -> usize {
        let n = self.buffer.len();
        self.buffer.clear();
        self.scanned = 0;
        n
    }

    /// Pop one complete line from the buffer, without terminator or `\r`
    ///
    /// Only bytes appended since the last call are searched.
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
            self.scanned = self.buffer.len();
            return None;
        };
        let pos = self.scanned + offset;
        self.scanned = 0;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Read one line, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when no full line arrived in time; the partial
    /// line stays buffered.
    pub fn read_line(
        &mut self,
        transport: &mut dyn Transport,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;

        loop {
            match self.take_line() {
                Some(line) if line.len() > MAX_LINE_LEN => {
                    log::debug!("Discarding {} byte line", line.len());
                    self.noise_lines += 1;
                    continue;
                }
                Some(line) => return Ok(Some(line)),
                None if self.buffer.len() > MAX_LINE_LEN => {
                    log::debug!(
                        "Discarding {} bytes without line terminator",
                        self.buffer.len()
                    );
                    self.clear();
                    self.noise_lines += 1;
                }
                None => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let n = transport.read(&mut self.chunk, deadline - now)?;
            if n == 0 {
                continue;
            }
            log::trace!("read {} bytes", n);
            self.buffer.extend_from_slice(&self.chunk[..n]);
        }
    }

    /// Read lines until one decodes as a JSON object or `timeout` elapses
    ///
    /// Noise lines are skipped and do not shorten the wait: with nothing but
    /// garbage on the wire this returns `Ok(None)` no earlier than `timeout`.
    pub fn read_message(
        &mut self,
        transport: &mut dyn Transport,
        timeout: Duration,
    ) -> Result<Option<Response>> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(line) = self.read_line(transport, remaining)? else {
                return Ok(None);
            };

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match decode_line(&line) {
                Some(response) => {
                    log::debug!("Received: {}", String::from_utf8_lossy(&line));
                    return Ok(Some(response));
                }
                None => {
                    self.noise_lines += 1;
                    log::debug!("Noise: {}", String::from_utf8_lossy(&line).trim_end());
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use serde_json::json;

    fn fields(r: &Response) -> Value {
        r.clone().into_value()
    }

    #[test]
    fn test_decode_full_line() {
        let r = decode_line(br#"{"heading": 90.5, "fix": true}"#).unwrap();
        assert_eq!(fields(&r), json!({"heading": 90.5, "fix": true}));
    }

    #[test]
    fn test_decode_with_surrounding_noise() {
        let r = decode_line(br#"\x00garbage{"magX": 1, "magY": {"raw": 2}} trailing"#).unwrap();
        assert_eq!(fields(&r), json!({"magX": 1, "magY": {"raw": 2}}));
    }

    #[test]
    fn test_decode_rejects_noise() {
        assert!(decode_line(b"Emergency Stop").is_none());
        assert!(decode_line(b"deserializeJson() failed: InvalidInput").is_none());
        assert!(decode_line(b"} backwards {").is_none());
        assert!(decode_line(b"{\"truncated\": ").is_none());
        assert!(decode_line(b"   ").is_none());
        assert!(decode_line(b"[1, 2, 3]").is_none());
        assert!(decode_line(b"42").is_none());
    }

    #[test]
    fn test_decode_invalid_utf8_around_document() {
        let mut line = vec![0xFF, 0xFE];
        line.extend_from_slice(br#"{"ok": 1}"#);
        line.push(0xC3);
        let r = decode_line(&line).unwrap();
        assert_eq!(fields(&r), json!({"ok": 1}));
    }

    #[test]
    fn test_decode_round_trip() {
        let docs = [
            json!({}),
            json!({"a": 1, "b": -2.5, "c": "text", "d": [1, 2, 3], "e": {"f": null}}),
            json!({"batteryVoltage": 12.4, "fix": false}),
        ];
        for doc in docs {
            let text = serde_json::to_string(&doc).unwrap();
            let r = decode_line(text.as_bytes()).unwrap();
            assert_eq!(fields(&r), doc);
        }
    }

    #[test]
    fn test_read_line_reassembles_split_input() {
        let mut mock = MockTransport::new();
        mock.inject_read(b"{\"a\":");
        mock.inject_after(Duration::from_millis(20), b"1}\r\n{\"b\":2}\n");

        let mut reader = LineReader::new();
        let line = reader
            .read_line(&mut mock, Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(line, b"{\"a\":1}");

        // Second line was already buffered by the same read
        let line = reader
            .read_line(&mut mock, Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(line, b"{\"b\":2}");
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_read_line_timeout_keeps_partial() {
        let mut mock = MockTransport::new();
        mock.inject_read(b"{\"partial\"");

        let mut reader = LineReader::new();
        let start = Instant::now();
        let line = reader
            .read_line(&mut mock, Duration::from_millis(50))
            .unwrap();
        assert!(line.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(reader.pending(), 10);
    }

    #[test]
    fn test_read_message_skips_noise() {
        let mut mock = MockTransport::new();
        mock.inject_read(b"Starting\n\nEmergency Stop\n{\"numSats\": 5}\n");

        let mut reader = LineReader::new();
        let r = reader
            .read_message(&mut mock, Duration::from_millis(200))
            .unwrap()
            .unwrap();
        assert_eq!(r.get_i64("numSats"), Some(5));
        assert_eq!(reader.noise_lines(), 2);
    }

    #[test]
    fn test_read_message_all_noise_waits_full_timeout() {
        let mut mock = MockTransport::new();
        mock.inject_read(b"noise\n");
        mock.inject_after(Duration::from_millis(30), b"more noise\n");
        mock.inject_after(Duration::from_millis(60), b"{broken\n");

        let mut reader = LineReader::new();
        let timeout = Duration::from_millis(150);
        let start = Instant::now();
        let r = reader.read_message(&mut mock, timeout).unwrap();
        let elapsed = start.elapsed();
        assert!(r.is_none());
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(200));
    }

    #[test]
    fn test_unterminated_overflow_is_dropped() {
        let mut mock = MockTransport::new();
        mock.inject_read(&vec![b'x'; MAX_LINE_LEN + 10]);

        let mut reader = LineReader::new();
        let line = reader
            .read_line(&mut mock, Duration::from_millis(100))
            .unwrap();
        assert!(line.is_none());
        assert_eq!(reader.noise_lines(), 1);
        assert!(reader.pending() < MAX_LINE_LEN);

        // The next terminated line is still delivered
        reader.clear();
        mock.inject_read(b"{\"ok\":true}\n");
        let r = reader
            .read_message(&mut mock, Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(r.get_bool("ok"), Some(true));
    }

    #[test]
    fn test_overlong_terminated_line_is_dropped() {
        // Terminator lands in the same read that crosses the limit
        let mut input = vec![b'x'; MAX_LINE_LEN + 10];
        input.extend_from_slice(b"{\"hidden\":1}\n{\"ok\":true}\n");
        let mut mock = MockTransport::new();
        mock.inject_read(&input);

        let mut reader = LineReader::new();
        let r = reader
            .read_message(&mut mock, Duration::from_millis(500))
            .unwrap()
            .unwrap();
        assert_eq!(r.get_bool("ok"), Some(true));
        assert_eq!(r.get("hidden"), None);
        assert_eq!(reader.noise_lines(), 1);
    }

    #[test]
    fn test_line_split_over_many_reads() {
        let mut mock = MockTransport::new();
        let mut input = vec![b' '; 3 * READ_CHUNK + 17];
        input.extend_from_slice(b"{\"n\":3}\n");
        mock.inject_read(&input);

        let mut reader = LineReader::new();
        let line = reader
            .read_line(&mut mock, Duration::from_millis(100))
            .unwrap()
            .unwrap();
        assert_eq!(line.len(), 3 * READ_CHUNK + 17 + 7);
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_clear_discards_pending() {
        let mut mock = MockTransport::new();
        mock.inject_read(b"stale line\npartial");
        let mut reader = LineReader::new();
        let line = reader
            .read_line(&mut mock, Duration::from_millis(50))
            .unwrap();
        assert_eq!(line.as_deref(), Some(&b"stale line"[..]));
        assert_eq!(reader.clear(), 7);
        assert_eq!(reader.pending(), 0);
    }
}

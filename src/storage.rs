//! Persistence for poll samples
//!
//! A [`SampleSink`] receives the whole sample list once, when a poll session
//! stops. The file sink writes a pretty-printed JSON array and overwrites
//! whatever was there.

use crate::error::Result;
use crate::protocol::Response;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Destination for accumulated samples
pub trait SampleSink: Send {
    /// Store `samples`; returns a label (path or name) for reporting
    fn persist(&mut self, samples: &[Response]) -> Result<String>;
}

/// Default magnetometer log name: `maglog_<unix-seconds>.json`
pub fn default_log_path() -> PathBuf {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    PathBuf::from(format!("maglog_{secs}.json"))
}

/// Writes samples to a JSON file
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleSink for JsonFileSink {
    fn persist(&mut self, samples: &[Response]) -> Result<String> {
        let file = File::create(&self.path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, samples)?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        log::info!("Saved {} samples to {}", samples.len(), self.path.display());
        Ok(self.path.display().to_string())
    }
}

/// Keeps every persisted batch in memory; clones share the record
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<Response>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `persist` calls so far
    pub fn persist_calls(&self) -> usize {
        self.batches.lock().len()
    }

    /// Samples from the most recent `persist` call
    pub fn last_batch(&self) -> Option<Vec<Response>> {
        self.batches.lock().last().cloned()
    }
}

impl SampleSink for MemorySink {
    fn persist(&mut self, samples: &[Response]) -> Result<String> {
        let mut batches = self.batches.lock();
        batches.push(samples.to_vec());
        Ok(format!("memory#{}", batches.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn sample(x: f64) -> Response {
        match json!({"magX": x, "magY": -x}) {
            Value::Object(map) => Response::new(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_json_file_sink_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("maglog.json");
        let mut sink = JsonFileSink::new(&path);

        sink.persist(&[sample(1.0), sample(2.0), sample(3.0)]).unwrap();
        let label = sink.persist(&[sample(4.0)]).unwrap();
        assert_eq!(label, path.display().to_string());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  {"), "expected pretty output: {text}");
        let back: Vec<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, vec![json!({"magX": 4.0, "magY": -4.0})]);
    }

    #[test]
    fn test_json_file_sink_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        JsonFileSink::new(&path).persist(&[]).unwrap();
        let back: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_json_file_sink_bad_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonFileSink::new(dir.path().join("missing").join("log.json"));
        assert!(matches!(
            sink.persist(&[sample(1.0)]),
            Err(crate::error::Error::Io(_))
        ));
    }

    #[test]
    fn test_memory_sink_shares_record() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();
        assert_eq!(handle.persist(&[sample(1.0)]).unwrap(), "memory#1");
        assert_eq!(sink.persist_calls(), 1);
        assert_eq!(sink.last_batch().unwrap().len(), 1);
    }

    #[test]
    fn test_default_log_path_shape() {
        let name = default_log_path().display().to_string();
        assert!(name.starts_with("maglog_"));
        assert!(name.ends_with(".json"));
        assert!(name["maglog_".len()..name.len() - 5].parse::<u64>().is_ok());
    }
}

//! Repeating command/response exchange with guaranteed flush on stop
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start──▶ Running ──cancel──▶ Cancelling ──stop──▶ Stopped
//!                    └──────────────stop─────────────────────▲
//! ```
//!
//! The worker runs at a fixed rate measured from the start of each
//! iteration. The cancel flag is checked at the top of every iteration and
//! between sleep slices, so a stop takes at most one interval plus one
//! exchange timeout. Samples decoded before the flag was seen are kept and
//! handed to the sink exactly once.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::link::Link;
use crate::protocol::{Command, Response};
use crate::storage::SampleSink;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Longest uninterrupted sleep between cancel checks
const SLEEP_SLICE: Duration = Duration::from_millis(20);

/// Field added to each sample when timestamping is on
pub const TIMESTAMP_KEY: &str = "_ts";

/// Called with every accepted sample, on the worker thread
pub type Observer = Box<dyn FnMut(&Response) + Send>;

/// Poll timing and sample options
#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    /// Time between iteration starts
    pub interval: Duration,
    /// Per-exchange response timeout
    pub timeout: Duration,
    /// Add `_ts` (unix milliseconds) to each sample
    pub timestamp_samples: bool,
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            timestamp_samples: false,
        }
    }

    /// Interval and timestamping from `[poll]`, timeout from `[exchange]`
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.poll.interval(), config.exchange.timeout())
            .with_timestamps(config.poll.timestamp_samples)
    }

    pub fn with_timestamps(mut self, enabled: bool) -> Self {
        self.timestamp_samples = enabled;
        self
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Running,
    Cancelling,
    Stopped,
}

/// Outcome of a stopped session
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    /// Samples persisted
    pub samples: usize,
    /// Exchanges that timed out
    pub gaps: u64,
    /// Transport errors (the loop ends on the first)
    pub errors: u64,
    /// Label returned by the sink
    pub persisted: String,
    /// Time from start to stop
    pub elapsed: Duration,
}

#[derive(Default)]
struct Progress {
    samples: Vec<Response>,
    gaps: u64,
    errors: u64,
}

/// Cloneable handle that cancels a session from any thread
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Background poll loop over a shared [`Link`]
pub struct PollSession {
    link: Arc<Link>,
    command: Command,
    options: PollOptions,
    observer: Option<Observer>,
    sink: Box<dyn SampleSink>,
    state: PollState,
    progress: Arc<Mutex<Progress>>,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    started_at: Option<Instant>,
}

impl PollSession {
    /// Create an idle session; `sink` receives the samples on stop
    pub fn new(
        link: Arc<Link>,
        command: Command,
        options: PollOptions,
        sink: Box<dyn SampleSink>,
    ) -> Self {
        Self {
            link,
            command,
            options,
            observer: None,
            sink,
            state: PollState::Idle,
            progress: Arc::new(Mutex::new(Progress::default())),
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            started_at: None,
        }
    }

    /// Register a per-sample callback (only before start)
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&Response) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Spawn the worker thread
    pub fn start(&mut self) -> Result<()> {
        if self.state != PollState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot start a poll session in state {:?}",
                self.state
            )));
        }
        if self.options.interval.is_zero() {
            return Err(Error::InvalidParameter(
                "poll interval must be non-zero".into(),
            ));
        }

        let worker = Worker {
            link: Arc::clone(&self.link),
            command: self.command.clone(),
            options: self.options,
            observer: self.observer.take(),
            progress: Arc::clone(&self.progress),
            cancel: Arc::clone(&self.cancel),
        };

        let handle = thread::Builder::new()
            .name(format!("poll-{}", self.command.intent().name()))
            .spawn(move || worker.run())?;

        info!(
            "Polling {} every {:?}",
            self.command.intent(),
            self.options.interval
        );
        self.worker = Some(handle);
        self.started_at = Some(Instant::now());
        self.state = PollState::Running;
        Ok(())
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Whether the worker loop has exited (cancelled or ended by an error)
    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Handle for cancelling from another thread (signal handlers, observers)
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancel))
    }

    /// Request the worker to finish; does not wait
    pub fn cancel(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if self.state == PollState::Running {
            self.state = PollState::Cancelling;
        }
    }

    /// Snapshot of the samples accumulated so far
    pub fn samples(&self) -> Vec<Response> {
        self.progress.lock().samples.clone()
    }

    /// Cancel, join the worker and persist every sample once
    pub fn stop(&mut self) -> Result<PollReport> {
        match self.state {
            PollState::Running | PollState::Cancelling => {}
            state => {
                return Err(Error::InvalidState(format!(
                    "cannot stop a poll session in state {state:?}"
                )));
            }
        }

        self.cancel();
        let joined = self.worker.take().map(|h| h.join());
        self.state = PollState::Stopped;

        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        let progress = self.progress.lock();

        // Worker is joined; samples are persisted even after a panic
        let persisted = self.sink.persist(&progress.samples)?;
        if let Some(Err(_)) = joined {
            error!("Poll worker for {} panicked", self.command.intent());
            return Err(Error::ThreadPanic);
        }

        let report = PollReport {
            samples: progress.samples.len(),
            gaps: progress.gaps,
            errors: progress.errors,
            persisted,
            elapsed,
        };
        info!(
            "Poll of {} stopped: {} samples, {} gaps, {} errors",
            self.command.intent(),
            report.samples,
            report.gaps,
            report.errors
        );
        Ok(report)
    }
}

impl Drop for PollSession {
    fn drop(&mut self) {
        if matches!(self.state, PollState::Running | PollState::Cancelling)
            && let Err(e) = self.stop()
        {
            error!("Failed to stop poll session on drop: {}", e);
        }
    }
}

struct Worker {
    link: Arc<Link>,
    command: Command,
    options: PollOptions,
    observer: Option<Observer>,
    progress: Arc<Mutex<Progress>>,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    fn run(mut self) {
        debug!("Poll worker started");

        while !self.cancel.load(Ordering::Relaxed) {
            let iteration_start = Instant::now();

            match self.link.exchange(&self.command, self.options.timeout) {
                Ok(Some(response)) => self.accept(response),
                Ok(None) => {
                    let gaps = {
                        let mut progress = self.progress.lock();
                        progress.gaps += 1;
                        progress.gaps
                    };
                    warn!(
                        "No response to {} within {:?} ({} gaps)",
                        self.command.intent(),
                        self.options.timeout,
                        gaps
                    );
                }
                Err(e) => {
                    self.progress.lock().errors += 1;
                    error!("Poll exchange failed, ending loop: {}", e);
                    break;
                }
            }

            self.sleep_until(iteration_start + self.options.interval);
        }

        debug!("Poll worker exiting");
    }

    fn accept(&mut self, response: Response) {
        let response = if self.options.timestamp_samples {
            response.with_field(TIMESTAMP_KEY, json!(unix_millis()))
        } else {
            response
        };

        // Recorded before the observer sees it
        match self.observer.as_mut() {
            Some(observer) => {
                self.progress.lock().samples.push(response.clone());
                observer(&response);
            }
            None => self.progress.lock().samples.push(response),
        }
    }

    /// Sleep in slices until `deadline` or cancellation
    fn sleep_until(&self, deadline: Instant) {
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

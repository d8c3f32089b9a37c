//! Typed operations on the OpenMover controller
//!
//! Thin layer over a shared [`Link`]: each method builds one command, and
//! either waits for the reply (intents 1, 6, 9) or writes it
//! fire-and-forget. Parameter checks happen before anything is written.

use crate::config::Config;
use crate::error::Result;
use crate::link::Link;
use crate::poll::{PollOptions, PollSession};
use crate::protocol::{Command, MagSample, Response, StatusSnapshot, StoredCoordinates};
use crate::storage::SampleSink;
use crate::track;
use crate::waypoint::WaypointSet;
use std::path::Path;
use std::sync::Arc;

/// Controller facade
pub struct Platform {
    link: Arc<Link>,
    /// Send altitude with uploaded waypoints
    include_altitude: bool,
}

impl Platform {
    pub fn new(link: Arc<Link>) -> Self {
        Self {
            link,
            include_altitude: false,
        }
    }

    /// Open the configured transport and apply the waypoint policy
    pub fn connect(config: &Config) -> Result<Self> {
        let link = Arc::new(Link::open(config)?);
        Ok(Self::new(link).with_altitude(config.waypoints.include_altitude))
    }

    pub fn with_altitude(mut self, include: bool) -> Self {
        self.include_altitude = include;
        self
    }

    pub fn link(&self) -> &Arc<Link> {
        &self.link
    }

    fn request(&self, command: &Command) -> Result<Option<Response>> {
        self.link.exchange_default(command)
    }

    /// Stored waypoint table as the controller sent it (intent 1)
    pub fn fetch_coordinates_raw(&self) -> Result<Option<Response>> {
        self.request(&Command::fetch_coordinates())
    }

    /// Stored waypoint table, flattened (intent 1)
    pub fn fetch_coordinates(&self) -> Result<Option<StoredCoordinates>> {
        self.fetch_coordinates_raw()?.map(|r| r.parse()).transpose()
    }

    /// Fetch the stored table and persist it as a one-element batch
    ///
    /// Returns the sink's label, or `None` (nothing persisted) when the
    /// controller did not answer.
    pub fn save_coordinates(&self, sink: &mut dyn SampleSink) -> Result<Option<String>> {
        let Some(reply) = self.fetch_coordinates_raw()? else {
            return Ok(None);
        };
        let saved = sink.persist(std::slice::from_ref(&reply))?;
        log::info!("Saved stored coordinates to {}", saved);
        Ok(Some(saved))
    }

    pub fn start_navigation(&self) -> Result<()> {
        log::info!("Starting navigation");
        self.link.send(&Command::start_navigation())
    }

    /// Hand motor control to the serial link (`true`) or back to the controller
    pub fn set_control_mode(&self, enabled: bool) -> Result<()> {
        log::info!(
            "Serial motor control {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.link.send(&Command::set_control_mode(enabled))
    }

    pub fn set_motor_pwm(&self, left: i32, right: i32) -> Result<()> {
        let command = Command::set_motor_pwm(left, right)?;
        self.link.send(&command)
    }

    pub fn stop_motors(&self) -> Result<()> {
        self.set_motor_pwm(0, 0)
    }

    /// Bulk waypoint upload (intent 5)
    ///
    /// Altitude is stripped unless the platform was built with
    /// [`with_altitude(true)`](Self::with_altitude).
    pub fn upload_waypoints(&self, waypoints: &WaypointSet) -> Result<()> {
        let command = if self.include_altitude {
            Command::upload_coordinates(waypoints)?
        } else {
            Command::upload_coordinates(&waypoints.clone().without_altitude())?
        };
        log::info!(
            "Uploading {} waypoints (speed {}, range {})",
            waypoints.len(),
            waypoints.speed(),
            waypoints.range()
        );
        self.link.send(&command)
    }

    /// Parse a KML track and upload it; nothing is written if parsing fails
    ///
    /// Returns the number of waypoints sent. When altitude is not sent, it
    /// is dropped before validation, so tracks mixing `lon,lat` and
    /// `lon,lat,alt` tuples are accepted.
    pub fn upload_track<P: AsRef<Path>>(&self, path: P, speed: f64, range: f64) -> Result<usize> {
        let mut waypoints = track::parse_file(path)?;
        if !self.include_altitude {
            for w in &mut waypoints {
                w.alt = None;
            }
        }
        let set = WaypointSet::new(waypoints, speed, range)?;
        self.upload_waypoints(&set)?;
        Ok(set.len())
    }

    /// Legacy upload (intent 0) of a KML track as a flat float sequence
    pub fn upload_track_legacy<P: AsRef<Path>>(&self, path: P) -> Result<usize> {
        let text = std::fs::read_to_string(path)?;
        let values = track::parse_flat(&text)?;
        let command = Command::legacy_upload(&values)?;
        log::info!("Uploading {} values (legacy)", values.len());
        self.link.send(&command)?;
        Ok(values.len())
    }

    /// Raw status document (intent 6)
    pub fn status_raw(&self) -> Result<Option<Response>> {
        self.request(&Command::get_status())
    }

    /// Typed status snapshot (intent 6)
    pub fn status(&self) -> Result<Option<StatusSnapshot>> {
        self.status_raw()?.map(|r| r.parse()).transpose()
    }

    pub fn goto(&self, lat: f64, lon: f64, speed: f64, range: f64) -> Result<()> {
        let command = Command::goto(lat, lon, speed, range)?;
        log::info!("Goto lat={} lon={} speed={} range={}", lat, lon, speed, range);
        self.link.send(&command)
    }

    pub fn calibrate_compass(&self) -> Result<()> {
        log::info!("Starting compass calibration");
        self.link.send(&Command::calibrate_compass())
    }

    /// One magnetometer reading (intent 9)
    pub fn mag_sample(&self) -> Result<Option<MagSample>> {
        self.request(&Command::log_magnetometer())?
            .map(|r| r.parse())
            .transpose()
    }

    pub fn set_motor_bias(&self, left: f64, right: f64) -> Result<()> {
        let command = Command::set_motor_bias(left, right)?;
        self.link.send(&command)
    }

    /// Send any command, waiting for a reply only if its intent has one
    pub fn raw(&self, command: &Command) -> Result<Option<Response>> {
        if command.intent().expects_response() {
            self.request(command)
        } else {
            self.link.send(command)?;
            Ok(None)
        }
    }

    /// Start polling status (intent 6)
    pub fn start_status_poll(
        &self,
        options: PollOptions,
        sink: Box<dyn SampleSink>,
    ) -> Result<PollSession> {
        self.start_poll(Command::get_status(), options, sink)
    }

    /// Start logging magnetometer samples (intent 9)
    pub fn start_mag_log(
        &self,
        options: PollOptions,
        sink: Box<dyn SampleSink>,
    ) -> Result<PollSession> {
        self.start_poll(Command::log_magnetometer(), options, sink)
    }

    fn start_poll(
        &self,
        command: Command,
        options: PollOptions,
        sink: Box<dyn SampleSink>,
    ) -> Result<PollSession> {
        let mut session = PollSession::new(Arc::clone(&self.link), command, options, sink);
        session.start()?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::{JsonFileSink, MemorySink};
    use crate::transport::mock::{MockReply, MockTransport};
    use crate::waypoint::Waypoint;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn platform(mock: &MockTransport) -> Platform {
        Platform::new(Arc::new(Link::new(
            Box::new(mock.clone()),
            Duration::from_millis(100),
        )))
    }

    fn sent(mock: &MockTransport) -> Vec<Value> {
        mock.get_writes()
            .iter()
            .map(|w| serde_json::from_slice(w).unwrap())
            .collect()
    }

    #[test]
    fn test_fire_and_forget_commands() {
        let mock = MockTransport::new();
        let p = platform(&mock);
        p.start_navigation().unwrap();
        p.set_control_mode(false).unwrap();
        p.set_motor_pwm(-100, 255).unwrap();
        p.stop_motors().unwrap();
        p.goto(52.0, 4.3, 1.0, 2.0).unwrap();
        p.calibrate_compass().unwrap();
        p.set_motor_bias(0.9, 1.1).unwrap();

        assert_eq!(
            sent(&mock),
            vec![
                json!({"intent": 2}),
                json!({"intent": 3, "setStatus": false}),
                json!({"intent": 4, "leftPWM": -100, "rightPWM": 255}),
                json!({"intent": 4, "leftPWM": 0, "rightPWM": 0}),
                json!({"intent": 7, "lat": 52.0, "lon": 4.3, "speed": 1.0, "range": 2.0}),
                json!({"intent": 8}),
                json!({"intent": 10, "biasL": 0.9, "biasR": 1.1}),
            ]
        );
    }

    #[test]
    fn test_invalid_pwm_writes_nothing() {
        let mock = MockTransport::new();
        let p = platform(&mock);
        assert!(matches!(
            p.set_motor_pwm(256, 0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(mock.get_written().is_empty());
    }

    #[test]
    fn test_status_typed() {
        let mock = MockTransport::with_responder(|_| {
            Some(MockReply::now(
                &b"{\"batteryVoltage\":12.1,\"numSats\":6,\"fix\":true}\n"[..],
            ))
        });
        let p = platform(&mock);
        let status = p.status().unwrap().unwrap();
        assert_eq!(status.battery_voltage, Some(12.1));
        assert_eq!(status.num_sats, Some(6));
        assert_eq!(status.heading, None);
    }

    #[test]
    fn test_requests_time_out_to_none() {
        let mock = MockTransport::new();
        let p = platform(&mock);
        assert!(p.mag_sample().unwrap().is_none());
        assert!(p.fetch_coordinates().unwrap().is_none());
    }

    #[test]
    fn test_upload_strips_altitude_by_default() {
        let mock = MockTransport::new();
        let set = WaypointSet::new(
            vec![
                Waypoint::with_altitude(1.0, 2.0, 7.0),
                Waypoint::with_altitude(3.0, 4.0, 8.0),
            ],
            5.0,
            6.0,
        )
        .unwrap();

        let stripped = platform(&mock);
        stripped.upload_waypoints(&set).unwrap();
        Platform::new(Arc::clone(stripped.link()))
            .with_altitude(true)
            .upload_waypoints(&set)
            .unwrap();

        let docs = sent(&mock);
        assert_eq!(
            docs[0],
            json!({"intent": 5, "coordinates": [2, 5.0, 6.0, 1.0, 2.0, 3.0, 4.0]})
        );
        assert_eq!(
            docs[1],
            json!({"intent": 5, "coordinates": [2, 5.0, 6.0, 1.0, 2.0, 7.0, 3.0, 4.0, 8.0]})
        );
    }

    #[test]
    fn test_upload_track_bad_file_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.kml");
        std::fs::write(&path, "<kml></kml>").unwrap();

        let mock = MockTransport::new();
        let err = platform(&mock).upload_track(&path, 1.0, 1.0).unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert!(mock.get_written().is_empty());
    }

    #[test]
    fn test_fetch_coordinates_nested_rows() {
        let mock = MockTransport::with_responder(|_| {
            Some(MockReply::now(
                &b"{\"coordinates\":[[4.35,52.01],[4.36,52.02]]}\n"[..],
            ))
        });
        let p = platform(&mock);

        let stored = p.fetch_coordinates().unwrap().unwrap();
        assert_eq!(stored.coordinates, vec![4.35, 52.01, 4.36, 52.02]);

        let raw = p.fetch_coordinates_raw().unwrap().unwrap();
        assert_eq!(
            raw.into_value(),
            json!({"coordinates": [[4.35, 52.01], [4.36, 52.02]]})
        );
    }

    #[test]
    fn test_save_coordinates_overwrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coords.json");
        std::fs::write(&path, "[{\"old\": true}, {\"old\": true}]").unwrap();

        let mock = MockTransport::with_responder(|_| {
            Some(MockReply::now(&b"{\"coordinates\":[1,4.35,52.01]}\n"[..]))
        });
        let p = platform(&mock);
        let mut sink = JsonFileSink::new(&path);

        let saved = p.save_coordinates(&mut sink).unwrap();
        assert_eq!(saved, Some(path.display().to_string()));
        let docs: Vec<Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(docs, vec![json!({"coordinates": [1, 4.35, 52.01]})]);
        assert_eq!(sent(&mock), vec![json!({"intent": 1})]);
    }

    #[test]
    fn test_save_coordinates_without_reply_persists_nothing() {
        let mock = MockTransport::new();
        let sink = MemorySink::new();
        let saved = platform(&mock)
            .save_coordinates(&mut sink.clone())
            .unwrap();
        assert_eq!(saved, None);
        assert_eq!(sink.persist_calls(), 0);
    }

    #[test]
    fn test_raw_respects_intent() {
        let mock = MockTransport::with_responder(|line| {
            line.starts_with(b"{\"intent\":9")
                .then(|| MockReply::now(&b"{\"magX\":3}\n"[..]))
        });
        let p = platform(&mock);
        let r = p
            .raw(&Command::from_json(r#"{"intent": 9}"#).unwrap())
            .unwrap();
        assert_eq!(r.unwrap().get_i64("magX"), Some(3));

        let start = std::time::Instant::now();
        assert!(p.raw(&Command::start_navigation()).unwrap().is_none());
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}

//! Waypoint payload encoding for the bulk upload command (intent 5)
//!
//! # Payload Layout
//!
//! ```text
//! ┌───────┬───────┬───────┬──────────────────┬──────────────────┬─────┐
//! │ count │ speed │ range │ lon0, lat0[,alt0]│ lon1, lat1[,alt1]│ ... │
//! └───────┴───────┴───────┴──────────────────┴──────────────────┴─────┘
//! ```
//!
//! `count` is the number of coordinates (not values). The order is fixed by
//! the controller's parser and must not change. Coordinates are copied
//! verbatim: no scaling to fixed point, no truncation.

use crate::error::{Error, Result};
use serde_json::{Value, json};

/// One geographic coordinate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub lon: f64,
    pub lat: f64,
    pub alt: Option<f64>,
}

impl Waypoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon,
            lat,
            alt: None,
        }
    }

    pub fn with_altitude(lon: f64, lat: f64, alt: f64) -> Self {
        Self {
            lon,
            lat,
            alt: Some(alt),
        }
    }

    fn is_finite(&self) -> bool {
        self.lon.is_finite() && self.lat.is_finite() && self.alt.is_none_or(f64::is_finite)
    }
}

impl From<(f64, f64)> for Waypoint {
    fn from((lon, lat): (f64, f64)) -> Self {
        Waypoint::new(lon, lat)
    }
}

impl From<(f64, f64, f64)> for Waypoint {
    fn from((lon, lat, alt): (f64, f64, f64)) -> Self {
        Waypoint::with_altitude(lon, lat, alt)
    }
}

/// Values per coordinate in the encoded payload
fn components_per_waypoint(coordinates: &[Waypoint]) -> Result<usize> {
    let with_alt = coordinates.iter().filter(|w| w.alt.is_some()).count();
    match with_alt {
        0 => Ok(2),
        n if n == coordinates.len() => Ok(3),
        n => Err(Error::InvalidParameter(format!(
            "{n} of {} coordinates carry altitude; all or none must",
            coordinates.len()
        ))),
    }
}

/// Encode coordinates into `[count, speed, range, c0_a, c0_b, ...]`
///
/// The result has `3 + k * coordinates.len()` elements with `k` = 3 when
/// every coordinate carries altitude and 2 when none does.
pub fn encode(coordinates: &[Waypoint], speed: f64, range: f64) -> Result<Vec<f64>> {
    validate(coordinates, speed, range)?;
    let k = components_per_waypoint(coordinates)?;

    let mut out = Vec::with_capacity(3 + k * coordinates.len());
    out.push(coordinates.len() as f64);
    out.push(speed);
    out.push(range);
    for w in coordinates {
        out.push(w.lon);
        out.push(w.lat);
        if let Some(alt) = w.alt {
            out.push(alt);
        }
    }
    Ok(out)
}

fn validate(coordinates: &[Waypoint], speed: f64, range: f64) -> Result<()> {
    if coordinates.is_empty() {
        return Err(Error::InvalidParameter("no coordinates to encode".into()));
    }
    if !speed.is_finite() {
        return Err(Error::InvalidParameter(format!(
            "speed must be finite, got {speed}"
        )));
    }
    if !range.is_finite() {
        return Err(Error::InvalidParameter(format!(
            "range must be finite, got {range}"
        )));
    }
    if let Some(i) = coordinates.iter().position(|w| !w.is_finite()) {
        return Err(Error::InvalidParameter(format!(
            "coordinate {i} is not finite: {:?}",
            coordinates[i]
        )));
    }
    Ok(())
}

/// Coordinates plus mission parameters, ready for upload
#[derive(Debug, Clone, PartialEq)]
pub struct WaypointSet {
    waypoints: Vec<Waypoint>,
    speed: f64,
    range: f64,
}

impl WaypointSet {
    /// Validate and build a set
    pub fn new(waypoints: Vec<Waypoint>, speed: f64, range: f64) -> Result<Self> {
        validate(&waypoints, speed, range)?;
        components_per_waypoint(&waypoints)?;
        Ok(Self {
            waypoints,
            speed,
            range,
        })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn range(&self) -> f64 {
        self.range
    }

    /// Same set with altitude removed from every coordinate
    pub fn without_altitude(mut self) -> Self {
        for w in &mut self.waypoints {
            w.alt = None;
        }
        self
    }

    /// Flat numeric payload
    pub fn encode(&self) -> Result<Vec<f64>> {
        encode(&self.waypoints, self.speed, self.range)
    }

    /// Payload as a JSON array with `count` written as an integer
    pub fn payload_json(&self) -> Result<Value> {
        let flat = self.encode()?;
        let mut array = Vec::with_capacity(flat.len());
        array.push(json!(self.waypoints.len()));
        array.extend(flat[1..].iter().map(|&v| json!(v)));
        Ok(Value::Array(array))
    }
}

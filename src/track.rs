//! KML track file parsing
//!
//! Only the path geometry matters: the first
//! `<LineString>…<coordinates>…</coordinates>…</LineString>` block, or any
//! `<coordinates>` block when no LineString is present. Tuples are
//! whitespace-separated and their components comma-separated
//! (`lon,lat[,alt]`), as KML writes them.

use crate::error::{Error, Result};
use crate::waypoint::Waypoint;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

static LINE_STRING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<LineString>.*?<coordinates>(.*?)</coordinates>.*?</LineString>")
        .expect("LineString pattern is valid")
});

static COORDINATES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<coordinates>(.*?)</coordinates>").expect("coordinates pattern is valid")
});

fn first_capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Body of the coordinate block
fn coordinate_block(text: &str) -> Result<&str> {
    first_capture(&LINE_STRING_RE, text)
        .or_else(|| first_capture(&COORDINATES_RE, text))
        .ok_or_else(|| Error::Format("no <coordinates> block found".into()))
}

/// Parse KML text into waypoints
///
/// Tuples with fewer than two numeric components are skipped, as are
/// non-numeric tokens. Altitude is kept when present.
pub fn parse_str(text: &str) -> Result<Vec<Waypoint>> {
    let block = coordinate_block(text)?;

    let mut waypoints = Vec::new();
    for tuple in block.split_whitespace() {
        let values: Vec<f64> = tuple
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse::<f64>().ok())
            .collect();
        match values.as_slice() {
            [lon, lat] => waypoints.push(Waypoint::new(*lon, *lat)),
            [lon, lat, alt, ..] => waypoints.push(Waypoint::with_altitude(*lon, *lat, *alt)),
            _ => log::debug!("Skipping coordinate tuple '{}'", tuple),
        }
    }

    if waypoints.is_empty() {
        return Err(Error::Format("coordinate block contains no coordinates".into()));
    }
    Ok(waypoints)
}

/// Parse a KML file into waypoints
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Waypoint>> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let waypoints = parse_str(&text)?;
    log::info!(
        "Parsed {} coordinates from {}",
        waypoints.len(),
        path.display()
    );
    Ok(waypoints)
}

/// Flat float sequence from the coordinate block, `[lon, lat, alt, ...]`
///
/// Every numeric token in document order; used by the legacy upload.
pub fn parse_flat(text: &str) -> Result<Vec<f64>> {
    let block = coordinate_block(text)?;
    Ok(block
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect())
}

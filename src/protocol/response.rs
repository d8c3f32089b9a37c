//! Inbound documents
//!
//! The controller's replies are free-form JSON objects. [`Response`] keeps
//! them untyped; the typed views below pick out the fields known for the
//! answered intents and tolerate anything missing.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One decoded JSON object from the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Response {
    fields: Map<String, Value>,
}

impl Response {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.fields.get(key).and_then(Value::as_bool)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy of this response with one extra field (used for sample timestamps)
    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    /// Deserialize into a typed view
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.fields.clone()))?)
    }
}

/// Accept `true`/`false` or a number (non-zero is true)
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
        _ => None,
    })
}

/// Intent 6 reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(default)]
    pub battery_voltage: Option<f64>,
    #[serde(default)]
    pub num_sats: Option<u32>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub fix: Option<bool>,
    /// Milliseconds since the last GPS fix
    #[serde(default)]
    pub location_age: Option<u64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Degrees
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub serial_control: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub motor_handled: Option<bool>,
    #[serde(default, rename = "setPointL")]
    pub set_point_l: Option<f64>,
    #[serde(default, rename = "setPointR")]
    pub set_point_r: Option<f64>,
    #[serde(default, rename = "magXMin")]
    pub mag_x_min: Option<f64>,
    #[serde(default, rename = "magXMax")]
    pub mag_x_max: Option<f64>,
    #[serde(default, rename = "magYMin")]
    pub mag_y_min: Option<f64>,
    #[serde(default, rename = "magYMax")]
    pub mag_y_max: Option<f64>,
}

/// Intent 9 reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MagSample {
    #[serde(default, rename = "magX")]
    pub mag_x: Option<f64>,
    #[serde(default, rename = "magY")]
    pub mag_y: Option<f64>,
    #[serde(default, rename = "magXMin")]
    pub mag_x_min: Option<f64>,
    #[serde(default, rename = "magXMax")]
    pub mag_x_max: Option<f64>,
    #[serde(default, rename = "magYMin")]
    pub mag_y_min: Option<f64>,
    #[serde(default, rename = "magYMax")]
    pub mag_y_max: Option<f64>,
}

/// Every number in `value`, depth first; other leaves are ignored
fn collect_numbers(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Number(n) => out.extend(n.as_f64()),
        Value::Array(items) => items.iter().for_each(|v| collect_numbers(v, out)),
        _ => {}
    }
}

/// Accept a flat array, nested `[[lon, lat], ...]` rows, or anything in between
fn flattened_numbers<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(value) = value {
        collect_numbers(&value, &mut out);
    }
    Ok(out)
}

/// Intent 1 reply: the controller's stored waypoint table
///
/// The table's shape on the wire is firmware dependent (flat or one row per
/// coordinate); `coordinates` is always the flattened sequence. The raw
/// reply is available through [`Platform::fetch_coordinates_raw`].
///
/// [`Platform::fetch_coordinates_raw`]: crate::platform::Platform::fetch_coordinates_raw
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCoordinates {
    #[serde(default, deserialize_with = "flattened_numbers")]
    pub coordinates: Vec<f64>,
}

impl std::fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
            v.as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "N/A".to_string())
        }
        writeln!(f, "Battery Voltage: {} V", opt(&self.battery_voltage))?;
        writeln!(f, "GPS Satellites:  {}", opt(&self.num_sats))?;
        writeln!(f, "GPS Fix:         {}", opt(&self.fix))?;
        writeln!(f, "Location Age:    {} ms", opt(&self.location_age))?;
        writeln!(f, "Latitude:        {}", opt(&self.lat))?;
        writeln!(f, "Longitude:       {}", opt(&self.lon))?;
        writeln!(f, "Heading:         {}°", opt(&self.heading))?;
        writeln!(f, "Serial Control:  {}", opt(&self.serial_control))?;
        writeln!(f, "Motor Handled:   {}", opt(&self.motor_handled))?;
        writeln!(
            f,
            "Motor Setpoints: L={} R={}",
            opt(&self.set_point_l),
            opt(&self.set_point_r)
        )?;
        write!(
            f,
            "Mag Calibration: X[{}, {}] Y[{}, {}]",
            opt(&self.mag_x_min),
            opt(&self.mag_x_max),
            opt(&self.mag_y_min),
            opt(&self.mag_y_max)
        )
    }
}

//! Outbound commands
//!
//! | Intent | Fields | Answered |
//! |--------|--------|----------|
//! | 0 | `coordinates: [n, c...]` (legacy upload) | no |
//! | 1 | - | yes (stored coordinates) |
//! | 2 | - | no |
//! | 3 | `setStatus: bool` | no |
//! | 4 | `leftPWM, rightPWM: int` | no |
//! | 5 | `coordinates: [count, speed, range, lon, lat, ...]` | no |
//! | 6 | - | yes (status snapshot) |
//! | 7 | `lat, lon, speed, range: float` | no |
//! | 8 | - | no |
//! | 9 | - | yes (magnetometer sample) |
//! | 10 | `biasL, biasR: float` | no |

use crate::error::{Error, Result};
use crate::waypoint::WaypointSet;
use serde_json::{Map, Value, json};

/// Motor PWM limit accepted by the controller's H-bridge driver
pub const PWM_LIMIT: i32 = 255;

/// Key carrying the intent code in every outbound document
pub const INTENT_KEY: &str = "intent";

/// Command identifier understood by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Intent {
    /// Legacy coordinate upload without speed/range
    LegacyUpload = 0,
    FetchCoordinates = 1,
    StartNavigation = 2,
    SetControlMode = 3,
    SetMotorPwm = 4,
    UploadCoordinates = 5,
    GetStatus = 6,
    GotoCoordinate = 7,
    CalibrateCompass = 8,
    LogMagnetometer = 9,
    SetMotorBias = 10,
}

impl Intent {
    /// Wire code
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up an intent by wire code
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Intent::LegacyUpload,
            1 => Intent::FetchCoordinates,
            2 => Intent::StartNavigation,
            3 => Intent::SetControlMode,
            4 => Intent::SetMotorPwm,
            5 => Intent::UploadCoordinates,
            6 => Intent::GetStatus,
            7 => Intent::GotoCoordinate,
            8 => Intent::CalibrateCompass,
            9 => Intent::LogMagnetometer,
            10 => Intent::SetMotorBias,
            _ => return None,
        })
    }

    /// Whether the controller writes a document back for this intent
    pub const fn expects_response(self) -> bool {
        matches!(
            self,
            Intent::FetchCoordinates | Intent::GetStatus | Intent::LogMagnetometer
        )
    }

    pub const fn name(self) -> &'static str {
        match self {
            Intent::LegacyUpload => "legacy-upload",
            Intent::FetchCoordinates => "fetch-coordinates",
            Intent::StartNavigation => "start-navigation",
            Intent::SetControlMode => "set-control-mode",
            Intent::SetMotorPwm => "set-motor-pwm",
            Intent::UploadCoordinates => "upload-coordinates",
            Intent::GetStatus => "get-status",
            Intent::GotoCoordinate => "goto-coordinate",
            Intent::CalibrateCompass => "calibrate-compass",
            Intent::LogMagnetometer => "log-magnetometer",
            Intent::SetMotorBias => "set-motor-bias",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// One outbound command document
///
/// Fields are fixed at construction; the exchange engine only reads them.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    intent: Intent,
    fields: Map<String, Value>,
}

fn require_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{name} must be a finite number, got {value}"
        )))
    }
}

impl Command {
    fn bare(intent: Intent) -> Self {
        Self {
            intent,
            fields: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Intent 1: ask for the stored waypoint table
    pub fn fetch_coordinates() -> Self {
        Self::bare(Intent::FetchCoordinates)
    }

    /// Intent 2: run the stored waypoint mission
    pub fn start_navigation() -> Self {
        Self::bare(Intent::StartNavigation)
    }

    /// Intent 3: hand the motors to (or take them back from) the serial link
    pub fn set_control_mode(enabled: bool) -> Self {
        Self::bare(Intent::SetControlMode).with("setStatus", Value::Bool(enabled))
    }

    /// Intent 4: direct PWM for both motors, each in `-255..=255`
    pub fn set_motor_pwm(left: i32, right: i32) -> Result<Self> {
        for (name, value) in [("leftPWM", left), ("rightPWM", right)] {
            if !(-PWM_LIMIT..=PWM_LIMIT).contains(&value) {
                return Err(Error::InvalidParameter(format!(
                    "{name} must be within -{PWM_LIMIT}..={PWM_LIMIT}, got {value}"
                )));
            }
        }
        Ok(Self::bare(Intent::SetMotorPwm)
            .with("leftPWM", json!(left))
            .with("rightPWM", json!(right)))
    }

    /// Intent 5: bulk waypoint upload
    pub fn upload_coordinates(waypoints: &WaypointSet) -> Result<Self> {
        let payload = waypoints.payload_json()?;
        Ok(Self::bare(Intent::UploadCoordinates).with("coordinates", payload))
    }

    /// Intent 0: legacy upload, `[value_count, values...]`
    pub fn legacy_upload(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::InvalidParameter("no coordinates to upload".into()));
        }
        let mut array = Vec::with_capacity(values.len() + 1);
        array.push(json!(values.len()));
        for (i, &v) in values.iter().enumerate() {
            require_finite(&format!("coordinate[{i}]"), v)?;
            array.push(json!(v));
        }
        Ok(Self::bare(Intent::LegacyUpload).with("coordinates", Value::Array(array)))
    }

    /// Intent 6: request a status snapshot
    pub fn get_status() -> Self {
        Self::bare(Intent::GetStatus)
    }

    /// Intent 7: drive to a single coordinate
    pub fn goto(lat: f64, lon: f64, speed: f64, range: f64) -> Result<Self> {
        require_finite("lat", lat)?;
        require_finite("lon", lon)?;
        require_finite("speed", speed)?;
        require_finite("range", range)?;
        Ok(Self::bare(Intent::GotoCoordinate)
            .with("lat", json!(lat))
            .with("lon", json!(lon))
            .with("speed", json!(speed))
            .with("range", json!(range)))
    }

    /// Intent 8: start the compass calibration routine
    pub fn calibrate_compass() -> Self {
        Self::bare(Intent::CalibrateCompass)
    }

    /// Intent 9: request one magnetometer sample
    pub fn log_magnetometer() -> Self {
        Self::bare(Intent::LogMagnetometer)
    }

    /// Intent 10: per-motor bias correction
    pub fn set_motor_bias(left: f64, right: f64) -> Result<Self> {
        require_finite("biasL", left)?;
        require_finite("biasR", right)?;
        Ok(Self::bare(Intent::SetMotorBias)
            .with("biasL", json!(left))
            .with("biasR", json!(right)))
    }

    /// Build a command from a caller-supplied JSON object
    ///
    /// The object must carry a known integer `intent`; other fields are
    /// passed through untouched.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidParameter(
                "command must be a JSON object".into(),
            ));
        };
        let code = fields
            .remove(INTENT_KEY)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::InvalidParameter("missing integer \"intent\" field".into()))?;
        let intent = Intent::from_code(code)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown intent {code}")))?;
        Ok(Self { intent, fields })
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// Intent-specific field by name
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Full document as sent on the wire
    pub fn to_value(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert(INTENT_KEY.to_string(), json!(self.intent.code()));
        Value::Object(doc)
    }

    /// Encode as one newline-terminated line
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(&self.to_value())?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

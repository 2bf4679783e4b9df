use std::fmt;
use std::ops::Add;
use std::str::FromStr;

use time::OffsetDateTime;

/// Colour of the PM2.5 AQI indicator, reported by the device as `rgb(r,g,b)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub red: i32,
    pub green: i32,
    pub blue: i32,
}

impl Add for Rgb {
    type Output = Rgb;

    fn add(self, other: Rgb) -> Rgb {
        Rgb {
            red: self.red + other.red,
            green: self.green + other.green,
            blue: self.blue + other.blue,
        }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({},{},{})", self.red, self.green, self.blue)
    }
}

impl FromStr for Rgb {
    type Err = String;

    /// Parse the device's `rgb(61,234,0)` encoding
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix("rgb(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| format!("not an rgb(r,g,b) value: '{}'", s))?;

        let components = inner
            .split(',')
            .map(|c| c.trim().parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| format!("bad rgb component in '{}': {}", s, e))?;

        match components.as_slice() {
            [red, green, blue] => Ok(Rgb {
                red: *red,
                green: *green,
                blue: *blue,
            }),
            _ => Err(format!("expected three rgb components in '{}'", s)),
        }
    }
}

/// One physical particulate-matter sensor element.
///
/// Mass concentrations come in two calibrations (`cf_1` and `atm`) for three
/// size fractions; the `p_*_um` fields are particle counts per deciliter bin.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorData {
    pub pm1_0_cf_1: f64,
    pub pm1_0_atm: f64,
    pub pm2_5_cf_1: f64,
    pub pm2_5_atm: f64,
    pub pm10_0_cf_1: f64,
    pub pm10_0_atm: f64,
    pub p_0_3_um: f64,
    pub p_0_5_um: f64,
    pub p_1_0_um: f64,
    pub p_2_5_um: f64,
    pub p_5_0_um: f64,
    pub p_10_0_um: f64,
    pub pm2_5_aqi: i32,
    pub p25aqic: Rgb,
}

/// Auxiliary environmental suite of devices fitted with a BME680 gas sensor.
/// Present or absent as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct GasSensorData {
    pub temp_f: i32,
    pub humidity: i32,
    pub dewpoint_f: i32,
    pub pressure: f64,
    pub gas: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub time_of_reading: OffsetDateTime,
    pub current_temp_f: i32,
    pub current_humidity: i32,
    pub current_dewpoint_f: i32,
    pub pressure: f64,
    pub gas_sensor: Option<GasSensorData>,
    pub sensor: SensorData,
    pub sensor_b: Option<SensorData>,
}

/// Persistence class of a stored reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Latest instantaneous sample, overwritten on every save
    Current,
    /// Permanent history, one row per archive interval
    Archive,
    /// Latest rolling two-minute average, overwritten on every save
    TwoMinute,
}

impl RecordType {
    pub fn code(self) -> i32 {
        match self {
            RecordType::Current => 0,
            RecordType::Archive => 1,
            RecordType::TwoMinute => 2,
        }
    }

    /// Whether a save replaces the tier's previous row
    pub fn replaces_previous(self) -> bool {
        !matches!(self, RecordType::Archive)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordType::Current => "current",
            RecordType::Archive => "archive",
            RecordType::TwoMinute => "two-minute",
        };
        f.write_str(name)
    }
}

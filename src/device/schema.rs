/// The PurpleAir JSON schema, in both directions
///
/// Readings are parsed from the device's `/json` payload and encoded back
/// into the same field names, so consumers written against the device can
/// read from the proxy unmodified. Sensor B fields carry a `_b` suffix and
/// the gas suite fields a `_680` suffix.
use serde::ser::{Error as _, SerializeMap};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;
use time::macros::format_description;
use time::{PrimitiveDateTime, UtcOffset};

use crate::models::{GasSensorData, Reading, Rgb, SensorData};

type Json = Map<String, Value>;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("field '{field}' should be {expected}, found {found}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: Value,
    },

    #[error("bad DateTime '{value}': {reason}")]
    BadDateTime { value: String, reason: String },

    #[error("bad indicator colour: {0}")]
    BadRgb(String),

    #[error("gas sensor fields must all be present or all absent, missing {0}")]
    PartialGasSuite(String),
}

const GAS_SUITE_FIELDS: [&str; 5] = [
    "current_temp_f_680",
    "current_humidity_680",
    "current_dewpoint_f_680",
    "pressure_680",
    "gas_680",
];

fn field<'a>(j: &'a Json, name: &str) -> Result<&'a Value, SchemaError> {
    j.get(name)
        .ok_or_else(|| SchemaError::MissingField(name.to_string()))
}

fn get_f64(j: &Json, name: &str) -> Result<f64, SchemaError> {
    let value = field(j, name)?;
    value.as_f64().ok_or_else(|| SchemaError::WrongType {
        field: name.to_string(),
        expected: "a number",
        found: value.clone(),
    })
}

fn get_i32(j: &Json, name: &str) -> Result<i32, SchemaError> {
    let value = field(j, name)?;
    value
        .as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| SchemaError::WrongType {
            field: name.to_string(),
            expected: "an integer",
            found: value.clone(),
        })
}

fn get_str<'a>(j: &'a Json, name: &str) -> Result<&'a str, SchemaError> {
    let value = field(j, name)?;
    value.as_str().ok_or_else(|| SchemaError::WrongType {
        field: name.to_string(),
        expected: "a string",
        found: value.clone(),
    })
}

/// Parse the device's `2019/12/15T03:43:05z` timestamps (always UTC)
pub fn parse_device_datetime(value: &str) -> Result<time::OffsetDateTime, SchemaError> {
    let format = format_description!("[year]/[month]/[day]T[hour]:[minute]:[second]z");
    PrimitiveDateTime::parse(value, &format)
        .map(|dt| dt.assume_offset(UtcOffset::UTC))
        .map_err(|e| SchemaError::BadDateTime {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn format_device_datetime(dt: time::OffsetDateTime) -> Result<String, time::error::Format> {
    let format = format_description!("[year]/[month]/[day]T[hour]:[minute]:[second]z");
    dt.to_offset(UtcOffset::UTC).format(&format)
}

fn read_sensor(j: &Json, suffix: &str) -> Result<SensorData, SchemaError> {
    let key = |name: &str| format!("{}{}", name, suffix);
    let rgb_key = key("p25aqic");
    let p25aqic = get_str(j, &rgb_key)?
        .parse::<Rgb>()
        .map_err(SchemaError::BadRgb)?;

    Ok(SensorData {
        pm1_0_cf_1: get_f64(j, &key("pm1_0_cf_1"))?,
        pm1_0_atm: get_f64(j, &key("pm1_0_atm"))?,
        pm2_5_cf_1: get_f64(j, &key("pm2_5_cf_1"))?,
        pm2_5_atm: get_f64(j, &key("pm2_5_atm"))?,
        pm10_0_cf_1: get_f64(j, &key("pm10_0_cf_1"))?,
        pm10_0_atm: get_f64(j, &key("pm10_0_atm"))?,
        p_0_3_um: get_f64(j, &key("p_0_3_um"))?,
        p_0_5_um: get_f64(j, &key("p_0_5_um"))?,
        p_1_0_um: get_f64(j, &key("p_1_0_um"))?,
        p_2_5_um: get_f64(j, &key("p_2_5_um"))?,
        p_5_0_um: get_f64(j, &key("p_5_0_um"))?,
        p_10_0_um: get_f64(j, &key("p_10_0_um"))?,
        pm2_5_aqi: get_i32(j, &key("pm2.5_aqi"))?,
        p25aqic,
    })
}

fn read_gas_sensor(j: &Json) -> Result<Option<GasSensorData>, SchemaError> {
    let present = GAS_SUITE_FIELDS.iter().filter(|name| j.contains_key(**name)).count();
    if present == 0 {
        return Ok(None);
    }
    if let Some(missing) = GAS_SUITE_FIELDS.iter().find(|name| !j.contains_key(**name)) {
        return Err(SchemaError::PartialGasSuite(missing.to_string()));
    }

    Ok(Some(GasSensorData {
        temp_f: get_i32(j, "current_temp_f_680")?,
        humidity: get_i32(j, "current_humidity_680")?,
        dewpoint_f: get_i32(j, "current_dewpoint_f_680")?,
        pressure: get_f64(j, "pressure_680")?,
        gas: get_f64(j, "gas_680")?,
    }))
}

/// Build a reading from a device `/json` response body
///
/// Sensor B is read only when `pm1_0_cf_1_b` is present. Every field must be
/// of its expected numeric kind; a float where an integer belongs is an error.
pub fn parse_reading(j: &Json) -> Result<Reading, SchemaError> {
    Ok(Reading {
        time_of_reading: parse_device_datetime(get_str(j, "DateTime")?)?,
        current_temp_f: get_i32(j, "current_temp_f")?,
        current_humidity: get_i32(j, "current_humidity")?,
        current_dewpoint_f: get_i32(j, "current_dewpoint_f")?,
        pressure: get_f64(j, "pressure")?,
        gas_sensor: read_gas_sensor(j)?,
        sensor: read_sensor(j, "")?,
        sensor_b: if j.contains_key("pm1_0_cf_1_b") {
            Some(read_sensor(j, "_b")?)
        } else {
            None
        },
    })
}

fn write_sensor<M: SerializeMap>(map: &mut M, sensor: &SensorData, suffix: &str) -> Result<(), M::Error> {
    let key = |name: &str| format!("{}{}", name, suffix);
    map.serialize_entry(&key("pm1_0_cf_1"), &sensor.pm1_0_cf_1)?;
    map.serialize_entry(&key("pm1_0_atm"), &sensor.pm1_0_atm)?;
    map.serialize_entry(&key("p_0_3_um"), &sensor.p_0_3_um)?;
    map.serialize_entry(&key("pm2_5_cf_1"), &sensor.pm2_5_cf_1)?;
    map.serialize_entry(&key("pm2_5_atm"), &sensor.pm2_5_atm)?;
    map.serialize_entry(&key("p_0_5_um"), &sensor.p_0_5_um)?;
    map.serialize_entry(&key("pm10_0_cf_1"), &sensor.pm10_0_cf_1)?;
    map.serialize_entry(&key("pm10_0_atm"), &sensor.pm10_0_atm)?;
    map.serialize_entry(&key("p_1_0_um"), &sensor.p_1_0_um)?;
    map.serialize_entry(&key("p_2_5_um"), &sensor.p_2_5_um)?;
    map.serialize_entry(&key("p_5_0_um"), &sensor.p_5_0_um)?;
    map.serialize_entry(&key("p_10_0_um"), &sensor.p_10_0_um)?;
    map.serialize_entry(&key("pm2.5_aqi"), &sensor.pm2_5_aqi)?;
    map.serialize_entry(&key("p25aqic"), &sensor.p25aqic.to_string())?;
    Ok(())
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let date_time = format_device_datetime(self.time_of_reading).map_err(S::Error::custom)?;

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("DateTime", &date_time)?;
        map.serialize_entry("current_temp_f", &self.current_temp_f)?;
        map.serialize_entry("current_humidity", &self.current_humidity)?;
        map.serialize_entry("current_dewpoint_f", &self.current_dewpoint_f)?;
        map.serialize_entry("pressure", &self.pressure)?;
        if let Some(gas) = &self.gas_sensor {
            map.serialize_entry("current_temp_f_680", &gas.temp_f)?;
            map.serialize_entry("current_humidity_680", &gas.humidity)?;
            map.serialize_entry("current_dewpoint_f_680", &gas.dewpoint_f)?;
            map.serialize_entry("pressure_680", &gas.pressure)?;
            map.serialize_entry("gas_680", &gas.gas)?;
        }
        write_sensor(&mut map, &self.sensor, "")?;
        if let Some(sensor_b) = &self.sensor_b {
            write_sensor(&mut map, sensor_b, "_b")?;
        }
        map.end()
    }
}

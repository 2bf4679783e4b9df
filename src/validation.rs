/// Sanity checks applied to every reading before it is buffered or stored
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::models::{GasSensorData, Reading, SensorData};

/// Readings further than this from wall-clock time are rejected
pub const MAX_CLOCK_SKEW_SECS: i64 = 20;

/// Ratio beyond which two sensor elements are considered to disagree
const DISAGREEMENT_RATIO: f64 = 20.0;
/// Absolute difference below which a ratio disagreement is treated as noise
const DISAGREEMENT_FLOOR: f64 = 10.0;

/// Upper bound used by the diagnostic range check
const MAX_CHANNEL_VALUE: f64 = 10000.0;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("reading time {reading} is more than {MAX_CLOCK_SKEW_SECS}s from now ({now})")]
    TimeOutOfRange {
        reading: OffsetDateTime,
        now: OffsetDateTime,
    },

    #[error("{0} is not a finite number")]
    NotFinite(String),

    #[error("sensors disagree on {channel}: sensor a = {a}, sensor b = {b}")]
    SensorDisagreement {
        channel: &'static str,
        a: f64,
        b: f64,
    },
}

/// True if one value is more than twenty times the other and they differ by
/// at least 10.0. A zero on either side never counts as a disagreement.
pub fn twenty_fold_delta(a: f64, b: f64) -> bool {
    if a == 0.0 || b == 0.0 {
        return false;
    }
    (a > b * DISAGREEMENT_RATIO || b > a * DISAGREEMENT_RATIO) && (a - b).abs() >= DISAGREEMENT_FLOOR
}

/// Fails on the first channel of a sensor that is not a finite number
pub fn is_sensor_sane(sensor: &SensorData, suffix: &str) -> Result<(), ValidationError> {
    let channels = [
        ("pm1_0_cf_1", sensor.pm1_0_cf_1),
        ("pm1_0_atm", sensor.pm1_0_atm),
        ("pm2_5_cf_1", sensor.pm2_5_cf_1),
        ("pm2_5_atm", sensor.pm2_5_atm),
        ("pm10_0_cf_1", sensor.pm10_0_cf_1),
        ("pm10_0_atm", sensor.pm10_0_atm),
        ("p_0_3_um", sensor.p_0_3_um),
        ("p_0_5_um", sensor.p_0_5_um),
        ("p_1_0_um", sensor.p_1_0_um),
        ("p_2_5_um", sensor.p_2_5_um),
        ("p_5_0_um", sensor.p_5_0_um),
        ("p_10_0_um", sensor.p_10_0_um),
    ];
    match channels.iter().find(|(_, value)| !value.is_finite()) {
        Some((name, _)) => Err(ValidationError::NotFinite(format!("{}{}", name, suffix))),
        None => Ok(()),
    }
}

fn is_gas_sensor_sane(gas: &GasSensorData) -> Result<(), ValidationError> {
    if !gas.pressure.is_finite() {
        return Err(ValidationError::NotFinite("pressure_680".into()));
    }
    if !gas.gas.is_finite() {
        return Err(ValidationError::NotFinite("gas_680".into()));
    }
    Ok(())
}

/// Decide whether a freshly collected reading may be buffered and stored
///
/// Checks run in order and stop at the first failure: clock skew, the primary
/// environmental fields, the gas suite, each sensor element, and finally
/// agreement between sensor A and sensor B on the three cf_1 channels.
/// Value ranges are deliberately not checked here; see [`sanity_check_reading`].
pub fn validate(reading: &Reading, now: OffsetDateTime) -> Result<(), ValidationError> {
    let skew = reading.time_of_reading - now;
    if skew.abs() > Duration::seconds(MAX_CLOCK_SKEW_SECS) {
        return Err(ValidationError::TimeOutOfRange {
            reading: reading.time_of_reading,
            now,
        });
    }

    if !reading.pressure.is_finite() {
        return Err(ValidationError::NotFinite("pressure".into()));
    }

    if let Some(gas) = &reading.gas_sensor {
        is_gas_sensor_sane(gas)?;
    }

    is_sensor_sane(&reading.sensor, "")?;

    if let Some(sensor_b) = &reading.sensor_b {
        is_sensor_sane(sensor_b, "_b")?;

        let channels = [
            ("pm1_0_cf_1", reading.sensor.pm1_0_cf_1, sensor_b.pm1_0_cf_1),
            ("pm2_5_cf_1", reading.sensor.pm2_5_cf_1, sensor_b.pm2_5_cf_1),
            ("pm10_0_cf_1", reading.sensor.pm10_0_cf_1, sensor_b.pm10_0_cf_1),
        ];
        for (channel, a, b) in channels {
            if twenty_fold_delta(a, b) {
                return Err(ValidationError::SensorDisagreement { channel, a, b });
            }
        }
    }

    Ok(())
}

fn sanity_check_sensor(sensor: &SensorData, suffix: &str, problems: &mut Vec<String>) {
    let channels = [
        ("pm1_0_cf_1", sensor.pm1_0_cf_1),
        ("pm1_0_atm", sensor.pm1_0_atm),
        ("pm2_5_cf_1", sensor.pm2_5_cf_1),
        ("pm2_5_atm", sensor.pm2_5_atm),
        ("pm10_0_cf_1", sensor.pm10_0_cf_1),
        ("pm10_0_atm", sensor.pm10_0_atm),
        ("p_0_3_um", sensor.p_0_3_um),
        ("p_0_5_um", sensor.p_0_5_um),
        ("p_1_0_um", sensor.p_1_0_um),
        ("p_2_5_um", sensor.p_2_5_um),
        ("p_5_0_um", sensor.p_5_0_um),
        ("p_10_0_um", sensor.p_10_0_um),
        ("pm2.5_aqi", sensor.pm2_5_aqi as f64),
    ];
    for (name, value) in channels {
        if !(0.0..MAX_CHANNEL_VALUE).contains(&value) {
            problems.push(format!("insane {}{}: {}", name, suffix, value));
        }
    }
}

/// Range check used by the `--test` diagnostics, not by the sampling loop
///
/// # Returns
/// One message per out-of-range field; empty when the reading looks plausible
pub fn sanity_check_reading(reading: &Reading, now: OffsetDateTime) -> Vec<String> {
    let mut problems = Vec::new();

    // Device clocks run a little fast; allow two seconds into the future
    let latest = now + Duration::seconds(2);
    let earliest = now - Duration::seconds(60);
    if reading.time_of_reading <= earliest || reading.time_of_reading >= latest {
        problems.push(format!("insane time: {}", reading.time_of_reading));
    }
    if !(reading.current_temp_f > -40 && reading.current_temp_f < 160) {
        problems.push(format!("insane temp: {}", reading.current_temp_f));
    }
    if !(0..=100).contains(&reading.current_humidity) {
        problems.push(format!("insane humidity: {}", reading.current_humidity));
    }
    if !(reading.current_dewpoint_f > -40 && reading.current_dewpoint_f < 160) {
        problems.push(format!("insane dewpoint: {}", reading.current_dewpoint_f));
    }
    if !(reading.pressure > 900.0 && reading.pressure < 1084.0) {
        problems.push(format!("insane pressure: {}", reading.pressure));
    }

    sanity_check_sensor(&reading.sensor, "", &mut problems);
    if let Some(sensor_b) = &reading.sensor_b {
        sanity_check_sensor(sensor_b, "_b", &mut problems);
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_reading;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2020-06-01 12:00:00 UTC);

    #[test]
    fn twenty_fold_delta_needs_ratio_and_absolute_gap() {
        // 23x apart but both near the noise floor
        assert!(!twenty_fold_delta(0.58, 0.025));
        assert!(!twenty_fold_delta(0.05, 1.2));
        assert!(twenty_fold_delta(250.0, 2.0));
        assert!(twenty_fold_delta(2.0, 250.0));
        assert!(!twenty_fold_delta(30.0, 20.0));
    }

    #[test]
    fn twenty_fold_delta_ignores_zero() {
        assert!(!twenty_fold_delta(0.0, 5.0));
        assert!(!twenty_fold_delta(500.0, 0.0));
    }

    #[test]
    fn accepts_a_fresh_dual_sensor_reading() {
        let reading = test_reading(NOW - Duration::seconds(3));
        assert_eq!(validate(&reading, NOW), Ok(()));
    }

    #[test]
    fn rejects_stale_and_future_readings() {
        let stale = test_reading(NOW - Duration::seconds(21));
        assert!(matches!(
            validate(&stale, NOW),
            Err(ValidationError::TimeOutOfRange { .. })
        ));

        let future = test_reading(NOW + Duration::seconds(25));
        assert!(validate(&future, NOW).is_err());

        let edge = test_reading(NOW - Duration::seconds(20));
        assert!(validate(&edge, NOW).is_ok());
    }

    #[test]
    fn rejects_non_finite_channels() {
        let mut reading = test_reading(NOW);
        reading.sensor_b.as_mut().unwrap().p_2_5_um = f64::NAN;
        assert_eq!(
            validate(&reading, NOW),
            Err(ValidationError::NotFinite("p_2_5_um_b".into()))
        );

        let mut reading = test_reading(NOW);
        reading.pressure = f64::INFINITY;
        assert_eq!(
            validate(&reading, NOW),
            Err(ValidationError::NotFinite("pressure".into()))
        );
    }

    #[test]
    fn rejects_disagreeing_sensors() {
        let mut reading = test_reading(NOW);
        reading.sensor.pm2_5_cf_1 = 400.0;
        reading.sensor_b.as_mut().unwrap().pm2_5_cf_1 = 3.5;

        let err = validate(&reading, NOW).unwrap_err();
        assert_eq!(
            err,
            ValidationError::SensorDisagreement {
                channel: "pm2_5_cf_1",
                a: 400.0,
                b: 3.5
            }
        );
        assert!(err.to_string().contains("pm2_5_cf_1"));
        assert!(err.to_string().contains("400"));
    }

    #[test]
    fn ignores_disagreement_without_sensor_b() {
        let mut reading = test_reading(NOW);
        reading.sensor.pm2_5_cf_1 = 400.0;
        reading.sensor_b = None;
        assert!(validate(&reading, NOW).is_ok());
    }

    #[test]
    fn production_gate_does_not_range_check() {
        let mut reading = test_reading(NOW);
        reading.current_humidity = 250;
        reading.sensor.p_0_3_um = 50000.0;
        reading.sensor_b.as_mut().unwrap().p_0_3_um = 50000.0;
        assert!(validate(&reading, NOW).is_ok());

        let problems = sanity_check_reading(&reading, NOW);
        assert_eq!(problems.len(), 4, "{:?}", problems);
    }

    #[test]
    fn diagnostic_range_check_passes_plausible_reading() {
        let mut reading = test_reading(NOW - Duration::seconds(5));
        reading.pressure = 1013.2;
        assert!(sanity_check_reading(&reading, NOW).is_empty());
    }
}

/// Utility functions for timestamps and log formatting
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

/// Format a timestamp for human-readable logging
///
/// Renders as `YYYY-MM-DD HH:MM:SS (unix seconds)`, falling back to the
/// default representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    match dt.format(&format) {
        Ok(text) => format!("{} ({})", text, dt.unix_timestamp()),
        Err(_) => dt.to_string(),
    }
}

/// Round a unix timestamp down to a multiple of `interval_secs`
pub fn align_down(timestamp: i64, interval_secs: i64) -> i64 {
    timestamp.div_euclid(interval_secs) * interval_secs
}

/// Archive timestamp for an archive event handled at `now`
///
/// The five second grace guards against the loop waking slightly before the
/// archive boundary.
pub fn archive_timestamp(now: OffsetDateTime, archive_interval_secs: i64) -> i64 {
    align_down((now + Duration::seconds(5)).unix_timestamp(), archive_interval_secs)
}

#[cfg(test)]
pub fn test_reading(time_of_reading: OffsetDateTime) -> crate::models::Reading {
    use crate::models::{Reading, Rgb, SensorData};

    Reading {
        time_of_reading,
        current_temp_f: 100,
        current_humidity: 90,
        current_dewpoint_f: 80,
        pressure: 1234.5,
        gas_sensor: None,
        sensor: SensorData {
            pm1_0_cf_1: 0.1,
            pm1_0_atm: 0.2,
            p_0_3_um: 0.3,
            pm2_5_cf_1: 0.4,
            pm2_5_atm: 0.5,
            p_0_5_um: 0.6,
            pm10_0_cf_1: 0.7,
            pm10_0_atm: 0.8,
            p_1_0_um: 0.9,
            p_2_5_um: 1.0,
            p_5_0_um: 1.25,
            p_10_0_um: 1.5,
            pm2_5_aqi: 9,
            p25aqic: Rgb {
                red: 10,
                green: 15,
                blue: 20,
            },
        },
        sensor_b: Some(SensorData {
            pm1_0_cf_1: 1.1,
            pm1_0_atm: 1.2,
            p_0_3_um: 1.3,
            pm2_5_cf_1: 1.4,
            pm2_5_atm: 1.5,
            p_0_5_um: 1.6,
            pm10_0_cf_1: 1.7,
            pm10_0_atm: 1.8,
            p_1_0_um: 1.9,
            p_2_5_um: 2.0,
            p_5_0_um: 2.25,
            p_10_0_um: 2.5,
            pm2_5_aqi: 19,
            p25aqic: Rgb {
                red: 110,
                green: 120,
                blue: 130,
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn aligns_down_to_interval() {
        assert_eq!(align_down(1_591_012_799, 300), 1_591_012_500);
        assert_eq!(align_down(1_591_012_800, 300), 1_591_012_800);
    }

    #[test]
    fn archive_timestamp_tolerates_early_wakeup() {
        // Woke three seconds before the 12:05 boundary
        let now = datetime!(2020-06-01 12:04:57 UTC);
        let expected = datetime!(2020-06-01 12:05:00 UTC).unix_timestamp();
        assert_eq!(archive_timestamp(now, 300), expected);

        // Woke late, still the same boundary
        let now = datetime!(2020-06-01 12:05:20 UTC);
        assert_eq!(archive_timestamp(now, 300), expected);
    }

    #[test]
    fn formats_datetime_for_logs() {
        let dt = datetime!(2019-12-15 03:43:05 UTC);
        assert_eq!(format_datetime(&dt), "2019-12-15 03:43:05 (1576381385)");
    }
}

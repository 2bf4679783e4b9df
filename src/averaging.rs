/// Averaging of buffered readings into a single aggregate reading
use crate::models::{GasSensorData, Reading, Rgb, SensorData};

/// Divide an integer sum by the sample count, rounding halves up
///
/// This is `floor(sum / count + 0.5)`, so 5.5 becomes 6 and -10.5 becomes -10.
pub fn round_half_up(sum: i64, count: usize) -> i32 {
    (sum as f64 / count as f64 + 0.5).floor() as i32
}

/// Average a window of readings into one reading
///
/// Float fields are plain means, integer fields (including the RGB indicator
/// components) go through [`round_half_up`]. The result carries the timestamp
/// of the last reading in the window. Optional parts survive only when every
/// reading in the window has them: one reading without sensor B or without the
/// gas suite drops that part from the aggregate entirely.
///
/// # Arguments
/// * `readings` - Window of readings, oldest first
///
/// # Returns
/// The averaged reading, or None if the window is empty
pub fn compute_avg(readings: &[Reading]) -> Option<Reading> {
    let last = readings.last()?;
    let count = readings.len();
    let n = count as f64;

    // Environmental sums
    let temp_sum: i64 = readings.iter().map(|r| r.current_temp_f as i64).sum();
    let humid_sum: i64 = readings.iter().map(|r| r.current_humidity as i64).sum();
    let dewpoint_sum: i64 = readings.iter().map(|r| r.current_dewpoint_f as i64).sum();
    let press_sum: f64 = readings.iter().map(|r| r.pressure).sum();

    // All-or-nothing: gas suite and sensor B only when every sample has them
    let gas_sensors: Option<Vec<&GasSensorData>> =
        readings.iter().map(|r| r.gas_sensor.as_ref()).collect();
    let sensors_b: Option<Vec<&SensorData>> =
        readings.iter().map(|r| r.sensor_b.as_ref()).collect();
    let sensors_a: Vec<&SensorData> = readings.iter().map(|r| &r.sensor).collect();

    Some(Reading {
        time_of_reading: last.time_of_reading,
        current_temp_f: round_half_up(temp_sum, count),
        current_humidity: round_half_up(humid_sum, count),
        current_dewpoint_f: round_half_up(dewpoint_sum, count),
        pressure: press_sum / n,
        gas_sensor: gas_sensors.map(|gas| average_gas_sensor(&gas)),
        sensor: average_sensor(&sensors_a),
        sensor_b: sensors_b.map(|sensors| average_sensor(&sensors)),
    })
}

fn average_gas_sensor(samples: &[&GasSensorData]) -> GasSensorData {
    let count = samples.len();
    let n = count as f64;

    let temp_sum: i64 = samples.iter().map(|g| g.temp_f as i64).sum();
    let humid_sum: i64 = samples.iter().map(|g| g.humidity as i64).sum();
    let dewpoint_sum: i64 = samples.iter().map(|g| g.dewpoint_f as i64).sum();
    let press_sum: f64 = samples.iter().map(|g| g.pressure).sum();
    let gas_sum: f64 = samples.iter().map(|g| g.gas).sum();

    GasSensorData {
        temp_f: round_half_up(temp_sum, count),
        humidity: round_half_up(humid_sum, count),
        dewpoint_f: round_half_up(dewpoint_sum, count),
        pressure: press_sum / n,
        gas: gas_sum / n,
    }
}

fn average_sensor(samples: &[&SensorData]) -> SensorData {
    let count = samples.len();
    let n = count as f64;
    let mean = |field: fn(&SensorData) -> f64| samples.iter().map(|s| field(s)).sum::<f64>() / n;

    let aqi_sum: i64 = samples.iter().map(|s| s.pm2_5_aqi as i64).sum();
    let rgb_sum = samples
        .iter()
        .map(|s| s.p25aqic)
        .fold(Rgb::default(), |acc, rgb| acc + rgb);

    SensorData {
        pm1_0_cf_1: mean(|s| s.pm1_0_cf_1),
        pm1_0_atm: mean(|s| s.pm1_0_atm),
        pm2_5_cf_1: mean(|s| s.pm2_5_cf_1),
        pm2_5_atm: mean(|s| s.pm2_5_atm),
        pm10_0_cf_1: mean(|s| s.pm10_0_cf_1),
        pm10_0_atm: mean(|s| s.pm10_0_atm),
        p_0_3_um: mean(|s| s.p_0_3_um),
        p_0_5_um: mean(|s| s.p_0_5_um),
        p_1_0_um: mean(|s| s.p_1_0_um),
        p_2_5_um: mean(|s| s.p_2_5_um),
        p_5_0_um: mean(|s| s.p_5_0_um),
        p_10_0_um: mean(|s| s.p_10_0_um),
        pm2_5_aqi: round_half_up(aqi_sum, count),
        p25aqic: Rgb {
            red: round_half_up(rgb_sum.red as i64, count),
            green: round_half_up(rgb_sum.green as i64, count),
            blue: round_half_up(rgb_sum.blue as i64, count),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_reading;
    use time::macros::datetime;
    use time::Duration;

    fn float_eq(v1: f64, v2: f64) -> bool {
        (v1 - v2).abs() < 0.0001
    }

    #[test]
    fn rounds_halves_up() {
        assert_eq!(round_half_up(11, 2), 6);
        assert_eq!(round_half_up(150, 2), 75);
        assert_eq!(round_half_up(10, 3), 3);
        assert_eq!(round_half_up(11, 3), 4);
        assert_eq!(round_half_up(-21, 2), -10);
    }

    #[test]
    fn empty_window_has_no_average() {
        assert!(compute_avg(&[]).is_none());
    }

    #[test]
    fn singleton_window_is_unchanged() {
        let reading = test_reading(datetime!(2019-12-15 03:43:05 UTC));
        let avg = compute_avg(std::slice::from_ref(&reading)).unwrap();
        assert_eq!(avg, reading);
    }

    #[test]
    fn averages_two_readings() {
        let now = datetime!(2020-06-01 12:00:00 UTC);
        let mut reading1 = test_reading(now - Duration::seconds(15));
        let mut reading2 = test_reading(now);

        reading1.current_temp_f = 50;
        reading2.current_temp_f = 100;
        reading1.current_humidity = 40;
        reading2.current_humidity = 20;
        reading1.current_dewpoint_f = 30;
        reading2.current_dewpoint_f = 40;
        reading1.pressure = 1026.0;
        reading2.pressure = 1024.0;

        reading1.sensor.pm1_0_cf_1 = 0.12;
        reading2.sensor.pm1_0_cf_1 = 0.36;
        reading1.sensor.pm1_0_atm = 0.10;
        reading2.sensor.pm1_0_atm = 0.00;
        reading1.sensor.p_0_3_um = 195.13;
        reading2.sensor.p_0_3_um = 195.17;
        reading1.sensor.pm2_5_cf_1 = 0.58;
        reading2.sensor.pm2_5_cf_1 = 0.78;
        reading1.sensor.pm2_5_atm = 0.77;
        reading2.sensor.pm2_5_atm = 0.88;
        reading1.sensor.p_0_5_um = 51.85;
        reading2.sensor.p_0_5_um = 47.28;
        reading1.sensor.pm10_0_cf_1 = 0.88;
        reading2.sensor.pm10_0_cf_1 = 1.03;
        reading1.sensor.pm10_0_atm = 0.99;
        reading2.sensor.pm10_0_atm = 1.05;
        reading1.sensor.pm2_5_aqi = 9;
        reading2.sensor.pm2_5_aqi = 2;
        reading1.sensor.p25aqic = Rgb {
            red: 249,
            green: 149,
            blue: 49,
        };
        reading2.sensor.p25aqic = Rgb {
            red: 200,
            green: 100,
            blue: 10,
        };

        let avg = compute_avg(&[reading1, reading2.clone()]).unwrap();

        assert_eq!(avg.time_of_reading, reading2.time_of_reading);
        assert_eq!(avg.current_temp_f, 75);
        assert_eq!(avg.current_humidity, 30);
        assert_eq!(avg.current_dewpoint_f, 35);
        assert!(float_eq(avg.pressure, 1025.0));

        assert!(float_eq(avg.sensor.pm1_0_cf_1, 0.24));
        assert!(float_eq(avg.sensor.pm1_0_atm, 0.05));
        assert!(float_eq(avg.sensor.p_0_3_um, 195.15));
        assert!(float_eq(avg.sensor.pm2_5_cf_1, 0.68));
        assert!(float_eq(avg.sensor.pm2_5_atm, 0.825));
        assert!(float_eq(avg.sensor.p_0_5_um, 49.565));
        assert!(float_eq(avg.sensor.pm10_0_cf_1, 0.955));
        assert!(float_eq(avg.sensor.pm10_0_atm, 1.02));

        assert_eq!(avg.sensor.pm2_5_aqi, 6);
        assert_eq!(
            avg.sensor.p25aqic,
            Rgb {
                red: 225,
                green: 125,
                blue: 30
            }
        );
    }

    #[test]
    fn drops_sensor_b_unless_every_reading_has_it() {
        let now = datetime!(2020-06-01 12:00:00 UTC);
        let with_b = test_reading(now - Duration::seconds(30));
        let mut without_b = test_reading(now);
        without_b.sensor_b = None;

        let avg = compute_avg(&[with_b.clone(), without_b]).unwrap();
        assert!(avg.sensor_b.is_none());

        let avg = compute_avg(&[with_b.clone(), with_b]).unwrap();
        assert!(avg.sensor_b.is_some());
    }

    #[test]
    fn drops_gas_suite_unless_every_reading_has_it() {
        let now = datetime!(2020-06-01 12:00:00 UTC);
        let mut first = test_reading(now - Duration::seconds(30));
        let mut second = test_reading(now);
        first.gas_sensor = Some(GasSensorData {
            temp_f: 70,
            humidity: 41,
            dewpoint_f: 45,
            pressure: 1010.0,
            gas: 120.5,
        });
        second.gas_sensor = Some(GasSensorData {
            temp_f: 72,
            humidity: 42,
            dewpoint_f: 46,
            pressure: 1012.0,
            gas: 121.5,
        });

        let avg = compute_avg(&[first.clone(), second.clone()]).unwrap();
        let gas = avg.gas_sensor.unwrap();
        assert_eq!(gas.temp_f, 71);
        assert_eq!(gas.humidity, 42);
        assert_eq!(gas.dewpoint_f, 46);
        assert!(float_eq(gas.pressure, 1011.0));
        assert!(float_eq(gas.gas, 121.0));

        second.gas_sensor = None;
        let avg = compute_avg(&[first, second]).unwrap();
        assert!(avg.gas_sensor.is_none());
    }
}

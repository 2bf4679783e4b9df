/// Reassembly of readings from joined `reading`/`sensor` rows
///
/// Rows arrive ordered by timestamp and then sensor index. A sensor A row
/// starts a reading; a sensor B row with the same timestamp completes it.
/// A reading without a sensor B row is emitted when the next sensor A row (or
/// the end of the rows) shows up.
use std::mem;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use futures_util::Stream;
use time::OffsetDateTime;
use tokio_postgres::{Client, Row, RowStream};

use crate::database::StoreError;
use crate::models::{GasSensorData, Reading, Rgb, SensorData};

pub const SENSOR_A: i32 = 0;
pub const SENSOR_B: i32 = 1;

/// One row of the reading/sensor join
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRow {
    pub sensor: i32,
    /// Shared fields plus this row's channels as `sensor`; `sensor_b` is None
    pub reading: Reading,
}

impl SensorRow {
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        let ts: i64 = row.try_get("ts")?;
        let time_of_reading =
            OffsetDateTime::from_unix_timestamp(ts).map_err(|_| StoreError::BadTimestamp(ts))?;

        let gas_sensor = match (
            row.try_get::<_, Option<i32>>("current_temp_f_680")?,
            row.try_get::<_, Option<i32>>("current_humidity_680")?,
            row.try_get::<_, Option<i32>>("current_dewpoint_f_680")?,
            row.try_get::<_, Option<f64>>("pressure_680")?,
            row.try_get::<_, Option<f64>>("gas_680")?,
        ) {
            (Some(temp_f), Some(humidity), Some(dewpoint_f), Some(pressure), Some(gas)) => {
                Some(GasSensorData {
                    temp_f,
                    humidity,
                    dewpoint_f,
                    pressure,
                    gas,
                })
            }
            (None, None, None, None, None) => None,
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "partial gas sensor columns at {}",
                    ts
                )))
            }
        };

        Ok(SensorRow {
            sensor: row.try_get("sensor")?,
            reading: Reading {
                time_of_reading,
                current_temp_f: row.try_get("current_temp_f")?,
                current_humidity: row.try_get("current_humidity")?,
                current_dewpoint_f: row.try_get("current_dewpoint_f")?,
                pressure: row.try_get("pressure")?,
                gas_sensor,
                sensor: SensorData {
                    pm1_0_cf_1: row.try_get("pm1_0_cf_1")?,
                    pm1_0_atm: row.try_get("pm1_0_atm")?,
                    pm2_5_cf_1: row.try_get("pm2_5_cf_1")?,
                    pm2_5_atm: row.try_get("pm2_5_atm")?,
                    pm10_0_cf_1: row.try_get("pm10_0_cf_1")?,
                    pm10_0_atm: row.try_get("pm10_0_atm")?,
                    p_0_3_um: row.try_get("p_0_3_um")?,
                    p_0_5_um: row.try_get("p_0_5_um")?,
                    p_1_0_um: row.try_get("p_1_0_um")?,
                    p_2_5_um: row.try_get("p_2_5_um")?,
                    p_5_0_um: row.try_get("p_5_0_um")?,
                    p_10_0_um: row.try_get("p_10_0_um")?,
                    pm2_5_aqi: row.try_get("pm2_5_aqi")?,
                    p25aqic: Rgb {
                        red: row.try_get("p25aqi_red")?,
                        green: row.try_get("p25aqi_green")?,
                        blue: row.try_get("p25aqi_blue")?,
                    },
                },
                sensor_b: None,
            },
        })
    }
}

#[derive(Debug)]
enum PairState {
    AwaitingFirstRow,
    HavePendingRow(Reading),
}

#[derive(Debug)]
pub struct RowPairer {
    state: PairState,
}

impl Default for RowPairer {
    fn default() -> Self {
        RowPairer {
            state: PairState::AwaitingFirstRow,
        }
    }
}

impl RowPairer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next row; returns a reading once one is complete
    ///
    /// A sensor B row that does not follow a sensor A row with the same
    /// timestamp means the tables are corrupt, and is an error.
    pub fn push(&mut self, row: SensorRow) -> Result<Option<Reading>, StoreError> {
        let state = mem::replace(&mut self.state, PairState::AwaitingFirstRow);
        match (state, row.sensor) {
            (PairState::AwaitingFirstRow, SENSOR_A) => {
                self.state = PairState::HavePendingRow(row.reading);
                Ok(None)
            }
            (PairState::HavePendingRow(pending), SENSOR_A) => {
                self.state = PairState::HavePendingRow(row.reading);
                Ok(Some(pending))
            }
            (PairState::HavePendingRow(mut pending), SENSOR_B) => {
                if pending.time_of_reading != row.reading.time_of_reading {
                    return Err(StoreError::Corrupt(format!(
                        "sensor b row at {} follows sensor a row at {}",
                        row.reading.time_of_reading.unix_timestamp(),
                        pending.time_of_reading.unix_timestamp()
                    )));
                }
                pending.sensor_b = Some(row.reading.sensor);
                Ok(Some(pending))
            }
            (PairState::AwaitingFirstRow, SENSOR_B) => Err(StoreError::Corrupt(format!(
                "sensor b row at {} without a sensor a row",
                row.reading.time_of_reading.unix_timestamp()
            ))),
            (_, other) => Err(StoreError::Corrupt(format!(
                "unknown sensor index {} at {}",
                other,
                row.reading.time_of_reading.unix_timestamp()
            ))),
        }
    }

    /// The reading still pending once the rows run out
    pub fn finish(&mut self) -> Option<Reading> {
        match mem::replace(&mut self.state, PairState::AwaitingFirstRow) {
            PairState::HavePendingRow(reading) => Some(reading),
            PairState::AwaitingFirstRow => None,
        }
    }
}

/// Readings produced lazily from a query's row stream
///
/// Stops after the first error.
pub struct ReadingStream {
    // Owns the session the rows are streamed over
    _client: Client,
    rows: Pin<Box<RowStream>>,
    pairer: RowPairer,
    finished: bool,
}

impl ReadingStream {
    pub fn new(client: Client, rows: RowStream) -> Self {
        ReadingStream {
            _client: client,
            rows: Box::pin(rows),
            pairer: RowPairer::new(),
            finished: false,
        }
    }
}

impl Stream for ReadingStream {
    type Item = Result<Reading, StoreError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.finished {
                return Poll::Ready(None);
            }
            match ready!(this.rows.as_mut().poll_next(cx)) {
                Some(Ok(row)) => match SensorRow::from_row(&row).and_then(|r| this.pairer.push(r)) {
                    Ok(Some(reading)) => return Poll::Ready(Some(Ok(reading))),
                    Ok(None) => continue,
                    Err(e) => {
                        this.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    this.finished = true;
                    return Poll::Ready(Some(Err(e.into())));
                }
                None => {
                    this.finished = true;
                    return Poll::Ready(this.pairer.finish().map(Ok));
                }
            }
        }
    }
}

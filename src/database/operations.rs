/// Database operations for storing and retrieving readings
use async_trait::async_trait;
use futures_util::StreamExt;
use log::debug;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Transaction};

use crate::database::connection::connect;
use crate::database::rows::{ReadingStream, SENSOR_A, SENSOR_B};
use crate::database::{ReadingStore, Store, StoreError};
use crate::models::{Reading, RecordType, SensorData};

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS reading (
        record_type            INTEGER NOT NULL,
        ts                     BIGINT NOT NULL,
        current_temp_f         INTEGER NOT NULL,
        current_humidity       INTEGER NOT NULL,
        current_dewpoint_f     INTEGER NOT NULL,
        pressure               DOUBLE PRECISION NOT NULL,
        current_temp_f_680     INTEGER,
        current_humidity_680   INTEGER,
        current_dewpoint_f_680 INTEGER,
        pressure_680           DOUBLE PRECISION,
        gas_680                DOUBLE PRECISION,
        PRIMARY KEY (record_type, ts));
    CREATE TABLE IF NOT EXISTS sensor (
        record_type  INTEGER NOT NULL,
        ts           BIGINT NOT NULL,
        sensor       INTEGER NOT NULL,
        pm1_0_cf_1   DOUBLE PRECISION NOT NULL,
        pm1_0_atm    DOUBLE PRECISION NOT NULL,
        pm2_5_cf_1   DOUBLE PRECISION NOT NULL,
        pm2_5_atm    DOUBLE PRECISION NOT NULL,
        pm10_0_cf_1  DOUBLE PRECISION NOT NULL,
        pm10_0_atm   DOUBLE PRECISION NOT NULL,
        p_0_3_um     DOUBLE PRECISION NOT NULL,
        p_0_5_um     DOUBLE PRECISION NOT NULL,
        p_1_0_um     DOUBLE PRECISION NOT NULL,
        p_2_5_um     DOUBLE PRECISION NOT NULL,
        p_5_0_um     DOUBLE PRECISION NOT NULL,
        p_10_0_um    DOUBLE PRECISION NOT NULL,
        pm2_5_aqi    INTEGER NOT NULL,
        p25aqi_red   INTEGER NOT NULL,
        p25aqi_green INTEGER NOT NULL,
        p25aqi_blue  INTEGER NOT NULL,
        PRIMARY KEY (record_type, ts, sensor),
        FOREIGN KEY (record_type, ts) REFERENCES reading (record_type, ts));";

const DELETE_SENSORS: &str = "DELETE FROM sensor WHERE record_type = $1";
const DELETE_READINGS: &str = "DELETE FROM reading WHERE record_type = $1";

const INSERT_READING: &str = "
    INSERT INTO reading (record_type, ts, current_temp_f, current_humidity, current_dewpoint_f,
        pressure, current_temp_f_680, current_humidity_680, current_dewpoint_f_680, pressure_680,
        gas_680)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)";

const INSERT_SENSOR: &str = "
    INSERT INTO sensor (record_type, ts, sensor, pm1_0_cf_1, pm1_0_atm, pm2_5_cf_1, pm2_5_atm,
        pm10_0_cf_1, pm10_0_atm, p_0_3_um, p_0_5_um, p_1_0_um, p_2_5_um, p_5_0_um, p_10_0_um,
        pm2_5_aqi, p25aqi_red, p25aqi_green, p25aqi_blue)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)";

macro_rules! select_readings {
    ($filter:literal) => {
        concat!(
            "SELECT r.ts, r.current_temp_f, r.current_humidity, r.current_dewpoint_f, r.pressure,
                    r.current_temp_f_680, r.current_humidity_680, r.current_dewpoint_f_680,
                    r.pressure_680, r.gas_680, s.sensor, s.pm1_0_cf_1, s.pm1_0_atm, s.pm2_5_cf_1,
                    s.pm2_5_atm, s.pm10_0_cf_1, s.pm10_0_atm, s.p_0_3_um, s.p_0_5_um, s.p_1_0_um,
                    s.p_2_5_um, s.p_5_0_um, s.p_10_0_um, s.pm2_5_aqi, s.p25aqi_red, s.p25aqi_green,
                    s.p25aqi_blue
               FROM reading r
               JOIN sensor s ON s.record_type = r.record_type AND s.ts = r.ts
              WHERE r.record_type = $1 AND ",
            $filter,
            " ORDER BY r.ts, s.sensor"
        )
    };
}

// The limit is applied to readings in the sub-select, so a dual-sensor
// reading is never cut in half. A NULL limit means no limit.
const SELECT_READINGS: &str = select_readings!(
    "r.ts IN (SELECT ts FROM reading
               WHERE record_type = $1
                 AND ts > $2
                 AND ($3::BIGINT IS NULL OR ts <= $3)
               ORDER BY ts
               LIMIT $4)"
);

// One statement, so a concurrent replace is seen either wholly or not at all
const SELECT_LATEST: &str =
    select_readings!("r.ts = (SELECT MAX(ts) FROM reading WHERE record_type = $1)");

const SELECT_EARLIEST_TS: &str = "SELECT MIN(ts) FROM reading WHERE record_type = $1";

async fn save_sensor(
    transaction: &Transaction<'_>,
    record_type: i32,
    ts: i64,
    sensor_index: i32,
    sensor: &SensorData,
) -> Result<(), StoreError> {
    transaction
        .execute(
            INSERT_SENSOR,
            &[
                &record_type,
                &ts,
                &sensor_index,
                &sensor.pm1_0_cf_1,
                &sensor.pm1_0_atm,
                &sensor.pm2_5_cf_1,
                &sensor.pm2_5_atm,
                &sensor.pm10_0_cf_1,
                &sensor.pm10_0_atm,
                &sensor.p_0_3_um,
                &sensor.p_0_5_um,
                &sensor.p_1_0_um,
                &sensor.p_2_5_um,
                &sensor.p_5_0_um,
                &sensor.p_10_0_um,
                &sensor.pm2_5_aqi,
                &sensor.p25aqic.red,
                &sensor.p25aqic.green,
                &sensor.p25aqic.blue,
            ],
        )
        .await?;
    Ok(())
}

async fn query_readings(
    client: Client,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
) -> Result<ReadingStream, StoreError> {
    let rows = client.query_raw(sql, params.iter().copied()).await?;
    Ok(ReadingStream::new(client, rows))
}

impl Store {
    async fn connect(&self) -> Result<Client, StoreError> {
        connect(&self.database_url, &self.schema).await
    }

    /// Create the schema and both tables if they do not exist yet
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        let client = self.connect().await?;
        client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}; {}",
                self.schema, CREATE_TABLES
            ))
            .await?;
        Ok(())
    }

    /// Drop the schema and everything in it
    pub async fn drop_schema(&self) -> Result<(), StoreError> {
        let client = self.connect().await?;
        client
            .batch_execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .await?;
        Ok(())
    }

    /// Persist a reading under a record type
    ///
    /// Current and two-minute records replace whatever the tier held before,
    /// in the same transaction as the insert. Archive records are only ever
    /// inserted; a second archive record with the same timestamp fails on the
    /// primary key.
    pub async fn save(&self, record_type: RecordType, reading: &Reading) -> Result<(), StoreError> {
        let mut client = self.connect().await?;
        let transaction = client.transaction().await?;

        let code = record_type.code();
        let ts = reading.time_of_reading.unix_timestamp();

        if record_type.replaces_previous() {
            transaction.execute(DELETE_SENSORS, &[&code]).await?;
            transaction.execute(DELETE_READINGS, &[&code]).await?;
        }

        let gas = reading.gas_sensor.as_ref();
        transaction
            .execute(
                INSERT_READING,
                &[
                    &code,
                    &ts,
                    &reading.current_temp_f,
                    &reading.current_humidity,
                    &reading.current_dewpoint_f,
                    &reading.pressure,
                    &gas.map(|g| g.temp_f),
                    &gas.map(|g| g.humidity),
                    &gas.map(|g| g.dewpoint_f),
                    &gas.map(|g| g.pressure),
                    &gas.map(|g| g.gas),
                ],
            )
            .await?;

        save_sensor(&transaction, code, ts, SENSOR_A, &reading.sensor).await?;
        if let Some(sensor_b) = &reading.sensor_b {
            save_sensor(&transaction, code, ts, SENSOR_B, sensor_b).await?;
        }

        transaction.commit().await?;
        Ok(())
    }

    /// Readings of a record type with `since_ts < ts <= max_ts`, oldest first
    ///
    /// Readings are reassembled as the rows stream in; `limit` caps the
    /// number of readings, not rows.
    pub async fn fetch(
        &self,
        record_type: RecordType,
        since_ts: i64,
        max_ts: Option<i64>,
        limit: Option<i64>,
    ) -> Result<ReadingStream, StoreError> {
        let client = self.connect().await?;
        let code = record_type.code();
        debug!(
            "Fetching {} readings: since_ts={} max_ts={:?} limit={:?}",
            record_type, since_ts, max_ts, limit
        );
        query_readings(client, SELECT_READINGS, &[&code, &since_ts, &max_ts, &limit]).await
    }

    /// The newest reading of a record type, if any
    pub async fn fetch_latest(&self, record_type: RecordType) -> Result<Option<Reading>, StoreError> {
        let client = self.connect().await?;
        let mut readings = query_readings(client, SELECT_LATEST, &[&record_type.code()]).await?;
        readings.next().await.transpose()
    }

    /// Timestamp of the oldest reading of a record type, if any
    pub async fn earliest_timestamp(&self, record_type: RecordType) -> Result<Option<i64>, StoreError> {
        let client = self.connect().await?;
        let earliest: Option<i64> = client
            .query_one(SELECT_EARLIEST_TS, &[&record_type.code()])
            .await?
            .try_get(0)?;
        Ok(earliest)
    }
}

#[async_trait]
impl ReadingStore for Store {
    async fn save(&self, record_type: RecordType, reading: &Reading) -> Result<(), StoreError> {
        Store::save(self, record_type, reading).await
    }
}

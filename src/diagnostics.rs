/// Operator diagnostics behind the `--test` and `--dump` flags
use futures_util::TryStreamExt;
use time::OffsetDateTime;
use tokio::time::{sleep, Duration};

use crate::averaging::compute_avg;
use crate::database::{Store, StoreError};
use crate::device::{parse_reading, ReadingSource};
use crate::models::{Reading, RecordType};
use crate::utils::format_datetime;
use crate::validation::{sanity_check_reading, validate};

/// Outcome of one diagnostic check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: &'static str,
    pub problems: Vec<String>,
}

impl CheckResult {
    fn new(name: &'static str, problems: Vec<String>) -> Self {
        CheckResult { name, problems }
    }

    pub fn passed(&self) -> bool {
        self.problems.is_empty()
    }

    fn print(&self) {
        if self.passed() {
            println!("{}....PASSED", self.name);
        } else {
            println!("{}....FAILED", self.name);
            for problem in &self.problems {
                println!("    {}", problem);
            }
        }
    }
}

/// Checks run against two live readings taken about a second apart
pub fn check_readings(first: &Reading, second: &Reading, now: OffsetDateTime) -> Vec<CheckResult> {
    let mut results = vec![CheckResult::new(
        "sanity_check_reading",
        sanity_check_reading(first, now),
    )];

    let validation = [first, second]
        .iter()
        .filter_map(|r| validate(r, now).err())
        .map(|e| e.to_string())
        .collect();
    results.push(CheckResult::new("validate", validation));

    let mut average_problems = Vec::new();
    match compute_avg(&[first.clone(), second.clone()]) {
        Some(avg) if avg.time_of_reading == second.time_of_reading => {}
        Some(avg) => average_problems.push(format!(
            "average is stamped {}, expected {}",
            format_datetime(&avg.time_of_reading),
            format_datetime(&second.time_of_reading)
        )),
        None => average_problems.push("no average for two readings".to_string()),
    }
    results.push(CheckResult::new("compute_avg", average_problems));

    let encoding_problems = match serde_json::to_value(first) {
        Ok(value) => match value.as_object().map(parse_reading) {
            Some(Ok(decoded)) if decoded == *first => Vec::new(),
            Some(Ok(_)) => vec!["encoded reading does not parse back unchanged".to_string()],
            Some(Err(e)) => vec![format!("encoded reading does not parse: {}", e)],
            None => vec!["encoded reading is not a JSON object".to_string()],
        },
        Err(e) => vec![format!("could not encode reading: {}", e)],
    };
    results.push(CheckResult::new("convert_to_json", encoding_problems));

    results
}

async fn save_then_fetch(
    store: &Store,
    record_type: RecordType,
    readings: &[&Reading],
) -> Result<Vec<Reading>, StoreError> {
    for reading in readings {
        store.save(record_type, reading).await?;
    }
    store
        .fetch(record_type, i64::MIN, None, None)
        .await?
        .try_collect()
        .await
}

fn expect_only(stored: Result<Vec<Reading>, StoreError>, expected: &Reading) -> Vec<String> {
    match stored {
        Ok(stored) if stored.len() != 1 => {
            vec![format!("expected one stored record, found {}", stored.len())]
        }
        Ok(stored) if stored[0] != *expected => {
            vec!["stored record does not read back unchanged".to_string()]
        }
        Ok(_) => Vec::new(),
        Err(e) => vec![e.to_string()],
    }
}

/// Round trips through `store`, which must start out empty
pub async fn check_store(store: &Store, first: &Reading, second: &Reading) -> Vec<CheckResult> {
    let archive = save_then_fetch(store, RecordType::Archive, &[first]).await;
    // The second current record replaces the first
    let current = save_then_fetch(store, RecordType::Current, &[first, second]).await;
    vec![
        CheckResult::new("db_archive_records", expect_only(archive, first)),
        CheckResult::new("db_current_records", expect_only(current, second)),
    ]
}

/// Run `check_store` in a throwaway schema next to the configured one
async fn check_scratch_store(store: &Store, first: &Reading, second: &Reading) -> Vec<CheckResult> {
    let schema = format!("purple_proxy_check_{}", std::process::id());
    let scratch = match store.with_schema(&schema) {
        Ok(scratch) => scratch,
        Err(e) => return vec![CheckResult::new("create_scratch_schema", vec![e.to_string()])],
    };

    // Left over from an interrupted run
    let _ = scratch.drop_schema().await;
    if let Err(e) = scratch.create_schema().await {
        return vec![CheckResult::new("create_scratch_schema", vec![e.to_string()])];
    }

    let results = check_store(&scratch, first, second).await;
    if let Err(e) = scratch.drop_schema().await {
        println!("could not drop scratch schema {}: {}", schema, e);
    }
    results
}

/// Collect two readings from the device and print PASSED/FAILED per check
///
/// The store checks run in a scratch schema; the configured one is not
/// touched.
///
/// # Returns
/// True if every check passed
pub async fn run_device_tests<S: ReadingSource>(source: &mut S, store: &Store) -> bool {
    print!("collect_two_readings_one_second_apart....");
    let first = source.fetch_reading_with_retry().await;
    // A second apart so the two readings carry different timestamps
    sleep(Duration::from_secs(1)).await;
    let second = source.fetch_reading_with_retry().await;

    let (first, second) = match (first, second) {
        (Ok(first), Ok(second)) => {
            println!("PASSED");
            (first, second)
        }
        (Err(e), _) | (_, Err(e)) => {
            println!("FAILED");
            println!("    {}", e);
            return false;
        }
    };

    let mut results = check_readings(&first, &second, OffsetDateTime::now_utc());
    results.extend(check_scratch_store(store, &first, &second).await);
    for result in &results {
        result.print();
    }
    results.iter().all(CheckResult::passed)
}

/// Print every stored record as one JSON object per line
pub async fn dump_database(store: &Store) -> Result<(), StoreError> {
    for record_type in [RecordType::Current, RecordType::TwoMinute, RecordType::Archive] {
        println!("# {} records", record_type);
        let mut readings = store.fetch(record_type, i64::MIN, None, None).await?;
        while let Some(reading) = readings.try_next().await? {
            match serde_json::to_string(&reading) {
                Ok(line) => println!("{}", line),
                Err(e) => println!("# could not encode {}: {}", format_datetime(&reading.time_of_reading), e),
            }
        }
    }
    Ok(())
}

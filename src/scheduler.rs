/// Event timing and the sampling loop
use std::time::Instant;

use log::{debug, error, info};
use time::{Duration, OffsetDateTime};

use crate::averaging::compute_avg;
use crate::database::ReadingStore;
use crate::device::ReadingSource;
use crate::models::{Reading, RecordType};
use crate::utils::{archive_timestamp, format_datetime};
use crate::validation::validate;

/// Width of the sliding window behind the two-minute record
const TWO_MINUTE_WINDOW_SECS: i64 = 120;

const NANOS_PER_SEC: i128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Poll,
    Archive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextEvent {
    pub event: Event,
    pub delay: std::time::Duration,
}

/// Poll and archive cadence
///
/// Polls happen `offset_secs` after every multiple of `poll_secs`. A poll
/// whose (unoffset) boundary is also a multiple of `archive_secs` is an
/// archive event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub poll_secs: i64,
    pub archive_secs: i64,
    pub offset_secs: i64,
}

impl Schedule {
    pub fn next_event(&self, now: OffsetDateTime) -> NextEvent {
        let poll_ns = self.poll_secs as i128 * NANOS_PER_SEC;
        let offset_ns = self.offset_secs as i128 * NANOS_PER_SEC;
        let now_ns = now.unix_timestamp_nanos();

        let boundary_ns = ((now_ns - offset_ns).div_euclid(poll_ns) + 1) * poll_ns;
        let boundary_secs = (boundary_ns / NANOS_PER_SEC) as i64;
        let event = if boundary_secs.rem_euclid(self.archive_secs) == 0 {
            Event::Archive
        } else {
            Event::Poll
        };

        let delay_ns = (boundary_ns + offset_ns - now_ns).max(0);
        NextEvent {
            event,
            delay: std::time::Duration::from_nanos(delay_ns as u64),
        }
    }
}

/// Drop readings older than two minutes before `now`
pub fn trim_two_minute_buffer(buffer: &mut Vec<Reading>, now: OffsetDateTime) {
    let cutoff = now - Duration::seconds(TWO_MINUTE_WINDOW_SECS);
    buffer.retain(|r| r.time_of_reading >= cutoff);
}

/// The sampling loop: collect, validate, buffer, average and store
///
/// Owns both rolling buffers. Nothing that happens inside an iteration stops
/// the loop; failures are logged and the next event proceeds as scheduled.
pub struct Orchestrator<S, T> {
    source: S,
    store: T,
    schedule: Schedule,
    two_minute: Vec<Reading>,
    archive: Vec<Reading>,
    clock: fn() -> OffsetDateTime,
}

impl<S: ReadingSource, T: ReadingStore> Orchestrator<S, T> {
    pub fn new(source: S, store: T, schedule: Schedule) -> Self {
        Orchestrator {
            source,
            store,
            schedule,
            two_minute: Vec::new(),
            archive: Vec::new(),
            clock: OffsetDateTime::now_utc,
        }
    }

    /// Run forever. The first event fires immediately as a poll.
    pub async fn run(&mut self) {
        debug!("Started main loop.");
        let mut first_time = true;
        loop {
            let event = if first_time {
                Event::Poll
            } else {
                let next = self.schedule.next_event((self.clock)());
                debug!("Next event: {:?} in {:?}", next.event, next.delay);
                tokio::time::sleep(next.delay).await;
                next.event
            };
            self.process_event(event, first_time).await;
            first_time = false;
        }
    }

    async fn save(&self, record_type: RecordType, reading: &Reading) -> bool {
        let start = Instant::now();
        match self.store.save(record_type, reading).await {
            Ok(()) => {
                debug!(
                    "Saved {} record {} in {:?}",
                    record_type,
                    format_datetime(&reading.time_of_reading),
                    start.elapsed()
                );
                true
            }
            Err(e) => {
                error!("Could not save {} record: {}", record_type, e);
                false
            }
        }
    }

    async fn collect(&mut self, first_time: bool) {
        let start = Instant::now();
        let result = if first_time {
            self.source.fetch_reading_with_retry().await
        } else {
            self.source.fetch_reading().await
        };
        debug!("Read sensor in {:?}", start.elapsed());

        let reading = match result {
            Ok(reading) => reading,
            Err(e) => {
                error!("Skipping reading because of: {}", e);
                return;
            }
        };

        if let Err(reason) = validate(&reading, (self.clock)()) {
            error!("Reading found insane: {}", reason);
            return;
        }

        self.two_minute.push(reading.clone());
        self.archive.push(reading.clone());
        self.save(RecordType::Current, &reading).await;
    }

    async fn write_archive_record(&mut self) {
        let Some(mut avg) = compute_avg(&self.archive) else {
            error!("Skipping archive record because there have been zero readings this archive period.");
            return;
        };

        let samples = self.archive.len();
        // The buffer starts over even if the write below fails
        self.archive.clear();

        let ts = archive_timestamp((self.clock)(), self.schedule.archive_secs);
        avg.time_of_reading = match OffsetDateTime::from_unix_timestamp(ts) {
            Ok(t) => t,
            Err(e) => {
                error!("Invalid archive timestamp {}: {}", ts, e);
                return;
            }
        };

        if self.save(RecordType::Archive, &avg).await {
            info!(
                "Added record {} to archive ({} samples).",
                format_datetime(&avg.time_of_reading),
                samples
            );
        }
    }

    /// Handle one poll or archive event
    pub async fn process_event(&mut self, event: Event, first_time: bool) {
        trim_two_minute_buffer(&mut self.two_minute, (self.clock)());

        self.collect(first_time).await;

        if let Some(avg) = compute_avg(&self.two_minute) {
            self.save(RecordType::TwoMinute, &avg).await;
        }

        if event == Event::Archive {
            self.write_archive_record().await;
        }
    }
}

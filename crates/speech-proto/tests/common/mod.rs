#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use speech_proto::protocol::Item;
use speech_proto::scheduler::{PlaybackScheduler, SchedulerOptions};

pub const BASE_TS: i64 = 1_700_000_000;

pub fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(BASE_TS + offset_secs, 0).unwrap()
}

pub fn item(name: &str, offset_secs: i64) -> Item {
    Item::new(name, at(offset_secs))
}

pub fn authorized_scheduler() -> PlaybackScheduler {
    PlaybackScheduler::new(SchedulerOptions {
        skip_initial_snapshot: true,
        authorized: true,
    })
}

//! Wall-clock helpers shared by the dispatch loop and worker pool (spec
//! §3 `start_time`, §4.6 "stamp `start_time` if zero").

use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch, saturating to `0` if the clock is
/// somehow behind the epoch. Used for `Txn::start_time` stamping and
/// latency sampling; never meant to be compared across nodes with
/// unsynchronised clocks beyond coarse latency estimation.
pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

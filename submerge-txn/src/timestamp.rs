// Node values and GC bookkeeping both store wall-clock time as decimal
// seconds-since-epoch strings, matching the source's `str(time.time())`.

use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before the epoch")
        .as_secs_f64()
}

pub(crate) fn now_timestamp() -> String {
    now_secs().to_string()
}

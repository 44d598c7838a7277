use jiff::{Timestamp, tz::Offset};

const WINDOWS_TO_UNIX_SECS: i64 = 11_644_473_600;
const DOTNET_TO_UNIX_SECS: i64 = 62_135_596_800;
const TICKS_PER_SECOND: i64 = 10_000_000;
/// Low 62 bits of a raw timestamp bit-pattern carry the tick count.
const RAW_TICKS_MASK: u64 = 0x3FFF_FFFF_FFFF_FFFF;

/// Convert a FILETIME (100ns ticks since 1601-01-01 UTC) into a timestamp.
///
/// `i64::MAX` is the "never" sentinel and maps to [`Timestamp::MAX`]. Values outside the
/// representable FILETIME range are not rejected: they are reinterpreted as a raw tick
/// bit-pattern counted from 0001-01-01, which is what legacy writers stored by mistake.
pub(crate) fn filetime_to_timestamp(filetime: i64) -> Timestamp {
    if filetime == i64::MAX {
        return Timestamp::MAX;
    }

    if filetime >= 0 {
        let secs = filetime / TICKS_PER_SECOND - WINDOWS_TO_UNIX_SECS;
        let nanos = ((filetime % TICKS_PER_SECOND) * 100) as i32;
        if let Ok(ts) = Timestamp::new(secs, nanos) {
            return ts;
        }
    }

    raw_ticks_to_timestamp(filetime)
}

fn raw_ticks_to_timestamp(raw: i64) -> Timestamp {
    let ticks = ((raw as u64) & RAW_TICKS_MASK) as i64;
    let secs = ticks / TICKS_PER_SECOND - DOTNET_TO_UNIX_SECS;
    let nanos = ((ticks % TICKS_PER_SECOND) * 100) as i32;
    Timestamp::new(secs, nanos).unwrap_or(Timestamp::MAX)
}

/// Render a timestamp as `yyyy-M-d HH:mm:ss.fff` (UTC).
pub(crate) fn format_timestamp(ts: Timestamp) -> String {
    let dt = Offset::UTC.to_datetime(ts);
    format!(
        "{}-{}-{} {:02}:{:02}:{:02}.{:03}",
        dt.year(),
        dt.month(),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.millisecond()
    )
}

/// Render a FILETIME tick count as `yyyy-M-d HH:mm:ss.fff` (UTC).
pub fn format_filetime(filetime: i64) -> String {
    format_timestamp(filetime_to_timestamp(filetime))
}

/// Convert nanoseconds since the Unix epoch (the LTTng clock) to FILETIME ticks.
pub fn filetime_from_unix_nanos(nanos: u64) -> i64 {
    (nanos / 100) as i64 + WINDOWS_TO_UNIX_SECS * TICKS_PER_SECOND
}

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Working hours end; test-task deadlines are pinned to this local time.
pub const DEADLINE_HOUR: u32 = 18;

/// `date h:m` in `tz`, converted to UTC. On a DST gap the wall clock is
/// pushed forward an hour; on an overlap the earlier instant wins.
pub fn local_at(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0).unwrap_or(NaiveTime::MIN);
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
        }
    }
}

/// Same local calendar day as `instant`, at the end of the working day.
pub fn end_of_local_day(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_date = instant.with_timezone(&tz).date_naive();
    local_at(tz, local_date, DEADLINE_HOUR, 0)
}

/// `days` calendar days after `from`, at the end of that local working day.
pub fn deadline_after_days(from: DateTime<Utc>, days: i64, tz: Tz) -> DateTime<Utc> {
    end_of_local_day(from + Duration::days(days), tz)
}

/// Human-readable local time for candidate-facing messages.
pub fn format_local(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%d.%m.%Y %H:%M").to_string()
}

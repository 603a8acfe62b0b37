use chrono::{DateTime, Duration, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Returns the current time in the configured timezone.
pub fn now_in_timezone(tz: &Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(tz)
}

/// Returns today's date in the configured timezone.
pub fn today_local(tz: &Tz) -> NaiveDate {
    now_in_timezone(tz).date_naive()
}

/// Returns the UTC instants bounding a local calendar day: `[start, end)`.
pub fn day_bounds_utc(tz: &Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    (local_midnight_utc(tz, date), local_midnight_utc(tz, date + Duration::days(1)))
}

fn local_midnight_utc(tz: &Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_hms_opt(0, 0, 0).expect("midnight is a valid time");
    let local = match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) => dt,
        // DST fold: take the earlier instant so the day never shrinks.
        LocalResult::Ambiguous(earliest, _) => earliest,
        // DST gap: midnight does not exist locally, fall back to the UTC reading.
        LocalResult::None => tz.from_utc_datetime(&midnight),
    };
    local.with_timezone(&Utc)
}

/// Renders a second count as "7h05"-style hours and minutes.
pub fn format_duration_hm(total_seconds: i64) -> String {
    let seconds = total_seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{}h{:02}", hours, minutes)
}

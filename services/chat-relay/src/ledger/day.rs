use chrono::{DateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Quota days start at local midnight in a fixed reference timezone,
/// independent of where the process runs.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDay {
    tz: Tz,
}

impl Default for QuotaDay {
    fn default() -> Self {
        Self {
            tz: chrono_tz::America::Los_Angeles,
        }
    }
}

impl QuotaDay {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn start_of_day(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = now.with_timezone(&self.tz).date_naive();
        let midnight = local_date.and_time(NaiveTime::MIN);
        // A zone that skips midnight starts its day at the first valid instant.
        match self.tz.from_local_datetime(&midnight) {
            chrono::LocalResult::Single(start) => start.with_timezone(&Utc),
            chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            chrono::LocalResult::None => self
                .tz
                .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                .earliest()
                .map(|start| start.with_timezone(&Utc))
                .unwrap_or(now),
        }
    }

    pub fn current_start(&self) -> DateTime<Utc> {
        self.start_of_day(Utc::now())
    }

    pub fn hour_of(&self, ts: &DateTime<Utc>) -> u32 {
        ts.with_timezone(&self.tz).hour()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_starts_at_pacific_midnight_in_summer() {
        let day = QuotaDay::default();
        // 2026-07-01 05:00 UTC is 2026-06-30 22:00 PDT.
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 5, 0, 0).unwrap();
        let start = day.start_of_day(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 6, 30, 7, 0, 0).unwrap());
    }

    #[test]
    fn day_starts_at_pacific_midnight_in_winter() {
        let day = QuotaDay::default();
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 12, 30, 0).unwrap();
        let start = day.start_of_day(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap());
    }

    #[test]
    fn hour_is_reported_in_reference_timezone() {
        let day = QuotaDay::default();
        let ts = Utc.with_ymd_and_hms(2026, 1, 15, 20, 15, 0).unwrap();
        assert_eq!(day.hour_of(&ts), 12);
    }

    #[test]
    fn custom_timezone_is_respected() {
        let day = QuotaDay::new(chrono_tz::UTC);
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 23, 59, 0).unwrap();
        assert_eq!(
            day.start_of_day(now),
            Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap()
        );
    }
}

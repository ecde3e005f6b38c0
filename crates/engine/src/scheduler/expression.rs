// ── Schedule expression parsing ──────────────────────────────────────────
// Supports "every <N>m", "every <N>h", and "daily HH:MM"; anything else
// falls back to "+1 hour" rather than rejecting the job outright, matching
// the ticket history's loose text format for `schedule_expression`.

use chrono::{DateTime, Duration, Utc};

pub fn compute_next_run(schedule_expression: &str, from: DateTime<Utc>) -> DateTime<Utc> {
    let s = schedule_expression.trim().to_lowercase();

    if let Some(rest) = s.strip_prefix("every ") {
        let rest = rest.trim();
        if let Some(mins) = rest.strip_suffix('m').and_then(|m| m.trim().parse::<i64>().ok()) {
            return from + Duration::minutes(mins);
        }
        if let Some(hours) = rest.strip_suffix('h').and_then(|h| h.trim().parse::<i64>().ok()) {
            return from + Duration::hours(hours);
        }
    } else if let Some(time_str) = s.strip_prefix("daily ") {
        if let Some((hour, minute)) = parse_hh_mm(time_str.trim()) {
            let today = from.date_naive();
            if let Some(target_naive) = today.and_hms_opt(hour, minute, 0) {
                let target = target_naive.and_utc();
                if target > from {
                    return target;
                }
                if let Some(tomorrow) = today.succ_opt() {
                    if let Some(next_naive) = tomorrow.and_hms_opt(hour, minute, 0) {
                        return next_naive.and_utc();
                    }
                }
            }
        }
    }

    from + Duration::hours(1)
}

fn parse_hh_mm(raw: &str) -> Option<(u32, u32)> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 2 {
        return None;
    }
    let hour: u32 = parts[0].parse().ok()?;
    let minute: u32 = parts[1].parse().ok()?;
    Some((hour, minute))
}

/// Approximate interval this expression represents, used to detect a job
/// that has missed its due time by more than one full interval and should
/// be deferred rather than dispatched late. Falls back to 1 hour for
/// "daily HH:MM" and unparseable expressions.
pub fn interval_duration(schedule_expression: &str) -> Duration {
    let s = schedule_expression.trim().to_lowercase();
    if let Some(rest) = s.strip_prefix("every ") {
        let rest = rest.trim();
        if let Some(mins) = rest.strip_suffix('m').and_then(|m| m.trim().parse::<i64>().ok()) {
            return Duration::minutes(mins);
        }
        if let Some(hours) = rest.strip_suffix('h').and_then(|h| h.trim().parse::<i64>().ok()) {
            return Duration::hours(hours);
        }
    }
    Duration::hours(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn every_n_minutes_advances_by_minutes() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = compute_next_run("every 15m", from);
        assert_eq!(next, from + Duration::minutes(15));
    }

    #[test]
    fn every_n_hours_advances_by_hours() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = compute_next_run("every 6h", from);
        assert_eq!(next, from + Duration::hours(6));
    }

    #[test]
    fn daily_time_in_the_future_today_fires_today() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 8, 0, 0).unwrap();
        let next = compute_next_run("daily 09:30", from);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn daily_time_already_passed_rolls_to_tomorrow() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let next = compute_next_run("daily 09:30", from);
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn unparseable_expression_falls_back_to_one_hour() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = compute_next_run("whenever the mood strikes", from);
        assert_eq!(next, from + Duration::hours(1));
    }
}

//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Helpers for simulation time, expressed as seconds since the scenario epoch
//! (midnight, January 1st of a non-leap year).

pub const SECONDS_PER_HOUR: f64 = 3_600.0;
pub const SECONDS_PER_DAY: f64 = 86_400.0;
pub const DAYS_PER_YEAR: u32 = 365;

/// Absolute tolerance used when comparing simulation timestamps.
pub const TIME_EPSILON: f64 = 1e-6;

const MONTH_LENGTHS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Hour of the day in `0..24` for a simulation timestamp.
pub fn hour_of_day(seconds: f64) -> u32 {
    let within_day = seconds.rem_euclid(SECONDS_PER_DAY);
    ((within_day / SECONDS_PER_HOUR).floor() as u32).min(23)
}

/// Zero-based day of the year, wrapping on year boundaries.
pub fn day_of_year(seconds: f64) -> u32 {
    let day = (seconds / SECONDS_PER_DAY).floor() as i64;
    day.rem_euclid(i64::from(DAYS_PER_YEAR)) as u32
}

/// Calendar month in `1..=12` for a simulation timestamp.
pub fn month_of_year(seconds: f64) -> u32 {
    let mut remaining = day_of_year(seconds);
    for (index, length) in MONTH_LENGTHS.iter().enumerate() {
        if remaining < *length {
            return index as u32 + 1;
        }
        remaining -= length;
    }
    12
}

/// Render a simulation timestamp as `day N hh:mm:ss` for log output.
pub fn format_sim_time(seconds: f64) -> String {
    let day = (seconds / SECONDS_PER_DAY).floor() as i64;
    let within = seconds.rem_euclid(SECONDS_PER_DAY).round() as u64;
    format!(
        "day {} {:02}:{:02}:{:02}",
        day,
        within / 3_600,
        (within % 3_600) / 60,
        within % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calendar_helpers_follow_non_leap_year() {
        assert_eq!(hour_of_day(0.0), 0);
        assert_eq!(hour_of_day(7.5 * SECONDS_PER_HOUR), 7);
        assert_eq!(hour_of_day(SECONDS_PER_DAY + 3_600.0), 1);
        assert_eq!(month_of_year(0.0), 1);
        assert_eq!(month_of_year(31.0 * SECONDS_PER_DAY), 2);
        assert_eq!(month_of_year(59.0 * SECONDS_PER_DAY), 3);
        assert_eq!(month_of_year(364.0 * SECONDS_PER_DAY), 12);
        assert_eq!(month_of_year(365.0 * SECONDS_PER_DAY), 1);
    }

    #[test]
    fn formats_timestamps() {
        assert_eq!(format_sim_time(90_061.0), "day 1 01:01:01");
    }
}

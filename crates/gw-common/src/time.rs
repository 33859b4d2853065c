//! Time constants and the `HH:MM:SS` countdown formatter.

pub const SECS_MINUTE: u64 = 60;
pub const SECS_HOUR: u64 = 60 * SECS_MINUTE;
pub const SECS_DAY: u64 = 24 * SECS_HOUR;
/// Flat 30-day month, no calendar alignment.
pub const SECS_MONTH: u64 = 30 * SECS_DAY;

/// Format a millisecond count as `HH:MM:SS`.
///
/// The sub-second remainder is dropped. Every field is zero-padded to two
/// digits; hours are not capped, so 30 days renders as `720:00:00`.
pub fn format_hms(ms: u64) -> String {
    let secs = ms / 1000;
    format!(
        "{:02}:{:02}:{:02}",
        secs / SECS_HOUR,
        (secs % SECS_HOUR) / SECS_MINUTE,
        secs % SECS_MINUTE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_hms(text: &str) -> u64 {
        let fields: Vec<&str> = text.split(':').collect();
        assert_eq!(fields.len(), 3, "{text}");
        assert!(fields.iter().all(|f| f.len() >= 2), "{text}");
        let n: Vec<u64> = fields.iter().map(|f| f.parse().unwrap()).collect();
        n[0] * SECS_HOUR + n[1] * SECS_MINUTE + n[2]
    }

    #[test]
    fn pads_fields() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(61_000), "00:01:01");
        assert_eq!(format_hms(3_599_000), "00:59:59");
    }

    #[test]
    fn truncates_sub_second_remainder() {
        assert_eq!(format_hms(999), "00:00:00");
        assert_eq!(format_hms(1_999), "00:00:01");
    }

    #[test]
    fn hours_are_uncapped() {
        assert_eq!(format_hms(SECS_DAY * 1000), "24:00:00");
        assert_eq!(format_hms(SECS_MONTH * 1000), "720:00:00");
    }

    #[test]
    fn whole_seconds_round_trip() {
        let samples = (0..200)
            .chain([59, 60, 3_599, 3_600, 86_399, SECS_DAY, SECS_MONTH, 10 * SECS_MONTH + 7]);
        for s in samples {
            assert_eq!(parse_hms(&format_hms(s * 1000)), s);
        }
    }
}

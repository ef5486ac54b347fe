#![forbid(unsafe_code)]

//! Conversions between a second-offset into a video and the `timestamp_hms`
//! catalog column (`H:MM:SS` when the offset is an hour or more, else
//! `M:SS`).

/// Renders `offset_s` as `H:MM:SS` (offset_s >= 3600) or `M:SS` otherwise.
pub fn render(offset_s: u32) -> String {
    let hours = offset_s / 3600;
    let minutes = (offset_s % 3600) / 60;
    let seconds = offset_s % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Parses a rendered `H:MM:SS` or `M:SS` string back into a second offset.
/// Returns `None` for malformed input.
pub fn parse(text: &str) -> Option<u32> {
    let parts: Vec<&str> = text.split(':').collect();
    match parts.as_slice() {
        [h, m, s] => {
            let h: u32 = h.parse().ok()?;
            let m: u32 = m.parse().ok()?;
            let s: u32 = s.parse().ok()?;
            if m >= 60 || s >= 60 {
                return None;
            }
            Some(h * 3600 + m * 60 + s)
        }
        [m, s] => {
            let m: u32 = m.parse().ok()?;
            let s: u32 = s.parse().ok()?;
            if s >= 60 {
                return None;
            }
            Some(m * 60 + s)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_minutes_seconds_below_an_hour() {
        assert_eq!(render(83), "1:23");
        assert_eq!(render(5), "0:05");
    }

    #[test]
    fn renders_hours_minutes_seconds_at_or_above_an_hour() {
        assert_eq!(render(3600), "1:00:00");
        assert_eq!(render(3661), "1:01:01");
    }

    #[test]
    fn round_trips_every_offset_in_a_day() {
        for offset in 0..86_400u32 {
            let rendered = render(offset);
            assert_eq!(parse(&rendered), Some(offset), "offset {offset} rendered {rendered}");
        }
    }

    #[test]
    fn rejects_overflowing_components() {
        assert_eq!(parse("1:60:00"), None);
        assert_eq!(parse("1:00:60"), None);
        assert_eq!(parse("not-a-time"), None);
    }
}

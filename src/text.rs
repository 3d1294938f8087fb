//! Small text helpers for log output.

use std::time::Duration;

/// Truncate `text` to at most `max_chars` characters, ending in `...` when shortened.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = text.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Render a duration as `45.0s` or `2m 30.0s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        return format!("{secs:.1}s");
    }
    let minutes = (secs / 60.0).floor();
    format!("{}m {:.1}s", minutes as u64, secs - minutes * 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello", 5), "hello");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate("äöüäöüäöü", 6), "äöü...");
    }

    #[test]
    fn format_duration_switches_to_minutes() {
        assert_eq!(format_duration(Duration::from_millis(45_000)), "45.0s");
        assert_eq!(format_duration(Duration::from_millis(150_500)), "2m 30.5s");
    }
}

//! Command implementations

pub mod artists;
pub mod daily;
pub mod ingest;
pub mod recent;
pub mod recompute;
pub mod summary;
pub mod top;

/// Cut a display string to `max` characters, marking the cut
pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

/// `YYYY-MM-DD HH:MM` from a stored timestamp
pub(crate) fn short_ts(ts: &str) -> String {
    if ts.len() >= 16 {
        format!("{} {}", &ts[..10], &ts[11..16])
    } else {
        ts.to_string()
    }
}

/// Milliseconds as `H:MM:SS`, or `M:SS` under an hour
pub(crate) fn format_duration(ms: i64) -> String {
    let secs = ms.max(0) / 1000;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Sigur Rós - Hoppípolla", 10), "Sigur R...");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0:00");
        assert_eq!(format_duration(215_000), "3:35");
        assert_eq!(format_duration(3_723_000), "1:02:03");
    }

    #[test]
    fn test_short_ts() {
        assert_eq!(short_ts("2024-01-02T03:04:05.000Z"), "2024-01-02 03:04");
        assert_eq!(short_ts("-"), "-");
    }
}

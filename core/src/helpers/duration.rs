use std::time::Duration;

/// Human readable elapsed time for log lines, coarser as the duration grows.
pub fn format_duration(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let secs = duration.as_secs();
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    match (hours, minutes, secs) {
        (h, m, _) if h > 0 => format!("{}h {}m {}s", h, m, seconds),
        (0, m, _) if m > 0 => format!("{}m {}s", m, seconds),
        (0, 0, s) if s > 0 => format!("{}.{:03}s", s, total_ms % 1000),
        _ => format!("{}ms", total_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
        assert_eq!(format_duration(Duration::from_millis(3_250)), "3.250s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h 2m 5s");
    }
}

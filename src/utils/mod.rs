use chrono::{DateTime, Utc};

// Format a timestamp for console output
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}

// Render an optional indicator value, NULL as "-"
pub fn format_value(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

// Utility to truncate long column headers
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}~", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatting_helpers() {
        let t = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(format_time(&t), "2024-05-06 07:08:09");
        assert_eq!(format_value(Some(1.23456), 2), "1.23");
        assert_eq!(format_value(None, 2), "-");
        assert_eq!(truncate_string("ichimoku_senkou_a", 10), "ichimoku_~");
        assert_eq!(truncate_string("rsi_14", 10), "rsi_14");
    }
}

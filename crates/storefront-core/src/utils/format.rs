use std::cmp::Ordering;

/// Case-insensitive string ordering
pub fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}

/// Format remaining session time: "4m 05s", "42s", or "Expired"
pub fn format_session_time(seconds: Option<i64>) -> String {
    match seconds {
        Some(secs) if secs > 0 => {
            let minutes = secs / 60;
            let secs = secs % 60;
            if minutes > 0 {
                format!("{}m {:02}s", minutes, secs)
            } else {
                format!("{}s", secs)
            }
        }
        _ => "Expired".to_string(),
    }
}

/// Format a price in euros with two decimals and thousands separators,
/// e.g. "1 299,90 €"
pub fn format_price(price: f64) -> String {
    let cents = (price * 100.0).round() as i64;
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    let units = (cents / 100).to_string();

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, c) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    format!("{}{},{:02} €", sign, grouped, cents % 100)
}

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

//! Text rendering for counters and recent activity.

use crate::activity::{ListType, LogEntry};

pub const NO_RECENT_LOGS: &str = "No recent logs";

/// `1234567` -> `1,234,567`
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);

    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// One decimal place followed by `%`.
pub fn format_percentage(percentage: f64) -> String {
    format!("{percentage:.1}%")
}

pub fn format_entry(entry: &LogEntry) -> String {
    let prefix = match entry.list_type() {
        ListType::Blocked => "🚫",
        _ => "✅",
    };
    format!("{prefix} {}", entry.host())
}

/// One line per entry, or a placeholder when there is nothing to show.
pub fn render_entries(entries: &[LogEntry]) -> String {
    if entries.is_empty() {
        return NO_RECENT_LOGS.to_string();
    }

    entries
        .iter()
        .map(format_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

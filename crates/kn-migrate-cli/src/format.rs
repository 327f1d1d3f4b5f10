//! Formatting utilities for table output and age display

use chrono::{DateTime, Utc};

/// Format a timestamp as a human-readable age (e.g., "2d", "5h", "30m", "15s")
pub fn format_age(timestamp: &DateTime<Utc>) -> String {
    let total_secs = Utc::now().signed_duration_since(*timestamp).num_seconds();
    if total_secs < 0 {
        return "0s".to_string();
    }

    match total_secs {
        s if s >= 86_400 => format!("{}d", s / 86_400),
        s if s >= 3_600 => format!("{}h", s / 3_600),
        s if s >= 60 => format!("{}m", s / 60),
        s => format!("{}s", s),
    }
}

/// Render rows as column-aligned lines, headers first
pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(format_line(headers, &widths));
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        lines.push(format_line(&cells, &widths));
    }
    lines
}

fn format_line(cells: &[&str], widths: &[usize]) -> String {
    cells
        .iter()
        .enumerate()
        .map(|(i, cell)| {
            let w = widths.get(i).copied().unwrap_or(0);
            format!("{:<width$}", cell, width = w)
        })
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

/// Print rows as a column-aligned table with headers
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    for line in render_table(headers, rows) {
        println!("{}", line);
    }
}

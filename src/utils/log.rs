// src/utils/log.rs

//! Formatting helpers for run headers and summaries.

/// Log a header
pub fn header(title: &str) {
    let border = "═".repeat(60);
    log::info!("{}", border);
    log::info!("  {}", title);
    log::info!("{}", border);
}

/// Log a separator line
pub fn separator() {
    log::info!("{}", "─".repeat(60));
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    log::info!("[SUMMARY] {}", title);
    for line in summary_lines(items) {
        log::info!("{}", line);
    }
}

fn summary_lines(items: &[(&str, String)]) -> Vec<String> {
    let width = items.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    items
        .iter()
        .map(|(key, value)| format!("    {:<width$} : {}", key, value, width = width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_lines_are_aligned() {
        let lines = summary_lines(&[("Sources", "2".into()), ("Delivered", "5".into())]);
        assert_eq!(lines[0], "    Sources   : 2");
        assert_eq!(lines[1], "    Delivered : 5");
    }
}

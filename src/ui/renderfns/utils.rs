use crate::worker::WorkerState;
use chrono::{DateTime, Local, Utc};
use ratatui::prelude::Color;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

/// Get the display color for an HTTP status
pub fn http_status_color(status: u16) -> Color {
  match status {
    200..=299 => Color::Green,
    300..=399 => Color::Cyan,
    400..=499 => Color::Yellow,
    _ => Color::Red,
  }
}

pub fn worker_color(state: WorkerState) -> Color {
  match state {
    WorkerState::Active => Color::Green,
    WorkerState::Installing | WorkerState::Waiting => Color::Yellow,
    WorkerState::Redundant => Color::Red,
  }
}

/// Local wall-clock time of a health check, or "never"
pub fn format_check_time(time: Option<DateTime<Utc>>) -> String {
  match time {
    Some(t) => t.with_timezone(&Local).format("%H:%M:%S").to_string(),
    None => "never".to_string(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_short_string() {
    assert_eq!(truncate("hello", 10), "hello");
  }

  #[test]
  fn test_truncate_exact_length() {
    assert_eq!(truncate("hello", 5), "hello");
  }

  #[test]
  fn test_truncate_long_string() {
    assert_eq!(truncate("hello world", 8), "hello...");
  }

  #[test]
  fn test_truncate_multibyte() {
    assert_eq!(truncate("ocena: piątka!", 10), "ocena: ...");
  }

  #[test]
  fn test_http_status_color() {
    assert_eq!(http_status_color(200), Color::Green);
    assert_eq!(http_status_color(304), Color::Cyan);
    assert_eq!(http_status_color(404), Color::Yellow);
    assert_eq!(http_status_color(503), Color::Red);
  }

  #[test]
  fn test_format_check_time_never() {
    assert_eq!(format_check_time(None), "never");
  }
}

use crate::health::HealthState;
use crate::offline::OfflineSnapshot;
use crate::worker::WorkerState;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

use super::utils::{format_check_time, worker_color};

/// Draw the footer bar with connection indicators
pub fn draw_footer(
  frame: &mut Frame,
  area: Rect,
  offline: &OfflineSnapshot,
  health: &HealthState,
  worker: WorkerState,
) {
  let indicator = |label: &str, ok: bool| {
    let color = if ok { Color::Green } else { Color::Red };
    vec![
      Span::styled(" ● ", Style::default().fg(color)),
      Span::styled(label.to_string(), Style::default().fg(Color::White)),
      Span::styled("  │", Style::default().fg(Color::DarkGray)),
    ]
  };

  let mut spans = Vec::new();
  spans.extend(indicator("network", !offline.network_offline));
  spans.extend(indicator("api", !offline.backend_offline));
  spans.extend(indicator("health", health.online));

  let check = if health.checking {
    " checking...".to_string()
  } else {
    format!(" last check {}", format_check_time(health.last_check_time))
  };
  spans.push(Span::styled(check, Style::default().fg(Color::DarkGray)));
  spans.push(Span::styled("  │ worker ", Style::default().fg(Color::DarkGray)));
  spans.push(Span::styled(
    worker.to_string(),
    Style::default().fg(worker_color(worker)),
  ));

  let paragraph = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));

  frame.render_widget(paragraph, area);
}

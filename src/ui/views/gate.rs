use crate::gate::GateView;
use crate::ui::renderfns::format_check_time;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

/// Draw the blocking screen for a network or backend outage
pub fn draw_gate(frame: &mut Frame, area: Rect, view: &GateView, checking: bool) {
  let (title, color, lines) = match view {
    GateView::App => return,
    GateView::NetworkOffline => (
      " You are offline ",
      Color::Yellow,
      vec![
        Line::from("The network cannot be reached."),
        Line::from("Pages you visited before are still served from the offline cache."),
      ],
    ),
    GateView::Maintenance {
      error_count,
      last_check,
    } => (
      " Service unavailable ",
      Color::Red,
      vec![
        Line::from("The gradebook server is not responding."),
        Line::from(format!("Failed checks: {}", error_count)),
        Line::from(format!("Last check: {}", format_check_time(*last_check))),
      ],
    ),
  };

  let mut lines = lines;
  lines.push(Line::from(""));
  lines.push(if checking {
    Line::styled("Checking...", Style::default().fg(Color::DarkGray))
  } else {
    Line::from(vec![
      Span::raw("Press "),
      Span::styled("r", Style::default().fg(Color::Cyan).bold()),
      Span::raw(" to try again"),
    ])
  });

  let height = (lines.len() as u16 + 2).min(area.height);
  let width = (area.width * 70 / 100).max(40).min(area.width);
  let popup = Rect::new(
    area.x + (area.width - width) / 2,
    area.y + (area.height - height) / 2,
    width,
    height,
  );

  frame.render_widget(Clear, popup);
  let paragraph = Paragraph::new(lines)
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .block(
      Block::default()
        .title(title)
        .title_alignment(Alignment::Center)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color)),
    );
  frame.render_widget(paragraph, popup);
}

mod components;
mod renderfns;
mod views;

use crate::app::{App, Mode};
use crate::cache::CacheStore;
use crate::gate::GateView;
use ratatui::prelude::*;
use ratatui::widgets::Paragraph;

/// Main draw function
pub fn draw<S: CacheStore>(frame: &mut Frame, app: &App<S>) {
  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([
      Constraint::Length(1), // Header
      Constraint::Min(1),    // Main content
      Constraint::Length(1), // Connection footer
      Constraint::Length(1), // Status bar
    ])
    .split(frame.area());

  renderfns::draw_header(frame, chunks[0], app.base_url(), app.route(), app.is_monitored());

  match app.gate_view() {
    GateView::App => views::draw_page(frame, chunks[1], app.page()),
    blocking => views::draw_gate(frame, chunks[1], &blocking, app.health().checking),
  }

  renderfns::draw_footer(
    frame,
    chunks[2],
    &app.offline(),
    app.health(),
    app.worker_state(),
  );
  draw_status_bar(frame, chunks[3], app);

  if *app.mode() == Mode::Command {
    components::draw_command_overlay(
      frame,
      chunks[1],
      app.command_input(),
      &app.autocomplete_suggestions(),
      app.selected_suggestion(),
    );
  }
}

fn draw_status_bar<S: CacheStore>(frame: &mut Frame, area: Rect, app: &App<S>) {
  let (content, style) = match (app.mode(), app.status()) {
    (Mode::Command, _) => {
      let cmd = format!(":{}", app.command_input());
      (cmd, Style::default().fg(Color::Yellow))
    }
    (Mode::Normal, Some(status)) => (format!(" {}", status), Style::default().fg(Color::White)),
    (Mode::Normal, None) => {
      let hint = " :command  r:retry  q:quit  Ctrl-C:quit";
      (hint.to_string(), Style::default().fg(Color::DarkGray))
    }
  };

  let paragraph = Paragraph::new(content).style(style);
  frame.render_widget(paragraph, area);
}

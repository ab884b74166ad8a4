use crate::page::{PageLoad, PageStatus};
use crate::ui::renderfns::{http_status_color, truncate};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

/// Draw the current route's document and data
pub fn draw_page(frame: &mut Frame, area: Rect, page: Option<&PageLoad>) {
  let title = match page {
    Some(page) => match page.status() {
      PageStatus::Loading => format!(" {} (loading...) ", page.route()),
      PageStatus::Failed(_) => format!(" {} (error) ", page.route()),
      PageStatus::Ready(_) => format!(" {} ", page.route()),
    },
    None => String::new(),
  };

  let block = Block::default()
    .title(title)
    .title_alignment(Alignment::Center)
    .borders(Borders::ALL)
    .border_style(Style::default().fg(Color::Blue));

  let inner = block.inner(area);
  frame.render_widget(block, area);

  let Some(page) = page else {
    return;
  };
  let page = match page.status() {
    PageStatus::Loading => {
      let paragraph = Paragraph::new("Loading...").style(Style::default().fg(Color::DarkGray));
      frame.render_widget(paragraph, inner);
      return;
    }
    PageStatus::Failed(error) => {
      let paragraph = Paragraph::new(format!("Error: {}\n\nPress 'r' to retry.", error))
        .style(Style::default().fg(Color::Red))
        .wrap(Wrap { trim: false });
      frame.render_widget(paragraph, inner);
      return;
    }
    PageStatus::Ready(page) => page,
  };

  let chunks = Layout::default()
    .direction(Direction::Vertical)
    .constraints([Constraint::Length(2), Constraint::Min(0)])
    .split(inner);

  let mut summary = vec![Span::styled("document ", Style::default().fg(Color::DarkGray))];
  summary.push(match page.document_status {
    Some(status) => Span::styled(status.to_string(), Style::default().fg(http_status_color(status))),
    None => Span::styled("unreachable", Style::default().fg(Color::Red)),
  });

  if let Some(data) = &page.data {
    summary.push(Span::styled("   data ", Style::default().fg(Color::DarkGray)));
    summary.push(Span::styled(
      data.status.to_string(),
      Style::default().fg(http_status_color(data.status)),
    ));
    summary.push(Span::styled(
      format!(
        " {} {}",
        data.path,
        data.content_type.as_deref().unwrap_or("")
      ),
      Style::default().fg(Color::DarkGray),
    ));
  }
  frame.render_widget(Paragraph::new(Line::from(summary)), chunks[0]);

  let body = match &page.data {
    Some(data) => data
      .preview
      .lines()
      .map(|line| truncate(line, inner.width as usize))
      .collect::<Vec<_>>()
      .join("\n"),
    None => "This route is public and has no backend data.".to_string(),
  };
  frame.render_widget(
    Paragraph::new(body).style(Style::default().fg(Color::White)),
    chunks[1],
  );
}

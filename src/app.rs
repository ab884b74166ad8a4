use crate::cache::CacheStore;
use crate::commands::{self, Action, Command, ResolvedAction};
use crate::event::{Event, EventHandler};
use crate::gate::{Gate, GateView};
use crate::health::{HealthState, HttpProbe, RouteAction, RouteGuard};
use crate::offline::{ListenerId, OfflineSnapshot};
use crate::page::{PageLoad, PAGE_STALE_TIME};
use crate::services::Services;
use crate::ui;
use crate::worker::{ClientMessage, WorkerMessage, WorkerState};
use color_eyre::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{
  disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use std::io::stdout;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

/// Input mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
  Normal,
  Command,
}

/// Main application state
pub struct App<S: CacheStore> {
  services: Services<S>,

  gate: Arc<Gate<HttpProbe>>,

  /// Current route, and the monitoring it implies
  guard: RouteGuard<HttpProbe>,

  /// Data for the current route, once one is opened
  page: Option<PageLoad>,

  /// Last published health state
  health: HealthState,

  /// Current input mode
  mode: Mode,

  /// Command input buffer (after pressing :)
  command_input: String,

  /// Selected autocomplete suggestion index
  selected_suggestion: usize,

  /// One-line message shown in the status bar
  status: Option<String>,

  /// Event sender for async tasks
  event_tx: Option<mpsc::UnboundedSender<Event>>,

  network_listener: Option<ListenerId>,
  backend_listener: Option<ListenerId>,

  /// Whether to quit
  should_quit: bool,
}

impl<S: CacheStore> App<S> {
  pub fn new(services: Services<S>) -> Self {
    let gate = Arc::new(Gate::new(
      Arc::clone(&services.offline),
      Arc::clone(&services.monitor),
    ));
    let guard = RouteGuard::new(services.route_policy(), Arc::clone(&services.monitor));
    Self {
      gate,
      guard,
      page: None,
      health: services.monitor.state(),
      services,
      mode: Mode::Normal,
      command_input: String::new(),
      selected_suggestion: 0,
      status: None,
      event_tx: None,
      network_listener: None,
      backend_listener: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self, initial_route: &str) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut events = EventHandler::new(Duration::from_millis(250));
    self.subscribe(events.sender());

    self.services.worker.handle_message(ClientMessage::AppVersion {
      version: env!("CARGO_PKG_VERSION").to_string(),
    });
    self.navigate(initial_route);

    let result = self.event_loop(&mut terminal, &mut events).await;

    self.unsubscribe();

    // Cleanup terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
  }

  async fn event_loop<B: Backend>(
    &mut self,
    terminal: &mut Terminal<B>,
    events: &mut EventHandler,
  ) -> Result<()> {
    while !self.should_quit {
      terminal.draw(|frame| ui::draw(frame, self))?;

      match events.next().await {
        Some(event) => self.handle_event(event),
        None => break,
      }
    }
    Ok(())
  }

  /// Forward offline flags, health updates and worker broadcasts into the
  /// event loop.
  fn subscribe(&mut self, tx: mpsc::UnboundedSender<Event>) {
    let offline = &self.services.offline;

    let network_tx = tx.clone();
    self.network_listener = Some(offline.add_listener(move |value| {
      let _ = network_tx.send(Event::NetworkOffline(value));
    }));
    let backend_tx = tx.clone();
    self.backend_listener = Some(offline.add_backend_listener(move |value| {
      let _ = backend_tx.send(Event::BackendOffline(value));
    }));

    let mut health = self.services.monitor.subscribe();
    let health_tx = tx.clone();
    tokio::spawn(async move {
      while health.changed().await.is_ok() {
        let state = health.borrow_and_update().clone();
        if health_tx.send(Event::Health(state)).is_err() {
          break;
        }
      }
    });

    let mut notices = self.services.worker.subscribe();
    let worker_tx = tx.clone();
    tokio::spawn(async move {
      loop {
        match notices.recv().await {
          Ok(message) => {
            if worker_tx.send(Event::Worker(message)).is_err() {
              break;
            }
          }
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "missed worker notices");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });

    self.event_tx = Some(tx);
  }

  fn unsubscribe(&mut self) {
    let offline = &self.services.offline;
    if let Some(id) = self.network_listener.take() {
      offline.remove_listener(id);
    }
    if let Some(id) = self.backend_listener.take() {
      offline.remove_backend_listener(id);
    }
    self.services.monitor.stop_monitoring();
  }

  fn handle_event(&mut self, event: Event) {
    match event {
      Event::Key(key) => self.handle_key(key),
      Event::Tick => self.tick(),
      Event::Health(state) => {
        self.health = state;
        if let RouteAction::Redirect(target) = self.guard.on_health(&self.health) {
          self.navigate(&target);
        }
      }
      Event::NetworkOffline(offline) => self.connectivity_changed("Network", offline),
      Event::BackendOffline(offline) => self.connectivity_changed("Backend", offline),
      Event::Worker(WorkerMessage::CachesCleaned { version, .. }) => {
        self.status = Some(format!("Caches cleaned (v{})", version));
        self.reload_page();
      }
      Event::Retried(result) => {
        self.status = Some(match result {
          Some(r) if r.online => "Backend is reachable".to_string(),
          Some(r) => format!("Backend still unavailable ({} failed checks)", r.error_count),
          None => "Health check inconclusive".to_string(),
        });
        self.reload_page();
      }
    }
  }

  /// Gate flags are read at render time; this only reacts to a failed load
  /// whose cause may have cleared.
  fn connectivity_changed(&mut self, what: &str, offline: bool) {
    if offline {
      self.status = Some(format!("{} unreachable", what));
    } else if self.page.as_ref().is_some_and(PageLoad::is_failed) {
      self.status = Some(format!("{} reachable again", what));
      self.reload_page();
    }
  }

  fn reload_page(&mut self) {
    if let Some(page) = self.page.as_mut() {
      page.reload(&self.services.api);
    }
  }

  fn tick(&mut self) {
    let blocking = self.gate_view().is_blocking();
    if let Some(page) = self.page.as_mut() {
      page.poll();
      if page.is_stale(PAGE_STALE_TIME) && !blocking {
        page.reload(&self.services.api);
      }
    }
  }

  fn handle_key(&mut self, key: KeyEvent) {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
      self.should_quit = true;
      return;
    }
    match self.mode {
      Mode::Normal => self.handle_normal_mode_key(key),
      Mode::Command => self.handle_command_mode_key(key),
    }
  }

  fn handle_normal_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Char('q') => self.should_quit = true,
      KeyCode::Char('r') => self.retry(),
      KeyCode::Char(':') => {
        self.mode = Mode::Command;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Esc => self.status = None,
      _ => {}
    }
  }

  fn handle_command_mode_key(&mut self, key: KeyEvent) {
    match key.code {
      KeyCode::Esc => {
        self.mode = Mode::Normal;
        self.command_input.clear();
        self.selected_suggestion = 0;
      }
      KeyCode::Enter => {
        self.execute_command();
        self.mode = Mode::Normal;
        self.selected_suggestion = 0;
      }
      KeyCode::Tab | KeyCode::Down => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = (self.selected_suggestion + 1) % suggestions.len();
        }
      }
      KeyCode::BackTab | KeyCode::Up => {
        let suggestions = commands::get_suggestions(&self.command_input);
        if !suggestions.is_empty() {
          self.selected_suggestion = if self.selected_suggestion == 0 {
            suggestions.len() - 1
          } else {
            self.selected_suggestion - 1
          };
        }
      }
      KeyCode::Backspace => {
        self.command_input.pop();
        self.selected_suggestion = 0;
      }
      KeyCode::Char(c) => {
        self.command_input.push(c);
        self.selected_suggestion = 0;
      }
      _ => {}
    }
  }

  fn execute_command(&mut self) {
    match commands::resolve(&self.command_input, self.selected_suggestion) {
      Some(ResolvedAction::Path(path)) => self.navigate(&path),
      Some(ResolvedAction::Command(Action::Route(route))) => self.navigate(route),
      Some(ResolvedAction::Command(Action::CleanCaches)) => {
        self.services.worker.handle_message(ClientMessage::CleanCaches {
          version: env!("CARGO_PKG_VERSION").to_string(),
        });
      }
      Some(ResolvedAction::Command(Action::Retry)) => self.retry(),
      Some(ResolvedAction::Command(Action::Quit)) => self.should_quit = true,
      None => self.status = Some(format!("Unknown command: {}", self.command_input.trim())),
    }
    self.command_input.clear();
  }

  fn navigate(&mut self, route: &str) {
    if let RouteAction::Redirect(target) = self.guard.navigate(route) {
      if target != route {
        self.navigate(&target);
        return;
      }
    }

    let current = self.guard.current().unwrap_or(route).to_string();
    info!(route = %current, "loading route");
    self.page = Some(PageLoad::start(
      &self.services.api,
      &current,
      self.guard.is_monitored(),
    ));
  }

  fn retry(&mut self) {
    let Some(tx) = self.event_tx.clone() else {
      return;
    };
    self.status = Some("Checking backend...".to_string());
    let gate = Arc::clone(&self.gate);
    tokio::spawn(async move {
      let result = gate.retry().await;
      let _ = tx.send(Event::Retried(result));
    });
  }

  // Accessors for UI rendering
  pub fn gate_view(&self) -> GateView {
    self.gate.view(self.guard.is_monitored())
  }

  pub fn page(&self) -> Option<&PageLoad> {
    self.page.as_ref()
  }

  pub fn route(&self) -> &str {
    self.guard.current().unwrap_or("")
  }

  pub fn is_monitored(&self) -> bool {
    self.guard.is_monitored()
  }

  pub fn health(&self) -> &HealthState {
    &self.health
  }

  pub fn offline(&self) -> OfflineSnapshot {
    self.services.offline.snapshot()
  }

  pub fn worker_state(&self) -> WorkerState {
    self.services.worker.state()
  }

  pub fn base_url(&self) -> &str {
    &self.services.config.base_url
  }

  pub fn mode(&self) -> &Mode {
    &self.mode
  }

  pub fn command_input(&self) -> &str {
    &self.command_input
  }

  pub fn status(&self) -> Option<&str> {
    self.status.as_deref()
  }

  pub fn autocomplete_suggestions(&self) -> Vec<&'static Command> {
    commands::get_suggestions(&self.command_input)
  }

  pub fn selected_suggestion(&self) -> usize {
    self.selected_suggestion
  }
}

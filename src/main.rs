mod app;
mod cli;
mod config;
mod domain;
mod infra;
mod logging;
mod ui;

use crate::app::{AppCommand, AppEvent, AppModel};
use crate::cli::{CliInvocation, TuiOptions};
use crate::config::Config;
use crate::domain::Message;
use crate::infra::{ProjectsWatcher, load_session, scan_and_preload, scan_projects};
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::terminal::size as terminal_size;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use crossterm::{ExecutableCommand, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::collections::BTreeSet;
use std::io::{self, Stdout, Write};
use std::path::PathBuf;
use std::sync::mpsc::{Sender, channel};
use std::time::{Duration, Instant};
use thiserror::Error;

const INPUT_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
enum MainError {
    #[error(transparent)]
    App(#[from] crate::app::AppError),
}

#[derive(Debug)]
enum ScanSignal {
    Scanned(Result<Vec<crate::domain::Project>, String>),
}

#[derive(Debug)]
enum LoadSignal {
    Loaded {
        path: PathBuf,
        generation: u64,
        result: Result<Vec<Message>, String>,
    },
}

fn main() {
    if let Err(error) = run_main() {
        let mut err = io::stderr().lock();
        let _ = writeln!(err, "{error}");
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), MainError> {
    let args = std::env::args().collect::<Vec<_>>();
    let invocation = match crate::cli::parse_invocation(&args) {
        Ok(invocation) => invocation,
        Err(error) => {
            let mut err = io::stderr().lock();
            let _ = writeln!(err, "{error}");
            let _ = writeln!(err);
            print_help();
            std::process::exit(2);
        }
    };

    match invocation {
        CliInvocation::PrintHelp => {
            print_help();
            Ok(())
        }
        CliInvocation::PrintVersion => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliInvocation::Tui(options) => Ok(run_tui(&options)?),
    }
}

fn print_help() {
    let name = env!("CARGO_PKG_NAME");
    let mut out = io::stdout().lock();
    let _ = write!(
        out,
        "{name}: live browser for conversation logs\n\nUSAGE:\n  {name} [--root DIR] [--sort name|recent] [--no-follow]\n  {name} --help | --version\n\nFLAGS:\n  --root DIR       Projects directory (default: ~/.claude/projects)\n  --sort MODE      Initial project order: name|recent (default: name)\n  --no-follow      Start with follow mode off\n\nENV:\n  SESSIONTREE_PROJECTS_DIR  Override projects directory\n  CLAUDE_PROJECTS_DIR       Fallback projects directory override\n  SESSIONTREE_DEBOUNCE_MS   Watcher debounce delay (default: 500)\n  SESSIONTREE_POLL_SECS     Periodic rescan interval, 0 disables (default: 10)\n  SESSIONTREE_LOG           Log level (default: info; RUST_LOG wins)\n\nLogs are written to {}\n",
        Config::log_path().display()
    );
}

fn run_tui(options: &TuiOptions) -> Result<(), crate::app::AppError> {
    let config = Config::from_env(options)?;
    let _logging = crate::logging::init(&config.log_level).ok();

    let initial = scan_projects(&config.projects_root)?;
    let mut model = AppModel::new(config.projects_root.clone(), config.sort, config.follow);
    if let Ok((width, height)) = terminal_size() {
        model.terminal_size = (width, height);
    }
    let (next, _) = app::update(model, AppEvent::Scanned(Ok(initial)));
    model = next;

    let mut watcher = match ProjectsWatcher::start(
        &config.projects_root,
        model.projects.iter().map(|project| project.path.as_path()),
        config.debounce,
    ) {
        Ok(watcher) => {
            model.watching = true;
            Some(watcher)
        }
        Err(error) => {
            tracing::warn!(%error, "live updates disabled");
            model.notice = Some(format!("Live updates disabled: {error} (r to rescan)"));
            None
        }
    };

    let mut terminal = setup_terminal()?;
    let result = run(&mut terminal, &mut model, &config, &mut watcher);
    restore_terminal(&mut terminal)?;
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    tracing::info!("exiting");
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, app::AppError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
) -> Result<(), app::AppError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Background I/O bookkeeping: at most one scan runs, later requests queue
/// behind it, and each session log is loaded by at most one worker at a time.
struct Workers {
    root: PathBuf,
    scan_tx: Sender<ScanSignal>,
    load_tx: Sender<LoadSignal>,
    scan_in_flight: bool,
    queued_rescan: Option<BTreeSet<PathBuf>>,
    loads_in_flight: BTreeSet<PathBuf>,
}

impl Workers {
    fn request_rescan(&mut self, preload: BTreeSet<PathBuf>) {
        if self.scan_in_flight {
            self.queued_rescan
                .get_or_insert_with(BTreeSet::new)
                .extend(preload);
            return;
        }
        self.spawn_scan(preload);
    }

    fn spawn_scan(&mut self, preload: BTreeSet<PathBuf>) {
        self.scan_in_flight = true;
        let root = self.root.clone();
        let tx = self.scan_tx.clone();
        std::thread::spawn(move || {
            let result = scan_and_preload(&root, &preload).map_err(|error| error.to_string());
            let _ = tx.send(ScanSignal::Scanned(result));
        });
    }

    fn scan_finished(&mut self) {
        self.scan_in_flight = false;
        if let Some(preload) = self.queued_rescan.take() {
            self.spawn_scan(preload);
        }
    }

    fn request_loads(&mut self, paths: Vec<PathBuf>, generation: u64) {
        for path in paths {
            if !self.loads_in_flight.insert(path.clone()) {
                continue;
            }
            let tx = self.load_tx.clone();
            std::thread::spawn(move || {
                let result = load_session(&path).map_err(|error| error.to_string());
                let _ = tx.send(LoadSignal::Loaded {
                    path,
                    generation,
                    result,
                });
            });
        }
    }
}

/// Applies one event; returns `true` when the app should quit.
fn dispatch(model: &mut AppModel, workers: &mut Workers, event: AppEvent) -> bool {
    let (next, command) = app::update(std::mem::take(model), event);
    *model = next;
    match command {
        AppCommand::None => false,
        AppCommand::Quit => true,
        AppCommand::Rescan { preload } => {
            workers.request_rescan(preload);
            false
        }
        AppCommand::LoadSessions { paths, generation } => {
            workers.request_loads(paths, generation);
            false
        }
    }
}

fn run(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    model: &mut AppModel,
    config: &Config,
    watcher: &mut Option<ProjectsWatcher>,
) -> Result<(), app::AppError> {
    let (scan_tx, scan_rx) = channel::<ScanSignal>();
    let (load_tx, load_rx) = channel::<LoadSignal>();
    let mut workers = Workers {
        root: config.projects_root.clone(),
        scan_tx,
        load_tx,
        scan_in_flight: false,
        queued_rescan: None,
        loads_in_flight: BTreeSet::new(),
    };
    let mut next_poll = config.poll_interval.map(|interval| Instant::now() + interval);

    loop {
        while let Ok(signal) = scan_rx.try_recv() {
            let ScanSignal::Scanned(result) = signal;
            workers.scan_finished();
            if let (Some(watcher), Ok(projects)) = (watcher.as_mut(), &result) {
                watcher.sync_projects(projects.iter().map(|project| project.path.as_path()));
            }
            if let Err(error) = &result {
                tracing::warn!(%error, "rescan failed");
            }
            if dispatch(model, &mut workers, AppEvent::Scanned(result)) {
                return Ok(());
            }
        }

        while let Ok(signal) = load_rx.try_recv() {
            let LoadSignal::Loaded {
                path,
                generation,
                result,
            } = signal;
            workers.loads_in_flight.remove(&path);
            let event = AppEvent::SessionLoaded {
                path,
                generation,
                result,
            };
            if dispatch(model, &mut workers, event) {
                return Ok(());
            }
        }

        if let Some(active) = watcher.as_ref() {
            while let Some(change) = active.try_recv() {
                tracing::debug!(
                    path = %change.path.display(),
                    project = %change.project,
                    is_new = change.is_new_file,
                    "change signal"
                );
                if dispatch(model, &mut workers, AppEvent::WatcherChanged) {
                    return Ok(());
                }
            }
            while let Some(error) = active.try_recv_error() {
                tracing::warn!(%error, "watcher error");
                if dispatch(model, &mut workers, AppEvent::WatcherError(error.to_string())) {
                    return Ok(());
                }
            }
        }

        if let (Some(due), Some(interval)) = (next_poll, config.poll_interval) {
            let now = Instant::now();
            if now >= due {
                next_poll = Some(now + interval);
                if dispatch(model, &mut workers, AppEvent::Tick) {
                    return Ok(());
                }
            }
        }

        terminal.draw(|frame| ui::render(frame, model))?;

        if event::poll(INPUT_POLL)? {
            let event = match event::read()? {
                Event::Key(key) if key.kind != KeyEventKind::Release => AppEvent::Key(key),
                Event::Resize(width, height) => AppEvent::Resize { width, height },
                _ => continue,
            };
            if dispatch(model, &mut workers, event) {
                return Ok(());
            }
        }
    }
}

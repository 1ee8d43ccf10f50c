use crate::infra::LOG_EXTENSION;
use notify::event::{EventKind, ModifyKind};
use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashMap};
use std::mem;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

const EVENT_CHANNEL_CAPACITY: usize = 100;
const ERROR_CHANNEL_CAPACITY: usize = 10;

/// A write or create on a session log. After debouncing, one of these stands
/// in for a whole burst; consumers only learn that something changed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub project: String,
    pub is_new_file: bool,
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),
}

type PendingMap = Arc<Mutex<HashMap<PathBuf, ChangeEvent>>>;

/// Collapses bursts of change events into one trailing signal.
///
/// Each `push` (re)arms the timer; once `delay` passes without a push, the
/// pending map is drained and a single representative is offered to the
/// bounded output channel. A full channel drops the signal.
#[derive(Debug)]
pub struct Debouncer {
    pending: PendingMap,
    arm_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(delay: Duration, events_tx: SyncSender<ChangeEvent>) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (arm_tx, arm_rx) = mpsc::channel::<()>();
        let worker_pending = pending.clone();
        let worker = std::thread::Builder::new()
            .name("watch-debounce".to_string())
            .spawn(move || run_debounce_worker(delay, &arm_rx, &worker_pending, &events_tx))
            .map_err(|error| tracing::warn!(%error, "debounce worker failed to start"))
            .ok();
        Self {
            pending,
            arm_tx: Some(arm_tx),
            worker,
        }
    }

    pub fn handle(&self) -> DebounceHandle {
        DebounceHandle {
            pending: self.pending.clone(),
            arm_tx: self.arm_tx.clone(),
        }
    }

    /// Stops the worker without flushing what is still pending.
    pub fn shutdown(&mut self) {
        self.arm_tx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable producer side of a [`Debouncer`], held by the notify callback.
#[derive(Clone, Debug)]
pub struct DebounceHandle {
    pending: PendingMap,
    arm_tx: Option<Sender<()>>,
}

impl DebounceHandle {
    pub fn push(&self, event: ChangeEvent) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(event.path.clone(), event);
        }
        if let Some(arm_tx) = &self.arm_tx {
            let _ = arm_tx.send(());
        }
    }
}

fn run_debounce_worker(
    delay: Duration,
    arm_rx: &Receiver<()>,
    pending: &PendingMap,
    events_tx: &SyncSender<ChangeEvent>,
) {
    // Disconnection is the done signal: every sender has been dropped.
    while arm_rx.recv().is_ok() {
        loop {
            match arm_rx.recv_timeout(delay) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
        flush_pending(pending, events_tx);
    }
}

fn flush_pending(pending: &PendingMap, events_tx: &SyncSender<ChangeEvent>) {
    let drained = match pending.lock() {
        Ok(mut pending) => mem::take(&mut *pending),
        Err(_) => return,
    };
    let burst = drained.len();
    // Any representative will do; the consumer rescans everything.
    let Some(event) = drained.into_values().next() else {
        return;
    };
    match events_tx.try_send(event) {
        Ok(()) => tracing::debug!(burst, "delivered debounced change"),
        Err(TrySendError::Full(_)) => tracing::debug!(burst, "change channel full, dropping signal"),
        Err(TrySendError::Disconnected(_)) => {}
    }
}

/// Live subscription to the projects root and each known project directory.
#[derive(Debug)]
pub struct ProjectsWatcher {
    watcher: Option<RecommendedWatcher>,
    debouncer: Debouncer,
    events_rx: Receiver<ChangeEvent>,
    errors_rx: Receiver<notify::Error>,
    /// Entries directly under the root that were created, removed, or
    /// renamed; a watch on any of them may be stale.
    dir_changes_rx: Receiver<PathBuf>,
    watched: BTreeSet<PathBuf>,
}

impl ProjectsWatcher {
    pub fn start<'a>(
        root: &Path,
        project_dirs: impl IntoIterator<Item = &'a Path>,
        delay: Duration,
    ) -> Result<Self, WatchError> {
        let (events_tx, events_rx) = mpsc::sync_channel::<ChangeEvent>(EVENT_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::sync_channel::<notify::Error>(ERROR_CHANNEL_CAPACITY);
        let (dir_changes_tx, dir_changes_rx) = mpsc::channel::<PathBuf>();
        let debouncer = Debouncer::new(delay, events_tx);
        let handle = debouncer.handle();
        let callback_root = root.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    for dir in project_dir_changes(&event, &callback_root) {
                        let _ = dir_changes_tx.send(dir);
                    }
                    for change in classify_event(&event, &callback_root) {
                        handle.push(change);
                    }
                }
                Err(error) => {
                    let _ = errors_tx.try_send(error);
                }
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::NonRecursive)?;

        let mut this = Self {
            watcher: Some(watcher),
            debouncer,
            events_rx,
            errors_rx,
            dir_changes_rx,
            watched: BTreeSet::new(),
        };
        this.sync_projects(project_dirs);
        tracing::info!(root = %root.display(), projects = this.watched.len(), "watching projects");
        Ok(this)
    }

    /// Makes the watched set match `project_dirs`, the projects of the
    /// latest scan. Directories that were removed or recreated since the last
    /// call are subscribed afresh; ones no longer present are released.
    /// Subscribe failures are logged and retried on the next call.
    pub fn sync_projects<'a>(&mut self, project_dirs: impl IntoIterator<Item = &'a Path>) {
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        while let Ok(dir) = self.dir_changes_rx.try_recv() {
            if self.watched.remove(&dir) {
                let _ = watcher.unwatch(&dir);
                tracing::debug!(project = %dir.display(), "project directory changed, resubscribing");
            }
        }

        let current: BTreeSet<&Path> = project_dirs.into_iter().collect();
        let gone: Vec<PathBuf> = self
            .watched
            .iter()
            .filter(|dir| !current.contains(dir.as_path()))
            .cloned()
            .collect();
        for dir in gone {
            let _ = watcher.unwatch(&dir);
            self.watched.remove(&dir);
            tracing::debug!(project = %dir.display(), "stopped watching project");
        }

        for dir in current {
            if self.watched.contains(dir) {
                continue;
            }
            match watcher.watch(dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.watched.insert(dir.to_path_buf());
                }
                Err(error) => {
                    tracing::warn!(project = %dir.display(), %error, "could not watch project");
                }
            }
        }
    }

    pub fn try_recv(&self) -> Option<ChangeEvent> {
        self.events_rx.try_recv().ok()
    }

    pub fn try_recv_error(&self) -> Option<notify::Error> {
        self.errors_rx.try_recv().ok()
    }

    /// Releases the OS watch handles and stops the debounce worker.
    pub fn stop(mut self) {
        self.release();
    }

    fn release(&mut self) {
        // Dropping the notify watcher drops the callback's debounce handle.
        self.watcher = None;
        self.debouncer.shutdown();
    }
}

impl Drop for ProjectsWatcher {
    fn drop(&mut self) {
        self.release();
    }
}

/// Session-log writes and creates, tagged with their project (the first path
/// segment below `root`).
pub fn classify_event(event: &notify::Event, root: &Path) -> Vec<ChangeEvent> {
    let is_new_file = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => false,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(LOG_EXTENSION))
        .map(|path| ChangeEvent {
            path: path.clone(),
            project: project_of(path, root),
            is_new_file,
        })
        .collect()
}

/// Direct children of `root` that appeared, disappeared, or were renamed.
fn project_dir_changes(event: &notify::Event, root: &Path) -> Vec<PathBuf> {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {}
        _ => return Vec::new(),
    }
    event
        .paths
        .iter()
        .filter(|path| path.parent() == Some(root))
        .cloned()
        .collect()
}

fn project_of(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .ok()
        .and_then(|relative| relative.components().next())
        .and_then(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .unwrap_or_default()
}

mod reconcile;

use crate::domain::{
    ContentBlock, ContentLayout, EntityRef, Message, NodeId, NodeKind, Project, SCROLL_END,
    Session, SortMode, TreeNode, block_line_count, build_message_nodes, max_scroll,
    message_detail_line_count, message_key, sort_projects,
};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use reconcile::{FlatRow, clamp_tree_scroll, flatten_tree};
use reconcile::{
    apply_expanded, capture_expanded, carry_over_messages, ensure_session_children, find_node_mut,
};

pub const DEFAULT_TREE_WIDTH: u16 = 35;
const FALLBACK_TERMINAL_SIZE: (u16, u16) = (80, 24);
/// Header row plus help row.
const CHROME_ROWS: u16 = 2;
const BORDER_SIZE: u16 = 2;
/// Detail pane rows reserved for the "lines above/below" indicators.
pub const INDICATOR_ROWS: usize = 2;
const MIN_RENDER_WIDTH: usize = 10;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("terminal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Scan(#[from] crate::infra::ScanError),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Focus {
    Tree,
    Detail,
}

impl Focus {
    pub fn label(self) -> &'static str {
        match self {
            Self::Tree => "tree",
            Self::Detail => "detail",
        }
    }
}

/// What the detail pane shows for the selected row.
#[derive(Clone, Copy, Debug)]
pub enum DetailView<'a> {
    Project(&'a Project),
    Transcript(&'a Session),
    Message {
        session: &'a Session,
        message: &'a Message,
    },
    Block {
        message: &'a Message,
        block: &'a ContentBlock,
    },
}

#[derive(Clone, Debug)]
pub struct AppModel {
    pub root: PathBuf,
    pub projects: Vec<Project>,
    pub tree: Vec<TreeNode>,
    pub rows: Vec<FlatRow>,
    pub cursor: usize,
    pub selected: Option<NodeId>,
    pub tree_scroll: usize,
    pub focus: Focus,
    pub follow: bool,
    pub sort: SortMode,
    /// May hold [`SCROLL_END`]; clamped when rendered.
    pub detail_scroll: usize,
    /// Per-message override keyed by [`message_key`]; absent keys follow `expand_all`.
    pub message_expanded: BTreeMap<String, bool>,
    pub expand_all: bool,
    pub terminal_size: (u16, u16),
    pub tree_width: u16,
    pub watching: bool,
    pub scan_error: Option<String>,
    pub notice: Option<String>,
    /// Bumped on every applied scan; loads requested earlier lose to it.
    pub snapshot_generation: u64,
    /// Line layout of the scrollable detail view, rebuilt only when its
    /// inputs change.
    layout: Option<ContentLayout>,
}

impl Default for AppModel {
    fn default() -> Self {
        Self::new(PathBuf::new(), SortMode::default(), false)
    }
}

impl AppModel {
    pub fn new(root: PathBuf, sort: SortMode, follow: bool) -> Self {
        Self {
            root,
            projects: Vec::new(),
            tree: Vec::new(),
            rows: Vec::new(),
            cursor: 0,
            selected: None,
            tree_scroll: 0,
            focus: Focus::Tree,
            follow,
            sort,
            detail_scroll: 0,
            message_expanded: BTreeMap::new(),
            expand_all: false,
            terminal_size: (0, 0),
            tree_width: DEFAULT_TREE_WIDTH,
            watching: false,
            scan_error: None,
            notice: None,
            snapshot_generation: 0,
            layout: None,
        }
    }

    pub fn selected_row(&self) -> Option<&FlatRow> {
        self.rows
            .get(self.cursor)
            .filter(|row| self.selected.as_ref() == Some(&row.id))
    }

    /// The session owning the current selection; what the detail pane shows.
    pub fn detail_session(&self) -> Option<&Session> {
        self.selected_row()?.entity.session(&self.projects)
    }

    pub fn is_message_expanded(&self, key: &str) -> bool {
        self.message_expanded
            .get(key)
            .copied()
            .unwrap_or(self.expand_all)
    }

    pub fn detail_view(&self) -> Option<DetailView<'_>> {
        let entity = self.selected_row()?.entity;
        let view = match entity {
            EntityRef::Project { .. } => DetailView::Project(entity.project(&self.projects)?),
            EntityRef::Session { .. } => DetailView::Transcript(entity.session(&self.projects)?),
            EntityRef::Message { .. } => DetailView::Message {
                session: entity.session(&self.projects)?,
                message: entity.message(&self.projects)?,
            },
            EntityRef::Block { .. } => DetailView::Block {
                message: entity.message(&self.projects)?,
                block: entity.block(&self.projects)?,
            },
        };
        Some(view)
    }

    /// `None` when the selection has nothing to scroll through.
    pub fn detail_layout(&self) -> Option<&ContentLayout> {
        self.layout.as_ref()
    }

    fn shows_transcript(&self) -> bool {
        matches!(self.detail_view(), Some(DetailView::Transcript(_)))
    }

    fn compute_detail_layout(&self) -> Option<ContentLayout> {
        let render_width = self.detail_render_width();
        match self.detail_view()? {
            DetailView::Project(_) => None,
            DetailView::Transcript(session) => {
                let messages = session.messages();
                Some(ContentLayout::compute(
                    messages,
                    |index| {
                        messages.get(index).is_some_and(|message| {
                            self.is_message_expanded(&message_key(&session.log_path, index, message))
                        })
                    },
                    render_width,
                ))
            }
            DetailView::Message { message, .. } => Some(ContentLayout::from_heights(
                [message_detail_line_count(message, render_width)],
                render_width,
            )),
            DetailView::Block { block, .. } => Some(ContentLayout::from_heights(
                [block_line_count(block, render_width)],
                render_width,
            )),
        }
    }

    /// Rebuilds the cached layout. Called on selection change, expand or
    /// collapse, resize, and whenever the shown data is replaced.
    fn relayout(&mut self) {
        self.layout = self.compute_detail_layout();
        if self.layout.is_none() && self.focus == Focus::Detail {
            self.focus = Focus::Tree;
        }
    }

    pub fn viewport_size(&self) -> (u16, u16) {
        if self.terminal_size.0 == 0 || self.terminal_size.1 == 0 {
            FALLBACK_TERMINAL_SIZE
        } else {
            self.terminal_size
        }
    }

    pub fn tree_viewport_height(&self) -> usize {
        let (_, height) = self.viewport_size();
        usize::from(height.saturating_sub(CHROME_ROWS + BORDER_SIZE)).max(1)
    }

    pub fn detail_render_width(&self) -> usize {
        let (width, _) = self.viewport_size();
        usize::from(width.saturating_sub(self.tree_width + BORDER_SIZE)).max(MIN_RENDER_WIDTH)
    }

    pub fn detail_viewport_height(&self) -> usize {
        let (_, height) = self.viewport_size();
        usize::from(height.saturating_sub(CHROME_ROWS + BORDER_SIZE))
            .saturating_sub(INDICATOR_ROWS)
            .max(1)
    }

    /// Sessions a rescan should load eagerly: every expanded session plus the
    /// one shown in the detail pane.
    pub fn wanted_sessions(&self) -> BTreeSet<PathBuf> {
        let mut expanded = BTreeSet::new();
        capture_expanded(&self.tree, &mut expanded);
        self.wanted_from(&expanded)
    }

    fn wanted_from(&self, expanded: &BTreeSet<NodeId>) -> BTreeSet<PathBuf> {
        let mut wanted: BTreeSet<PathBuf> = expanded
            .iter()
            .filter_map(|id| match id {
                NodeId::Session(path) => Some(path.clone()),
                _ => None,
            })
            .collect();
        if let Some(session) = self.detail_session() {
            wanted.insert(session.log_path.clone());
        }
        wanted
    }

    /// Merges a fresh snapshot into the live view state.
    ///
    /// Returns log paths that still need loading: expanded sessions and the
    /// detail session whose messages neither the scan nor the previous
    /// snapshot provided.
    pub fn reconcile(&mut self, mut projects: Vec<Project>) -> Vec<PathBuf> {
        let mut expanded = BTreeSet::new();
        capture_expanded(&self.tree, &mut expanded);
        let previous_selection = self.selected.clone();

        let wanted = self.wanted_from(&expanded);
        carry_over_messages(&mut projects, &self.projects, &wanted);
        sort_projects(&mut projects, self.sort);
        let mut tree = crate::domain::build_tree(&projects);

        apply_expanded(&mut tree, &expanded);

        let mut unloaded = ensure_session_children(&mut tree, &projects, &expanded);

        self.projects = projects;
        self.tree = tree;
        self.refresh_rows();
        if self.selected != previous_selection {
            self.reset_detail();
        }
        if let Some(session) = self.detail_session() {
            if !session.is_loaded() && !unloaded.contains(&session.log_path) {
                unloaded.push(session.log_path.clone());
            }
        }

        if self.follow {
            self.detail_scroll = SCROLL_END;
        }
        self.prune_message_overrides();
        self.relayout();
        tracing::debug!(
            projects = self.projects.len(),
            rows = self.rows.len(),
            unloaded = unloaded.len(),
            "reconciled tree"
        );
        unloaded
    }

    /// Flattens the tree and re-resolves the cursor from the selected id.
    fn refresh_rows(&mut self) {
        self.rows = flatten_tree(&self.tree);
        let restored = self
            .selected
            .as_ref()
            .and_then(|id| self.rows.iter().position(|row| &row.id == id));
        match restored {
            Some(index) => self.cursor = index,
            None => {
                self.cursor = 0;
                self.selected = self.rows.first().map(|row| row.id.clone());
            }
        }
        self.tree_scroll = clamp_tree_scroll(
            self.cursor,
            self.tree_scroll,
            self.rows.len(),
            self.tree_viewport_height(),
        );
    }

    fn reset_detail(&mut self) {
        self.detail_scroll = 0;
        self.expand_all = false;
    }

    /// Drops expand/collapse overrides for messages no loaded session holds.
    fn prune_message_overrides(&mut self) {
        if self.message_expanded.is_empty() {
            return;
        }
        let live: BTreeSet<String> = self
            .projects
            .iter()
            .flat_map(|project| project.sessions.iter())
            .flat_map(|session| {
                session
                    .messages()
                    .iter()
                    .enumerate()
                    .map(move |(index, message)| message_key(&session.log_path, index, message))
            })
            .collect();
        self.message_expanded.retain(|key, _| live.contains(key));
    }

    fn apply_loaded_session(&mut self, path: &Path, generation: u64, messages: Vec<Message>) {
        let Some((project_index, session_index)) = locate_session(&self.projects, path) else {
            return;
        };
        let session = &mut self.projects[project_index].sessions[session_index];
        if generation < self.snapshot_generation && session.is_loaded() {
            tracing::debug!(path = %path.display(), generation, "dropping load superseded by a newer scan");
            return;
        }
        session.messages = Some(messages);

        let mut expanded = BTreeSet::new();
        capture_expanded(&self.tree, &mut expanded);
        let session = &self.projects[project_index].sessions[session_index];
        if let Some(node) = find_node_mut(&mut self.tree, &NodeId::Session(path.to_path_buf())) {
            node.children = build_message_nodes(session, project_index, session_index);
            apply_expanded(&mut node.children, &expanded);
        }
        self.refresh_rows();

        let shows_loaded = self
            .detail_session()
            .is_some_and(|session| session.log_path == path);
        if self.follow && shows_loaded {
            self.detail_scroll = SCROLL_END;
        }
        self.relayout();
    }

    fn select_row(&mut self, index: usize) -> AppCommand {
        let Some(row) = self.rows.get(index) else {
            return AppCommand::None;
        };
        let changed = self.selected.as_ref() != Some(&row.id);
        self.selected = Some(row.id.clone());
        self.cursor = index;
        self.tree_scroll = clamp_tree_scroll(
            self.cursor,
            self.tree_scroll,
            self.rows.len(),
            self.tree_viewport_height(),
        );
        if changed {
            self.reset_detail();
            self.relayout();
        }
        self.load_detail_command()
    }

    fn load_detail_command(&self) -> AppCommand {
        match self.detail_session() {
            Some(session) if !session.is_loaded() => {
                self.load_command(vec![session.log_path.clone()])
            }
            _ => AppCommand::None,
        }
    }

    fn load_command(&self, paths: Vec<PathBuf>) -> AppCommand {
        if paths.is_empty() {
            AppCommand::None
        } else {
            AppCommand::LoadSessions {
                paths,
                generation: self.snapshot_generation,
            }
        }
    }

    fn set_selected_expanded(&mut self, expanded: bool) -> AppCommand {
        let Some(id) = self.selected.clone() else {
            return AppCommand::None;
        };
        let Some(node) = find_node_mut(&mut self.tree, &id) else {
            return AppCommand::None;
        };
        if node.expanded == expanded || (expanded && !node.is_expandable()) {
            return AppCommand::None;
        }
        node.expanded = expanded;
        let is_session = node.kind() == NodeKind::Session;

        let mut unloaded = Vec::new();
        if expanded && is_session {
            let mut expanded_ids = BTreeSet::new();
            capture_expanded(&self.tree, &mut expanded_ids);
            unloaded = ensure_session_children(&mut self.tree, &self.projects, &expanded_ids);
        }
        self.refresh_rows();
        self.load_command(unloaded)
    }

    fn select_parent(&mut self) -> AppCommand {
        let Some(depth) = self.selected_row().map(|row| row.depth) else {
            return AppCommand::None;
        };
        if depth == 0 {
            return AppCommand::None;
        }
        let parent = self.rows[..self.cursor]
            .iter()
            .rposition(|row| row.depth + 1 == depth);
        match parent {
            Some(index) => self.select_row(index),
            None => AppCommand::None,
        }
    }

    fn set_all_messages_expanded(&mut self, expanded: bool) {
        self.expand_all = expanded;
        let Some(session) = self.detail_session() else {
            return;
        };
        let keys: Vec<String> = session
            .messages()
            .iter()
            .enumerate()
            .map(|(index, message)| message_key(&session.log_path, index, message))
            .collect();
        for key in keys {
            self.message_expanded.insert(key, expanded);
        }
        self.relayout();
    }

    fn rescan_command(&self) -> AppCommand {
        AppCommand::Rescan {
            preload: self.wanted_sessions(),
        }
    }
}

fn locate_session(projects: &[Project], path: &Path) -> Option<(usize, usize)> {
    projects.iter().enumerate().find_map(|(project_index, project)| {
        project
            .sessions
            .iter()
            .position(|session| session.log_path == path)
            .map(|session_index| (project_index, session_index))
    })
}

#[derive(Clone, Debug)]
pub enum AppEvent {
    Key(KeyEvent),
    Resize { width: u16, height: u16 },
    Scanned(Result<Vec<Project>, String>),
    SessionLoaded {
        path: PathBuf,
        /// Snapshot generation the load was requested in.
        generation: u64,
        result: Result<Vec<Message>, String>,
    },
    WatcherChanged,
    WatcherError(String),
    Tick,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AppCommand {
    None,
    Quit,
    Rescan { preload: BTreeSet<PathBuf> },
    LoadSessions { paths: Vec<PathBuf>, generation: u64 },
}

pub fn update(model: AppModel, event: AppEvent) -> (AppModel, AppCommand) {
    let mut model = model;
    match event {
        AppEvent::Key(key) => update_on_key(model, key),
        AppEvent::Resize { width, height } => {
            model.terminal_size = (width, height);
            model.tree_scroll = clamp_tree_scroll(
                model.cursor,
                model.tree_scroll,
                model.rows.len(),
                model.tree_viewport_height(),
            );
            model.relayout();
            (model, AppCommand::None)
        }
        AppEvent::Scanned(Ok(projects)) => {
            model.scan_error = None;
            model.snapshot_generation += 1;
            let unloaded = model.reconcile(projects);
            let command = model.load_command(unloaded);
            (model, command)
        }
        AppEvent::Scanned(Err(message)) => {
            model.scan_error = Some(message);
            (model, AppCommand::None)
        }
        AppEvent::SessionLoaded {
            path,
            generation,
            result: Ok(messages),
        } => {
            model.apply_loaded_session(&path, generation, messages);
            (model, AppCommand::None)
        }
        AppEvent::SessionLoaded {
            path,
            result: Err(message),
            ..
        } => {
            model.notice = Some(format!("Failed to load {}: {message}", path.display()));
            (model, AppCommand::None)
        }
        AppEvent::WatcherChanged | AppEvent::Tick => {
            let command = model.rescan_command();
            (model, command)
        }
        AppEvent::WatcherError(message) => {
            model.notice = Some(format!("Watch error: {message}"));
            (model, AppCommand::None)
        }
    }
}

fn update_on_key(model: AppModel, key: KeyEvent) -> (AppModel, AppCommand) {
    let mut model = model;
    model.notice = None;

    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return (model, AppCommand::Quit);
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match model.focus {
            Focus::Detail => update_detail(model, key),
            Focus::Tree => (model, AppCommand::None),
        };
    }

    match key.code {
        KeyCode::Char('q') => return (model, AppCommand::Quit),
        KeyCode::Tab => {
            match model.focus {
                Focus::Tree if model.detail_layout().is_some() => model.focus = Focus::Detail,
                Focus::Tree => {}
                Focus::Detail => model.focus = Focus::Tree,
            }
            return (model, AppCommand::None);
        }
        KeyCode::Char('s') => {
            model.sort = model.sort.toggle();
            let projects = std::mem::take(&mut model.projects);
            let unloaded = model.reconcile(projects);
            let command = model.load_command(unloaded);
            return (model, command);
        }
        KeyCode::Char('f') => {
            model.follow = !model.follow;
            if model.follow {
                model.detail_scroll = SCROLL_END;
            }
            return (model, AppCommand::None);
        }
        KeyCode::Char('r') => {
            let command = model.rescan_command();
            return (model, command);
        }
        _ => {}
    }

    match model.focus {
        Focus::Tree => update_tree(model, key),
        Focus::Detail => update_detail(model, key),
    }
}

fn update_tree(mut model: AppModel, key: KeyEvent) -> (AppModel, AppCommand) {
    let command = match key.code {
        KeyCode::Char('j') | KeyCode::Down => {
            if model.cursor + 1 < model.rows.len() {
                model.select_row(model.cursor + 1)
            } else {
                AppCommand::None
            }
        }
        KeyCode::Char('k') | KeyCode::Up => match model.cursor.checked_sub(1) {
            Some(index) => model.select_row(index),
            None => AppCommand::None,
        },
        KeyCode::Home => model.select_row(0),
        KeyCode::End => model.select_row(model.rows.len().saturating_sub(1)),
        KeyCode::Char('l') | KeyCode::Right => model.set_selected_expanded(true),
        KeyCode::Char('h') | KeyCode::Left => {
            if model.selected_row().is_some_and(|row| row.expanded) {
                model.set_selected_expanded(false)
            } else {
                model.select_parent()
            }
        }
        KeyCode::Enter => {
            let Some(row) = model.selected_row() else {
                return (model, AppCommand::None);
            };
            if row.kind() == NodeKind::Session {
                model.focus = Focus::Detail;
                model.detail_scroll = 0;
                model.load_detail_command()
            } else if row.expandable {
                let expanded = !row.expanded;
                model.set_selected_expanded(expanded)
            } else {
                AppCommand::None
            }
        }
        _ => AppCommand::None,
    };
    (model, command)
}

fn update_detail(mut model: AppModel, key: KeyEvent) -> (AppModel, AppCommand) {
    if key.code == KeyCode::Esc {
        model.focus = Focus::Tree;
        return (model, AppCommand::None);
    }
    let height = model.detail_viewport_height();
    let Some(layout) = model.detail_layout() else {
        return (model, AppCommand::None);
    };
    let top = layout.window(model.detail_scroll, height).start;
    let bottom = max_scroll(layout.total_lines(), height);
    let top_message = layout
        .message_at_line(top)
        .and_then(|index| layout.message_start(index).map(|start| (index, start)));
    let half_page = (height / 2).max(1);
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let transcript = model.shows_transcript();

    match key.code {
        KeyCode::Char('d') if ctrl => model.detail_scroll = (top + half_page).min(bottom),
        KeyCode::Char('u') if ctrl => model.detail_scroll = top.saturating_sub(half_page),
        _ if ctrl => {}
        KeyCode::Char('j') | KeyCode::Down => model.detail_scroll = (top + 1).min(bottom),
        KeyCode::Char('k') | KeyCode::Up => model.detail_scroll = top.saturating_sub(1),
        KeyCode::PageDown => model.detail_scroll = (top + half_page).min(bottom),
        KeyCode::PageUp => model.detail_scroll = top.saturating_sub(half_page),
        KeyCode::Char('g') | KeyCode::Home => model.detail_scroll = 0,
        KeyCode::Char('G') | KeyCode::End => model.detail_scroll = SCROLL_END,
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right if transcript => {
            model.set_all_messages_expanded(true);
        }
        KeyCode::Char('h') | KeyCode::Left if transcript => model.set_all_messages_expanded(false),
        KeyCode::Char(' ') if transcript => {
            let Some((index, start)) = top_message else {
                return (model, AppCommand::None);
            };
            let key = model.detail_session().and_then(|session| {
                session
                    .messages()
                    .get(index)
                    .map(|message| message_key(&session.log_path, index, message))
            });
            if let Some(key) = key {
                let expanded = model.is_message_expanded(&key);
                model.message_expanded.insert(key, !expanded);
                if model.detail_scroll != SCROLL_END {
                    model.detail_scroll = start;
                }
                model.relayout();
            }
        }
        _ => {}
    }
    (model, AppCommand::None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ContentBlock, SessionKind, parse_message_line};
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    fn key(code: KeyCode) -> AppEvent {
        AppEvent::Key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    fn ctrl(c: char) -> AppEvent {
        AppEvent::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL))
    }

    fn message(uuid: &str, text: &str) -> Message {
        let line = json!({
            "type": "user",
            "uuid": uuid,
            "message": {"role": "user", "content": text},
        })
        .to_string();
        parse_message_line(line.as_bytes())
            .expect("valid json")
            .expect("user record")
    }

    fn session(project: &str, id: &str, modified_secs: u64, messages: Option<Vec<Message>>) -> Session {
        Session {
            id: id.to_string(),
            log_path: PathBuf::from(format!("/p/{project}/{id}.jsonl")),
            kind: SessionKind::Primary,
            modified: Some(UNIX_EPOCH + Duration::from_secs(modified_secs)),
            messages,
        }
    }

    fn project(name: &str, sessions: Vec<Session>) -> Project {
        Project {
            name: name.to_string(),
            path: PathBuf::from(format!("/p/{name}")),
            sessions,
        }
    }

    /// Two projects; `alpha` has a loaded session and an unloaded one.
    fn snapshot() -> Vec<Project> {
        vec![
            project("beta", vec![session("beta", "b1", 300, None)]),
            project(
                "alpha",
                vec![
                    session(
                        "alpha",
                        "a1",
                        200,
                        Some(vec![message("m1", "first"), message("m2", "second")]),
                    ),
                    session("alpha", "a2", 100, None),
                ],
            ),
        ]
    }

    fn scanned(model: AppModel, projects: Vec<Project>) -> (AppModel, AppCommand) {
        update(model, AppEvent::Scanned(Ok(projects)))
    }

    fn model() -> AppModel {
        let model = AppModel::new(PathBuf::from("/p"), SortMode::Alphabetical, false);
        scanned(model, snapshot()).0
    }

    fn press(model: AppModel, event: AppEvent) -> AppModel {
        update(model, event).0
    }

    fn ids(model: &AppModel) -> Vec<NodeId> {
        model.rows.iter().map(|row| row.id.clone()).collect()
    }

    fn session_id(project: &str, id: &str) -> NodeId {
        NodeId::Session(PathBuf::from(format!("/p/{project}/{id}.jsonl")))
    }

    #[test]
    fn initial_scan_selects_the_first_node() {
        let model = model();
        assert_eq!(
            ids(&model),
            vec![
                NodeId::Project(PathBuf::from("/p/alpha")),
                NodeId::Project(PathBuf::from("/p/beta")),
            ]
        );
        assert_eq!(model.cursor, 0);
        assert_eq!(model.selected, Some(NodeId::Project(PathBuf::from("/p/alpha"))));
    }

    #[test]
    fn reconciling_an_unchanged_snapshot_is_idempotent() {
        let mut model = model();
        model.terminal_size = (100, 8);
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        model = press(model, key(KeyCode::Char('j')));

        let (once, _) = scanned(model, snapshot());
        let (twice, _) = scanned(once.clone(), snapshot());
        assert_eq!(once.rows, twice.rows);
        assert_eq!(once.selected, twice.selected);
        assert_eq!(once.cursor, twice.cursor);
        assert_eq!(once.tree_scroll, twice.tree_scroll);
        assert_eq!(once.detail_scroll, twice.detail_scroll);
    }

    #[test]
    fn expansion_survives_a_rebuild_and_vanished_nodes_are_ignored() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        model = press(model, key(KeyCode::Char('l')));
        assert!(model.rows.iter().any(|row| row.id == NodeId::Message("m1".to_string())));

        let (model, _) = scanned(model, snapshot());
        assert!(model.rows[0].expanded);
        assert!(model.rows[1].expanded);
        assert_eq!(model.rows[2].id, NodeId::Message("m1".to_string()));

        let without_alpha = vec![project("beta", vec![session("beta", "b1", 300, None)])];
        let (model, _) = scanned(model, without_alpha);
        assert_eq!(ids(&model), vec![NodeId::Project(PathBuf::from("/p/beta"))]);
        assert!(!model.rows[0].expanded);
    }

    #[test]
    fn selection_is_restored_by_identifier() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('j')));
        assert_eq!(model.selected, Some(NodeId::Project(PathBuf::from("/p/beta"))));

        let mut projects = snapshot();
        projects.push(project("aardvark", Vec::new()));
        let (model, _) = scanned(model, projects);
        assert_eq!(model.cursor, 2);
        assert_eq!(model.selected, Some(NodeId::Project(PathBuf::from("/p/beta"))));
    }

    #[test]
    fn missing_selection_falls_back_to_first_node_or_none() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('j')));

        let (model, _) = scanned(model, vec![project("gamma", Vec::new())]);
        assert_eq!(model.cursor, 0);
        assert_eq!(model.selected, Some(NodeId::Project(PathBuf::from("/p/gamma"))));

        let (model, _) = scanned(model, Vec::new());
        assert!(model.rows.is_empty());
        assert_eq!(model.selected, None);
        assert!(model.selected_row().is_none());
    }

    #[test]
    fn tree_scroll_is_clamped_after_rows_disappear() {
        let mut model = AppModel::new(PathBuf::from("/p"), SortMode::Alphabetical, false);
        model.terminal_size = (100, 9);
        let many: Vec<Project> = (0..20)
            .map(|index| project(&format!("p{index:02}"), Vec::new()))
            .collect();
        model = scanned(model, many).0;
        model = press(model, key(KeyCode::End));
        assert_eq!(model.cursor, 19);
        assert_eq!(model.tree_scroll, 15);

        let few: Vec<Project> = (0..3)
            .map(|index| project(&format!("p{index:02}"), Vec::new()))
            .collect();
        let (model, _) = scanned(model, few);
        assert_eq!(model.cursor, 0);
        assert_eq!(model.tree_scroll, 0);
    }

    #[test]
    fn follow_mode_pins_detail_to_the_end_without_moving_the_cursor() {
        let mut model = model();
        model.follow = true;
        model = press(model, key(KeyCode::Char('j')));
        let cursor = model.cursor;
        assert_eq!(model.detail_scroll, 0);

        let (model, _) = scanned(model, snapshot());
        assert_eq!(model.detail_scroll, SCROLL_END);
        assert_eq!(model.cursor, cursor);
    }

    #[test]
    fn expanding_an_unloaded_session_requests_a_load() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        model = press(model, key(KeyCode::Char('j')));
        assert_eq!(model.selected, Some(session_id("alpha", "a2")));

        let (model, command) = update(model, key(KeyCode::Char('l')));
        assert_eq!(
            command,
            AppCommand::LoadSessions {
                paths: vec![PathBuf::from("/p/alpha/a2.jsonl")],
                generation: 1,
            }
        );
        assert!(model.selected_row().is_some_and(|row| row.expanded));

        let (model, _) = update(
            model,
            AppEvent::SessionLoaded {
                path: PathBuf::from("/p/alpha/a2.jsonl"),
                generation: 1,
                result: Ok(vec![message("n1", "late")]),
            },
        );
        let position = model
            .rows
            .iter()
            .position(|row| row.id == NodeId::Message("n1".to_string()));
        assert_eq!(position, Some(3));
        assert_eq!(model.selected, Some(session_id("alpha", "a2")));
    }

    #[test]
    fn rescan_reports_expanded_sessions_still_unloaded() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        model = press(model, key(KeyCode::Char('j')));
        let (model, _) = update(model, key(KeyCode::Char('l')));

        let (model, command) = update(model, AppEvent::WatcherChanged);
        assert_eq!(
            command,
            AppCommand::Rescan {
                preload: BTreeSet::from([PathBuf::from("/p/alpha/a2.jsonl")]),
            }
        );

        let (_, command) = scanned(model, snapshot());
        assert_eq!(
            command,
            AppCommand::LoadSessions {
                paths: vec![PathBuf::from("/p/alpha/a2.jsonl")],
                generation: 2,
            }
        );
    }

    #[test]
    fn collapse_then_left_moves_to_parent() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        assert_eq!(model.selected, Some(session_id("alpha", "a1")));

        model = press(model, key(KeyCode::Char('h')));
        assert_eq!(model.selected, Some(NodeId::Project(PathBuf::from("/p/alpha"))));
        model = press(model, key(KeyCode::Char('h')));
        assert_eq!(model.rows.len(), 2);
    }

    #[test]
    fn sort_toggle_reorders_and_keeps_selection() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('j')));
        let (model, _) = update(model, key(KeyCode::Char('s')));
        assert_eq!(model.sort, SortMode::Recent);
        assert_eq!(
            ids(&model),
            vec![
                NodeId::Project(PathBuf::from("/p/beta")),
                NodeId::Project(PathBuf::from("/p/alpha")),
            ]
        );
        assert_eq!(model.cursor, 0);
        assert_eq!(model.selected, Some(NodeId::Project(PathBuf::from("/p/beta"))));
    }

    #[test]
    fn scan_failure_keeps_previous_tree() {
        let model = model();
        let rows = model.rows.clone();
        let (model, command) = update(model, AppEvent::Scanned(Err("root vanished".to_string())));
        assert_eq!(command, AppCommand::None);
        assert_eq!(model.rows, rows);
        assert_eq!(model.scan_error.as_deref(), Some("root vanished"));

        let (model, _) = scanned(model, snapshot());
        assert_eq!(model.scan_error, None);
    }

    fn detail_model() -> AppModel {
        let long = "x".repeat(400);
        let messages: Vec<Message> = (0..10)
            .map(|index| message(&format!("d{index}"), &long))
            .collect();
        let mut model = AppModel::new(PathBuf::from("/p"), SortMode::Alphabetical, false);
        model.terminal_size = (75, 16);
        model = scanned(
            model,
            vec![project("solo", vec![session("solo", "s1", 1, Some(messages))])],
        )
        .0;
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        let (model, command) = update(model, key(KeyCode::Enter));
        assert_eq!(command, AppCommand::None);
        assert_eq!(model.focus, Focus::Detail);
        model
    }

    #[test]
    fn detail_scrolling_clamps_and_end_is_stable() {
        let model = detail_model();
        assert_eq!(model.detail_viewport_height(), 10);
        // 10 collapsed messages, 3 lines each
        let total = model.detail_layout().map(|layout| layout.total_lines());
        assert_eq!(total, Some(30));

        let model = press(model, key(KeyCode::Char('G')));
        assert_eq!(model.detail_scroll, SCROLL_END);
        let model = press(model, key(KeyCode::Char('j')));
        assert_eq!(model.detail_scroll, 20);
        let model = press(model, key(KeyCode::Char('k')));
        assert_eq!(model.detail_scroll, 19);
        let model = press(model, ctrl('u'));
        assert_eq!(model.detail_scroll, 14);
        let model = press(model, key(KeyCode::PageDown));
        assert_eq!(model.detail_scroll, 19);
        let model = press(model, key(KeyCode::Char('g')));
        assert_eq!(model.detail_scroll, 0);
    }

    #[test]
    fn expand_all_applies_to_messages_loaded_later() {
        let model = detail_model();
        let model = press(model, key(KeyCode::Enter));
        assert!(model.expand_all);
        assert!(model.is_message_expanded("d3"));
        assert!(model.is_message_expanded("not-seen-yet"));

        let model = press(model, key(KeyCode::Char('h')));
        assert!(!model.expand_all);
        assert!(!model.is_message_expanded("d3"));
    }

    #[test]
    fn space_toggles_the_message_at_the_top_of_the_viewport() {
        let model = detail_model();
        let model = press(model, key(KeyCode::Char('j')));
        let model = press(model, key(KeyCode::Char('j')));
        let model = press(model, key(KeyCode::Char('j')));
        assert_eq!(model.detail_scroll, 3);

        let model = press(model, key(KeyCode::Char(' ')));
        assert!(model.is_message_expanded("d1"));
        assert!(!model.is_message_expanded("d0"));
        assert_eq!(model.detail_scroll, 3);
    }

    #[test]
    fn selection_change_resets_detail_state() {
        let model = detail_model();
        let model = press(model, key(KeyCode::Enter));
        let model = press(model, key(KeyCode::Char('G')));
        let model = press(model, key(KeyCode::Esc));
        assert_eq!(model.focus, Focus::Tree);

        let model = press(model, key(KeyCode::Char('k')));
        assert_eq!(model.detail_scroll, 0);
        assert!(!model.expand_all);
    }

    #[test]
    fn tab_only_enters_detail_with_a_session_selected() {
        let model = model();
        let model = press(model, key(KeyCode::Tab));
        assert_eq!(model.focus, Focus::Tree);
        let model = press(model, key(KeyCode::Char('l')));
        let model = press(model, key(KeyCode::Char('j')));
        let model = press(model, key(KeyCode::Tab));
        assert_eq!(model.focus, Focus::Detail);
    }

    #[test]
    fn quit_keys_and_rescan_key() {
        let (_, command) = update(model(), key(KeyCode::Char('q')));
        assert_eq!(command, AppCommand::Quit);
        let (_, command) = update(model(), ctrl('c'));
        assert_eq!(command, AppCommand::Quit);
        let (_, command) = update(model(), key(KeyCode::Char('r')));
        assert!(matches!(command, AppCommand::Rescan { .. }));
        let (_, command) = update(model(), AppEvent::Tick);
        assert!(matches!(command, AppCommand::Rescan { .. }));
    }

    #[test]
    fn tool_blocks_appear_under_expanded_messages() {
        let line = json!({
            "type": "assistant",
            "uuid": "t1",
            "message": {"content": [{"type": "tool_use", "id": "toolu_9", "name": "Read", "input": {}}]},
        })
        .to_string();
        let tool = parse_message_line(line.as_bytes())
            .expect("valid json")
            .expect("assistant record");
        assert!(matches!(tool.blocks[0], ContentBlock::ToolUse { .. }));

        let mut model = AppModel::new(PathBuf::from("/p"), SortMode::Alphabetical, false);
        model = scanned(
            model,
            vec![project("solo", vec![session("solo", "s1", 1, Some(vec![tool]))])],
        )
        .0;
        for _ in 0..2 {
            model = press(model, key(KeyCode::Char('l')));
            model = press(model, key(KeyCode::Char('j')));
        }
        model = press(model, key(KeyCode::Char('l')));
        assert_eq!(model.rows.len(), 4);
        assert_eq!(model.rows[3].label, "🔧 Read");
        assert_eq!(model.rows[3].depth, 3);
    }

    #[test]
    fn detail_view_follows_the_selected_node_kind() {
        let mut model = model();
        assert!(matches!(model.detail_view(), Some(DetailView::Project(project)) if project.name == "alpha"));
        assert!(model.detail_layout().is_none());
        model = press(model, key(KeyCode::Tab));
        assert_eq!(model.focus, Focus::Tree);

        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        let Some(DetailView::Message { session, message }) = model.detail_view() else {
            panic!("expected a message view");
        };
        assert_eq!(session.id, "a1");
        assert_eq!(message.uuid, "m1");
        let expected = message_detail_line_count(message, model.detail_render_width());
        assert_eq!(model.detail_layout().map(|layout| layout.total_lines()), Some(expected));

        model = press(model, key(KeyCode::Tab));
        assert_eq!(model.focus, Focus::Detail);
        model = press(model, key(KeyCode::Char(' ')));
        model = press(model, key(KeyCode::Enter));
        assert!(model.message_expanded.is_empty());
        assert!(!model.expand_all);

        model = press(model, key(KeyCode::Esc));
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        let Some(DetailView::Block { message, block }) = model.detail_view() else {
            panic!("expected a block view");
        };
        assert_eq!(message.uuid, "m1");
        assert_eq!(block.body(), "first");
        assert_eq!(
            model.detail_layout().map(|layout| layout.total_lines()),
            Some(block_line_count(block, model.detail_render_width()))
        );
    }

    #[test]
    fn detail_layout_is_rebuilt_only_when_its_inputs_change() {
        let mut model = detail_model();
        let before = model.detail_layout().map(|layout| layout.total_lines());
        assert_eq!(before, Some(30));

        // Data edited behind the model's back is not picked up by scrolling.
        model.projects[0].sessions[0]
            .messages
            .get_or_insert_with(Vec::new)
            .push(message("d10", "tail"));
        let model = press(model, key(KeyCode::Char('j')));
        let model = press(model, key(KeyCode::Char('G')));
        assert_eq!(model.detail_layout().map(|layout| layout.total_lines()), Some(30));

        let model = press(model, AppEvent::Resize { width: 75, height: 16 });
        assert_eq!(model.detail_layout().map(|layout| layout.total_lines()), Some(33));

        let model = press(model, AppEvent::Resize { width: 200, height: 16 });
        assert_eq!(model.detail_layout().map(|layout| layout.render_width()), Some(163));

        let model = press(model, key(KeyCode::Char('g')));
        let model = press(model, key(KeyCode::Char(' ')));
        let expanded = model.detail_layout().map(|layout| layout.total_lines());
        assert!(expanded > Some(33));
    }

    #[test]
    fn message_overrides_are_pruned_with_their_sessions() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        model = press(model, key(KeyCode::Enter));
        model = press(model, key(KeyCode::Char(' ')));
        assert_eq!(model.message_expanded.get("m1"), Some(&true));
        model.message_expanded.insert("gone-long-ago".to_string(), true);

        let (model, _) = scanned(model, snapshot());
        assert_eq!(model.message_expanded.get("m1"), Some(&true));
        assert!(!model.message_expanded.contains_key("gone-long-ago"));

        let without_alpha = vec![project("beta", vec![session("beta", "b1", 300, None)])];
        let (model, _) = scanned(model, without_alpha);
        assert!(model.message_expanded.is_empty());
    }

    #[test]
    fn loads_requested_before_a_newer_scan_do_not_overwrite_it() {
        let mut model = model();
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        model = press(model, key(KeyCode::Char('j')));
        let (model, command) = update(model, key(KeyCode::Char('l')));
        assert_eq!(
            command,
            AppCommand::LoadSessions {
                paths: vec![PathBuf::from("/p/alpha/a2.jsonl")],
                generation: 1,
            }
        );

        let mut preloaded = snapshot();
        preloaded[1].sessions[1].messages = Some(vec![message("fresh", "from the scan")]);
        let (model, command) = scanned(model, preloaded);
        assert_eq!(command, AppCommand::None);
        assert_eq!(model.snapshot_generation, 2);

        let loaded = |generation: u64, uuid: &str| AppEvent::SessionLoaded {
            path: PathBuf::from("/p/alpha/a2.jsonl"),
            generation,
            result: Ok(vec![message(uuid, "from a worker")]),
        };
        let first_uuid = |model: &AppModel| {
            model.projects[0].sessions[1]
                .messages()
                .first()
                .map(|message| message.uuid.clone())
        };

        let model = press(model, loaded(1, "stale"));
        assert_eq!(first_uuid(&model).as_deref(), Some("fresh"));

        let model = press(model, loaded(2, "current"));
        assert_eq!(first_uuid(&model).as_deref(), Some("current"));
    }

    #[test]
    fn reconcile_with_live_disk_state_picks_up_appended_lines() {
        crate::logging::init_test();
        let dir = tempfile::tempdir().expect("tempdir");
        let project_dir = dir.path().join("-home-demo");
        std::fs::create_dir(&project_dir).expect("mkdir");
        let log = project_dir.join("6f1c0e2a-5d4b-4c3a-9b8e-0123456789ab.jsonl");
        let first = json!({"type": "user", "uuid": "u1", "message": {"content": "hi"}});
        std::fs::write(&log, format!("{first}\n")).expect("write");

        let mut model = AppModel::new(dir.path().to_path_buf(), SortMode::Alphabetical, true);
        let scan = crate::infra::scan_projects(dir.path()).map_err(|err| err.to_string());
        model = update(model, AppEvent::Scanned(scan)).0;
        model = press(model, key(KeyCode::Char('l')));
        model = press(model, key(KeyCode::Char('j')));
        let (mut model, command) = update(model, key(KeyCode::Char('l')));
        assert_eq!(
            command,
            AppCommand::LoadSessions {
                paths: vec![log.clone()],
                generation: 1,
            }
        );
        let loaded = crate::infra::load_session(&log).map_err(|err| err.to_string());
        model = update(
            model,
            AppEvent::SessionLoaded {
                path: log.clone(),
                generation: 1,
                result: loaded,
            },
        )
        .0;
        assert_eq!(model.rows.len(), 3);

        let second = json!({"type": "assistant", "uuid": "u2", "message": {"content": "hello"}});
        std::fs::write(&log, format!("{first}\n{second}\n")).expect("append");
        let (model, command) = update(model, AppEvent::WatcherChanged);
        let AppCommand::Rescan { preload } = command else {
            panic!("expected rescan");
        };
        let scan = crate::infra::scan_and_preload(dir.path(), &preload).map_err(|err| err.to_string());
        let (model, command) = update(model, AppEvent::Scanned(scan));
        assert_eq!(command, AppCommand::None);
        assert_eq!(model.rows.len(), 4);
        assert_eq!(model.rows[3].id, NodeId::Message("u2".to_string()));
        assert_eq!(model.detail_scroll, SCROLL_END);
    }
}

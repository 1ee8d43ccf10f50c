mod theme;

use crate::app::{AppModel, DetailView, FlatRow, Focus, INDICATOR_ROWS};
use crate::domain::{
    BLOCK_INDENT, ContentBlock, Message, NodeKind, Project, Role, Session, SessionKind,
    body_wrap_width, clock_time, message_fields, message_key, message_preview, session_label,
    visible_window, wrap_text,
};
use ratatui::prelude::*;
use ratatui::widgets::*;
use time::OffsetDateTime;
use time::macros::format_description;
use unicode_width::UnicodeWidthStr;

pub fn render(frame: &mut Frame, model: &AppModel) {
    let full_area = frame.area();
    if full_area.width == 0 || full_area.height == 0 {
        return;
    }

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(full_area);
    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(model.tree_width), Constraint::Min(0)])
        .split(rows[1]);

    render_header(frame, rows[0], model);
    render_tree(frame, panes[0], model);
    render_detail(frame, panes[1], model);
    render_help(frame, rows[2], model);
}

fn render_header(frame: &mut Frame, area: Rect, model: &AppModel) {
    let follow = if model.follow {
        Span::styled("follow: ON", Style::default().fg(theme::SUCCESS))
    } else {
        Span::styled("follow: OFF", Style::default().fg(theme::DIM))
    };
    let live = if model.watching { "live" } else { "polling" };
    let mut spans = vec![
        Span::styled(
            " sessiontree ",
            Style::default()
                .fg(theme::ACCENT)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("│ focus: {} │ sort: {} │ ", model.focus.label(), model.sort.label()),
            Style::default().fg(theme::MUTED),
        ),
        follow,
        Span::styled(format!(" │ {live}"), Style::default().fg(theme::MUTED)),
    ];
    if let Some(error) = &model.scan_error {
        spans.push(Span::styled(
            format!(" │ scan failed: {error}"),
            Style::default().fg(theme::ERROR),
        ));
    }
    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(theme::BAR_BG));
    frame.render_widget(header, area);
}

fn render_help(frame: &mut Frame, area: Rect, model: &AppModel) {
    let line = match &model.notice {
        Some(notice) => Line::from(Span::styled(
            truncate_end(notice, area.width as usize),
            Style::default().fg(theme::ERROR),
        )),
        None => {
            let help = match model.focus {
                Focus::Tree => {
                    "Tab:detail  j/k:nav  l/h:expand/collapse  Enter:open  s:sort  f:follow  r:rescan  q:quit"
                }
                Focus::Detail => {
                    "Esc:tree  j/k:scroll  PgUp/PgDn:page  g/G:top/end  Enter:expand all  h:collapse all  Space:toggle"
                }
            };
            Line::from(Span::styled(
                truncate_end(help, area.width as usize),
                Style::default().fg(theme::DIM),
            ))
        }
    };
    frame.render_widget(
        Paragraph::new(line).style(Style::default().bg(theme::BAR_BG)),
        area,
    );
}

fn pane_block(title: String, focused: bool) -> Block<'static> {
    let border = if focused { theme::ACCENT } else { theme::BORDER };
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(title)
}

fn render_tree(frame: &mut Frame, area: Rect, model: &AppModel) {
    let block = pane_block("Projects".to_string(), model.focus == Focus::Tree);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if model.rows.is_empty() {
        let empty = Paragraph::new(Span::styled(
            format!("No projects in {}", model.root.display()),
            Style::default().fg(theme::DIM),
        ))
        .wrap(Wrap { trim: true });
        frame.render_widget(empty, inner);
        return;
    }

    let height = inner.height as usize;
    let width = inner.width as usize;
    let lines: Vec<Line> = model
        .rows
        .iter()
        .enumerate()
        .skip(model.tree_scroll)
        .take(height)
        .map(|(index, row)| tree_line(row, index == model.cursor, width))
        .collect();
    frame.render_widget(Paragraph::new(lines), inner);
}

fn tree_line(row: &FlatRow, selected: bool, width: usize) -> Line<'static> {
    let marker = match (row.expandable, row.expanded) {
        (true, true) => "▾ ",
        (true, false) => "▸ ",
        (false, _) => "  ",
    };
    let text = format!("{}{marker}{}", "  ".repeat(row.depth), row.label);
    let color = match row.kind() {
        NodeKind::Project => theme::FG,
        NodeKind::Session => theme::ACCENT,
        NodeKind::Message => theme::MUTED,
        NodeKind::Block => theme::DIM,
    };
    let mut style = Style::default().fg(color);
    if selected {
        style = style.bg(theme::ACCENT_BG).add_modifier(Modifier::BOLD);
    }
    Line::from(Span::styled(truncate_end(&text, width), style))
}

fn render_detail(frame: &mut Frame, area: Rect, model: &AppModel) {
    let focused = model.focus == Focus::Detail;
    let render_width = model.detail_render_width();
    match model.detail_view() {
        None => render_placeholder(frame, area, focused, "Select a node to see its details."),
        Some(DetailView::Project(project)) => render_project_info(frame, area, project),
        Some(DetailView::Transcript(session)) => render_transcript(frame, area, model, session),
        Some(DetailView::Message { session, message }) => {
            let title = format!("{} · {} message", session_label(session), message.role.label());
            render_scrolled(frame, area, model, title, message_detail_lines(message, render_width));
        }
        Some(DetailView::Block { message, block }) => {
            let title = format!("{} block", message.role.label());
            render_scrolled(frame, area, model, title, block_lines(block, render_width));
        }
    }
}

fn render_placeholder(frame: &mut Frame, area: Rect, focused: bool, text: &'static str) {
    let block = pane_block("Detail".to_string(), focused);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    frame.render_widget(
        Paragraph::new(Span::styled(text, Style::default().fg(theme::DIM))),
        inner,
    );
}

fn render_project_info(frame: &mut Frame, area: Rect, project: &Project) {
    let block = pane_block(format!("Project · {}", project.name), false);
    let inner = block.inner(area);
    frame.render_widget(block, area);
    let lines: Vec<Line> = project_info(project)
        .into_iter()
        .map(|(name, value)| {
            Line::from(vec![
                Span::styled(format!("{name}: "), Style::default().fg(theme::MUTED)),
                Span::styled(value, Style::default().fg(theme::FG)),
            ])
        })
        .collect();
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), inner);
}

fn project_info(project: &Project) -> Vec<(&'static str, String)> {
    let sub_agents = project
        .sessions
        .iter()
        .filter(|session| matches!(session.kind, SessionKind::SubAgent { .. }))
        .count();
    let last_update = project
        .most_recent_update()
        .and_then(|modified| {
            let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second] UTC");
            OffsetDateTime::from(modified).format(&format).ok()
        })
        .unwrap_or_else(|| "-".to_string());
    vec![
        ("Project", project.name.clone()),
        ("Path", project.path.display().to_string()),
        (
            "Sessions",
            format!("{} ({sub_agents} sub-agent)", project.sessions.len()),
        ),
        ("Last update", last_update),
    ]
}

fn render_transcript(frame: &mut Frame, area: Rect, model: &AppModel, session: &Session) {
    let title = format!(
        "{} · {} messages",
        session_label(session),
        session.messages().len()
    );
    let block = pane_block(title, model.focus == Focus::Detail);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    if !session.is_loaded() {
        frame.render_widget(
            Paragraph::new(Span::styled("Loading…", Style::default().fg(theme::DIM))),
            inner,
        );
        return;
    }
    let Some(layout) = model.detail_layout() else {
        return;
    };

    let height = model.detail_viewport_height();
    let window = layout.window(model.detail_scroll, height);
    let above = window.start;
    let below = layout.total_lines().saturating_sub(window.end);

    let mut lines = Vec::with_capacity(height + INDICATOR_ROWS);
    lines.push(indicator_line(above, "↑", "above"));
    for index in layout.messages_in(&window) {
        let (Some(message), Some(start)) = (session.messages().get(index), layout.message_start(index))
        else {
            continue;
        };
        let key = message_key(&session.log_path, index, message);
        let expanded = model.is_message_expanded(&key);
        let message_lines = message_lines(message, expanded, layout.render_width());
        let skip = window.start.saturating_sub(start);
        let take = window.end.saturating_sub(start.max(window.start));
        lines.extend(message_lines.into_iter().skip(skip).take(take));
    }
    lines.push(indicator_line(below, "↓", "below"));

    frame.render_widget(Paragraph::new(lines), inner);
}

/// A single message or block: all of its lines exist, only the window is drawn.
fn render_scrolled(
    frame: &mut Frame,
    area: Rect,
    model: &AppModel,
    title: String,
    lines: Vec<Line<'static>>,
) {
    let block = pane_block(title, model.focus == Focus::Detail);
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let height = model.detail_viewport_height();
    let window = visible_window(lines.len(), model.detail_scroll, height);
    let below = lines.len().saturating_sub(window.end);
    let mut visible = Vec::with_capacity(height + INDICATOR_ROWS);
    visible.push(indicator_line(window.start, "↑", "above"));
    visible.extend(lines.into_iter().skip(window.start).take(window.len()));
    visible.push(indicator_line(below, "↓", "below"));
    frame.render_widget(Paragraph::new(visible), inner);
}

fn indicator_line(count: usize, arrow: &str, direction: &str) -> Line<'static> {
    if count == 0 {
        return Line::default();
    }
    Line::from(Span::styled(
        format!("{arrow} {count} lines {direction}"),
        Style::default().fg(theme::DIM),
    ))
}

/// Every display line of one message; the count always equals
/// [`crate::domain::message_line_count`] for the same inputs.
fn message_lines(message: &Message, expanded: bool, render_width: usize) -> Vec<Line<'static>> {
    let mut lines = vec![message_header(message, render_width)];
    if expanded {
        for block in &message.blocks {
            lines.extend(block_lines(block, render_width));
        }
    } else {
        let preview = format!("{}{}", " ".repeat(BLOCK_INDENT), message_preview(message));
        lines.push(Line::from(Span::styled(
            truncate_end(&preview, render_width),
            Style::default().fg(theme::MUTED),
        )));
    }
    lines.push(Line::default());
    lines
}

/// Metadata fields, a blank line, then every block in full.
fn message_detail_lines(message: &Message, render_width: usize) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = message_fields(message)
        .into_iter()
        .map(|(name, value)| {
            Line::from(Span::styled(
                truncate_end(&format!("{name}: {value}"), render_width),
                Style::default().fg(theme::FG),
            ))
        })
        .collect();
    lines.push(Line::default());
    for block in &message.blocks {
        lines.extend(block_lines(block, render_width));
    }
    lines
}

fn block_lines(block: &ContentBlock, render_width: usize) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = block_labels(block)
        .into_iter()
        .map(|label| Line::from(Span::styled(truncate_end(&label, render_width), block_style(block))))
        .collect();
    let indent = " ".repeat(BLOCK_INDENT);
    for body_line in wrap_text(block.body(), body_wrap_width(render_width)) {
        lines.push(Line::from(Span::styled(
            format!("{indent}{body_line}"),
            Style::default().fg(theme::FG),
        )));
    }
    lines
}

fn block_labels(block: &ContentBlock) -> Vec<String> {
    match block {
        ContentBlock::Text { .. } => vec!["📝 text".to_string()],
        ContentBlock::Thinking { .. } => vec!["💭 thinking".to_string()],
        ContentBlock::ToolUse { id, name, .. } => vec![
            format!("🔧 {name}"),
            format!("{}input ({})", " ".repeat(BLOCK_INDENT), id.as_deref().unwrap_or("no id")),
        ],
        ContentBlock::ToolResult { tool_use_id, .. } => vec![
            "📤 result".to_string(),
            format!(
                "{}for {}",
                " ".repeat(BLOCK_INDENT),
                tool_use_id.as_deref().unwrap_or("unknown call")
            ),
        ],
    }
}

fn block_style(block: &ContentBlock) -> Style {
    let color = match block {
        ContentBlock::Text { .. } => theme::MUTED,
        ContentBlock::Thinking { .. } => theme::THINKING,
        ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => theme::TOOL,
    };
    Style::default().fg(color)
}

fn message_header(message: &Message, render_width: usize) -> Line<'static> {
    let (role_color, icon) = match message.role {
        Role::User => (theme::USER, "👤"),
        Role::Assistant => (theme::ASSISTANT, "🤖"),
    };
    let text = truncate_end(&header_badges(message, icon).join(" · "), render_width);
    Line::from(Span::styled(
        text,
        Style::default().fg(role_color).add_modifier(Modifier::BOLD),
    ))
}

fn header_badges(message: &Message, icon: &str) -> Vec<String> {
    let mut badges = vec![format!("{icon} {}", message.role.label())];
    if let Some(time) = message.timestamp.and_then(clock_time) {
        badges.push(time);
    }
    if message.is_sidechain {
        badges.push("sidechain".to_string());
    }
    if let Some(model) = &message.model {
        badges.push(short_model_name(model));
    }
    if let Some(level) = &message.thinking_level {
        badges.push(format!("thinking: {level}"));
    }
    if let Some(reason) = message.stop_reason.as_deref().filter(|reason| *reason != "end_turn") {
        badges.push(reason.to_string());
    }
    if !message.usage.is_empty() {
        badges.push(format!(
            "tokens {}↓ {}↑ {} cached",
            message.usage.input_tokens,
            message.usage.output_tokens,
            message.usage.cache_read_input_tokens + message.usage.cache_creation_input_tokens
        ));
    }
    badges
}

/// `claude-sonnet-4-5-20250929` → `sonnet-4-5`.
fn short_model_name(model: &str) -> String {
    let trimmed = model.strip_prefix("claude-").unwrap_or(model);
    match trimmed.rsplit_once('-') {
        Some((head, date)) if date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()) => {
            head.to_string()
        }
        _ => trimmed.to_string(),
    }
}

fn truncate_end(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if UnicodeWidthStr::width(text) <= max_width {
        return text.to_string();
    }
    let ellipsis = "…";
    let available = max_width.saturating_sub(UnicodeWidthStr::width(ellipsis));
    let mut out = String::new();
    let mut used = 0usize;
    for ch in text.chars() {
        let ch_width = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + ch_width > available {
            break;
        }
        used += ch_width;
        out.push(ch);
    }
    out.push_str(ellipsis);
    out
}

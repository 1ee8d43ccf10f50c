use crate::domain::{ContentBlock, Message, Project, Role, Session, SessionKind};
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const SESSION_ID_LABEL_CHARS: usize = 8;
const MESSAGE_LABEL_CHARS: usize = 30;
const TEXT_BLOCK_LABEL_CHARS: usize = 25;

/// Identity of a tree node across independent rebuilds.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum NodeId {
    Project(PathBuf),
    Session(PathBuf),
    Message(String),
    Block { message: String, key: BlockKey },
}

#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum BlockKey {
    Tool(String),
    Position(usize),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeKind {
    Project,
    Session,
    Message,
    Block,
}

/// Index path into the `Vec<Project>` snapshot the tree was built from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntityRef {
    Project {
        project: usize,
    },
    Session {
        project: usize,
        session: usize,
    },
    Message {
        project: usize,
        session: usize,
        message: usize,
    },
    Block {
        project: usize,
        session: usize,
        message: usize,
        block: usize,
    },
}

impl EntityRef {
    pub fn kind(self) -> NodeKind {
        match self {
            Self::Project { .. } => NodeKind::Project,
            Self::Session { .. } => NodeKind::Session,
            Self::Message { .. } => NodeKind::Message,
            Self::Block { .. } => NodeKind::Block,
        }
    }

    pub fn project(self, projects: &[Project]) -> Option<&Project> {
        match self {
            Self::Project { project }
            | Self::Session { project, .. }
            | Self::Message { project, .. }
            | Self::Block { project, .. } => projects.get(project),
        }
    }

    /// The session this node belongs to; `None` for project nodes.
    pub fn session(self, projects: &[Project]) -> Option<&Session> {
        match self {
            Self::Project { .. } => None,
            Self::Session {
                project, session, ..
            }
            | Self::Message {
                project, session, ..
            }
            | Self::Block {
                project, session, ..
            } => projects.get(project)?.sessions.get(session),
        }
    }

    /// The message a message or block node points at.
    pub fn message(self, projects: &[Project]) -> Option<&Message> {
        match self {
            Self::Project { .. } | Self::Session { .. } => None,
            Self::Message { message, .. } | Self::Block { message, .. } => {
                self.session(projects)?.messages().get(message)
            }
        }
    }

    pub fn block(self, projects: &[Project]) -> Option<&ContentBlock> {
        match self {
            Self::Block { block, .. } => self.message(projects)?.blocks.get(block),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeNode {
    pub id: NodeId,
    pub label: String,
    pub expanded: bool,
    pub children: Vec<TreeNode>,
    pub entity: EntityRef,
}

impl TreeNode {
    pub fn kind(&self) -> NodeKind {
        self.entity.kind()
    }

    /// Sessions and messages stay expandable while empty; their children load lazily.
    pub fn is_expandable(&self) -> bool {
        match self.kind() {
            NodeKind::Session | NodeKind::Message => true,
            NodeKind::Project | NodeKind::Block => !self.children.is_empty(),
        }
    }
}

pub fn build_tree(projects: &[Project]) -> Vec<TreeNode> {
    projects
        .iter()
        .enumerate()
        .map(|(project_index, project)| TreeNode {
            id: NodeId::Project(project.path.clone()),
            label: project.name.clone(),
            expanded: false,
            children: project
                .sessions
                .iter()
                .enumerate()
                .map(|(session_index, session)| {
                    build_session_node(session, project_index, session_index)
                })
                .collect(),
            entity: EntityRef::Project {
                project: project_index,
            },
        })
        .collect()
}

fn build_session_node(session: &Session, project: usize, session_index: usize) -> TreeNode {
    TreeNode {
        id: NodeId::Session(session.log_path.clone()),
        label: session_label(session),
        expanded: false,
        children: build_message_nodes(session, project, session_index),
        entity: EntityRef::Session {
            project,
            session: session_index,
        },
    }
}

/// Message nodes for an already-loaded session; empty when the session is unloaded.
pub fn build_message_nodes(session: &Session, project: usize, session_index: usize) -> Vec<TreeNode> {
    session
        .messages()
        .iter()
        .enumerate()
        .map(|(message_index, message)| {
            let message_id = message_key(&session.log_path, message_index, message);
            let children = message
                .blocks
                .iter()
                .enumerate()
                .map(|(block_index, block)| TreeNode {
                    id: NodeId::Block {
                        message: message_id.clone(),
                        key: block_key(block, block_index),
                    },
                    label: block_label(block),
                    expanded: false,
                    children: Vec::new(),
                    entity: EntityRef::Block {
                        project,
                        session: session_index,
                        message: message_index,
                        block: block_index,
                    },
                })
                .collect();
            TreeNode {
                id: NodeId::Message(message_id),
                label: message_label(message),
                expanded: false,
                children,
                entity: EntityRef::Message {
                    project,
                    session: session_index,
                    message: message_index,
                },
            }
        })
        .collect()
}

/// Stable key for a message: its uuid, or the log path plus position for records without one.
pub fn message_key(log_path: &Path, position: usize, message: &Message) -> String {
    if message.uuid.is_empty() {
        format!("{}#{position}", log_path.display())
    } else {
        message.uuid.clone()
    }
}

fn block_key(block: &ContentBlock, position: usize) -> BlockKey {
    match block.tool_id() {
        Some(id) if !id.is_empty() => BlockKey::Tool(id.to_string()),
        _ => BlockKey::Position(position),
    }
}

pub fn session_label(session: &Session) -> String {
    match &session.kind {
        SessionKind::SubAgent { agent_id } => format!("agent-{agent_id}"),
        SessionKind::Primary => {
            if session.id.chars().count() > SESSION_ID_LABEL_CHARS {
                let prefix: String = session.id.chars().take(SESSION_ID_LABEL_CHARS).collect();
                format!("{prefix}...")
            } else {
                session.id.clone()
            }
        }
    }
}

fn message_label(message: &Message) -> String {
    let icon = match message.role {
        Role::User => "👤",
        Role::Assistant => "🤖",
    };
    format!(
        "{icon} {}",
        truncate_chars(&message_preview(message), MESSAGE_LABEL_CHARS)
    )
}

fn block_label(block: &ContentBlock) -> String {
    match block {
        ContentBlock::Thinking { .. } => "💭 thinking...".to_string(),
        ContentBlock::Text { text } => format!("📝 {}", truncate_chars(text, TEXT_BLOCK_LABEL_CHARS)),
        ContentBlock::ToolUse { name, .. } => format!("🔧 {name}"),
        ContentBlock::ToolResult { .. } => "📤 result".to_string(),
    }
}

/// First non-empty text, or the first tool call, as a one-line summary.
pub fn message_preview(message: &Message) -> String {
    for block in &message.blocks {
        match block {
            ContentBlock::Text { text } if !text.is_empty() => return text.replace('\n', " "),
            ContentBlock::ToolUse { name, .. } => return format!("{name}()"),
            _ => {}
        }
    }
    "(empty)".to_string()
}

/// Labelled metadata lines shown above a message's blocks in its own view.
pub fn message_fields(message: &Message) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("Type", message.role.label().to_string()),
        (
            "Time",
            message
                .timestamp
                .and_then(clock_time)
                .unwrap_or_else(|| "-".to_string()),
        ),
    ];
    let optional = [
        ("Id", Some(&message.uuid).filter(|uuid| !uuid.is_empty())),
        ("Parent", message.parent_uuid.as_ref()),
        ("Session", message.session_id.as_ref()),
        ("Agent", message.agent_id.as_ref()),
        ("Model", message.model.as_ref()),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            fields.push((name, value.clone()));
        }
    }
    fields
}

/// UTC `HH:MM:SS`.
pub fn clock_time(timestamp: OffsetDateTime) -> Option<String> {
    let format = format_description!("[hour]:[minute]:[second]");
    timestamp.to_offset(UtcOffset::UTC).format(&format).ok()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let flattened = text.replace('\n', " ");
    if flattened.chars().count() <= max_chars {
        return flattened;
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = flattened.chars().take(keep).collect();
    out.push_str("...");
    out
}

use std::path::PathBuf;
use std::time::SystemTime;
use time::OffsetDateTime;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    pub sessions: Vec<Session>,
}

impl Project {
    pub fn most_recent_update(&self) -> Option<SystemTime> {
        self.sessions
            .iter()
            .filter_map(|session| session.modified)
            .max()
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionKind {
    Primary,
    SubAgent { agent_id: String },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub id: String,
    pub log_path: PathBuf,
    pub kind: SessionKind,
    pub modified: Option<SystemTime>,
    /// `None` until the log has been read.
    pub messages: Option<Vec<Message>>,
}

impl Session {
    pub fn messages(&self) -> &[Message] {
        self.messages.as_deref().unwrap_or(&[])
    }

    pub fn is_loaded(&self) -> bool {
        self.messages.is_some()
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn from_record_type(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_input_tokens: u64,
    pub cache_creation_input_tokens: u64,
}

impl Usage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0
            && self.output_tokens == 0
            && self.cache_read_input_tokens == 0
            && self.cache_creation_input_tokens == 0
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub role: Role,
    pub timestamp: Option<OffsetDateTime>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub is_sidechain: bool,
    pub model: Option<String>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
    pub thinking_level: Option<String>,
    pub blocks: Vec<ContentBlock>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: Option<String>,
        name: String,
        input: String,
    },
    ToolResult {
        tool_use_id: Option<String>,
        output: String,
    },
}

impl ContentBlock {
    pub fn tool_id(&self) -> Option<&str> {
        match self {
            Self::ToolUse { id, .. } => id.as_deref(),
            Self::ToolResult { tool_use_id, .. } => tool_use_id.as_deref(),
            Self::Text { .. } | Self::Thinking { .. } => None,
        }
    }

    /// The text shown under the block's label lines.
    pub fn body(&self) -> &str {
        match self {
            Self::Text { text } => text,
            Self::Thinking { thinking } => thinking,
            Self::ToolUse { input, .. } => input,
            Self::ToolResult { output, .. } => output,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SortMode {
    #[default]
    Alphabetical,
    Recent,
}

impl SortMode {
    pub fn toggle(self) -> Self {
        match self {
            Self::Alphabetical => Self::Recent,
            Self::Recent => Self::Alphabetical,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Alphabetical => "A-Z",
            Self::Recent => "Recent",
        }
    }
}

pub fn sort_projects(projects: &mut [Project], mode: SortMode) {
    match mode {
        SortMode::Alphabetical => {
            projects.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        }
        SortMode::Recent => {
            // `None` sorts before `Some`, so reversing puts undated projects last.
            projects.sort_by(|a, b| {
                b.most_recent_update()
                    .cmp(&a.most_recent_update())
                    .then_with(|| a.name.cmp(&b.name))
                    .then_with(|| a.path.cmp(&b.path))
            });
        }
    }
}

use crate::domain::{Message, Project, Session, SessionKind, SortMode, parse_message_line, sort_projects};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

pub const LOG_EXTENSION: &str = "jsonl";
const AGENT_FILE_PREFIX: &str = "agent-";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("projects directory is unreadable: {path}: {message}")]
    RootUnreadable { path: String, message: String },
}

/// Lists project directories under `root`, sorted by display name.
///
/// Projects that cannot be listed are skipped; only an unreadable root is an error.
pub fn scan_projects(root: &Path) -> Result<Vec<Project>, ScanError> {
    let started = Instant::now();
    let mut projects = Vec::new();

    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if error.depth() == 0 => {
                return Err(ScanError::RootUnreadable {
                    path: root.display().to_string(),
                    message: error.to_string(),
                });
            }
            Err(error) => {
                tracing::warn!(%error, "skipping unreadable entry under projects root");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let path = entry.path().to_path_buf();
        match scan_sessions(&path) {
            Ok(sessions) => projects.push(Project {
                name: decode_project_name(&entry.file_name().to_string_lossy()),
                path,
                sessions,
            }),
            Err(error) => {
                tracing::warn!(project = %path.display(), %error, "skipping unreadable project");
            }
        }
    }

    sort_projects(&mut projects, SortMode::Alphabetical);
    tracing::debug!(
        projects = projects.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scanned projects"
    );
    Ok(projects)
}

/// Scans, then loads every session whose log path is in `wanted`.
pub fn scan_and_preload(root: &Path, wanted: &BTreeSet<PathBuf>) -> Result<Vec<Project>, ScanError> {
    let mut projects = scan_projects(root)?;
    if wanted.is_empty() {
        return Ok(projects);
    }
    for session in projects
        .iter_mut()
        .flat_map(|project| project.sessions.iter_mut())
        .filter(|session| wanted.contains(&session.log_path))
    {
        match load_session(&session.log_path) {
            Ok(messages) => session.messages = Some(messages),
            Err(error) => {
                tracing::warn!(session = %session.log_path.display(), %error, "failed to load session");
            }
        }
    }
    Ok(projects)
}

fn scan_sessions(project_dir: &Path) -> Result<Vec<Session>, walkdir::Error> {
    let mut sessions = Vec::new();
    let walker = WalkDir::new(project_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .into_iter();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) if error.depth() == 0 => return Err(error),
            Err(_error) => continue,
        };
        if entry.file_type().is_dir() {
            continue;
        }
        let Some((id, kind)) = classify_session_file(&entry.file_name().to_string_lossy()) else {
            continue;
        };
        let modified = entry
            .metadata()
            .ok()
            .and_then(|metadata| metadata.modified().ok());
        sessions.push(Session {
            id,
            log_path: entry.path().to_path_buf(),
            kind,
            modified,
            messages: None,
        });
    }

    // Newest first; `None` compares lowest, so undated sessions land last.
    sessions.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| a.log_path.cmp(&b.log_path))
    });
    Ok(sessions)
}

/// Recognizes `<uuid>.jsonl` primary logs and `agent-<hex>.jsonl` sub-agent logs.
pub fn classify_session_file(file_name: &str) -> Option<(String, SessionKind)> {
    let stem = file_name.strip_suffix(".jsonl")?;

    if stem.len() == 36
        && Uuid::try_parse(stem).is_ok()
        && !stem.chars().any(|c| c.is_ascii_uppercase())
    {
        return Some((stem.to_string(), SessionKind::Primary));
    }

    let agent_id = stem.strip_prefix(AGENT_FILE_PREFIX)?;
    let is_hex = !agent_id.is_empty()
        && agent_id
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if !is_hex {
        return None;
    }
    Some((
        agent_id.to_string(),
        SessionKind::SubAgent {
            agent_id: agent_id.to_string(),
        },
    ))
}

/// `C--Users-nat-source-beads` becomes `beads`. Lossy; display only.
pub fn decode_project_name(dir_name: &str) -> String {
    match dir_name.rsplit('-').next() {
        Some(last) if !last.is_empty() => last.to_string(),
        _ => dir_name.to_string(),
    }
}

/// Reads a session log in file order. Undecodable lines and non-conversational
/// records are skipped; a read error mid-file keeps what was decoded so far.
pub fn load_session(path: &Path) -> io::Result<Vec<Message>> {
    let started = Instant::now();
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut messages = Vec::new();
    let mut lines = 0usize;
    let mut skipped = 0usize;
    for line_result in reader.split(b'\n') {
        let mut line = match line_result {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!(session = %path.display(), %error, "session read stopped early");
                break;
            }
        };
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        lines += 1;

        match parse_message_line(&line) {
            Ok(Some(message)) => messages.push(message),
            Ok(None) => {}
            Err(_) => skipped += 1,
        }
    }

    tracing::debug!(
        session = %path.display(),
        lines,
        messages = messages.len(),
        skipped,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "loaded session"
    );
    Ok(messages)
}

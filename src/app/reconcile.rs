//! Identifier-keyed state carried across full tree rebuilds.
//!
//! Nothing here compares nodes by reference: expansion and selection survive
//! a rebuild only through [`NodeId`] equality.

use crate::domain::{EntityRef, NodeId, NodeKind, Project, TreeNode, build_message_nodes};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// One visible tree row, addressed by the cursor index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlatRow {
    pub id: NodeId,
    pub depth: usize,
    pub label: String,
    pub expanded: bool,
    pub expandable: bool,
    pub entity: EntityRef,
}

impl FlatRow {
    pub fn kind(&self) -> NodeKind {
        self.entity.kind()
    }
}

/// Pre-order collection of every expanded node id.
pub fn capture_expanded(nodes: &[TreeNode], out: &mut BTreeSet<NodeId>) {
    for node in nodes {
        if node.expanded {
            out.insert(node.id.clone());
        }
        capture_expanded(&node.children, out);
    }
}

pub fn apply_expanded(nodes: &mut [TreeNode], expanded: &BTreeSet<NodeId>) {
    for node in nodes {
        node.expanded = expanded.contains(&node.id);
        apply_expanded(&mut node.children, expanded);
    }
}

/// Gives every expanded, loaded session node its message children.
///
/// Returns the log paths of expanded sessions whose messages are not loaded.
pub fn ensure_session_children(
    nodes: &mut [TreeNode],
    projects: &[Project],
    expanded: &BTreeSet<NodeId>,
) -> Vec<PathBuf> {
    let mut unloaded = Vec::new();
    fill_session_children(nodes, projects, expanded, &mut unloaded);
    unloaded
}

fn fill_session_children(
    nodes: &mut [TreeNode],
    projects: &[Project],
    expanded: &BTreeSet<NodeId>,
    unloaded: &mut Vec<PathBuf>,
) {
    for node in nodes {
        if let EntityRef::Session { project, session } = node.entity {
            match node.entity.session(projects) {
                Some(entity) if node.expanded && !entity.is_loaded() => {
                    unloaded.push(entity.log_path.clone());
                }
                Some(entity) if node.expanded && node.children.is_empty() => {
                    node.children = build_message_nodes(entity, project, session);
                    apply_expanded(&mut node.children, expanded);
                }
                _ => {}
            }
        }
        fill_session_children(&mut node.children, projects, expanded, unloaded);
    }
}

/// Depth-first projection of the nodes visible under expanded ancestors.
pub fn flatten_tree(nodes: &[TreeNode]) -> Vec<FlatRow> {
    let mut rows = Vec::new();
    push_rows(nodes, 0, &mut rows);
    rows
}

fn push_rows(nodes: &[TreeNode], depth: usize, rows: &mut Vec<FlatRow>) {
    for node in nodes {
        rows.push(FlatRow {
            id: node.id.clone(),
            depth,
            label: node.label.clone(),
            expanded: node.expanded,
            expandable: node.is_expandable(),
            entity: node.entity,
        });
        if node.expanded {
            push_rows(&node.children, depth + 1, rows);
        }
    }
}

pub fn find_node_mut<'a>(nodes: &'a mut [TreeNode], id: &NodeId) -> Option<&'a mut TreeNode> {
    for node in nodes {
        if &node.id == id {
            return Some(node);
        }
        if let Some(found) = find_node_mut(&mut node.children, id) {
            return Some(found);
        }
    }
    None
}

/// Reuses already-loaded messages from `previous` for sessions in `wanted`
/// that the fresh scan did not load.
pub fn carry_over_messages(projects: &mut [Project], previous: &[Project], wanted: &BTreeSet<PathBuf>) {
    for project in projects.iter_mut() {
        for session in project.sessions.iter_mut() {
            if session.is_loaded() || !wanted.contains(&session.log_path) {
                continue;
            }
            let loaded = previous
                .iter()
                .flat_map(|project| project.sessions.iter())
                .find(|old| old.log_path == session.log_path)
                .and_then(|old| old.messages.clone());
            if loaded.is_some() {
                session.messages = loaded;
            }
        }
    }
}

/// Keeps `cursor` inside `[scroll, scroll + height)` without scrolling past
/// the last row.
pub fn clamp_tree_scroll(cursor: usize, scroll: usize, len: usize, height: usize) -> usize {
    let height = height.max(1);
    let mut scroll = scroll;
    if cursor >= scroll + height {
        scroll = cursor + 1 - height;
    }
    if cursor < scroll {
        scroll = cursor;
    }
    scroll.min(len.saturating_sub(height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Session, SessionKind, build_tree};

    fn session(path: &str, loaded: bool) -> Session {
        Session {
            id: path.to_string(),
            log_path: PathBuf::from(path),
            kind: SessionKind::Primary,
            modified: None,
            messages: loaded.then(Vec::new),
        }
    }

    fn projects() -> Vec<Project> {
        vec![
            Project {
                name: "a".to_string(),
                path: PathBuf::from("/p/a"),
                sessions: vec![session("/p/a/1.jsonl", false), session("/p/a/2.jsonl", true)],
            },
            Project {
                name: "b".to_string(),
                path: PathBuf::from("/p/b"),
                sessions: vec![session("/p/b/3.jsonl", false)],
            },
        ]
    }

    #[test]
    fn flatten_visits_only_expanded_subtrees() {
        let mut tree = build_tree(&projects());
        assert_eq!(flatten_tree(&tree).len(), 2);

        tree[0].expanded = true;
        let rows = flatten_tree(&tree);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[1].depth, 1);
        assert_eq!(rows[3].id, NodeId::Project(PathBuf::from("/p/b")));
    }

    #[test]
    fn expansion_round_trips_through_a_rebuild() {
        let mut tree = build_tree(&projects());
        tree[1].expanded = true;
        tree[1].children[0].expanded = true;
        let mut expanded = BTreeSet::new();
        capture_expanded(&tree, &mut expanded);

        let mut rebuilt = build_tree(&projects());
        apply_expanded(&mut rebuilt, &expanded);
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn expanded_unloaded_sessions_are_reported() {
        let projects = projects();
        let mut tree = build_tree(&projects);
        tree[0].expanded = true;
        tree[0].children[0].expanded = true;
        tree[0].children[1].expanded = true;
        let mut expanded = BTreeSet::new();
        capture_expanded(&tree, &mut expanded);

        let unloaded = ensure_session_children(&mut tree, &projects, &expanded);
        assert_eq!(unloaded, vec![PathBuf::from("/p/a/1.jsonl")]);
    }

    #[test]
    fn carry_over_only_fills_wanted_unloaded_sessions() {
        let mut previous = projects();
        previous[1].sessions[0].messages = Some(Vec::new());
        let mut fresh = projects();
        let wanted = BTreeSet::from([PathBuf::from("/p/b/3.jsonl")]);

        carry_over_messages(&mut fresh, &previous, &wanted);
        assert!(fresh[1].sessions[0].is_loaded());
        assert!(!fresh[0].sessions[0].is_loaded());
    }

    #[test]
    fn scroll_follows_cursor_and_stays_in_bounds() {
        assert_eq!(clamp_tree_scroll(15, 0, 30, 10), 6);
        assert_eq!(clamp_tree_scroll(2, 6, 30, 10), 2);
        assert_eq!(clamp_tree_scroll(4, 8, 12, 10), 2);
        assert_eq!(clamp_tree_scroll(0, 5, 3, 10), 0);
        assert_eq!(clamp_tree_scroll(0, 0, 0, 10), 0);
    }
}

//! Logical line layout for a session transcript.
//!
//! Every message occupies a header line, then either a one-line preview
//! (collapsed) or its blocks (expanded), then one blank separator line.
//! The renderer draws exactly these lines, so only the visible window ever
//! has to be materialized.

use crate::domain::{ContentBlock, Message, message_fields};
use std::ops::Range;

/// Columns every block body is indented by.
pub const BLOCK_INDENT: usize = 3;

/// Scroll offset meaning "show the last page".
pub const SCROLL_END: usize = usize::MAX;

/// Display lines a text takes at `width`: `ceil(len / width)` per
/// newline-delimited segment, where an empty segment still takes one line.
pub fn wrapped_line_count(text: &str, width: usize) -> usize {
    let width = width.max(1);
    text.split('\n')
        .map(|segment| segment.chars().count().div_ceil(width).max(1))
        .sum()
}

/// Splits `text` into the lines counted by [`wrapped_line_count`].
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for segment in text.split('\n') {
        let chars: Vec<char> = segment.chars().collect();
        if chars.is_empty() {
            lines.push(String::new());
            continue;
        }
        for chunk in chars.chunks(width) {
            lines.push(chunk.iter().collect());
        }
    }
    lines
}

pub fn block_label_lines(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { .. } | ContentBlock::Thinking { .. } => 1,
        ContentBlock::ToolUse { .. } | ContentBlock::ToolResult { .. } => 2,
    }
}

pub fn body_wrap_width(render_width: usize) -> usize {
    render_width.saturating_sub(BLOCK_INDENT).max(1)
}

/// Label lines plus the wrapped body of one block.
pub fn block_line_count(block: &ContentBlock, render_width: usize) -> usize {
    block_label_lines(block) + wrapped_line_count(block.body(), body_wrap_width(render_width))
}

pub fn message_line_count(message: &Message, expanded: bool, render_width: usize) -> usize {
    let header = 1;
    let separator = 1;
    let body = if expanded {
        message
            .blocks
            .iter()
            .map(|block| block_line_count(block, render_width))
            .sum()
    } else {
        1
    };
    header + body + separator
}

/// A single message shown on its own: one line per metadata field, a blank
/// line, then every block in full.
pub fn message_detail_line_count(message: &Message, render_width: usize) -> usize {
    let blocks: usize = message
        .blocks
        .iter()
        .map(|block| block_line_count(block, render_width))
        .sum();
    message_fields(message).len() + 1 + blocks
}

/// Prefix sums of per-message line counts for one render width.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContentLayout {
    starts: Vec<usize>,
    total: usize,
    render_width: usize,
}

impl ContentLayout {
    pub fn compute(
        messages: &[Message],
        is_expanded: impl Fn(usize) -> bool,
        render_width: usize,
    ) -> Self {
        Self::from_heights(
            messages
                .iter()
                .enumerate()
                .map(|(index, message)| message_line_count(message, is_expanded(index), render_width)),
            render_width,
        )
    }

    /// Layout over pre-computed item heights, in order.
    pub fn from_heights(heights: impl IntoIterator<Item = usize>, render_width: usize) -> Self {
        let mut starts = Vec::new();
        let mut total = 0usize;
        for height in heights {
            starts.push(total);
            total += height;
        }
        Self {
            starts,
            total,
            render_width,
        }
    }

    pub fn total_lines(&self) -> usize {
        self.total
    }

    pub fn render_width(&self) -> usize {
        self.render_width
    }

    pub fn message_start(&self, index: usize) -> Option<usize> {
        self.starts.get(index).copied()
    }

    /// Index of the message that owns logical line `line`.
    pub fn message_at_line(&self, line: usize) -> Option<usize> {
        if line >= self.total {
            return None;
        }
        match self.starts.binary_search(&line) {
            Ok(index) => Some(index),
            Err(insert_at) => insert_at.checked_sub(1),
        }
    }

    pub fn window(&self, offset: usize, visible_height: usize) -> Range<usize> {
        visible_window(self.total, offset, visible_height)
    }

    /// Messages overlapping `window`, as an index range.
    pub fn messages_in(&self, window: &Range<usize>) -> Range<usize> {
        if window.is_empty() {
            return 0..0;
        }
        let first = self.message_at_line(window.start).unwrap_or(0);
        let last = self
            .message_at_line(window.end - 1)
            .unwrap_or_else(|| self.starts.len().saturating_sub(1));
        first..last + 1
    }
}

pub fn max_scroll(total: usize, visible_height: usize) -> usize {
    total.saturating_sub(visible_height)
}

/// Any offset past `total - visible_height` (including [`SCROLL_END`]) lands
/// on exactly the last page.
pub fn visible_window(total: usize, offset: usize, visible_height: usize) -> Range<usize> {
    let start = offset.min(max_scroll(total, visible_height));
    let end = start.saturating_add(visible_height).min(total);
    start..end
}

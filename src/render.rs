use std::fmt::Write as _;

use serde::Serialize;
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::access::Viewer;
use crate::config::DisplayConfig;
use crate::forum::{epoch, Forum, Post};
use crate::security::is_allowed_image_host;
use crate::thread::{mention_targets, ThreadEntry};

const FALLBACK_WIDTH: usize = 100;
const MIN_BODY_WIDTH: usize = 20;
const PREVIEW_CHARS: usize = 150;
const ARCHIVED_BANNER: &str = "📁 This forum is archived. No new posts or replies.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub width: usize,
    pub indent_width: usize,
    pub show_timestamps: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            width: FALLBACK_WIDTH,
            indent_width: 4,
            show_timestamps: true,
        }
    }
}

impl RenderOptions {
    /// A zero width in config means the current terminal width.
    pub fn from_config(cfg: &DisplayConfig) -> Self {
        let width = if cfg.width > 0 {
            cfg.width
        } else {
            crossterm::terminal::size()
                .map(|(cols, _)| cols as usize)
                .ok()
                .filter(|cols| *cols > 0)
                .unwrap_or(FALLBACK_WIDTH)
        };
        Self {
            width,
            indent_width: cfg.indent_width,
            show_timestamps: cfg.show_timestamps,
        }
    }
}

/// Up to 150 characters of the parent's text, with an ellipsis when cut.
pub fn reply_preview(parent: &Post) -> String {
    let message = parent.message.trim();
    if message.chars().count() > PREVIEW_CHARS {
        let cut: String = message.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}...")
    } else {
        message.to_string()
    }
}

fn header(forum: &Forum, out: &mut String) {
    let title = if forum.title.trim().is_empty() {
        forum.forum_id.as_str()
    } else {
        forum.title.as_str()
    };
    let _ = writeln!(out, "{title}");
    let _ = writeln!(out, "{}", "=".repeat(UnicodeWidthStr::width(title)));

    let mut facts: Vec<String> = [forum.game_title.as_str(), forum.category.as_str()]
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect();
    if !forum.created_by.is_empty() {
        facts.push(format!("by {}", forum.created_by));
    }
    facts.push(format!("{} views", forum.metadata.view_count));
    facts.push(forum.metadata.status.as_str().to_string());
    if forum.is_private {
        facts.push(format!("private ({} members)", forum.allowed_users.len()));
    }
    let _ = writeln!(out, "{}", facts.join(" · "));
    if forum.is_archived() {
        let _ = writeln!(out, "{ARCHIVED_BANNER}");
    }
}

fn push_wrapped(out: &mut String, text: &str, width: usize, indent: &str) {
    let options = WrapOptions::new(width.max(indent.len() + MIN_BODY_WIDTH))
        .break_words(false)
        .initial_indent(indent)
        .subsequent_indent(indent);
    for line in text.lines() {
        if line.trim().is_empty() {
            out.push('\n');
            continue;
        }
        for wrapped in wrap(line, &options) {
            out.push_str(&wrapped);
            out.push('\n');
        }
    }
}

fn render_entry(
    entry: &ThreadEntry<'_>,
    forum: &Forum,
    viewer: &Viewer,
    opts: &RenderOptions,
    out: &mut String,
) {
    let post = entry.post;
    let indent = " ".repeat(entry.indent_level() * opts.indent_width);

    if let Some(parent_id) = post.reply_to.as_deref() {
        if let Some(parent) = forum.find_post(parent_id) {
            let author = parent.author().unwrap_or("Unknown");
            let preview = format!("↳ Replying to {author}: {}", reply_preview(parent));
            push_wrapped(out, &preview, opts.width, &indent);
        }
    }

    let mut line = format!(
        "{indent}[{}] {}",
        post.id.as_deref().unwrap_or_default(),
        post.author().unwrap_or("Unknown")
    );
    if opts.show_timestamps && post.timestamp != epoch() {
        let _ = write!(line, " · {}", post.timestamp.format("%Y-%m-%d %H:%M UTC"));
    }
    if post.metadata.edited {
        line.push_str(" (edited)");
    }
    if viewer.owns(post) {
        line.push_str(" (you)");
    }
    out.push_str(&line);
    out.push('\n');

    if !post.message.trim().is_empty() {
        push_wrapped(out, post.message.trim(), opts.width, &indent);
    }

    for attachment in post.attachments() {
        let label = attachment.name.as_deref().unwrap_or(attachment.kind.as_str());
        let host_note = if is_allowed_image_host(&attachment.url) {
            ""
        } else {
            " (external)"
        };
        let _ = writeln!(out, "{indent}  🖼 {label} {}{host_note}", attachment.url);
    }

    let mut counters: Vec<String> = viewer
        .reactions(post)
        .into_iter()
        .filter(|state| state.count > 0)
        .map(|state| {
            let mark = if state.reacted { "*" } else { "" };
            format!("{} {}{mark}", state.emoji, state.count)
        })
        .collect();
    if post.metadata.likes > 0 {
        counters.push(format!("👍 {}", post.metadata.likes));
    }
    if !counters.is_empty() {
        let _ = writeln!(out, "{indent}  {}", counters.join("  "));
    }
}

/// Renders the forum header and every entry in thread order.
pub fn render_forum(
    forum: &Forum,
    entries: &[ThreadEntry<'_>],
    viewer: &Viewer,
    opts: &RenderOptions,
) -> String {
    let mut out = String::new();
    header(forum, &mut out);
    if entries.is_empty() {
        out.push_str("\nNo posts yet.\n");
        return out;
    }
    for entry in entries {
        out.push('\n');
        render_entry(entry, forum, viewer, opts, &mut out);
    }
    out
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView<'a> {
    pub id: &'a str,
    pub author: Option<&'a str>,
    pub depth: usize,
    pub indent: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<&'a str>,
    pub message: &'a str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub mentions: Vec<MentionView<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MentionView<'a> {
    pub name: &'a str,
    pub post_id: Option<&'a str>,
}

/// The thread order as plain records, for `--json`.
pub fn entries_json<'a>(entries: &[ThreadEntry<'a>], posts: &'a [Post]) -> Vec<EntryView<'a>> {
    entries
        .iter()
        .map(|entry| EntryView {
            id: entry.post.id.as_deref().unwrap_or_default(),
            author: entry.post.author(),
            depth: entry.depth,
            indent: entry.indent_level(),
            reply_to: entry.post.reply_to.as_deref(),
            parent_id: entry.parent.and_then(|p| p.id.as_deref()),
            message: &entry.post.message,
            timestamp: entry.post.timestamp,
            mentions: mention_targets(&entry.post.message, posts)
                .into_iter()
                .map(|(name, target)| MentionView {
                    name,
                    post_id: target.and_then(|p| p.id.as_deref()),
                })
                .collect(),
        })
        .collect()
}

//! Reply-thread reconstruction.
//!
//! Posts arrive as a flat list. Each post may name its parent explicitly (`replyTo`) or
//! implicitly by opening with `@username`. [`linearize`] resolves one display parent per
//! post, then emits every valid post exactly once in pre-order: top-level posts oldest
//! first, each followed by its replies (oldest first), each reply followed by its own.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::forum::Post;

// Mentions are ASCII word characters only.
static LEADING_MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@([A-Za-z0-9_]+)").expect("valid leading mention regex"));
static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("valid mention regex"));

/// One row of the rendered thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreadEntry<'a> {
    pub post: &'a Post,
    /// Explicit `replyTo` hops to the nearest ancestor without one.
    pub depth: usize,
    /// Parent used for ordering, explicit or mention-resolved.
    pub parent: Option<&'a Post>,
}

impl ThreadEntry<'_> {
    pub fn is_reply(&self) -> bool {
        is_reply(self.post)
    }

    pub fn indent_level(&self) -> usize {
        indent_level(self.post, self.depth)
    }
}

/// Whether a post reads as a reply: explicit `replyTo`, or a message opening with `@`.
pub fn is_reply(post: &Post) -> bool {
    post.reply_to.is_some() || post.message.trim().starts_with('@')
}

/// Indentation used when rendering. Replies sit at least one level in, even when their
/// depth is zero because the parent was only mention-resolved.
pub fn indent_level(post: &Post, depth: usize) -> usize {
    if is_reply(post) {
        depth.max(1)
    } else {
        0
    }
}

/// The `@name` a message opens with, if any.
pub fn leading_mention(message: &str) -> Option<&str> {
    LEADING_MENTION_RE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Every `@name` in the message, each paired with the first post by that author.
pub fn mention_targets<'a>(message: &'a str, posts: &'a [Post]) -> Vec<(&'a str, Option<&'a Post>)> {
    MENTION_RE
        .captures_iter(message)
        .filter_map(|caps| caps.get(1))
        .map(|name| {
            let name = name.as_str();
            let target = posts.iter().find(|post| {
                post.author()
                    .is_some_and(|author| author.to_lowercase() == name.to_lowercase())
            });
            (name, target)
        })
        .collect()
}

struct Node<'a> {
    post: &'a Post,
    timestamp: DateTime<Utc>,
    /// Position in the input; breaks timestamp ties.
    position: usize,
}

impl Node<'_> {
    fn key(&self) -> (DateTime<Utc>, usize) {
        (self.timestamp, self.position)
    }
}

struct Index<'a> {
    nodes: Vec<Node<'a>>,
    by_id: HashMap<&'a str, usize>,
    /// Lowercased handle to node indices sorted by (timestamp, position).
    by_author: HashMap<String, Vec<usize>>,
}

impl<'a> Index<'a> {
    fn build(posts: &'a [Post]) -> Self {
        let nodes: Vec<Node<'a>> = posts
            .iter()
            .enumerate()
            .filter(|(_, post)| post.is_valid())
            .map(|(position, post)| Node {
                post,
                timestamp: post.timestamp,
                position,
            })
            .collect();

        let mut by_id = HashMap::with_capacity(nodes.len());
        let mut by_author: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, node) in nodes.iter().enumerate() {
            if let Some(id) = node.post.id.as_deref() {
                by_id.entry(id).or_insert(idx);
            }
            if let Some(handle) = node.post.handle() {
                by_author.entry(handle.to_lowercase()).or_default().push(idx);
            }
        }
        for indices in by_author.values_mut() {
            indices.sort_by_key(|&idx| nodes[idx].key());
        }

        Self {
            nodes,
            by_id,
            by_author,
        }
    }

    fn explicit_parent(&self, idx: usize) -> Option<usize> {
        let reply_to = self.nodes[idx].post.reply_to.as_deref()?;
        self.by_id.get(reply_to).copied()
    }

    /// Latest post by the mentioned author strictly older than `idx`; the earliest input
    /// position wins among equal timestamps.
    fn mention_parent(&self, idx: usize) -> Option<usize> {
        let node = &self.nodes[idx];
        let name = leading_mention(&node.post.message)?;
        let candidates = self.by_author.get(&name.to_lowercase())?;
        let older = candidates.partition_point(|&c| self.nodes[c].timestamp < node.timestamp);
        let older = &candidates[..older];
        let latest = self.nodes[*older.last()?].timestamp;
        let first_latest = older.partition_point(|&c| self.nodes[c].timestamp < latest);
        older.get(first_latest).copied()
    }

    /// Explicit references win outright: a post whose `replyTo` dangles is top-level and
    /// never falls back to its mention.
    fn resolve_parent(&self, idx: usize) -> Option<usize> {
        if self.nodes[idx].post.reply_to.is_some() {
            self.explicit_parent(idx)
        } else {
            self.mention_parent(idx)
        }
    }

    /// Explicit-reference hops up to a post without `replyTo`. A dangling reference ends
    /// the walk where it is; a chain that loops back on itself has depth zero.
    fn depth(&self, idx: usize) -> usize {
        let mut visited = vec![false; self.nodes.len()];
        visited[idx] = true;
        let mut current = idx;
        let mut hops = 0;
        while self.nodes[current].post.reply_to.is_some() {
            let Some(parent) = self.explicit_parent(current) else {
                break;
            };
            if visited[parent] {
                return 0;
            }
            visited[parent] = true;
            hops += 1;
            current = parent;
        }
        hops
    }
}

/// Depth-first pre-order; children are already sorted oldest first.
fn emit_subtree(root: usize, children: &[Vec<usize>], emitted: &mut [bool], order: &mut Vec<usize>) {
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
        if emitted[idx] {
            continue;
        }
        emitted[idx] = true;
        order.push(idx);
        stack.extend(children[idx].iter().rev().copied());
    }
}

/// Orders `posts` for display and pairs each valid post with its depth.
///
/// Invalid posts (no id, or neither text nor attachments) are dropped. Every valid post
/// appears exactly once. Posts that no root reaches (members of a `replyTo` cycle) are
/// appended afterwards in chronological order, each with its own unreached subtree.
pub fn linearize(posts: &[Post]) -> Vec<ThreadEntry<'_>> {
    let index = Index::build(posts);
    let count = index.nodes.len();

    let parents: Vec<Option<usize>> = (0..count).map(|idx| index.resolve_parent(idx)).collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut roots = Vec::new();
    for (idx, parent) in parents.iter().enumerate() {
        match parent {
            Some(parent) => children[*parent].push(idx),
            None => roots.push(idx),
        }
    }
    for siblings in &mut children {
        siblings.sort_by_key(|&idx| index.nodes[idx].key());
    }
    roots.sort_by_key(|&idx| index.nodes[idx].key());

    let mut emitted = vec![false; count];
    let mut order = Vec::with_capacity(count);
    for &root in &roots {
        emit_subtree(root, &children, &mut emitted, &mut order);
    }

    if order.len() < count {
        let mut leftovers: Vec<usize> = (0..count).filter(|&idx| !emitted[idx]).collect();
        leftovers.sort_by_key(|&idx| index.nodes[idx].key());
        debug!(count = leftovers.len(), "placing unreachable posts at top level");
        for idx in leftovers {
            emit_subtree(idx, &children, &mut emitted, &mut order);
        }
    }

    order
        .into_iter()
        .map(|idx| {
            let post = index.nodes[idx].post;
            let depth = index.depth(idx);
            let parent = parents[idx].map(|p| index.nodes[p].post);
            if is_reply(post) {
                debug!(
                    post_id = post.id.as_deref().unwrap_or_default(),
                    reply_to = post.reply_to.as_deref().unwrap_or_default(),
                    depth,
                    "reply detected"
                );
            }
            ThreadEntry {
                post,
                depth,
                parent,
            }
        })
        .collect()
}

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;

use crate::access::AccessError;
use crate::client::{self, ApiError};
use crate::compose::{DraftError, DraftKind, Submission};
use crate::forum::{Attachment, Forum, ForumStatus, Post, REACTION_EMOJIS};

pub trait ForumService: Send + Sync {
    fn load_forum(&self, forum_id: &str, viewer: Option<&str>) -> Result<Forum>;
}

pub trait PostService: Send + Sync {
    fn submit(&self, submission: &Submission, username: &str) -> Result<()>;
    fn delete_post(&self, forum_id: &str, post_id: &str, username: &str) -> Result<()>;
    fn like_post(&self, forum_id: &str, post_id: &str, username: &str) -> Result<()>;
    fn react(&self, forum_id: &str, post_id: &str, username: &str, emoji: &str) -> Result<()>;
}

pub trait ModerationService: Send + Sync {
    fn update_status(&self, forum_id: &str, status: ForumStatus, username: &str) -> Result<Forum>;
    fn update_members(&self, forum_id: &str, users: &[String], username: &str)
        -> Result<Vec<String>>;
    fn is_admin(&self, username: &str) -> Result<bool>;
}

pub struct HttpForumService {
    client: Arc<client::Client>,
}

impl HttpForumService {
    pub fn new(client: Arc<client::Client>) -> Self {
        Self { client }
    }
}

impl ForumService for HttpForumService {
    fn load_forum(&self, forum_id: &str, viewer: Option<&str>) -> Result<Forum> {
        self.client
            .forum_topic(forum_id, viewer)
            .with_context(|| format!("fetch forum {forum_id}"))
    }
}

pub struct HttpPostService {
    client: Arc<client::Client>,
}

impl HttpPostService {
    pub fn new(client: Arc<client::Client>) -> Self {
        Self { client }
    }
}

impl PostService for HttpPostService {
    fn submit(&self, submission: &Submission, username: &str) -> Result<()> {
        match &submission.kind {
            DraftKind::Post => self.client.add_post(
                &submission.forum_id,
                username,
                &submission.message,
                None,
                &submission.images,
            ),
            DraftKind::Reply { parent_id, .. } => self.client.add_post(
                &submission.forum_id,
                username,
                &submission.message,
                Some(parent_id.as_str()),
                &submission.images,
            ),
            DraftKind::Edit { post_id } => self.client.edit_post(
                &submission.forum_id,
                post_id,
                username,
                &submission.message,
                &submission.kept,
                &submission.images,
            ),
        }
    }

    fn delete_post(&self, forum_id: &str, post_id: &str, username: &str) -> Result<()> {
        self.client.delete_post(forum_id, post_id, username)
    }

    fn like_post(&self, forum_id: &str, post_id: &str, username: &str) -> Result<()> {
        self.client.like_post(forum_id, post_id, username)
    }

    fn react(&self, forum_id: &str, post_id: &str, username: &str, emoji: &str) -> Result<()> {
        self.client.react_to_post(forum_id, post_id, username, emoji)
    }
}

pub struct HttpModerationService {
    client: Arc<client::Client>,
}

impl HttpModerationService {
    pub fn new(client: Arc<client::Client>) -> Self {
        Self { client }
    }
}

impl ModerationService for HttpModerationService {
    fn update_status(&self, forum_id: &str, status: ForumStatus, username: &str) -> Result<Forum> {
        self.client
            .update_forum_status(forum_id, status, username)
            .context("update forum status")
    }

    fn update_members(
        &self,
        forum_id: &str,
        users: &[String],
        username: &str,
    ) -> Result<Vec<String>> {
        self.client
            .update_allowed_users(forum_id, users, username)
            .context("update forum members")
    }

    fn is_admin(&self, username: &str) -> Result<bool> {
        self.client.is_admin(username)
    }
}

/// In-memory forum backend. Serves every service trait so sessions and tests can run
/// without a server.
#[derive(Default)]
pub struct MockForum {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    forums: HashMap<String, Forum>,
    admins: Vec<String>,
    next_id: u64,
}

fn rejected(status: u16, message: &str) -> anyhow::Error {
    ApiError::Rejected {
        status,
        message: Some(message.to_string()),
    }
    .into()
}

impl MockForum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forum(self, forum: Forum) -> Self {
        self.insert(forum);
        self
    }

    pub fn with_admin(self, username: &str) -> Self {
        self.state.lock().admins.push(username.to_string());
        self
    }

    pub fn insert(&self, forum: Forum) {
        self.state.lock().forums.insert(forum.forum_id.clone(), forum);
    }

    pub fn forum(&self, forum_id: &str) -> Option<Forum> {
        self.state.lock().forums.get(forum_id).cloned()
    }

    fn with_forum_mut<T>(
        &self,
        forum_id: &str,
        f: impl FnOnce(&mut Forum, &mut u64) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let MockState {
            forums, next_id, ..
        } = &mut *state;
        let forum = forums
            .get_mut(forum_id)
            .ok_or_else(|| rejected(404, "Forum not found"))?;
        f(forum, next_id)
    }

    fn with_post_mut<T>(
        &self,
        forum_id: &str,
        post_id: &str,
        f: impl FnOnce(&mut Post) -> Result<T>,
    ) -> Result<T> {
        self.with_forum_mut(forum_id, |forum, _| {
            let post = forum
                .posts
                .iter_mut()
                .find(|post| post.id.as_deref() == Some(post_id))
                .ok_or_else(|| rejected(404, "Post not found"))?;
            f(post)
        })
    }
}

fn uploaded(submission: &Submission) -> Vec<Attachment> {
    submission
        .images
        .iter()
        .map(|image| Attachment {
            kind: "image".into(),
            url: format!("https://ik.imagekit.io/mock/{}", image.name),
            name: Some(image.name.clone()),
        })
        .collect()
}

impl ForumService for MockForum {
    fn load_forum(&self, forum_id: &str, _viewer: Option<&str>) -> Result<Forum> {
        self.forum(forum_id)
            .ok_or_else(|| rejected(404, "Forum not found"))
    }
}

impl PostService for MockForum {
    fn submit(&self, submission: &Submission, username: &str) -> Result<()> {
        if let DraftKind::Edit { post_id } = &submission.kind {
            let attachments: Vec<Attachment> = submission
                .kept
                .iter()
                .cloned()
                .chain(uploaded(submission))
                .collect();
            return self.with_post_mut(&submission.forum_id, post_id, |post| {
                if post.created_by.as_deref() != Some(username) {
                    return Err(rejected(403, "Not authorized to edit this post"));
                }
                post.message = submission.message.clone();
                post.metadata.attachments = attachments;
                post.metadata.edited = true;
                post.metadata.edited_at = Some(Utc::now());
                Ok(())
            });
        }

        self.with_forum_mut(&submission.forum_id, |forum, next_id| {
            if forum.is_archived() {
                return Err(rejected(403, "Forum is archived"));
            }
            let duplicate = forum.posts.iter().any(|post| {
                post.created_by.as_deref() == Some(username) && post.message == submission.message
            });
            if duplicate && !submission.message.trim().is_empty() {
                return Err(ApiError::DuplicatePost { message: None }.into());
            }

            *next_id += 1;
            forum.posts.push(Post {
                id: Some(format!("mock-{next_id}")),
                username: Some(username.to_string()),
                created_by: Some(username.to_string()),
                message: submission.message.clone(),
                timestamp: Utc::now(),
                reply_to: submission.reply_to().map(str::to_string),
                metadata: crate::forum::PostMetadata {
                    attachments: uploaded(submission),
                    ..Default::default()
                },
            });
            Ok(())
        })
    }

    fn delete_post(&self, forum_id: &str, post_id: &str, username: &str) -> Result<()> {
        self.with_forum_mut(forum_id, |forum, _| {
            let index = forum
                .posts
                .iter()
                .position(|post| post.id.as_deref() == Some(post_id))
                .ok_or_else(|| rejected(404, "Post not found"))?;
            if forum.posts[index].created_by.as_deref() != Some(username) {
                return Err(rejected(403, "Not authorized to delete this post"));
            }
            forum.posts.remove(index);
            Ok(())
        })
    }

    fn like_post(&self, forum_id: &str, post_id: &str, username: &str) -> Result<()> {
        self.with_post_mut(forum_id, post_id, |post| {
            let liked_by = &mut post.metadata.liked_by;
            if let Some(index) = liked_by.iter().position(|user| user == username) {
                liked_by.remove(index);
            } else {
                liked_by.push(username.to_string());
            }
            post.metadata.likes = liked_by.len() as u64;
            Ok(())
        })
    }

    fn react(&self, forum_id: &str, post_id: &str, username: &str, emoji: &str) -> Result<()> {
        if !REACTION_EMOJIS.contains(&emoji) {
            return Err(rejected(400, "Invalid reaction type"));
        }
        self.with_post_mut(forum_id, post_id, |post| {
            let users = post
                .metadata
                .reactions
                .entry(emoji.to_string())
                .or_default();
            if let Some(index) = users.iter().position(|user| user == username) {
                users.remove(index);
            } else {
                users.push(username.to_string());
            }
            if users.is_empty() {
                post.metadata.reactions.remove(emoji);
            }
            Ok(())
        })
    }
}

impl ModerationService for MockForum {
    fn update_status(&self, forum_id: &str, status: ForumStatus, username: &str) -> Result<Forum> {
        let is_admin = self.is_admin(username)?;
        self.with_forum_mut(forum_id, |forum, _| {
            if forum.created_by != username && !is_admin {
                return Err(rejected(403, "Not authorized to change forum status"));
            }
            forum.metadata.status = status;
            Ok(forum.clone())
        })
    }

    fn update_members(
        &self,
        forum_id: &str,
        users: &[String],
        username: &str,
    ) -> Result<Vec<String>> {
        self.with_forum_mut(forum_id, |forum, _| {
            if forum.created_by != username {
                return Err(rejected(403, "Only the forum creator can manage members"));
            }
            forum.allowed_users = users.to_vec();
            Ok(forum.allowed_users.clone())
        })
    }

    fn is_admin(&self, username: &str) -> Result<bool> {
        Ok(self.state.lock().admins.iter().any(|admin| admin == username))
    }
}

/// Progress of a forum mutation, as reported to whoever started it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationStatus<T> {
    Pending,
    Success(T),
    Failure(String),
}

impl<T> MutationStatus<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, MutationStatus::Pending)
    }
}

/// Runs `op`, reporting `Pending` first and then `Success` or `Failure`.
pub fn track<T>(
    op: impl FnOnce() -> Result<T>,
    mut on_status: impl FnMut(MutationStatus<&T>),
) -> Result<T> {
    on_status(MutationStatus::Pending);
    match op() {
        Ok(value) => {
            on_status(MutationStatus::Success(&value));
            Ok(value)
        }
        Err(err) => {
            on_status(MutationStatus::Failure(failure_message(&err)));
            Err(err)
        }
    }
}

/// The message to show for a failed mutation: the typed error's own text when there is one,
/// else the whole context chain.
pub fn failure_message(err: &anyhow::Error) -> String {
    if let Some(api) = err.downcast_ref::<ApiError>() {
        return api.user_message();
    }
    if let Some(draft) = err.downcast_ref::<DraftError>() {
        return draft.to_string();
    }
    if let Some(access) = err.downcast_ref::<AccessError>() {
        return access.to_string();
    }
    format!("{err:#}")
}

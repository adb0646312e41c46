use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::access::{edit_members, StatusAction, Viewer};
use crate::compose::{Draft, Limits};
use crate::data::{track, ForumService, ModerationService, MutationStatus, PostService};
use crate::forum::{Forum, REACTION_EMOJIS};
use crate::storage::Store;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no forum loaded")]
    NoForum,
    #[error("post {0} not found")]
    PostNotFound(String),
    #[error("unsupported reaction {0}")]
    UnsupportedReaction(String),
}

/// The forum being viewed, who is viewing it, and the services that change it.
///
/// Every successful mutation is followed by a full refetch; the fetched forum replaces the
/// held one wholesale.
pub struct ForumSession {
    forums: Arc<dyn ForumService>,
    posts: Arc<dyn PostService>,
    moderation: Arc<dyn ModerationService>,
    store: Option<Arc<Store>>,
    limits: Limits,
    viewer: RwLock<Viewer>,
    current: RwLock<Option<Forum>>,
}

impl ForumSession {
    pub fn new(
        forums: Arc<dyn ForumService>,
        posts: Arc<dyn PostService>,
        moderation: Arc<dyn ModerationService>,
        limits: Limits,
    ) -> Self {
        Self {
            forums,
            posts,
            moderation,
            store: None,
            limits,
            viewer: RwLock::new(Viewer::anonymous()),
            current: RwLock::new(None),
        }
    }

    /// Snapshots of every fetched forum are written to `store`.
    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn viewer(&self) -> Viewer {
        self.viewer.read().clone()
    }

    pub fn set_viewer(&self, viewer: Viewer) {
        *self.viewer.write() = viewer;
    }

    /// Asks the server whether the viewer is an admin. Failures count as "no".
    pub fn refresh_admin(&self) -> bool {
        let Some(username) = self.viewer().username().map(str::to_string) else {
            return false;
        };
        let is_admin = match self.moderation.is_admin(&username) {
            Ok(is_admin) => is_admin,
            Err(err) => {
                warn!(error = %err, username = %username, "admin check failed");
                false
            }
        };
        self.viewer.write().is_admin = is_admin;
        is_admin
    }

    pub fn forum(&self) -> Option<Forum> {
        self.current.read().clone()
    }

    pub fn load(&self, forum_id: &str) -> Result<Forum> {
        let viewer = self.viewer();
        let forum = self.forums.load_forum(forum_id, viewer.username())?;
        debug!(forum_id, posts = forum.posts.len(), "forum loaded");
        if let Some(store) = &self.store {
            if let Err(err) = store.save_snapshot(&forum) {
                warn!(error = %err, forum_id, "failed to save forum snapshot");
            }
        }
        *self.current.write() = Some(forum.clone());
        Ok(forum)
    }

    fn current(&self) -> Result<Forum> {
        self.forum().ok_or_else(|| SessionError::NoForum.into())
    }

    fn refetch(&self) -> Result<Forum> {
        let forum_id = self.current()?.forum_id;
        self.load(&forum_id)
    }

    pub fn new_post_draft(&self) -> Draft {
        Draft::new_post(self.limits)
    }

    pub fn reply_draft(&self, post_id: &str) -> Result<Draft> {
        let forum = self.current()?;
        forum
            .find_post(post_id)
            .and_then(|post| Draft::reply(post, self.limits))
            .ok_or_else(|| SessionError::PostNotFound(post_id.to_string()).into())
    }

    pub fn edit_draft(&self, post_id: &str) -> Result<Draft> {
        let forum = self.current()?;
        forum
            .find_post(post_id)
            .and_then(|post| Draft::edit(post, self.limits))
            .ok_or_else(|| SessionError::PostNotFound(post_id.to_string()).into())
    }

    pub fn submit(
        &self,
        draft: Draft,
        on_status: impl FnMut(MutationStatus<&Forum>),
    ) -> Result<Forum> {
        track(
            || {
                let forum = self.current()?;
                let viewer = self.viewer();
                let submission = draft.finish(&viewer, &forum)?;
                let username = viewer.ensure_signed_in("add a post")?;
                self.posts.submit(&submission, username)?;
                info!(forum_id = %forum.forum_id, "post submitted");
                self.refetch()
            },
            on_status,
        )
    }

    pub fn delete(
        &self,
        post_id: &str,
        on_status: impl FnMut(MutationStatus<&Forum>),
    ) -> Result<Forum> {
        track(
            || {
                let forum = self.current()?;
                let post = forum
                    .find_post(post_id)
                    .ok_or_else(|| SessionError::PostNotFound(post_id.to_string()))?;
                let viewer = self.viewer();
                let username = viewer.ensure_can_delete(post)?;
                self.posts.delete_post(&forum.forum_id, post_id, username)?;
                info!(forum_id = %forum.forum_id, post_id, "post deleted");
                self.refetch()
            },
            on_status,
        )
    }

    pub fn like(
        &self,
        post_id: &str,
        on_status: impl FnMut(MutationStatus<&Forum>),
    ) -> Result<Forum> {
        track(
            || {
                let forum = self.current()?;
                if forum.find_post(post_id).is_none() {
                    bail!(SessionError::PostNotFound(post_id.to_string()));
                }
                let viewer = self.viewer();
                let username = viewer.ensure_signed_in("like posts")?;
                self.posts.like_post(&forum.forum_id, post_id, username)?;
                self.refetch()
            },
            on_status,
        )
    }

    pub fn react(
        &self,
        post_id: &str,
        emoji: &str,
        on_status: impl FnMut(MutationStatus<&Forum>),
    ) -> Result<Forum> {
        track(
            || {
                if !REACTION_EMOJIS.contains(&emoji) {
                    bail!(SessionError::UnsupportedReaction(emoji.to_string()));
                }
                let forum = self.current()?;
                if forum.find_post(post_id).is_none() {
                    bail!(SessionError::PostNotFound(post_id.to_string()));
                }
                let viewer = self.viewer();
                let username = viewer.ensure_signed_in("react to posts")?;
                self.posts.react(&forum.forum_id, post_id, username, emoji)?;
                self.refetch()
            },
            on_status,
        )
    }

    pub fn set_status(
        &self,
        action: StatusAction,
        on_status: impl FnMut(MutationStatus<&Forum>),
    ) -> Result<Forum> {
        track(
            || {
                let forum = self.current()?;
                let viewer = self.viewer();
                let username = viewer.ensure_status_action(&forum, action)?;
                self.moderation
                    .update_status(&forum.forum_id, action.target(), username)?;
                info!(forum_id = %forum.forum_id, status = action.target().as_str(), "forum status changed");
                self.refetch()
            },
            on_status,
        )
    }

    pub fn update_members(
        &self,
        add: &[String],
        remove: &[String],
        on_status: impl FnMut(MutationStatus<&Vec<String>>),
    ) -> Result<Vec<String>> {
        track(
            || {
                let forum = self.current()?;
                let viewer = self.viewer();
                let username = viewer.ensure_can_manage_members(&forum)?;
                let members = edit_members(&forum.allowed_users, &forum.created_by, add, remove);
                let saved = self
                    .moderation
                    .update_members(&forum.forum_id, &members, username)?;
                self.refetch()?;
                Ok(saved)
            },
            on_status,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::AccessError;
    use crate::data::MockForum;
    use crate::forum::{ForumStatus, Post};
    use crate::storage::Options;
    use tempfile::tempdir;

    fn mock() -> Arc<MockForum> {
        Arc::new(
            MockForum::new()
                .with_forum(Forum {
                    forum_id: "f-1".into(),
                    title: "Boss tips".into(),
                    created_by: "bob".into(),
                    is_private: true,
                    allowed_users: vec!["bob".into()],
                    posts: vec![Post {
                        id: Some("p1".into()),
                        created_by: Some("bob".into()),
                        message: "first".into(),
                        ..Post::default()
                    }],
                    ..Forum::default()
                })
                .with_admin("root"),
        )
    }

    fn session(mock: &Arc<MockForum>) -> ForumSession {
        ForumSession::new(mock.clone(), mock.clone(), mock.clone(), Limits::default())
    }

    fn ignore<T>(_: MutationStatus<&T>) {}

    #[test]
    fn reply_is_refetched_into_forum() {
        let mock = mock();
        let session = session(&mock);
        session.set_viewer(Viewer::signed_in("amy"));
        session.load("f-1").unwrap();

        let mut draft = session.reply_draft("p1").unwrap();
        draft.set_message("thanks");
        let mut statuses = Vec::new();
        let forum = session
            .submit(draft, |status| statuses.push(status.is_pending()))
            .unwrap();

        assert_eq!(statuses, vec![true, false]);
        assert_eq!(forum.posts.len(), 2);
        assert_eq!(forum.posts[1].message, "@bob thanks");
        assert_eq!(session.forum().unwrap(), forum);
    }

    #[test]
    fn mutations_need_a_loaded_forum() {
        let mock = mock();
        let session = session(&mock);
        let err = session.like("p1", ignore).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::NoForum)
        ));
    }

    #[test]
    fn failures_are_reported_with_user_message() {
        let mock = mock();
        let session = session(&mock);
        session.load("f-1").unwrap();

        let mut failure = None;
        let result = session.delete("p1", |status| {
            if let MutationStatus::Failure(message) = status {
                failure = Some(message);
            }
        });
        assert!(result.is_err());
        assert_eq!(
            failure.as_deref(),
            Some("Please sign in to delete posts. Click 'Sign In/Up' to get started.")
        );

        session.set_viewer(Viewer::signed_in("amy"));
        let err = session.delete("p1", ignore).unwrap_err();
        assert_eq!(
            err.downcast_ref::<AccessError>(),
            Some(&AccessError::NotAuthor("delete"))
        );
    }

    #[test]
    fn admin_can_archive_and_creator_restore() {
        let mock = mock();
        let session = session(&mock);
        session.set_viewer(Viewer::signed_in("root"));
        assert!(session.refresh_admin());
        session.load("f-1").unwrap();

        let forum = session.set_status(StatusAction::Archive, ignore).unwrap();
        assert!(forum.is_archived());

        session.set_viewer(Viewer::signed_in("amy"));
        assert!(!session.refresh_admin());
        let draft = session.new_post_draft();
        assert!(session.submit(draft, ignore).is_err());

        session.set_viewer(Viewer::signed_in("bob"));
        let forum = session.set_status(StatusAction::Restore, ignore).unwrap();
        assert_eq!(forum.metadata.status, ForumStatus::Active);
    }

    #[test]
    fn reactions_toggle_through_session() {
        let mock = mock();
        let session = session(&mock);
        session.set_viewer(Viewer::signed_in("amy"));
        session.load("f-1").unwrap();

        let forum = session.react("p1", "💡", ignore).unwrap();
        let states = session.viewer().reactions(&forum.posts[0]);
        assert!(states[1].reacted);
        assert_eq!(states[1].count, 1);

        assert!(session.react("p1", "👍", ignore).is_err());
        assert!(session.react("missing", "💡", ignore).is_err());
    }

    #[test]
    fn creator_manages_members() {
        let mock = mock();
        let session = session(&mock);
        session.set_viewer(Viewer::signed_in("bob"));
        session.load("f-1").unwrap();

        let members = session
            .update_members(&["amy".into(), "cat".into()], &[], ignore)
            .unwrap();
        assert_eq!(members, vec!["bob", "amy", "cat"]);
        let members = session.update_members(&[], &["cat".into()], ignore).unwrap();
        assert_eq!(members, vec!["bob", "amy"]);
        assert_eq!(session.forum().unwrap().allowed_users, members);

        session.set_viewer(Viewer::signed_in("amy"));
        assert!(session.update_members(&["dan".into()], &[], ignore).is_err());
    }

    #[test]
    fn loads_are_snapshotted() {
        let dir = tempdir().unwrap();
        let store = Arc::new(
            Store::open(Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let mock = mock();
        let session = session(&mock).with_store(store.clone());
        session.load("f-1").unwrap();

        let snapshot = store.snapshot("f-1").unwrap().unwrap();
        assert_eq!(snapshot.forum.title, "Boss tips");
    }
}

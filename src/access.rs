use crate::forum::{Forum, ForumStatus, Post, REACTION_EMOJIS};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("Please sign in to {0}. Click 'Sign In/Up' to get started.")]
    SignedOut(&'static str),
    #[error("only the author can {0} this post")]
    NotAuthor(&'static str),
    #[error("only the forum creator or an admin can change the forum status")]
    NotCreatorOrAdmin,
    #[error("only the creator of a private forum can manage its members")]
    NotMemberManager,
    #[error("forum is already {0}")]
    AlreadyInStatus(&'static str),
    #[error("This forum is archived. No new posts or replies.")]
    ReadOnly,
}

/// Who is looking at the forum. Drives which actions are offered; the server remains the
/// authority on whether they succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    username: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Archive,
    Restore,
}

impl StatusAction {
    pub fn target(&self) -> ForumStatus {
        match self {
            StatusAction::Archive => ForumStatus::Archived,
            StatusAction::Restore => ForumStatus::Active,
        }
    }

    pub fn confirmation(&self) -> &'static str {
        match self {
            StatusAction::Archive => "Forum is archived. No one can post until you restore it.",
            StatusAction::Restore => "Forum is now open for posts.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionState {
    pub emoji: &'static str,
    pub count: usize,
    pub reacted: bool,
}

impl Viewer {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Blank names are treated as signed out.
    pub fn signed_in(username: impl Into<String>) -> Self {
        let username = username.into().trim().to_string();
        Self {
            username: (!username.is_empty()).then_some(username),
            is_admin: false,
        }
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.username.is_some()
    }

    pub fn can_post(&self, forum: &Forum) -> bool {
        self.is_signed_in() && !forum.is_archived()
    }

    pub fn can_reply(&self, forum: &Forum) -> bool {
        self.can_post(forum)
    }

    pub fn owns(&self, post: &Post) -> bool {
        match (self.username(), post.created_by.as_deref()) {
            (Some(me), Some(author)) => me == author,
            _ => false,
        }
    }

    pub fn can_edit(&self, post: &Post) -> bool {
        self.owns(post)
    }

    pub fn can_delete(&self, post: &Post) -> bool {
        self.owns(post)
    }

    pub fn is_creator_or_admin(&self, forum: &Forum) -> bool {
        match self.username() {
            Some(me) => forum.created_by == me || self.is_admin,
            None => false,
        }
    }

    pub fn can_change_status(&self, forum: &Forum) -> bool {
        self.is_creator_or_admin(forum)
    }

    /// The status change offered to this viewer, if any.
    pub fn status_action(&self, forum: &Forum) -> Option<StatusAction> {
        if !self.can_change_status(forum) {
            return None;
        }
        match forum.metadata.status {
            ForumStatus::Archived => Some(StatusAction::Restore),
            ForumStatus::Active | ForumStatus::Inactive => Some(StatusAction::Archive),
        }
    }

    pub fn can_manage_members(&self, forum: &Forum) -> bool {
        forum.is_private && self.username().is_some_and(|me| forum.created_by == me)
    }

    pub fn ensure_signed_in(&self, action: &'static str) -> Result<&str, AccessError> {
        self.username().ok_or(AccessError::SignedOut(action))
    }

    pub fn ensure_can_post(&self, forum: &Forum) -> Result<&str, AccessError> {
        let me = self.ensure_signed_in("add a post")?;
        if forum.is_archived() {
            return Err(AccessError::ReadOnly);
        }
        Ok(me)
    }

    pub fn ensure_can_edit(&self, post: &Post) -> Result<&str, AccessError> {
        let me = self.ensure_signed_in("edit posts")?;
        if !self.can_edit(post) {
            return Err(AccessError::NotAuthor("edit"));
        }
        Ok(me)
    }

    pub fn ensure_can_delete(&self, post: &Post) -> Result<&str, AccessError> {
        let me = self.ensure_signed_in("delete posts")?;
        if !self.can_delete(post) {
            return Err(AccessError::NotAuthor("delete"));
        }
        Ok(me)
    }

    pub fn ensure_status_action(
        &self,
        forum: &Forum,
        action: StatusAction,
    ) -> Result<&str, AccessError> {
        let me = self.ensure_signed_in("manage this forum")?;
        match self.status_action(forum) {
            Some(offered) if offered == action => Ok(me),
            Some(_) => Err(AccessError::AlreadyInStatus(forum.metadata.status.as_str())),
            None => Err(AccessError::NotCreatorOrAdmin),
        }
    }

    pub fn ensure_can_manage_members(&self, forum: &Forum) -> Result<&str, AccessError> {
        let me = self.ensure_signed_in("manage members")?;
        if !self.can_manage_members(forum) {
            return Err(AccessError::NotMemberManager);
        }
        Ok(me)
    }

    /// Count and own-reaction flag for each offered emoji.
    pub fn reactions(&self, post: &Post) -> Vec<ReactionState> {
        REACTION_EMOJIS
            .iter()
            .map(|&emoji| {
                let users = post.reactions_for(emoji);
                ReactionState {
                    emoji,
                    count: users.len(),
                    reacted: self
                        .username()
                        .is_some_and(|me| users.iter().any(|user| user == me)),
                }
            })
            .collect()
    }
}

/// Applies additions and removals to a member list, keeping the creator and dropping
/// duplicates while preserving order.
pub fn edit_members(current: &[String], creator: &str, add: &[String], remove: &[String]) -> Vec<String> {
    let mut members: Vec<String> = Vec::with_capacity(current.len() + add.len());
    for user in current.iter().chain(add.iter()) {
        let user = user.trim();
        if user.is_empty() || members.iter().any(|m| m == user) {
            continue;
        }
        if user != creator && remove.iter().any(|r| r.trim() == user) {
            continue;
        }
        members.push(user.to_string());
    }
    if !creator.is_empty() && !members.iter().any(|m| m == creator) {
        members.insert(0, creator.to_string());
    }
    members
}

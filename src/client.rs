use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client as HttpClient, RequestBuilder};
use reqwest::header::USER_AGENT;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

use crate::compose::ImageFile;
use crate::forum::{Attachment, Forum, ForumStatus};

pub const TOPIC_PATH: &str = "/api/getForumTopic";
pub const ADD_POST_PATH: &str = "/api/addPostToForum";
pub const EDIT_POST_PATH: &str = "/api/editPostInForum";
pub const DELETE_POST_PATH: &str = "/api/deletePostFromForum";
pub const LIKE_POST_PATH: &str = "/api/likePost";
pub const REACT_PATH: &str = "/api/reactToPost";
pub const STATUS_PATH: &str = "/api/updateForumStatus";
pub const MEMBERS_PATH: &str = "/api/updateForumUsers";
pub const ADMIN_CHECK_PATH: &str = "/api/feedback/admin/check";

const DUPLICATE_POST_ERROR: &str = "Duplicate post detected";
const INAPPROPRIATE_IMAGE_ERROR: &str = "Image contains inappropriate content";
const DEFAULT_VIOLATION_DETAILS: &str =
    "The image contains content that violates our community guidelines";

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationAction {
    Warning { count: u32 },
    Banned,
    PermanentBan,
}

/// A mutation the server refused, classified from status code and JSON body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("{}", or_fallback(.message, "You've already posted this message recently."))]
    DuplicatePost { message: Option<String> },
    #[error("{}", violation_message(.action, .message))]
    ContentViolation {
        action: ViolationAction,
        message: Option<String>,
    },
    #[error("Image Rejected: {}. Please choose a different image.", or_fallback(.details, DEFAULT_VIOLATION_DETAILS))]
    InappropriateImage { details: Option<String> },
    #[error("Unable to upload image. Please try again or post without an image.")]
    UploadFailed { message: Option<String> },
    #[error("{}", rejected_message(.status, .message))]
    Rejected { status: u16, message: Option<String> },
}

fn or_fallback<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    value.as_deref().filter(|s| !s.is_empty()).unwrap_or(fallback)
}

fn violation_message(action: &ViolationAction, message: &Option<String>) -> String {
    if let Some(message) = message.as_deref().filter(|s| !s.is_empty()) {
        return message.to_string();
    }
    match action {
        ViolationAction::Banned => {
            "Your account has been suspended due to content violations.".to_string()
        }
        ViolationAction::PermanentBan => "Your account has been permanently suspended.".to_string(),
        ViolationAction::Warning { count } => {
            format!("Your image contains inappropriate content. Warning ({count}/3).")
        }
    }
}

fn rejected_message(status: &u16, message: &Option<String>) -> String {
    match message.as_deref().filter(|s| !s.is_empty()) {
        Some(message) => message.to_string(),
        None => format!("request failed with status {status}"),
    }
}

impl ApiError {
    /// Classifies an error response. `with_images` marks requests that carried uploads.
    pub fn classify(status: u16, body: &Value, with_images: bool) -> Self {
        let error = body.get("error").and_then(Value::as_str);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);

        if status == 400 && error == Some(DUPLICATE_POST_ERROR) {
            return ApiError::DuplicatePost { message };
        }

        let violation = body.get("violationResult").filter(|v| v.is_object());
        let flagged = body
            .get("isContentViolation")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if (status == 400 || status == 403) && (flagged || violation.is_some()) {
            let action = match violation
                .and_then(|v| v.get("action"))
                .and_then(Value::as_str)
            {
                Some("banned") => ViolationAction::Banned,
                Some("permanent_ban") => ViolationAction::PermanentBan,
                _ => ViolationAction::Warning {
                    count: violation
                        .and_then(|v| v.get("count"))
                        .and_then(Value::as_u64)
                        .map(|count| count as u32)
                        .unwrap_or(1),
                },
            };
            return ApiError::ContentViolation { action, message };
        }

        if (status == 400 || status == 403) && error == Some(INAPPROPRIATE_IMAGE_ERROR) {
            let details = body
                .get("details")
                .and_then(Value::as_str)
                .map(str::to_string);
            return ApiError::InappropriateImage { details };
        }

        let upload_flagged = body
            .get("isUploadError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mentions_upload = [error, message.as_deref()]
            .into_iter()
            .flatten()
            .any(|text| text.to_ascii_lowercase().contains("upload"));
        if upload_flagged || (with_images && mentions_upload) {
            return ApiError::UploadFailed {
                message: message.or_else(|| error.map(str::to_string)),
            };
        }

        ApiError::Rejected {
            status,
            message: error.map(str::to_string).or(message),
        }
    }

    /// Text shown to the user for this rejection.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdminCheck {
    #[serde(default)]
    is_admin: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembersResponse {
    #[serde(default)]
    allowed_users: Option<Vec<String>>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("forum client user agent required");
        }
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("forum: invalid base url {:?}", config.base_url))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .with_context(|| format!("forum: build url for {path}"))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    fn send(&self, request: RequestBuilder, with_images: bool) -> Result<Value> {
        let response = request
            .header(USER_AGENT, &self.user_agent)
            .send()
            .context("forum: send request")?;
        let status = response.status();
        let text = response.text().context("forum: read response body")?;
        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(body);
        }

        let err = ApiError::classify(status.as_u16(), &body, with_images);
        warn!(status = status.as_u16(), error = %err, "forum request rejected");
        Err(err.into())
    }

    pub fn forum_topic(&self, forum_id: &str, username: Option<&str>) -> Result<Forum> {
        let mut query = vec![("forumId", forum_id)];
        if let Some(username) = username {
            query.push(("username", username));
        }
        let url = self.endpoint(TOPIC_PATH, &query)?;
        debug!(%url, "fetching forum topic");
        let body = self.send(self.http.get(url), false)?;
        serde_json::from_value(body).context("forum: decode topic")
    }

    pub fn add_post(
        &self,
        forum_id: &str,
        username: &str,
        message: &str,
        reply_to: Option<&str>,
        images: &[ImageFile],
    ) -> Result<()> {
        let mut form = Form::new()
            .text("forumId", forum_id.to_string())
            .text("username", username.to_string())
            .text("message", message.to_string());
        if let Some(reply_to) = reply_to {
            form = form.text("replyTo", reply_to.to_string());
        }
        form = attach_images(form, images)?;

        let url = self.endpoint(ADD_POST_PATH, &[])?;
        debug!(%url, forum_id, images = images.len(), "adding post");
        self.send(self.http.post(url).multipart(form), !images.is_empty())?;
        Ok(())
    }

    pub fn edit_post(
        &self,
        forum_id: &str,
        post_id: &str,
        username: &str,
        message: &str,
        kept: &[Attachment],
        images: &[ImageFile],
    ) -> Result<()> {
        let existing = serde_json::to_string(kept).context("forum: encode kept attachments")?;
        let form = Form::new()
            .text("forumId", forum_id.to_string())
            .text("postId", post_id.to_string())
            .text("username", username.to_string())
            .text("message", message.to_string())
            .text("existingAttachments", existing);
        let form = attach_images(form, images)?;

        let url = self.endpoint(EDIT_POST_PATH, &[])?;
        debug!(%url, forum_id, post_id, "editing post");
        self.send(self.http.put(url).multipart(form), !images.is_empty())?;
        Ok(())
    }

    pub fn delete_post(&self, forum_id: &str, post_id: &str, username: &str) -> Result<()> {
        let url = self.endpoint(DELETE_POST_PATH, &[])?;
        let body = json!({ "forumId": forum_id, "postId": post_id, "username": username });
        self.send(self.http.delete(url).json(&body), false)?;
        Ok(())
    }

    pub fn like_post(&self, forum_id: &str, post_id: &str, username: &str) -> Result<()> {
        let url = self.endpoint(LIKE_POST_PATH, &[])?;
        let body = json!({ "forumId": forum_id, "postId": post_id, "username": username });
        self.send(self.http.post(url).json(&body), false)?;
        Ok(())
    }

    pub fn react_to_post(
        &self,
        forum_id: &str,
        post_id: &str,
        username: &str,
        reaction: &str,
    ) -> Result<()> {
        let url = self.endpoint(REACT_PATH, &[])?;
        let body = json!({
            "forumId": forum_id,
            "postId": post_id,
            "username": username,
            "reactionType": reaction,
        });
        self.send(self.http.post(url).json(&body), false)?;
        Ok(())
    }

    pub fn update_forum_status(
        &self,
        forum_id: &str,
        status: ForumStatus,
        username: &str,
    ) -> Result<Forum> {
        let url = self.endpoint(STATUS_PATH, &[])?;
        let body = json!({ "forumId": forum_id, "status": status.as_str(), "username": username });
        let response = self.send(self.http.post(url).json(&body), false)?;
        let forum = response.get("forum").cloned().unwrap_or(response);
        serde_json::from_value(forum).context("forum: decode updated forum")
    }

    pub fn update_allowed_users(
        &self,
        forum_id: &str,
        users: &[String],
        username: &str,
    ) -> Result<Vec<String>> {
        let url = self.endpoint(MEMBERS_PATH, &[])?;
        let body = json!({ "forumId": forum_id, "allowedUsers": users, "username": username });
        let response = self.send(self.http.post(url).json(&body), false)?;
        if !response.is_object() {
            return Ok(users.to_vec());
        }
        let decoded: MembersResponse =
            serde_json::from_value(response).context("forum: decode member list")?;
        Ok(decoded.allowed_users.unwrap_or_else(|| users.to_vec()))
    }

    pub fn is_admin(&self, username: &str) -> Result<bool> {
        let url = self.endpoint(ADMIN_CHECK_PATH, &[("username", username)])?;
        let body = self.send(self.http.get(url), false)?;
        let check: AdminCheck = serde_json::from_value(body).context("forum: decode admin check")?;
        Ok(check.is_admin)
    }
}

fn attach_images(mut form: Form, images: &[ImageFile]) -> Result<Form> {
    for image in images {
        let part = Part::file(&image.path)
            .with_context(|| format!("forum: read image {}", image.path.display()))?
            .mime_str(&image.mime)
            .with_context(|| format!("forum: set mime type for {}", image.name))?;
        form = form.part("images", part);
    }
    Ok(form)
}

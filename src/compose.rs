use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::ImageFormat;
use tracing::debug;

use crate::access::{AccessError, Viewer};
use crate::config::AttachmentConfig;
use crate::forum::{Attachment, Forum, Post};

const UNKNOWN_AUTHOR: &str = "Unknown";
const SNIFF_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error("Please enter a message or attach an image")]
    Empty,
    #[error("Maximum {0} images allowed per post")]
    TooManyImages(usize),
    #[error("{0} is not an image file")]
    NotAnImage(String),
    #[error("{name} is too large. Maximum size is {limit_mb}MB")]
    TooLarge { name: String, limit_mb: u64 },
}

/// A local file queued for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub path: PathBuf,
    pub name: String,
    pub mime: String,
    pub size: u64,
}

impl ImageFile {
    /// Reads the file size and sniffs the content type from its leading bytes.
    pub fn inspect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file =
            File::open(path).with_context(|| format!("compose: open {}", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("compose: stat {}", path.display()))?
            .len();
        let mut head = Vec::with_capacity(SNIFF_LEN);
        file.by_ref()
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .with_context(|| format!("compose: read {}", path.display()))?;

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            path: path.to_path_buf(),
            name,
            mime: detect_mime(&head),
            size,
        })
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

fn detect_mime(bytes: &[u8]) -> String {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "image/jpeg".into(),
        Ok(ImageFormat::Png) => "image/png".into(),
        Ok(ImageFormat::Gif) => "image/gif".into(),
        Ok(ImageFormat::WebP) => "image/webp".into(),
        _ => tree_magic_mini::from_u8(bytes).to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_images: usize,
    pub max_size_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&AttachmentConfig::default())
    }
}

impl From<&AttachmentConfig> for Limits {
    fn from(cfg: &AttachmentConfig) -> Self {
        Self {
            max_images: cfg.max_images,
            max_size_bytes: cfg.max_size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftKind {
    Post,
    Reply {
        parent_id: String,
        parent_author: String,
    },
    Edit {
        post_id: String,
    },
}

/// Text and images being prepared for a new post, a reply, or an edit.
#[derive(Debug, Clone)]
pub struct Draft {
    kind: DraftKind,
    message: String,
    images: Vec<ImageFile>,
    kept: Vec<Attachment>,
    limits: Limits,
}

/// A validated draft, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub forum_id: String,
    pub kind: DraftKind,
    pub message: String,
    pub images: Vec<ImageFile>,
    pub kept: Vec<Attachment>,
}

impl Submission {
    pub fn reply_to(&self) -> Option<&str> {
        match &self.kind {
            DraftKind::Reply { parent_id, .. } => Some(parent_id),
            _ => None,
        }
    }
}

impl Draft {
    pub fn new_post(limits: Limits) -> Self {
        Self {
            kind: DraftKind::Post,
            message: String::new(),
            images: Vec::new(),
            kept: Vec::new(),
            limits,
        }
    }

    /// Returns `None` when the parent has no id to reply to.
    pub fn reply(parent: &Post, limits: Limits) -> Option<Self> {
        let parent_id = parent.id.clone()?;
        let parent_author = parent.author().unwrap_or(UNKNOWN_AUTHOR).to_string();
        Some(Self {
            kind: DraftKind::Reply {
                parent_id,
                parent_author,
            },
            ..Self::new_post(limits)
        })
    }

    /// Starts from the post's current text, keeping its image attachments.
    pub fn edit(post: &Post, limits: Limits) -> Option<Self> {
        let post_id = post.id.clone()?;
        Some(Self {
            kind: DraftKind::Edit { post_id },
            message: post.message.clone(),
            kept: post
                .attachments()
                .iter()
                .filter(|a| a.is_image())
                .cloned()
                .collect(),
            ..Self::new_post(limits)
        })
    }

    pub fn kind(&self) -> &DraftKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn images(&self) -> &[ImageFile] {
        &self.images
    }

    pub fn kept(&self) -> &[Attachment] {
        &self.kept
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    fn image_count(&self) -> usize {
        self.images.len() + self.kept.len()
    }

    /// Queues images for upload.
    ///
    /// A batch that would push the draft past the image limit is refused whole. Otherwise
    /// files that are not images or are too large are skipped and reported, and the rest are
    /// added.
    pub fn add_images(&mut self, files: Vec<ImageFile>) -> Result<Vec<DraftError>, DraftError> {
        if self.image_count() + files.len() > self.limits.max_images {
            return Err(DraftError::TooManyImages(self.limits.max_images));
        }

        let mut skipped = Vec::new();
        for file in files {
            if !file.is_image() {
                skipped.push(DraftError::NotAnImage(file.name));
                continue;
            }
            if file.size > self.limits.max_size_bytes {
                skipped.push(DraftError::TooLarge {
                    name: file.name,
                    limit_mb: self.limits.max_size_bytes / (1024 * 1024),
                });
                continue;
            }
            debug!(name = %file.name, size = file.size, "image queued");
            self.images.push(file);
        }
        Ok(skipped)
    }

    pub fn remove_kept(&mut self, index: usize) -> Option<Attachment> {
        (index < self.kept.len()).then(|| self.kept.remove(index))
    }

    /// Checks the draft against the viewer and the forum and produces the outgoing message.
    pub fn finish(self, viewer: &Viewer, forum: &Forum) -> Result<Submission, DraftError> {
        match &self.kind {
            DraftKind::Post => {
                viewer.ensure_can_post(forum)?;
            }
            DraftKind::Reply { .. } => {
                viewer.ensure_signed_in("reply to posts")?;
                if forum.is_archived() {
                    return Err(AccessError::ReadOnly.into());
                }
            }
            DraftKind::Edit { post_id } => {
                if let Some(post) = forum.find_post(post_id) {
                    viewer.ensure_can_edit(post)?;
                } else {
                    viewer.ensure_signed_in("edit posts")?;
                }
            }
        }

        let has_images = !self.images.is_empty() || !self.kept.is_empty();
        if self.message.trim().is_empty() && !has_images {
            return Err(DraftError::Empty);
        }

        let message = match &self.kind {
            DraftKind::Post => self.message,
            DraftKind::Reply { parent_author, .. } => with_mention(&self.message, parent_author),
            DraftKind::Edit { .. } => self.message.trim().to_string(),
        };

        Ok(Submission {
            forum_id: forum.forum_id.clone(),
            kind: self.kind,
            message,
            images: self.images,
            kept: self.kept,
        })
    }
}

/// Prefixes `@author ` unless the text already opens with that mention.
pub fn with_mention(message: &str, author: &str) -> String {
    let trimmed = message.trim();
    let pattern = format!(r"(?i)^@{}\s+", regex::escape(author));
    let already = regex::Regex::new(&pattern)
        .map(|re| re.is_match(trimmed))
        .unwrap_or(false);
    if already {
        trimmed.to_string()
    } else {
        format!("@{author} {trimmed}")
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "forum-thread",
    version,
    about = "Read and post to game forums from the terminal"
)]
pub struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Local state database (identity and forum snapshots)
    #[arg(long, global = true, value_name = "PATH")]
    pub state: Option<PathBuf>,

    /// Forum server, overriding `forum.base_url`
    #[arg(long, global = true, value_name = "URL")]
    pub base_url: Option<String>,

    /// Act as this user for a single command
    #[arg(long = "as", global = true, value_name = "USER")]
    pub acting_user: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch a forum and print its thread
    Show {
        forum_id: String,
        /// Render the last saved snapshot instead of fetching
        #[arg(long)]
        offline: bool,
        /// Print thread order as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the thread of a forum JSON file
    Render {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Add a post, or a reply with --reply-to
    Post {
        forum_id: String,
        #[arg(default_value = "")]
        message: String,
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
        #[arg(long, value_name = "POST_ID")]
        reply_to: Option<String>,
    },
    /// Replace the text and images of your post
    Edit {
        forum_id: String,
        post_id: String,
        message: String,
        /// Existing image to keep, by position (1-based); all are kept when omitted
        #[arg(long = "keep", value_name = "N")]
        keep: Vec<usize>,
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
        /// Drop every existing image not listed with --keep
        #[arg(long)]
        replace_images: bool,
    },
    /// Delete your post
    Delete { forum_id: String, post_id: String },
    /// Toggle a like
    Like { forum_id: String, post_id: String },
    /// Toggle a reaction (🔥 💡 ❓ ❤️)
    React {
        forum_id: String,
        post_id: String,
        emoji: String,
    },
    /// Archive a forum (creator or admin)
    Archive { forum_id: String },
    /// Reopen an archived forum (creator or admin)
    Restore { forum_id: String },
    /// List or change the members of a private forum
    Members {
        forum_id: String,
        #[arg(long = "add", value_name = "USER")]
        add: Vec<String>,
        #[arg(long = "remove", value_name = "USER")]
        remove: Vec<String>,
    },
    /// Remember the acting username
    Login { username: String },
    /// Forget the acting username
    Logout,
    /// Show the acting username
    Whoami,
    /// Print the security and CORS headers for a request path
    Headers {
        #[arg(long)]
        production: bool,
        #[arg(long, default_value = "/")]
        path: String,
        #[arg(long)]
        origin: Option<String>,
    },
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::access::{StatusAction, Viewer};
use crate::cli::{Cli, Command};
use crate::client;
use crate::compose::{Draft, ImageFile};
use crate::config::{self, Config};
use crate::data::{HttpForumService, HttpModerationService, HttpPostService, MutationStatus};
use crate::forum::{Forum, Post};
use crate::render::{entries_json, render_forum, RenderOptions};
use crate::security::{apply_security_headers, SecurityProfile};
use crate::session::ForumSession;
use crate::storage;
use crate::thread::linearize;

pub fn run(cli: Cli) -> Result<()> {
    let mut cfg = config::load(config::LoadOptions {
        config_file: cli.config.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    if let Some(base_url) = cli.base_url.clone() {
        cfg.forum.base_url = base_url;
    }

    match &cli.command {
        Command::Render { file, json } => {
            let forum = read_forum_file(file)?;
            let viewer = viewer_without_store(&cli, &cfg);
            print_forum(&forum, &viewer, &cfg, *json)
        }
        Command::Headers {
            production,
            path,
            origin,
        } => {
            let mut profile = SecurityProfile::from(&cfg.security);
            profile.production |= *production;
            print_headers(&profile, path, origin.as_deref());
            Ok(())
        }
        Command::Login { username } => login(&cli, &cfg, username),
        Command::Logout => {
            let store = open_store(&cli)?;
            store.clear_identity()?;
            config::forget_identity(cli.config.clone())?;
            println!("Signed out.");
            Ok(())
        }
        Command::Whoami => {
            let store = open_store(&cli)?;
            let viewer = resolve_viewer(&cli, &cfg, &store)?;
            match viewer.username() {
                Some(name) if viewer.is_admin => println!("{name} (admin)"),
                Some(name) => println!("{name}"),
                None => println!("not signed in"),
            }
            Ok(())
        }
        Command::Show {
            forum_id,
            offline,
            json,
        } => {
            let store = Arc::new(open_store(&cli)?);
            let viewer = resolve_viewer(&cli, &cfg, &store)?;
            if *offline {
                let Some(snapshot) = store.snapshot(forum_id)? else {
                    let saved: Vec<String> = store
                        .list_snapshots()?
                        .into_iter()
                        .map(|(id, _)| id)
                        .collect();
                    if saved.is_empty() {
                        bail!("no saved snapshot for forum {forum_id}");
                    }
                    bail!(
                        "no saved snapshot for forum {forum_id} (saved: {})",
                        saved.join(", ")
                    );
                };
                eprintln!(
                    "offline copy fetched {}",
                    snapshot.fetched_at.format("%Y-%m-%d %H:%M UTC")
                );
                return print_forum(&snapshot.forum, &viewer, &cfg, *json);
            }
            let session = build_session(&cfg, store)?;
            session.set_viewer(viewer);
            let forum = session.load(forum_id)?;
            print_forum(&forum, &session.viewer(), &cfg, *json)
        }
        command => mutate(&cli, &cfg, command),
    }
}

fn mutate(cli: &Cli, cfg: &Config, command: &Command) -> Result<()> {
    let store = Arc::new(open_store(cli)?);
    let viewer = resolve_viewer(cli, cfg, &store)?;
    let session = build_session(cfg, store)?;
    session.set_viewer(viewer);

    match command {
        Command::Post {
            forum_id,
            message,
            images,
            reply_to,
        } => {
            session.load(forum_id)?;
            let mut draft = match reply_to {
                Some(post_id) => session.reply_draft(post_id)?,
                None => session.new_post_draft(),
            };
            draft.set_message(message.clone());
            queue_images(&mut draft, images)?;
            session.submit(draft, report("post"))?;
            println!(
                "{}",
                if reply_to.is_some() {
                    "Reply posted."
                } else {
                    "Post added."
                }
            );
        }
        Command::Edit {
            forum_id,
            post_id,
            message,
            keep,
            images,
            replace_images,
        } => {
            session.load(forum_id)?;
            let mut draft = session.edit_draft(post_id)?;
            draft.set_message(message.clone());
            if *replace_images || !keep.is_empty() {
                for index in (0..draft.kept().len()).rev() {
                    if !keep.contains(&(index + 1)) {
                        draft.remove_kept(index);
                    }
                }
            }
            queue_images(&mut draft, images)?;
            session.submit(draft, report("edit"))?;
            println!("Post updated.");
        }
        Command::Delete { forum_id, post_id } => {
            session.load(forum_id)?;
            session.delete(post_id, report("delete"))?;
            println!("Post deleted.");
        }
        Command::Like { forum_id, post_id } => {
            session.load(forum_id)?;
            let forum = session.like(post_id, report("like"))?;
            let likes = forum
                .find_post(post_id)
                .map(|post| post.metadata.likes)
                .unwrap_or_default();
            println!("👍 {likes}");
        }
        Command::React {
            forum_id,
            post_id,
            emoji,
        } => {
            session.load(forum_id)?;
            let forum = session.react(post_id, emoji, report("react"))?;
            let state = forum.find_post(post_id).and_then(|post| {
                session
                    .viewer()
                    .reactions(post)
                    .into_iter()
                    .find(|state| state.emoji == emoji.as_str())
            });
            if let Some(state) = state {
                let mark = if state.reacted { " (yours)" } else { "" };
                println!("{} {}{mark}", state.emoji, state.count);
            }
        }
        Command::Archive { forum_id } | Command::Restore { forum_id } => {
            let action = if matches!(command, Command::Archive { .. }) {
                StatusAction::Archive
            } else {
                StatusAction::Restore
            };
            session.refresh_admin();
            session.load(forum_id)?;
            session.set_status(action, report("status change"))?;
            println!("{}", action.confirmation());
        }
        Command::Members {
            forum_id,
            add,
            remove,
        } => {
            let forum = session.load(forum_id)?;
            let members = if add.is_empty() && remove.is_empty() {
                if !forum.is_private {
                    println!("Forum is public.");
                    return Ok(());
                }
                forum.allowed_users
            } else {
                session.update_members(add, remove, report("member update"))?
            };
            for member in members {
                println!("{member}");
            }
        }
        other => bail!("unexpected command {other:?}"),
    }
    Ok(())
}

fn login(cli: &Cli, cfg: &Config, username: &str) -> Result<()> {
    let store = Arc::new(open_store(cli)?);
    let session = build_session(cfg, store.clone())?;
    session.set_viewer(Viewer::signed_in(username));
    let Some(name) = session.viewer().username().map(str::to_string) else {
        bail!("username required");
    };
    let is_admin = session.refresh_admin();
    store.set_identity(&name, is_admin)?;
    let path = config::save_identity(cli.config.clone(), &name)?;
    debug!(path = %path.display(), "saved username to config");
    if is_admin {
        println!("Signed in as {name} (admin).");
    } else {
        println!("Signed in as {name}.");
    }
    Ok(())
}

fn report<T>(action: &'static str) -> impl FnMut(MutationStatus<&T>) {
    move |status| match status {
        MutationStatus::Pending => debug!(action, "mutation pending"),
        MutationStatus::Success(_) => debug!(action, "mutation succeeded"),
        MutationStatus::Failure(message) => warn!(action, %message, "mutation failed"),
    }
}

fn queue_images(draft: &mut Draft, paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let files = paths
        .iter()
        .map(|path| ImageFile::inspect(path))
        .collect::<Result<Vec<_>>>()?;
    for skipped in draft.add_images(files)? {
        eprintln!("skipped: {skipped}");
    }
    Ok(())
}

fn open_store(cli: &Cli) -> Result<storage::Store> {
    storage::Store::open(storage::Options {
        path: cli.state.clone(),
    })
    .context("open state database")
}

fn build_session(cfg: &Config, store: Arc<storage::Store>) -> Result<ForumSession> {
    let client = Arc::new(client::Client::new(client::ClientConfig {
        base_url: cfg.forum.base_url.clone(),
        user_agent: cfg.forum.user_agent.clone(),
        timeout: Some(cfg.forum.timeout),
        http_client: None,
    })?);
    Ok(ForumSession::new(
        Arc::new(HttpForumService::new(client.clone())),
        Arc::new(HttpPostService::new(client.clone())),
        Arc::new(HttpModerationService::new(client)),
        (&cfg.attachments).into(),
    )
    .with_store(store))
}

fn viewer_without_store(cli: &Cli, cfg: &Config) -> Viewer {
    match cli.acting_user.as_deref() {
        Some(name) => Viewer::signed_in(name),
        None => Viewer::signed_in(cfg.forum.username.as_str()),
    }
}

/// `--as` first, then the remembered identity, then `forum.username` from config.
fn resolve_viewer(cli: &Cli, cfg: &Config, store: &storage::Store) -> Result<Viewer> {
    if let Some(name) = cli.acting_user.as_deref() {
        return Ok(Viewer::signed_in(name));
    }
    if let Some(identity) = store.identity()? {
        return Ok(Viewer::signed_in(identity.username).with_admin(identity.is_admin));
    }
    Ok(Viewer::signed_in(cfg.forum.username.as_str()))
}

/// Accepts a topic payload or a bare array of posts.
fn read_forum_file(path: &Path) -> Result<Forum> {
    let data =
        fs::read_to_string(path).with_context(|| format!("read forum file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&data)
        .with_context(|| format!("parse forum file {}", path.display()))?;
    if value.is_array() {
        let posts: Vec<Post> = serde_json::from_value(value)
            .with_context(|| format!("decode posts in {}", path.display()))?;
        return Ok(Forum {
            posts,
            ..Forum::default()
        });
    }
    serde_json::from_value(value).with_context(|| format!("decode forum in {}", path.display()))
}

fn print_forum(forum: &Forum, viewer: &Viewer, cfg: &Config, json: bool) -> Result<()> {
    let entries = linearize(&forum.posts);
    if json {
        let view = entries_json(&entries, &forum.posts);
        println!(
            "{}",
            serde_json::to_string_pretty(&view).context("encode thread")?
        );
        return Ok(());
    }
    let opts = RenderOptions::from_config(&cfg.display);
    print!("{}", render_forum(forum, &entries, viewer, &opts));
    Ok(())
}

fn print_headers(profile: &SecurityProfile, path: &str, origin: Option<&str>) {
    let mut headers = HeaderMap::new();
    apply_security_headers(profile, path, origin, &mut headers);
    let mut lines: Vec<String> = headers
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value.to_str().unwrap_or_default()))
        .collect();
    lines.sort();
    for line in lines {
        println!("{line}");
    }
}

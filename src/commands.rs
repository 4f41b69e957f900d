//! Command handlers for the `gator` CLI.
//!
//! Every handler writes its output to `out` so the binary can pass stdout
//! and the tests a buffer. Text that came from a feed is passed through
//! `strip_control_chars` before it is printed.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;

use gator::config::Config;
use gator::feed::validate_feed_url;
use gator::storage::{Database, DatabaseError, User};
use gator::util::{strip_control_chars, truncate_to_width};

/// Posts shown by `browse` when no limit is given
pub const DEFAULT_BROWSE_LIMIT: i64 = 2;

/// Display width of a description in `browse`
const DESCRIPTION_WIDTH: usize = 200;

// ============================================================================
// Users
// ============================================================================

/// Resolve the logged-in user from config.
pub async fn require_user(db: &Database, config: &Config) -> Result<User> {
    let Some(name) = config.current_user_name.as_deref() else {
        bail!("No user is logged in. Run `gator register <name>` or `gator login <name>` first");
    };

    db.get_user_by_name(name)
        .await?
        .with_context(|| format!("Logged-in user '{name}' no longer exists. Run `gator login <name>`"))
}

/// Create a user and log in as them.
pub async fn register(
    db: &Database,
    config: &mut Config,
    config_path: &Path,
    name: &str,
    out: &mut impl Write,
) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        bail!("User name must not be empty");
    }

    let user = match db.create_user(name).await {
        Ok(user) => user,
        Err(DatabaseError::AlreadyExists(_)) => bail!("User '{name}' already exists"),
        Err(e) => return Err(e).context("Failed to create user"),
    };

    config.current_user_name = Some(user.name.clone());
    config.save(config_path).context("Failed to save config")?;

    writeln!(out, "User created: {} (id {})", user.name, user.id)?;
    Ok(())
}

pub async fn login(
    db: &Database,
    config: &mut Config,
    config_path: &Path,
    name: &str,
    out: &mut impl Write,
) -> Result<()> {
    let user = db
        .get_user_by_name(name)
        .await?
        .with_context(|| format!("User '{name}' does not exist"))?;

    config.current_user_name = Some(user.name.clone());
    config.save(config_path).context("Failed to save config")?;

    writeln!(out, "Logged in as {}", user.name)?;
    Ok(())
}

pub async fn whoami(db: &Database, config: &Config, out: &mut impl Write) -> Result<()> {
    let user = require_user(db, config).await?;
    writeln!(out, "{}", user.name)?;
    Ok(())
}

/// List users, marking the logged-in one.
pub async fn users(db: &Database, config: &Config, out: &mut impl Write) -> Result<()> {
    let current = config.current_user_name.as_deref();
    for user in db.list_users().await? {
        if Some(user.name.as_str()) == current {
            writeln!(out, "* {} (current)", user.name)?;
        } else {
            writeln!(out, "* {}", user.name)?;
        }
    }
    Ok(())
}

/// Delete every user. Their follows go with them; their feeds stay, unowned.
pub async fn reset(db: &Database, out: &mut impl Write) -> Result<()> {
    let deleted = db.delete_all_users().await?;
    writeln!(out, "Deleted {deleted} user(s)")?;
    Ok(())
}

// ============================================================================
// Feeds and follows
// ============================================================================

/// Register a feed owned by `user`, who also starts following it.
pub async fn add_feed(
    db: &Database,
    user: &User,
    name: &str,
    url: &str,
    out: &mut impl Write,
) -> Result<()> {
    let url = validate_feed_url(url).context("Invalid feed URL")?;

    let feed = match db.register_feed(name.trim(), &url, user).await {
        Ok(feed) => feed,
        Err(DatabaseError::AlreadyExists(_)) => {
            bail!("A feed with URL {url} already exists. Use `gator follow {url}` instead")
        }
        Err(e) => return Err(e).context("Failed to add feed"),
    };

    writeln!(out, "Feed added:")?;
    writeln!(out, "  id:    {}", feed.id)?;
    writeln!(out, "  name:  {}", feed.name)?;
    writeln!(out, "  url:   {}", feed.url)?;
    writeln!(out, "  owner: {}", user.name)?;
    Ok(())
}

pub async fn feeds(db: &Database, out: &mut impl Write) -> Result<()> {
    let listings = db.list_feeds().await?;
    if listings.is_empty() {
        writeln!(out, "No feeds registered")?;
        return Ok(());
    }

    for feed in listings {
        let fetched = feed
            .last_fetched_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        writeln!(out, "* {}", feed.name)?;
        writeln!(out, "  url:     {}", feed.url)?;
        writeln!(out, "  owner:   {}", feed.owner.as_deref().unwrap_or("-"))?;
        writeln!(out, "  fetched: {fetched}")?;
    }
    Ok(())
}

pub async fn follow(db: &Database, user: &User, url: &str, out: &mut impl Write) -> Result<()> {
    let follow = match db.create_feed_follow(user.id, url.trim()).await {
        Ok(follow) => follow,
        Err(DatabaseError::NotFound(_)) => {
            bail!("No feed with URL {url}. Add it with `gator addfeed <name> <url>`")
        }
        Err(DatabaseError::AlreadyExists(_)) => bail!("{} already follows {url}", user.name),
        Err(e) => return Err(e).context("Failed to follow feed"),
    };

    writeln!(out, "{} now follows {}", follow.user_name, follow.feed_name)?;
    Ok(())
}

pub async fn following(db: &Database, user: &User, out: &mut impl Write) -> Result<()> {
    let follows = db.get_feed_follows_for_user(user.id).await?;
    if follows.is_empty() {
        writeln!(out, "{} is not following any feeds", user.name)?;
        return Ok(());
    }

    for follow in follows {
        writeln!(out, "* {} ({})", follow.feed_name, follow.feed_url)?;
    }
    Ok(())
}

pub async fn unfollow(db: &Database, user: &User, url: &str, out: &mut impl Write) -> Result<()> {
    let url = url.trim();
    let feed = db
        .get_feed_by_url(url)
        .await?
        .with_context(|| format!("No feed with URL {url}"))?;

    if !db.delete_feed_follow(user.id, feed.id).await? {
        bail!("{} is not following {url}", user.name);
    }

    writeln!(out, "{} unfollowed {}", user.name, feed.name)?;
    Ok(())
}

// ============================================================================
// Browsing
// ============================================================================

/// Print the most recent posts from feeds `user` follows.
pub async fn browse(db: &Database, user: &User, limit: i64, out: &mut impl Write) -> Result<()> {
    if limit < 1 {
        bail!("Limit must be at least 1");
    }

    let posts = db.get_posts_for_user(user.id, limit).await?;
    if posts.is_empty() {
        writeln!(out, "No posts yet. Run `gator agg` to fetch followed feeds")?;
        return Ok(());
    }

    for post in posts {
        let published = post
            .published_at
            .map(|at| at.format("%a %b %d %Y").to_string())
            .unwrap_or_else(|| "undated".to_string());

        writeln!(out, "{} from {}", published, strip_control_chars(&post.feed_name))?;
        writeln!(out, "--- {} ---", strip_control_chars(&post.title))?;
        if let Some(description) = &post.description {
            let clean = strip_control_chars(description);
            writeln!(out, "    {}", truncate_to_width(&clean, DESCRIPTION_WIDTH))?;
        }
        writeln!(out, "Link: {}", strip_control_chars(&post.url))?;
        writeln!(out, "=====================================")?;
    }
    Ok(())
}

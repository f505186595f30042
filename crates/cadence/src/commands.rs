//! One-shot commands: listings, status and edits.

use std::fmt::Write as _;
use std::sync::Arc;

use miette::Result;
use tracing::warn;

use cadence_content::{Agent, ContentStore, PostQueue};
use cadence_publisher::DryRunPublisher;
use cadence_scheduler::{SchedulerConfig, SchedulerState, format_countdown};

use crate::workspace::Workspace;

pub async fn list_agents(workspace: &Workspace) -> Result<()> {
    let store = workspace.content_store();
    let ids = store
        .list_agents()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    if ids.is_empty() {
        println!(
            "No agents found in {}",
            workspace.content_dir().display()
        );
        return Ok(());
    }

    for id in ids {
        match store.load(&id).await {
            Ok(agent) => {
                let queue = PostQueue::build(&agent);
                println!(
                    "{} ({}): {} posted, {} Posts Remaining",
                    agent.name(),
                    id,
                    queue.len() - queue.unposted_count(),
                    queue.unposted_count()
                );
            }
            Err(e) => {
                warn!(agent = %id, error = %e, "skipping unreadable agent");
                println!("{}: unreadable ({})", id, e);
            }
        }
    }
    Ok(())
}

pub async fn show_feed(workspace: &Workspace, agent_id: &str, unposted_only: bool) -> Result<()> {
    let agent = workspace
        .content_store()
        .load(agent_id)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    print!("{}", render_feed(&agent, unposted_only));
    Ok(())
}

pub async fn show_status(workspace: &Workspace) -> Result<()> {
    let scheduler = workspace
        .open_scheduler(Arc::new(DryRunPublisher::default()), SchedulerConfig::default())
        .await;
    print!("{}", render_state(&scheduler.status().await.state));
    Ok(())
}

pub async fn set_delay(workspace: &Workspace, minutes: u32) -> Result<()> {
    let scheduler = workspace
        .open_scheduler(Arc::new(DryRunPublisher::default()), SchedulerConfig::default())
        .await;
    scheduler
        .set_delay(minutes)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    print!("{}", render_state(&scheduler.status().await.state));
    Ok(())
}

pub async fn edit_post(
    workspace: &Workspace,
    agent_id: &str,
    post_id: &str,
    content: &str,
) -> Result<()> {
    let scheduler = workspace
        .open_scheduler(Arc::new(DryRunPublisher::default()), SchedulerConfig::default())
        .await;
    scheduler
        .select_agent(agent_id)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    scheduler
        .edit_post(post_id, content)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("Updated {}", post_id);
    Ok(())
}

/// Text listing of an agent's posts in publishing order.
pub fn render_feed(agent: &Agent, unposted_only: bool) -> String {
    let queue = PostQueue::build(agent);
    let mut out = String::new();

    let _ = writeln!(out, "{}", agent.name());
    let _ = writeln!(out, "{} Posts Remaining", queue.unposted_count());

    for entry in queue.entries() {
        if unposted_only && entry.post.post_posted {
            continue;
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{}  [{}]", entry, entry.post.status_label());
        if !entry.episode_name.is_empty() {
            let _ = writeln!(out, "{}", entry.episode_name);
        }
        let _ = writeln!(out, "{}", entry.post.post_content);
        if let Some(highlights) = entry.post.post_highlights.as_deref() {
            let _ = writeln!(out, "Highlights: {}", highlights);
        }
    }
    out
}

/// Text summary of the countdown.
pub fn render_state(state: &SchedulerState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Delay between posts: {} minutes", state.delay_between_posts);
    if state.has_posted {
        let _ = writeln!(out, "Next post in: {}", format_countdown(state.time_left));
    } else {
        let _ = writeln!(
            out,
            "Countdown starts after the first post ({})",
            format_countdown(state.time_left)
        );
    }
    out
}

//! Run command: publish an agent's content until done or interrupted.

use std::sync::Arc;
use std::time::Duration;

use miette::Result;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use cadence_publisher::{BlueskyPublisher, Credentials, DryRunPublisher, Publisher};
use cadence_scheduler::{
    LoopStart, PostingEvent, SchedulerConfig, SchedulerError, format_countdown,
};

use crate::workspace::Workspace;

/// Configuration for the run command.
pub struct RunConfig {
    pub agent: String,
    pub delay: Option<u32>,
    pub pds_url: String,
    pub handle: Option<String>,
    pub app_password: Option<String>,
    pub dry_run: bool,
    pub publish_timeout_secs: u64,
    pub max_chars: usize,
}

pub async fn run(workspace: &Workspace, config: RunConfig) -> Result<()> {
    let publisher: Arc<dyn Publisher> = if config.dry_run {
        info!("dry run: posts will be logged, not published");
        Arc::new(DryRunPublisher::new(config.max_chars))
    } else {
        let bluesky = BlueskyPublisher::new(
            config.pds_url,
            Credentials::from_parts(config.handle, config.app_password),
        )
        .with_max_chars(config.max_chars);
        info!(pds = %bluesky.pds_url(), "publishing to bluesky");
        Arc::new(bluesky)
    };

    let scheduler = workspace
        .open_scheduler(
            publisher,
            SchedulerConfig {
                publish_timeout: Duration::from_secs(config.publish_timeout_secs),
                ..SchedulerConfig::default()
            },
        )
        .await;

    if let Some(minutes) = config.delay {
        if let Err(e) = scheduler.set_delay(minutes).await {
            // The delay still applies to this run
            warn!(error = %e, "failed to persist delay");
        }
    }

    let unposted = scheduler
        .select_agent(&config.agent)
        .await
        .map_err(command_error)?;
    println!("{} Posts Remaining", unposted);

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Handle shutdown signals
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_clone.send(true);
    });

    let mut events = scheduler.subscribe();
    match scheduler.start_loop().await.map_err(command_error)? {
        LoopStart::NothingToPost => {
            println!("All posts have been published.");
            return Ok(());
        }
        LoopStart::Started { queued } => {
            info!(agent = %config.agent, queued, "posting started");
        }
    }

    let ticker = scheduler.spawn_ticker(shutdown_rx.clone());

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PostingEvent::RunFinished(summary)) => {
                    println!(
                        "Run finished: {} published, {} failed{}",
                        summary.published,
                        summary.failed,
                        if summary.stopped { " (stopped)" } else { "" }
                    );
                    break;
                }
                Ok(event) => report_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event listener fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = shutdown_rx.changed(), if !*shutdown_rx.borrow() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    println!("Stopping after the current post...");
                    scheduler.stop_loop().await;
                }
            }
        }
    }

    scheduler.wait_for_run().await;

    let status = scheduler.status().await;
    if status.content_unsynced {
        warn!(agent = %config.agent, "published posts are not saved to disk yet");
    }
    println!("{} Posts Remaining", status.unposted_count);

    let _ = shutdown_tx.send(true);
    if let Err(e) = ticker.await {
        warn!(error = %e, "countdown ticker failed");
    }

    info!("run complete");
    Ok(())
}

fn report_event(event: &PostingEvent) {
    match event {
        PostingEvent::Published { label, uri, .. } => match uri {
            Some(uri) => println!("Posted {} ({})", label, uri),
            None => println!("Posted {}", label),
        },
        PostingEvent::PublishFailed {
            label,
            error,
            needs_credentials,
            ..
        } => {
            println!("Failed to post {}: {}", label, error);
            if *needs_credentials {
                println!("Check CADENCE_HANDLE and CADENCE_APP_PASSWORD.");
            }
        }
        PostingEvent::PersistenceFailed { post_id, error } => {
            println!("Posted {} but could not save progress: {}", post_id, error);
        }
        PostingEvent::Skipped { post_id } => {
            info!(post_id = %post_id, "already posted, skipping");
        }
        PostingEvent::Waiting { seconds } => {
            let secs = u32::try_from(*seconds).unwrap_or(u32::MAX);
            println!("Next post in: {}", format_countdown(secs));
        }
        PostingEvent::RunFinished(_) => {}
    }
}

/// Turn a scheduler error into a report, with remediation for login failures.
fn command_error(e: SchedulerError) -> miette::Report {
    match e {
        SchedulerError::Auth(auth) => miette::miette!("{}\n{}", auth, auth.remediation()),
        other => miette::miette!("{}", other),
    }
}

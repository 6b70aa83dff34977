use anyhow::{Context, Result};
use chromiumoxide::Page;
use std::time::Duration;
use tracing::{debug, info};

use crate::browser::find_element;
use crate::config::Config;

/// Start playback with the keyboard: focus the page, Tab to the player
/// controls, then Space.
///
/// The player never exposes its state, so success is only observable through
/// the network traffic that follows; any input failure propagates to the
/// caller as a task failure.
pub async fn start_playback(page: &Page, config: &Config) -> Result<()> {
    info!("⌨️  Triggering playback via keyboard");

    // Give the player scripts a moment to settle before grabbing focus.
    tokio::time::sleep(Duration::from_secs(2)).await;

    let body = find_element(page, "body", config.element_timeout()).await?;
    body.click().await.context("failed to focus page body")?;
    debug!("Page focused");

    for i in 0..4 {
        body.press_key("Tab")
            .await
            .context("failed to send Tab key")?;
        debug!("Pressed Tab ({}/4)", i + 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    body.press_key(" ")
        .await
        .context("failed to send Space key")?;
    info!("Space pressed; playback should start");

    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}

/// Keep the video playing long enough for the player to request its manifest
/// and the first segments.
pub async fn playback_wait(config: &Config) {
    let wait = config.playback_wait();
    if wait.is_zero() {
        return;
    }
    info!("⏳ Letting playback run for {}s", wait.as_secs());
    tokio::time::sleep(wait).await;
}

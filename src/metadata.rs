use anyhow::{anyhow, Result};
use chromiumoxide::Page;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::browser::find_element;

const LESSON_SELECTOR: &str = "p.pageHeader02_lesson";
const SONG_NUMBER_SELECTOR: &str = "p.pageHeader02_songNumber";
const TITLE_SELECTOR: &str = "h1.pageHeader02_title";

/// Human-readable fields shown in the video page header, used later to build
/// download paths. Extracted once per video id and shared across versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub lesson: String,
    pub song_number: String,
    pub title: String,
}

/// Pull the three header fields from a loaded video page.
///
/// A missing or empty field fails the whole extraction; the caller treats
/// that as a recoverable task failure, not a fatal error.
pub async fn extract_metadata(page: &Page, timeout: Duration) -> Result<VideoMetadata> {
    debug!("Extracting video metadata");

    let lesson = inner_text(page, LESSON_SELECTOR, timeout).await?;
    let song_number = inner_text(page, SONG_NUMBER_SELECTOR, timeout).await?;
    let title = inner_text(page, TITLE_SELECTOR, timeout).await?;

    let metadata = VideoMetadata {
        lesson,
        song_number,
        title,
    };
    debug!("Extracted metadata: {:?}", metadata);
    Ok(metadata)
}

async fn inner_text(page: &Page, selector: &str, timeout: Duration) -> Result<String> {
    let element = find_element(page, selector, timeout).await?;
    let text = element
        .inner_text()
        .await?
        .map(|t| t.trim().to_string())
        .unwrap_or_default();

    if text.is_empty() {
        return Err(anyhow!("metadata element {} is empty", selector));
    }
    Ok(text)
}

use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::browser::{navigate, BrowserSession};
use crate::config::{Config, ProcessingRule};
use crate::metadata::{extract_metadata, VideoMetadata};
use crate::observer::UrlObserver;
use crate::playback;

/// One (video id, version) unit drawn from the declarative rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub video_id: u32,
    pub version: Option<u32>,
}

impl fmt::Display for TaskDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(version) => write!(f, "Video ID {} (Ver {})", self.video_id, version),
            None => write!(f, "Video ID {} (Ver N/A)", self.video_id),
        }
    }
}

/// Expand the ordered rules into the explicit task sequence, once, up front.
///
/// Ids repeated across rules stay in the sequence; the report sink is the
/// place that deduplicates (first rule wins there).
pub fn flatten_rules(rules: &[ProcessingRule]) -> Vec<TaskDescriptor> {
    let mut tasks = Vec::new();
    for rule in rules {
        for video_id in rule.id_range.ids() {
            for version in rule.version_keys() {
                tasks.push(TaskDescriptor { video_id, version });
            }
        }
    }
    tasks
}

/// Aggregate state for one video id. Grows monotonically during a run:
/// metadata is written at most once, version URLs are only ever added.
#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    pub metadata: Option<VideoMetadata>,
    pub versions: BTreeMap<Option<u32>, String>,
}

/// In-memory result table keyed by video id, ordered for stable reporting.
pub type ResultTable = BTreeMap<u32, TaskResult>;

/// Everything that can fail one attempt of one task unit. All of these are
/// recoverable through the retry loop; none abort the run.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("failed to open execution context: {0}")]
    Context(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("metadata extraction failed: {0}")]
    Metadata(String),

    #[error("playback trigger failed: {0}")]
    Playback(String),

    #[error("no manifest URL observed within {0:?}")]
    ManifestTimeout(Duration),
}

/// Result of a single attempt. Metadata captured before a later step failed
/// is still returned so the runner can commit it.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub metadata: Option<VideoMetadata>,
    pub url: Result<String, TaskError>,
}

impl AttemptOutcome {
    pub fn failure(error: TaskError) -> Self {
        Self {
            metadata: None,
            url: Err(error),
        }
    }
}

/// One attempt of one task unit inside a fresh execution context.
///
/// Implementations must create and tear down their context within the call;
/// the retry loop never reuses a context across attempts.
#[async_trait]
pub trait UnitExecutor {
    async fn run_attempt(&self, task: &TaskDescriptor, metadata_needed: bool) -> AttemptOutcome;
}

/// Sequential task runner: drives every flattened task unit through the
/// bounded retry loop and aggregates results per video id.
pub struct BatchExtractor {
    config: Config,
    manifest_pattern: Regex,
}

impl BatchExtractor {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let manifest_pattern = config.manifest_pattern()?;
        Ok(Self {
            config,
            manifest_pattern,
        })
    }

    /// Run the whole rule set against a live browser session.
    ///
    /// Per-unit failures are absorbed here; the returned table is whatever
    /// could be resolved.
    pub async fn run(&self, session: &BrowserSession) -> ResultTable {
        let executor = BrowserUnitExecutor {
            session,
            config: &self.config,
            manifest_pattern: self.manifest_pattern.clone(),
        };
        self.run_with(&executor).await
    }

    /// Run the rule set against any executor. Seam for tests.
    pub async fn run_with<E: UnitExecutor>(&self, executor: &E) -> ResultTable {
        let tasks = flatten_rules(&self.config.rules);
        info!("📋 {} task units to process", tasks.len());

        let mut table = ResultTable::new();
        for task in &tasks {
            self.process_unit(executor, &mut table, task).await;
        }
        table
    }

    /// Bounded-retry state machine for one unit: retry_count + 1 attempts,
    /// a fresh context per attempt, fixed backoff between attempts.
    async fn process_unit<E: UnitExecutor>(
        &self,
        executor: &E,
        table: &mut ResultTable,
        task: &TaskDescriptor,
    ) {
        // Every declared id gets an entry, even if all attempts fail.
        table.entry(task.video_id).or_default();

        let total_attempts = self.config.retry_count + 1;
        for attempt in 1..=total_attempts {
            info!("--- {} attempt {}/{} ---", task, attempt, total_attempts);

            let metadata_needed = table
                .get(&task.video_id)
                .map_or(true, |r| r.metadata.is_none());

            let outcome = executor.run_attempt(task, metadata_needed).await;

            let entry = table.entry(task.video_id).or_default();
            if let Some(metadata) = outcome.metadata {
                // Once captured, metadata is never re-fetched or replaced.
                entry.metadata.get_or_insert(metadata);
            }

            match outcome.url {
                Ok(url) => {
                    entry.versions.insert(task.version, url);
                    info!("✅ {} resolved", task);
                    return;
                }
                Err(e) => {
                    error!("{} attempt {} failed: {}", task, attempt, e);
                    if attempt < total_attempts {
                        info!("Retrying after {:?}...", self.config.retry_backoff());
                        tokio::time::sleep(self.config.retry_backoff()).await;
                    } else {
                        error!("❌ {} exhausted all {} attempts", task, total_attempts);
                    }
                }
            }
        }
    }
}

/// Live executor: one fresh page per attempt, seeded with the session
/// snapshot, closed exactly once on every exit path.
struct BrowserUnitExecutor<'a> {
    session: &'a BrowserSession,
    config: &'a Config,
    manifest_pattern: Regex,
}

#[async_trait]
impl UnitExecutor for BrowserUnitExecutor<'_> {
    async fn run_attempt(&self, task: &TaskDescriptor, metadata_needed: bool) -> AttemptOutcome {
        let page = match self.session.new_page().await {
            Ok(page) => page,
            Err(e) => return AttemptOutcome::failure(TaskError::Context(e.to_string())),
        };

        let outcome = self.drive_page(&page, task, metadata_needed).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close page for {}: {}", task, e);
        }
        outcome
    }
}

impl BrowserUnitExecutor<'_> {
    async fn drive_page(
        &self,
        page: &chromiumoxide::Page,
        task: &TaskDescriptor,
        metadata_needed: bool,
    ) -> AttemptOutcome {
        let mut captured = None;
        let url = self.resolve_manifest(page, task, metadata_needed, &mut captured).await;
        AttemptOutcome {
            metadata: captured,
            url,
        }
    }

    async fn resolve_manifest(
        &self,
        page: &chromiumoxide::Page,
        task: &TaskDescriptor,
        metadata_needed: bool,
        captured: &mut Option<VideoMetadata>,
    ) -> Result<String, TaskError> {
        // Attach before navigating so the earliest requests are observed.
        let observer = UrlObserver::attach(page, &self.manifest_pattern)
            .await
            .map_err(|e| TaskError::Context(e.to_string()))?;

        let url = self.config.video_url(task.video_id, task.version);
        navigate(page, &url, self.config.navigation_timeout())
            .await
            .map_err(|e| TaskError::Navigation(e.to_string()))?;

        if metadata_needed {
            let metadata = extract_metadata(page, self.config.element_timeout())
                .await
                .map_err(|e| TaskError::Metadata(e.to_string()))?;
            *captured = Some(metadata);
        }

        playback::start_playback(page, self.config)
            .await
            .map_err(|e| TaskError::Playback(e.to_string()))?;
        playback::playback_wait(self.config).await;

        observer
            .wait_for_url(self.config.manifest_wait())
            .await
            .ok_or(TaskError::ManifestTimeout(self.config.manifest_wait()))
    }
}

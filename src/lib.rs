/// Lesson Grabber
///
/// Automates logging into a video-lesson portal, captures each video's
/// streaming manifest URL from the browser's network traffic, and writes a
/// YAML report the companion downloader consumes.

pub mod browser;
pub mod config;
pub mod download;
pub mod metadata;
pub mod observer;
pub mod pipeline;
pub mod playback;
pub mod report;

// Re-export main types for easy access
pub use crate::browser::BrowserSession;
pub use crate::config::{Config, Credentials, ProcessingRule};
pub use crate::download::{DownloadSummary, DownloadTask};
pub use crate::metadata::VideoMetadata;
pub use crate::observer::{UrlMatcher, UrlObserver};
pub use crate::pipeline::{BatchExtractor, ResultTable, TaskDescriptor, TaskError};
pub use crate::report::{ReportEntry, ReportStatus};

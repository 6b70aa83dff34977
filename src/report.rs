use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::ProcessingRule;
use crate::pipeline::ResultTable;

/// Marker for units that could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportStatus {
    #[serde(rename = "ERROR")]
    Error,
}

/// Resolved URL (or error marker) for one declared version of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub ver: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,
}

/// One report record per video id. Field declaration order is the
/// serialization order the downloader depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub id: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub song_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReportStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<VersionEntry>>,
}

impl ReportEntry {
    fn error(id: u32) -> Self {
        Self {
            id,
            lesson: None,
            song_number: None,
            title: None,
            url: None,
            status: Some(ReportStatus::Error),
            versions: None,
        }
    }

    /// An entry that carries neither a URL nor per-version records.
    pub fn is_global_error(&self) -> bool {
        self.status == Some(ReportStatus::Error) && self.versions.is_none()
    }
}

/// Render the result table into report records, walking the rules in
/// declaration order. Ids covered by more than one rule take their shape from
/// the first rule that declares them.
pub fn build_report(rules: &[ProcessingRule], table: &ResultTable) -> Vec<ReportEntry> {
    let mut entries = Vec::new();
    let mut emitted: HashSet<u32> = HashSet::new();

    for rule in rules {
        for video_id in rule.id_range.ids() {
            if !emitted.insert(video_id) {
                continue;
            }

            let result = table.get(&video_id);
            let metadata = result.and_then(|r| r.metadata.as_ref());

            let Some(metadata) = metadata else {
                entries.push(ReportEntry::error(video_id));
                continue;
            };

            let mut entry = ReportEntry {
                id: video_id,
                lesson: Some(metadata.lesson.clone()),
                song_number: Some(metadata.song_number.clone()),
                title: Some(metadata.title.clone()),
                url: None,
                status: None,
                versions: None,
            };

            if rule.has_versions() {
                let versions = rule
                    .version_keys()
                    .into_iter()
                    .flatten()
                    .map(|ver| {
                        let url = result.and_then(|r| r.versions.get(&Some(ver)).cloned());
                        VersionEntry {
                            ver,
                            status: url.is_none().then_some(ReportStatus::Error),
                            url,
                        }
                    })
                    .collect();
                entry.versions = Some(versions);
            } else {
                match result.and_then(|r| r.versions.get(&None).cloned()) {
                    Some(url) => entry.url = Some(url),
                    None => entry.status = Some(ReportStatus::Error),
                }
            }

            entries.push(entry);
        }
    }

    entries
}

/// Number of manifest URLs actually resolved across all entries.
pub fn resolved_count(entries: &[ReportEntry]) -> usize {
    entries
        .iter()
        .map(|entry| {
            entry.url.iter().count()
                + entry
                    .versions
                    .iter()
                    .flatten()
                    .filter(|v| v.url.is_some())
                    .count()
        })
        .sum()
}

/// Write the report to a timestamped YAML file under `report_dir`.
pub fn save_report(entries: &[ReportEntry], report_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(report_dir)
        .with_context(|| format!("failed to create report directory {}", report_dir.display()))?;

    let timestamp = chrono::Local::now().format("%Y-%m-%d-%H%M%S");
    let output_path = report_dir.join(format!("urls_{}.yaml", timestamp));

    let yaml = serde_yaml::to_string(entries).context("failed to serialize report")?;
    std::fs::write(&output_path, yaml)
        .with_context(|| format!("failed to write report to {}", output_path.display()))?;

    info!("💾 Report saved to: {}", output_path.display());
    Ok(output_path)
}

/// Read a report back, as consumed by the downloader.
pub fn load_report(path: &Path) -> Result<Vec<ReportEntry>> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read report file {}", path.display()))?;
    serde_yaml::from_str(&yaml)
        .with_context(|| format!("failed to parse report file {}", path.display()))
}

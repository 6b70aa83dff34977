use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::report::{self, ReportEntry};

/// Root directory of the download tree, relative to the working directory.
const VIDEO_ROOT: &str = "VIDEO";

/// Directory suffix per version; unmapped versions get no suffix.
fn version_suffix(version: u32) -> &'static str {
    match version {
        1 => "_Lyrics",
        2 => "_Vocabulary",
        3 => "_Karaoke",
        _ => "",
    }
}

/// Strip characters that are not legal in file or directory names.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect()
}

/// One file to fetch: where it goes and where it comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub dir_path: PathBuf,
    pub file_name: String,
    pub url: String,
}

impl DownloadTask {
    pub fn full_path(&self) -> PathBuf {
        self.dir_path.join(&self.file_name)
    }
}

/// Split a song number like "1-02" into its category prefix and the numeric
/// sequence within the category.
fn song_number_parts(song_number: &str) -> Option<(&str, u32)> {
    let (prefix, rest) = song_number.split_once('-')?;
    let digits: String = rest.chars().filter(char::is_ascii_digit).collect();
    let sequence = digits.parse().ok()?;
    Some((prefix, sequence))
}

/// Zero-pad the category code for its directory name; non-numeric codes are
/// used verbatim.
fn category_dir(prefix: &str) -> String {
    match prefix.parse::<u32>() {
        Ok(code) => format!("{:02}", code),
        Err(_) => prefix.to_string(),
    }
}

fn build_task(
    lesson: &str,
    song_number: &str,
    title: &str,
    version: Option<u32>,
    url: &str,
) -> Option<DownloadTask> {
    let (prefix, sequence) = song_number_parts(song_number)?;

    let suffix = version.map(version_suffix).unwrap_or("");
    let lesson_dir = format!("{}{}", sanitize_filename(lesson), suffix);
    let dir_path = Path::new(VIDEO_ROOT)
        .join(lesson_dir)
        .join(category_dir(prefix));

    let file_name = format!(
        "{}-{:02}_{}.mp4",
        prefix,
        sequence,
        sanitize_filename(title)
    );

    Some(DownloadTask {
        dir_path,
        file_name,
        url: url.to_string(),
    })
}

/// Expand one report entry into its download tasks: one per resolved version,
/// or a single task when the entry has no version dimension.
pub fn format_download_tasks(entry: &ReportEntry) -> Vec<DownloadTask> {
    let (Some(lesson), Some(song_number), Some(title)) =
        (&entry.lesson, &entry.song_number, &entry.title)
    else {
        warn!("Entry {} is missing metadata fields; skipping", entry.id);
        return Vec::new();
    };

    if let Some(versions) = &entry.versions {
        versions
            .iter()
            .filter_map(|version| {
                let url = version.url.as_deref()?;
                build_task(lesson, song_number, title, Some(version.ver), url)
            })
            .collect()
    } else if let Some(url) = entry.url.as_deref() {
        build_task(lesson, song_number, title, None, url)
            .into_iter()
            .collect()
    } else {
        Vec::new()
    }
}

/// End-of-run tally printed by the downloader binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Fetches one URL to one destination file. Seam for tests; the production
/// implementation shells out to yt-dlp.
#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// yt-dlp backed fetcher.
pub struct YtDlpFetcher;

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        if which::which("yt-dlp").is_err() {
            bail!("yt-dlp not found; install it and make sure it is on PATH");
        }

        let output = tokio::process::Command::new("yt-dlp")
            .args(["--quiet", "--no-warnings", "--allow-unplayable-formats", "-o"])
            .arg(dest)
            .arg(url)
            .output()
            .await
            .context("failed to spawn yt-dlp")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("yt-dlp failed ({}): {}", output.status, stderr.trim());
        }
        Ok(())
    }
}

/// Download everything a report resolves, skipping existing files and
/// removing partial files after failed downloads.
pub async fn run(report_path: &Path) -> Result<DownloadSummary> {
    info!("Reading report: {}", report_path.display());
    let entries = report::load_report(report_path)?;
    run_with(&entries, Path::new("."), &YtDlpFetcher).await
}

/// Core downloader loop against any fetcher. Failures are counted per file,
/// never fatal to the batch.
pub async fn run_with<F: Fetcher>(
    entries: &[ReportEntry],
    root: &Path,
    fetcher: &F,
) -> Result<DownloadSummary> {
    let mut summary = DownloadSummary::default();

    let mut queue = Vec::new();
    for entry in entries {
        if entry.is_global_error() {
            warn!("Entry {} is marked ERROR; skipping", entry.id);
            summary.skipped += 1;
            continue;
        }
        queue.extend(format_download_tasks(entry));
    }

    info!("📦 {} videos to download", queue.len());

    for (index, task) in queue.iter().enumerate() {
        let full_path = root.join(task.full_path());

        info!("--- Downloading ({}/{}) ---", index + 1, queue.len());
        info!("URL: {}", task.url);
        info!("Destination: {}", full_path.display());

        if full_path.exists() {
            warn!("File already exists; skipping");
            summary.skipped += 1;
            continue;
        }

        let dir = root.join(&task.dir_path);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;

        match fetcher.fetch(&task.url, &full_path).await {
            Ok(()) => {
                info!("✅ Downloaded: {}", full_path.display());
                summary.success += 1;
            }
            Err(e) => {
                warn!("❌ Download failed: {}", e);
                summary.failed += 1;
                if full_path.exists() {
                    if let Err(e) = std::fs::remove_file(&full_path) {
                        warn!("Failed to remove partial file: {}", e);
                    }
                }
            }
        }
    }

    info!("--- All downloads finished ---");
    info!("Success: {}", summary.success);
    info!("Failed: {}", summary.failed);
    info!("Skipped (error/existing): {}", summary.skipped);

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ReportStatus, VersionEntry};
    use anyhow::anyhow;
    use std::sync::Mutex;

    fn plain_entry() -> ReportEntry {
        ReportEntry {
            id: 1,
            lesson: Some("Song".to_string()),
            song_number: Some("1-02".to_string()),
            title: Some("Hello".to_string()),
            url: Some("https://x/y.m3u8".to_string()),
            status: None,
            versions: None,
        }
    }

    #[test]
    fn test_plain_entry_path() {
        let tasks = format_download_tasks(&plain_entry());

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].full_path(), Path::new("VIDEO/Song/01/1-02_Hello.mp4"));
        assert_eq!(tasks[0].url, "https://x/y.m3u8");
    }

    #[test]
    fn test_versioned_entry_paths() {
        let entry = ReportEntry {
            url: None,
            versions: Some(vec![
                VersionEntry {
                    ver: 1,
                    url: Some("https://x/v1.m3u8".to_string()),
                    status: None,
                },
                VersionEntry {
                    ver: 2,
                    url: None,
                    status: Some(ReportStatus::Error),
                },
                VersionEntry {
                    ver: 9,
                    url: Some("https://x/v9.m3u8".to_string()),
                    status: None,
                },
            ]),
            ..plain_entry()
        };

        let tasks = format_download_tasks(&entry);

        // The errored version produces no task; unmapped versions get no suffix.
        assert_eq!(tasks.len(), 2);
        assert_eq!(
            tasks[0].full_path(),
            Path::new("VIDEO/Song_Lyrics/01/1-02_Hello.mp4")
        );
        assert_eq!(tasks[1].full_path(), Path::new("VIDEO/Song/01/1-02_Hello.mp4"));
    }

    #[test]
    fn test_sanitization() {
        let entry = ReportEntry {
            lesson: Some("Les/son: A".to_string()),
            title: Some("He*llo?".to_string()),
            ..plain_entry()
        };

        let tasks = format_download_tasks(&entry);
        assert_eq!(
            tasks[0].full_path(),
            Path::new("VIDEO/Lesson A/01/1-02_Hello.mp4")
        );
    }

    #[test]
    fn test_malformed_song_number_skipped() {
        let entry = ReportEntry {
            song_number: Some("nodash".to_string()),
            ..plain_entry()
        };
        assert!(format_download_tasks(&entry).is_empty());
    }

    #[test]
    fn test_missing_metadata_skipped() {
        let entry = ReportEntry {
            lesson: None,
            ..plain_entry()
        };
        assert!(format_download_tasks(&entry).is_empty());
    }

    /// Records fetch calls; optionally fails after leaving a partial file.
    struct MockFetcher {
        calls: Mutex<Vec<(String, PathBuf)>>,
        fail: bool,
        leave_partial: bool,
    }

    impl MockFetcher {
        fn new(fail: bool, leave_partial: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
                leave_partial,
            }
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), dest.to_path_buf()));

            if self.fail {
                if self.leave_partial {
                    std::fs::write(dest, b"partial")?;
                }
                return Err(anyhow!("simulated failure"));
            }
            std::fs::write(dest, b"video")?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_run_downloads_to_expected_path() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new(false, false);

        let summary = run_with(&[plain_entry()], dir.path(), &fetcher).await.unwrap();

        assert_eq!(
            summary,
            DownloadSummary {
                success: 1,
                failed: 0,
                skipped: 0
            }
        );
        let calls = fetcher.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://x/y.m3u8");
        assert_eq!(calls[0].1, dir.path().join("VIDEO/Song/01/1-02_Hello.mp4"));
        assert!(calls[0].1.exists());
    }

    #[tokio::test]
    async fn test_existing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("VIDEO/Song/01/1-02_Hello.mp4");
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, b"already here").unwrap();

        let fetcher = MockFetcher::new(false, false);
        let summary = run_with(&[plain_entry()], dir.path(), &fetcher).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.success, 0);
        assert!(fetcher.calls.lock().unwrap().is_empty());
        assert_eq!(std::fs::read(&dest).unwrap(), b"already here");
    }

    #[tokio::test]
    async fn test_failed_download_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new(true, true);

        let summary = run_with(&[plain_entry()], dir.path(), &fetcher).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert!(!dir.path().join("VIDEO/Song/01/1-02_Hello.mp4").exists());
    }

    #[tokio::test]
    async fn test_global_error_entry_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let error_entry = ReportEntry {
            lesson: None,
            song_number: None,
            title: None,
            url: None,
            status: Some(ReportStatus::Error),
            versions: None,
            ..plain_entry()
        };

        let fetcher = MockFetcher::new(false, false);
        let summary = run_with(&[error_entry], dir.path(), &fetcher).await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }
}

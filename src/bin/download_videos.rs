use anyhow::Result;
use clap::{Arg, Command};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

use lesson_grabber::download;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter("lesson_grabber=info,warn,download_videos=info")
        .init();

    let matches = Command::new("Download Videos")
        .version("0.1.0")
        .about("Downloads every video resolved in a lesson-grabber report")
        .arg(
            Arg::new("report")
                .value_name("REPORT")
                .help("Path to the urls_*.yaml report file")
                .required(true),
        )
        .get_matches();

    let report_path = PathBuf::from(
        matches
            .get_one::<String>("report")
            .expect("required argument"),
    );

    let summary = match download::run(&report_path).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Downloader aborted: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    // The batch always runs to completion; a nonzero exit flags that at
    // least one file could not be fetched.
    if summary.failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

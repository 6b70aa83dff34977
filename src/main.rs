use anyhow::Result;
use clap::{Arg, Command};
use std::path::PathBuf;
use tracing::{error, info};

mod browser;
mod config;
mod metadata;
mod observer;
mod pipeline;
mod playback;
mod report;

use crate::browser::BrowserSession;
use crate::config::{Config, Credentials};
use crate::pipeline::BatchExtractor;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging lives for exactly this run; initialized once, here.
    tracing_subscriber::fmt()
        .with_env_filter("lesson_grabber=info,warn")
        .init();

    let matches = Command::new("Lesson Grabber")
        .version("0.1.0")
        .about("Captures streaming manifest URLs from a video-lesson portal")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("credentials")
                .long("credentials")
                .value_name("FILE")
                .help("Path to the credentials file"),
        )
        .arg(
            Arg::new("headful")
                .long("headful")
                .help("Show the browser window")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let credentials_path = matches.get_one::<String>("credentials").map(PathBuf::from);

    // Configuration problems are fatal before any browser work starts.
    let mut config = Config::load(config_path.as_deref())?;
    config.validate()?;
    let credentials = Credentials::load(credentials_path.as_deref())?;

    if matches.get_flag("headful") {
        config.headless = false;
    }

    info!("🚀 Lesson Grabber starting...");
    info!("🎯 Portal: {}", config.video_url_base);
    info!("🔁 Retries per unit: {}", config.retry_count);

    let extractor = BatchExtractor::new(config.clone())?;

    let mut session = BrowserSession::launch(&config).await?;
    if let Err(e) = session.login(&config, &credentials).await {
        error!("Login failed; aborting run: {}", e);
        session.close().await?;
        return Err(e);
    }

    // Per-unit failures are absorbed inside the extractor; whatever was
    // resolved ends up in the table.
    let start_time = std::time::Instant::now();
    let table = extractor.run(&session).await;
    let duration = start_time.elapsed();

    let entries = report::build_report(&config.rules, &table);
    let resolved = report::resolved_count(&entries);

    // The report is written even when every unit failed; a write failure must
    // not discard the completed processing.
    if let Err(e) = report::save_report(&entries, &config.report_dir) {
        error!("Failed to write report: {}", e);
    }

    session.close().await?;

    info!("🎉 Run completed in {:.1}s", duration.as_secs_f64());
    if resolved == 0 {
        info!("No manifest URLs were found.");
    } else {
        info!("✅ Resolved {} manifest URLs across {} entries", resolved, entries.len());
    }

    Ok(())
}

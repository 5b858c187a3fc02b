///
/// This module implements the CLI interface for coursecast: command parsing,
/// wiring of the concrete transport and media tool, and user-visible output.
///
/// All scanning, splitting and delivery logic lives in the [`coursecast-core`] crate.
/// This module is strictly CLI glue.
///
/// ## Commands
/// - `upload`: deliver a course folder to the destination chat
/// - `scan`: print the delivery plan without touching the network
/// - `status`: print what the progress ledger has recorded for a course
///
/// ## How To Use
/// - From the shell: `coursecast --help`.
/// - From tests: call [`run`] with a constructed [`Cli`].
///
/// [`coursecast-core`]: ../../coursecast-core/
use crate::load_config::{load_config, CliConfig};
use crate::progress::BarObserver;
use crate::upload::{resolve_destination, BotApiClient};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coursecast_core::captions::{assets_size, format_gib, videos_size};
use coursecast_core::contract::cancel_pair;
use coursecast_core::ledger::{slug, ProgressLedger};
use coursecast_core::media::Ffmpeg;
use coursecast_core::segmenter::needs_split;
use coursecast_core::{Course, Pipeline, Scanner};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// CLI for coursecast: deliver course folders to a Telegram chat.
#[derive(Parser)]
#[clap(
    name = "coursecast",
    version,
    about = "Package a folder of course videos and deliver it to a Telegram chat, resumably"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deliver a course folder, resuming where the last run stopped
    Upload {
        /// Course folder: one sub-folder per module
        course_dir: PathBuf,
        /// Optional YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Destination chat id, overrides TARGET_CHAT_ID and the config
        #[clap(long)]
        chat_id: Option<String>,
    },
    /// Print the delivery plan for a course folder without uploading
    Scan {
        course_dir: PathBuf,
        #[clap(long)]
        config: Option<PathBuf>,
    },
    /// Show recorded delivery progress for a course folder
    Status {
        course_dir: PathBuf,
        #[clap(long)]
        config: Option<PathBuf>,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    let result = match cli.command {
        Commands::Upload {
            course_dir,
            config,
            chat_id,
        } => {
            let config = load_config(config.as_deref())?;
            upload(&course_dir, config, chat_id).await
        }
        Commands::Scan { course_dir, config } => {
            let config = load_config(config.as_deref())?;
            scan(&course_dir, &config)
        }
        Commands::Status { course_dir, config } => {
            let config = load_config(config.as_deref())?;
            status(&course_dir, &config)
        }
    };

    let span = tracing::info_span!("exit");
    let _entered = span.enter();
    tracing::info!(success = result.is_ok(), "exit");
    result
}

fn scan_course(course_dir: &Path) -> Result<Course> {
    let root = std::path::absolute(course_dir)
        .with_context(|| format!("Invalid course folder {}", course_dir.display()))?;
    Scanner::new(&root)
        .scan()
        .with_context(|| format!("Failed to scan {}", root.display()))
}

async fn upload(course_dir: &Path, config: CliConfig, chat_id: Option<String>) -> Result<()> {
    let token = config
        .bot_token
        .clone()
        .context("BOT_TOKEN must be set (environment or .env) to upload")?;
    let mut course = scan_course(course_dir)?;
    tracing::info!(command = "upload", course = %course.name, "Starting upload");

    let ledger = Arc::new(ProgressLedger::for_course(&config.state_dir, &course.name)?);
    let client = BotApiClient::new(&config.api_base_url, &token)?;
    let configured = chat_id.or_else(|| config.chat_id.clone());
    let destination = resolve_destination(&client, &ledger, configured.as_deref()).await?;

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping");
            handle.cancel();
        }
    });

    let mut pipeline_config = config.pipeline.clone();
    pipeline_config.work_dir = std::path::absolute(&pipeline_config.work_dir)
        .context("Invalid work_dir")?
        .join(slug(&course.name));

    let pipeline = Pipeline::new(
        Arc::new(client),
        Arc::new(Ffmpeg::default()),
        ledger,
        destination,
        pipeline_config,
    )
    .with_observer(Arc::new(BarObserver::new()))
    .with_cancel(signal);

    match pipeline.run(&mut course).await {
        Ok(report) => {
            tracing::info!(command = "upload", ?report, "Upload complete");
            println!(
                "Delivered {}: {} archive part(s), {} video(s), {} skipped",
                course.name,
                report.archive_parts,
                report.videos.len(),
                report.skipped_videos.len()
            );
            if let Some(link) = &report.invite_link {
                println!("Invite link: {link}");
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(command = "upload", error = %e, "Upload failed");
            Err(e.into())
        }
    }
}

fn scan(course_dir: &Path, config: &CliConfig) -> Result<()> {
    let course = scan_course(course_dir)?;
    let ceiling = config.pipeline.max_unit_size;

    println!("Course: {}", course.name);
    println!(
        "Assets: {} file(s), {} GB",
        course.assets.len(),
        format_gib(assets_size(&course.assets))
    );
    for module in &course.modules {
        println!("📁 {}", module.name);
        for video in &module.videos {
            let note = if needs_split(video.size, ceiling) {
                " (will be split)"
            } else {
                ""
            };
            println!("  #{} {} [{} GB]{}", video.id, video.file_name, format_gib(video.size), note);
        }
    }
    println!(
        "Total: {} video(s), {} GB",
        course.video_count(),
        format_gib(videos_size(&course.modules))
    );
    Ok(())
}

fn status(course_dir: &Path, config: &CliConfig) -> Result<()> {
    let course = scan_course(course_dir)?;
    let ledger_path = ProgressLedger::path_for(&config.state_dir, &course.name);
    if !ledger_path.exists() {
        println!("{}: nothing delivered yet", course.name);
        return Ok(());
    }
    let ledger = ProgressLedger::open(&ledger_path);

    let whole_videos = course.videos().filter(|v| ledger.is_delivered(&v.path.to_string_lossy())).count();
    println!("Course: {}", course.name);
    println!("Ledger: {}", ledger_path.display());
    println!("Target chat: {}", ledger.target_chat().unwrap_or_else(|| "-".to_string()));
    println!("Delivered units: {}", ledger.delivered_count());
    println!("Unsplit videos delivered: {}/{}", whole_videos, course.video_count());
    Ok(())
}

// ReelBot - Self-hosted media acquisition service
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use reelbot_core::{
    dispatch_notifications, report_completion, CompletionNotifier, Database, DownloadConfig,
    DownloadFiles, DownloadManager, DownloadStreams, Downloader, MemoryStore, MovieStore,
    NoConversion, QueueNotifier, ReelError,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reelbot-cli")]
#[command(about = "ReelBot CLI - Download manager testing tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated downloads through the download manager
    Demo {
        /// Number of downloads to start
        #[arg(short, long, default_value_t = 5)]
        count: usize,
        /// Concurrent download slots
        #[arg(short, long, default_value_t = 2)]
        max_concurrent: usize,
        /// Episodes per download (1 = single file)
        #[arg(short, long, default_value_t = 1)]
        episodes: u32,
        /// Delay between progress steps in milliseconds
        #[arg(long, default_value_t = 200)]
        step_ms: u64,
        /// SQLite database file (in-memory store if omitted)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List stored movies
    Movies {
        /// SQLite database file
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Print the effective download configuration
    Config {
        /// JSON configuration file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Downloader that reports progress on a timer
struct SimulatedDownloader {
    title: String,
    episodes: u32,
    step: Duration,
    stop: CancellationToken,
    stopped: Arc<AtomicBool>,
}

impl SimulatedDownloader {
    fn new(title: String, episodes: u32, step: Duration) -> Self {
        Self {
            title,
            episodes,
            step,
            stop: CancellationToken::new(),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Downloader for SimulatedDownloader {
    async fn title(&self) -> reelbot_core::Result<String> {
        Ok(self.title.clone())
    }

    async fn files(&self) -> reelbot_core::Result<DownloadFiles> {
        Ok(DownloadFiles {
            main: vec![format!("{}.mkv", self.title)],
            temp: Vec::new(),
        })
    }

    async fn file_size(&self) -> reelbot_core::Result<u64> {
        Ok(1_500_000_000)
    }

    fn total_episodes(&self) -> u32 {
        self.episodes
    }

    async fn start_download(
        &self,
        cancel: CancellationToken,
    ) -> reelbot_core::Result<DownloadStreams> {
        let (progress_tx, progress_rx) = mpsc::channel(16);
        let (result_tx, result_rx) = oneshot::channel();
        let (episodes_tx, episodes_rx) = if self.episodes > 1 {
            let (tx, rx) = mpsc::channel(16);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let step = self.step;
        let episodes = self.episodes;
        let stop = self.stop.clone();
        let stopped = self.stopped.clone();

        tokio::spawn(async move {
            let mut completed = 0;
            for percent in (5..=100).step_by(5) {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = stop.cancelled() => {
                        stopped.store(true, Ordering::SeqCst);
                        let _ = result_tx.send(Err(ReelError::StoppedManually));
                        return;
                    }
                    _ = tokio::time::sleep(step) => {}
                }

                if progress_tx.send(percent as f64).await.is_err() {
                    return;
                }
                if let Some(tx) = &episodes_tx {
                    let done = percent * episodes / 100;
                    if done > completed {
                        completed = done;
                        let _ = tx.send(completed).await;
                    }
                }
            }
            let _ = result_tx.send(Ok(()));
        });

        Ok(DownloadStreams {
            progress: progress_rx,
            result: result_rx,
            episodes: episodes_rx,
        })
    }

    async fn stop_download(&self) -> reelbot_core::Result<()> {
        self.stop.cancel();
        Ok(())
    }

    fn stopped_manually(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Prints lifecycle events to stdout
struct ConsoleNotifier;

#[async_trait]
impl QueueNotifier for ConsoleNotifier {
    async fn on_queued(
        &self,
        _chat_id: i64,
        movie_id: i64,
        title: &str,
        position: usize,
        estimated_wait: &str,
        max_concurrent: usize,
    ) {
        println!(
            "⏳ [{}] {} queued at position {} ({} slots, {})",
            movie_id, title, position, max_concurrent, estimated_wait
        );
    }

    async fn on_started(&self, _chat_id: i64, movie_id: i64, title: &str) {
        println!("▶️  [{}] {} started", movie_id, title);
    }

    async fn on_first_episode_ready(&self, _chat_id: i64, movie_id: i64, title: &str) {
        println!("📺 [{}] first episode of {} is ready", movie_id, title);
    }

    async fn on_video_not_supported(&self, _chat_id: i64, movie_id: i64, title: &str) {
        println!("⚠️  [{}] {} cannot be played on the TV", movie_id, title);
    }
}

#[async_trait]
impl CompletionNotifier for ConsoleNotifier {
    async fn on_completed(&self, _chat_id: i64, movie_id: i64, title: &str) {
        println!("✅ [{}] {} downloaded", movie_id, title);
    }

    async fn on_stopped(&self, _chat_id: i64, movie_id: i64, title: &str) {
        println!("⏹️  [{}] {} stopped", movie_id, title);
    }

    async fn on_failed(&self, _chat_id: i64, movie_id: i64, title: &str, error: &ReelError) {
        println!("❌ [{}] {}: {}", movie_id, title, error.user_message());
    }
}

async fn open_store(db: Option<PathBuf>) -> anyhow::Result<Arc<dyn MovieStore>> {
    match db {
        Some(path) => {
            let database = Database::new(&path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            Ok(Arc::new(database))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

async fn run_demo(
    count: usize,
    max_concurrent: usize,
    episodes: u32,
    step: Duration,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = DownloadConfig {
        max_concurrent_downloads: max_concurrent,
        queue_check_interval: Duration::from_millis(250),
        ..DownloadConfig::default()
    }
    .apply_env()?;

    let store = open_store(db).await?;
    let manager = DownloadManager::new(config, store, Arc::new(NoConversion))?;
    let notifier = Arc::new(ConsoleNotifier);

    let notifications = manager
        .take_notifications()
        .context("notification channel already taken")?;
    let dispatcher = tokio::spawn(dispatch_notifications(notifications, notifier.clone()));

    println!("Starting {} downloads with {} slots", count, max_concurrent);
    let mut reports = Vec::with_capacity(count);
    for i in 1..=count {
        let title = format!("Demo Movie {}", i);
        let downloader = Arc::new(SimulatedDownloader::new(title.clone(), episodes, step));
        let handle = manager.start_download(downloader, 0).await?;

        let notifier = notifier.clone();
        reports.push(tokio::spawn(async move {
            report_completion(handle, 0, &title, notifier.as_ref()).await
        }));
    }

    let mut failed = 0;
    for report in reports {
        if report.await?.is_err() {
            failed += 1;
        }
    }

    manager.shutdown().await;
    drop(manager);
    dispatcher.abort();

    println!("Done: {} of {} downloads succeeded", count - failed, count);
    Ok(())
}

async fn list_movies(db: Option<PathBuf>) -> anyhow::Result<()> {
    let path = db.unwrap_or_else(Database::get_default_path);
    let database = Database::new(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;

    let movies = database.list_movies().await?;
    if movies.is_empty() {
        println!("No movies in {}", path.display());
    }
    for movie in movies {
        println!(
            "{:>5}  {:<40} {:>6.1}%  {}",
            movie.id,
            movie.name,
            movie.downloaded_percentage,
            if movie.is_loaded { "loaded" } else { "" }
        );
    }

    database.close().await?;
    Ok(())
}

fn print_config(file: Option<PathBuf>) -> anyhow::Result<()> {
    let config = match file {
        Some(path) => DownloadConfig::load(&path)?,
        None => DownloadConfig::default(),
    }
    .apply_env()?;
    config.validate()?;

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Demo {
            count,
            max_concurrent,
            episodes,
            step_ms,
            db,
        } => run_demo(count, max_concurrent, episodes, Duration::from_millis(step_ms), db).await,
        Commands::Movies { db } => list_movies(db).await,
        Commands::Config { file } => print_config(file),
    }
}

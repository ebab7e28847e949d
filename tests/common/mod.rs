//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use reelbot_core::{
    DownloadConfig, DownloadFiles, DownloadStreams, Downloader, ReelError, Result,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;

struct Senders {
    progress: mpsc::Sender<f64>,
    result: oneshot::Sender<Result<()>>,
    episodes: Option<mpsc::Sender<u32>>,
}

/// Downloader driven by the test
///
/// Nothing happens until the test pushes progress, episodes or a result.
/// `stop_download` reports `StoppedManually` like the real downloaders.
pub struct MockDownloader {
    title: String,
    total_episodes: u32,
    fail_start: bool,
    stop_closes_progress: bool,
    gated: bool,
    start_gate: Notify,
    start_requested: AtomicBool,
    started: AtomicBool,
    stopped: AtomicBool,
    stop_calls: AtomicUsize,
    senders: Mutex<Option<Senders>>,
    held_result: Mutex<Option<oneshot::Sender<Result<()>>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl MockDownloader {
    fn build(
        title: &str,
        total_episodes: u32,
        fail_start: bool,
        stop_closes_progress: bool,
        gated: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            title: title.to_string(),
            total_episodes,
            fail_start,
            stop_closes_progress,
            gated,
            start_gate: Notify::new(),
            start_requested: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            senders: Mutex::new(None),
            held_result: Mutex::new(None),
            cancel: Mutex::new(None),
        })
    }

    pub fn new(title: &str) -> Arc<Self> {
        Self::build(title, 1, false, false, false)
    }

    pub fn series(title: &str, episodes: u32) -> Arc<Self> {
        Self::build(title, episodes, false, false, false)
    }

    /// Refuses to start
    pub fn failing(title: &str) -> Arc<Self> {
        Self::build(title, 1, true, false, false)
    }

    /// Ends its progress stream on stop without reporting a result
    pub fn closing_on_stop(title: &str) -> Arc<Self> {
        Self::build(title, 1, false, true, false)
    }

    /// `start_download` blocks until `release_start`
    pub fn gated(title: &str) -> Arc<Self> {
        Self::build(title, 1, false, false, true)
    }

    pub fn release_start(&self) {
        self.start_gate.notify_one();
    }

    /// Whether `start_download` has been entered
    pub fn start_requested(&self) -> bool {
        self.start_requested.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Whether the manager cancelled the token passed to `start_download`
    pub fn was_cancelled(&self) -> bool {
        self.cancel
            .lock()
            .unwrap()
            .as_ref()
            .map(|token| token.is_cancelled())
            .unwrap_or(false)
    }

    pub async fn progress(&self, value: f64) {
        let tx = self
            .senders
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.progress.clone());
        if let Some(tx) = tx {
            let _ = tx.send(value).await;
        }
    }

    pub async fn episode(&self, completed: u32) {
        let tx = self
            .senders
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|s| s.episodes.clone());
        if let Some(tx) = tx {
            let _ = tx.send(completed).await;
        }
    }

    /// Report success and close every stream
    pub fn finish(&self) {
        if let Some(senders) = self.senders.lock().unwrap().take() {
            let _ = senders.result.send(Ok(()));
        }
    }

    /// Close the progress stream but keep the result stream open and silent
    pub fn close_progress(&self) {
        if let Some(senders) = self.senders.lock().unwrap().take() {
            *self.held_result.lock().unwrap() = Some(senders.result);
        }
    }

    /// Report a downloader failure
    pub fn fail(&self, message: &str) {
        if let Some(senders) = self.senders.lock().unwrap().take() {
            let _ = senders.result.send(Err(ReelError::downloader(message)));
        }
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn title(&self) -> Result<String> {
        Ok(self.title.clone())
    }

    async fn files(&self) -> Result<DownloadFiles> {
        Ok(DownloadFiles {
            main: vec![format!("/media/{}.mkv", self.title)],
            temp: vec![format!("/media/{}.part", self.title)],
        })
    }

    async fn file_size(&self) -> Result<u64> {
        Ok(700 * 1024 * 1024)
    }

    fn total_episodes(&self) -> u32 {
        self.total_episodes
    }

    async fn start_download(&self, cancel: CancellationToken) -> Result<DownloadStreams> {
        self.start_requested.store(true, Ordering::SeqCst);
        if self.gated {
            self.start_gate.notified().await;
        }
        if self.fail_start {
            return Err(ReelError::downloader("no peers"));
        }

        let (progress_tx, progress_rx) = mpsc::channel(64);
        let (result_tx, result_rx) = oneshot::channel();
        let (episodes_tx, episodes_rx) = if self.total_episodes > 1 {
            let (tx, rx) = mpsc::channel(64);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        *self.senders.lock().unwrap() = Some(Senders {
            progress: progress_tx,
            result: result_tx,
            episodes: episodes_tx,
        });
        *self.cancel.lock().unwrap() = Some(cancel);
        self.started.store(true, Ordering::SeqCst);

        Ok(DownloadStreams {
            progress: progress_rx,
            result: result_rx,
            episodes: episodes_rx,
        })
    }

    async fn stop_download(&self) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
        if self.stop_closes_progress {
            self.close_progress();
            return Ok(());
        }
        if let Some(senders) = self.senders.lock().unwrap().take() {
            let _ = senders.result.send(Err(ReelError::StoppedManually));
        }
        Ok(())
    }

    fn stopped_manually(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Config with fast queue ticks for tests
pub fn test_config(max_concurrent_downloads: usize) -> DownloadConfig {
    DownloadConfig {
        max_concurrent_downloads,
        queue_check_interval: Duration::from_secs(1),
        queue_position_interval: Duration::from_secs(5),
        progress_update_interval: Duration::from_secs(60),
        ..Default::default()
    }
}

/// Poll a condition until it holds
pub async fn wait_for<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

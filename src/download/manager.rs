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


//! Download manager
//!
//! Turns independent downloads into a bounded, observable pipeline:
//! - At most `max_concurrent_downloads` jobs run at once (semaphore slots)
//! - Overflow waits in a FIFO queue and is promoted by a background task
//! - Each active job is driven by its own `Monitor` task
//! - Callers get a `DownloadHandle` whose channels stay the same whether
//!   the download starts right away or waits in the queue first
//!
//! The active-job map and the queue have separate locks. Neither lock is
//! held across a downloader call.
//!
//! # Usage Example
//! ```no_run
//! use reelbot_core::{DownloadConfig, DownloadManager, MemoryStore, NoConversion};
//! # use reelbot_core::Downloader;
//! # use std::sync::Arc;
//! # async fn example(downloader: Arc<dyn Downloader>) -> reelbot_core::Result<()> {
//! let manager = DownloadManager::new(
//!     DownloadConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(NoConversion),
//! )?;
//!
//! let handle = manager.start_download(downloader, 42).await?;
//! handle.wait().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::DownloadConfig;
use crate::conversion::ConversionGate;
use crate::download::monitor::{Job, JobControl, Monitor, StopReason};
use crate::download::progress::estimated_wait_text;
use crate::download::queue::{watch_queued, CallerChannels, DownloadQueue, QueueEntry, QueuedDownload};
use crate::download::Downloader;
use crate::error::{ReelError, Result};
use crate::notify::{NotificationKind, QueueNotification, NOTIFICATION_CAPACITY};
use crate::storage::{MovieStore, NewMovie};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Caller side of one download
///
/// `progress` yields clamped percentages; `result` yields the terminal
/// result once the job has left the active set and released its slot.
/// Both stay silent while the download waits in the queue.
#[derive(Debug)]
pub struct DownloadHandle {
    pub movie_id: i64,
    pub progress: mpsc::UnboundedReceiver<f64>,
    pub result: oneshot::Receiver<Result<()>>,
}

impl DownloadHandle {
    /// Drain progress and return the terminal result
    pub async fn wait(self) -> Result<()> {
        let DownloadHandle {
            movie_id,
            mut progress,
            result,
        } = self;

        while progress.recv().await.is_some() {}

        result.await.unwrap_or_else(|_| {
            Err(ReelError::internal(format!(
                "Result channel of movie {} closed without a result",
                movie_id
            )))
        })
    }
}

/// Snapshot of one active download
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveDownload {
    pub movie_id: i64,
    pub title: String,
    pub chat_id: i64,
    pub total_episodes: u32,
    pub running_secs: u64,
}

/// Download manager with queue and concurrency control
pub struct DownloadManager {
    config: Arc<DownloadConfig>,
    store: Arc<dyn MovieStore>,
    gate: Arc<dyn ConversionGate>,

    /// Active downloads (movie id -> job)
    active_jobs: Arc<RwLock<HashMap<i64, Job>>>,

    /// Downloads waiting for a slot
    queue: Arc<DownloadQueue>,

    /// One permit per running job
    slots: Arc<Semaphore>,

    notifications_tx: mpsc::Sender<QueueNotification>,
    notifications_rx: std::sync::Mutex<Option<mpsc::Receiver<QueueNotification>>>,

    /// Stops the promoter and queue watchers; parent of every job token
    shutdown: CancellationToken,
}

impl DownloadManager {
    /// Create a manager and start its queue promoter
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: DownloadConfig,
        store: Arc<dyn MovieStore>,
        gate: Arc<dyn ConversionGate>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (notifications_tx, notifications_rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        let check_interval = config.queue_check_interval;

        let manager = Arc::new(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
            config: Arc::new(config),
            store,
            gate,
            active_jobs: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(DownloadQueue::new()),
            notifications_tx,
            notifications_rx: std::sync::Mutex::new(Some(notifications_rx)),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(run_promoter(
            Arc::downgrade(&manager),
            manager.shutdown.clone(),
            check_interval,
        ));

        Ok(manager)
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Take the notification receiver (only the first call gets it)
    ///
    /// The channel is bounded: once it is full, producers wait for the
    /// consumer.
    pub fn take_notifications(&self) -> Option<mpsc::Receiver<QueueNotification>> {
        self.notifications_rx.lock().ok()?.take()
    }

    /// Start a new download
    ///
    /// Reads the downloader's metadata, creates the movie record and either
    /// starts the transfer or queues it. Never waits for a slot.
    pub async fn start_download(
        &self,
        downloader: Arc<dyn Downloader>,
        chat_id: i64,
    ) -> Result<DownloadHandle> {
        if self.shutdown.is_cancelled() {
            return Err(ReelError::Shutdown);
        }

        let title = downloader
            .title()
            .await
            .map_err(|e| ReelError::Metadata(format!("title: {}", e)))?;
        let files = downloader
            .files()
            .await
            .map_err(|e| ReelError::Metadata(format!("file list: {}", e)))?;
        let file_size = downloader.file_size().await.unwrap_or_else(|e| {
            warn!("Size of '{}' is unavailable, storing 0: {}", title, e);
            0
        });

        let movie = NewMovie {
            name: title.clone(),
            file_size,
            total_episodes: downloader.total_episodes(),
            main_files: files.main,
            temp_files: files.temp,
        };
        let movie_id = self.store.create_movie(&movie).await?;
        debug!("Created movie {} for '{}'", movie_id, title);

        self.admit(movie_id, downloader, title, chat_id).await
    }

    /// Re-attach an existing movie record to a fresh downloader
    ///
    /// Used for downloads resumed in the background; goes through the same
    /// slot and queue path as `start_download`.
    pub async fn resume_download(
        &self,
        movie_id: i64,
        downloader: Arc<dyn Downloader>,
        chat_id: i64,
    ) -> Result<DownloadHandle> {
        if self.shutdown.is_cancelled() {
            return Err(ReelError::Shutdown);
        }
        if self.is_active(movie_id).await || self.queue.contains(movie_id).await {
            return Err(ReelError::InvalidState(format!(
                "Movie {} is already downloading",
                movie_id
            )));
        }

        let movie = self
            .store
            .get_movie(movie_id)
            .await?
            .ok_or_else(|| ReelError::not_found(format!("Movie {}", movie_id)))?;

        info!("Resuming download of movie {} ({})", movie_id, movie.name);
        self.admit(movie_id, downloader, movie.name, chat_id).await
    }

    async fn admit(
        &self,
        movie_id: i64,
        downloader: Arc<dyn Downloader>,
        title: String,
        chat_id: i64,
    ) -> Result<DownloadHandle> {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (result_tx, result_rx) = oneshot::channel();
        let channels = CallerChannels {
            progress: progress_tx,
            result: result_tx,
        };
        let handle = DownloadHandle {
            movie_id,
            progress: progress_rx,
            result: result_rx,
        };

        // Waiting downloads keep their turn
        let permit = if self.queue.is_empty().await {
            self.slots.clone().try_acquire_owned().ok()
        } else {
            None
        };

        match permit {
            Some(permit) => {
                let control = self.register(
                    &mut *self.active_jobs.write().await,
                    movie_id,
                    &downloader,
                    &title,
                    chat_id,
                );
                self.activate(movie_id, downloader, title, chat_id, control, permit, channels)
                    .await
                    .map_err(|(error, _)| error)?;
            }
            None => self.enqueue(movie_id, downloader, title, chat_id, channels).await,
        }

        Ok(handle)
    }

    /// Add a job to the active set before its transfer starts
    ///
    /// From here on `stop` finds the job, even while `start_download` runs.
    fn register(
        &self,
        jobs: &mut HashMap<i64, Job>,
        movie_id: i64,
        downloader: &Arc<dyn Downloader>,
        title: &str,
        chat_id: i64,
    ) -> Arc<JobControl> {
        let control = Arc::new(JobControl::new(self.shutdown.child_token()));
        jobs.insert(
            movie_id,
            Job {
                movie_id,
                downloader: downloader.clone(),
                control: control.clone(),
                started_at: tokio::time::Instant::now(),
                chat_id,
                title: title.to_string(),
                total_episodes: downloader.total_episodes(),
            },
        );
        control
    }

    /// Start the transfer of a registered job and spawn its monitor
    ///
    /// On failure the job is unregistered, the slot is released and the
    /// caller channels are handed back.
    async fn activate(
        &self,
        movie_id: i64,
        downloader: Arc<dyn Downloader>,
        title: String,
        chat_id: i64,
        control: Arc<JobControl>,
        permit: OwnedSemaphorePermit,
        channels: CallerChannels,
    ) -> std::result::Result<(), (ReelError, CallerChannels)> {
        let total_episodes = downloader.total_episodes();

        // Stopped (or shut down) between registration and start
        if control.cancel.is_cancelled() {
            self.active_jobs.write().await.remove(&movie_id);
            let error = if self.shutdown.is_cancelled() {
                ReelError::Shutdown
            } else {
                control.stop_error(movie_id)
            };
            info!("Movie {} was stopped before its transfer started", movie_id);
            return Err((error, channels));
        }

        let streams = match downloader.start_download(control.cancel.clone()).await {
            Ok(streams) => streams,
            Err(e) => {
                self.active_jobs.write().await.remove(&movie_id);
                warn!("Failed to start download of movie {}: {}", movie_id, e);
                let error = ReelError::StartFailed {
                    movie_id,
                    message: e.to_string(),
                };
                return Err((error, channels));
            }
        };
        info!("Started download of movie {} ({})", movie_id, title);

        let CallerChannels { progress, result } = channels;
        let monitor = Monitor {
            movie_id,
            chat_id,
            title,
            total_episodes,
            downloader: downloader.clone(),
            control: control.clone(),
            caller_progress: progress,
            store: self.store.clone(),
            gate: self.gate.clone(),
            notifications: self.notifications_tx.clone(),
            config: self.config.clone(),
        };
        let jobs = self.active_jobs.clone();

        tokio::spawn(async move {
            let outcome = monitor.run(streams).await;

            jobs.write().await.remove(&movie_id);
            control.cancel.cancel();
            if outcome.abandons_transfer() {
                if let Err(e) = downloader.stop_download().await {
                    debug!("Stopping abandoned download of movie {} failed: {}", movie_id, e);
                }
            }
            drop(permit);

            debug!("Monitor of movie {} finished: {:?}", movie_id, outcome);
            let _ = result.send(outcome.into_result(movie_id));
        });

        Ok(())
    }

    async fn enqueue(
        &self,
        movie_id: i64,
        downloader: Arc<dyn Downloader>,
        title: String,
        chat_id: i64,
        channels: CallerChannels,
    ) {
        let watch = self.shutdown.child_token();
        let item = QueuedDownload::new(
            movie_id,
            downloader,
            title.clone(),
            chat_id,
            channels,
            watch.clone(),
        );
        let (position, ticket) = self.queue.push(item).await;

        // Raced with shutdown, which may already have drained the queue
        if self.shutdown.is_cancelled() {
            if let Some(item) = self.queue.remove_ticket(ticket).await {
                item.channels.fail(ReelError::Shutdown);
            }
            return;
        }

        let max_concurrent = self.config.max_concurrent_downloads;
        let estimated_wait =
            estimated_wait_text(position, self.config.average_download_duration, max_concurrent);
        info!(
            "Movie {} queued at position {} ({})",
            movie_id, position, estimated_wait
        );

        tokio::spawn(watch_queued(
            self.queue.clone(),
            movie_id,
            ticket,
            watch,
            self.config.queue_position_interval,
            self.config.timeout(),
        ));

        self.notify(QueueNotification::new(
            chat_id,
            movie_id,
            title,
            NotificationKind::Queued {
                position,
                estimated_wait,
                max_concurrent,
            },
        ))
        .await;
    }

    /// Move the queue head into a free slot
    ///
    /// Returns `false` when the queue is empty or no slot is free.
    async fn promote_next(&self) -> bool {
        if self.queue.is_empty().await {
            return false;
        }
        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            return false;
        };

        // Pop and register under the job lock so `stop` always finds the
        // download in either the queue or the active set
        let (item, control) = {
            let mut jobs = self.active_jobs.write().await;
            let Some(item) = self.queue.pop_front().await else {
                return false;
            };
            let control = self.register(
                &mut jobs,
                item.movie_id,
                &item.downloader,
                &item.title,
                item.chat_id,
            );
            (item, control)
        };

        let QueuedDownload {
            movie_id,
            downloader,
            title,
            chat_id,
            enqueued_at,
            channels,
            ..
        } = item;
        info!(
            "Promoting movie {} after {:?} in the queue",
            movie_id,
            enqueued_at.elapsed()
        );

        match self
            .activate(movie_id, downloader, title.clone(), chat_id, control, permit, channels)
            .await
        {
            Ok(()) => {
                self.notify(QueueNotification::new(
                    chat_id,
                    movie_id,
                    title,
                    NotificationKind::Started,
                ))
                .await;
            }
            Err((error, channels)) => channels.fail(error),
        }
        true
    }

    /// Stop a download on user request
    ///
    /// Stopping a movie that is neither active nor queued is a no-op.
    pub async fn stop_download(&self, movie_id: i64) -> Result<()> {
        self.stop(movie_id, StopReason::User).await
    }

    /// Stop a download because its movie is being deleted
    ///
    /// The caller's result is `StoppedByDeletion`, which presentation layers
    /// do not report.
    pub async fn stop_download_silently(&self, movie_id: i64) -> Result<()> {
        self.stop(movie_id, StopReason::Deletion).await
    }

    async fn stop(&self, movie_id: i64, reason: StopReason) -> Result<()> {
        // Queue first: promotion moves an item into the active set while
        // holding the job lock, so checking the active set second cannot miss it
        if let Some(item) = self.queue.remove(movie_id).await {
            info!("Removed movie {} from the download queue", movie_id);
            let error = match reason {
                StopReason::User => ReelError::StoppedByUser { movie_id },
                StopReason::Deletion => ReelError::StoppedByDeletion { movie_id },
            };
            item.channels.fail(error);
            return Ok(());
        }

        let active = self
            .active_jobs
            .read()
            .await
            .get(&movie_id)
            .map(|job| (job.downloader.clone(), job.control.clone()));

        if let Some((downloader, control)) = active {
            if reason == StopReason::Deletion {
                control.mark_silent();
            }
            info!("Stopping download of movie {} ({:?})", movie_id, reason);

            let stopped = downloader.stop_download().await;
            control.cancel.cancel();
            return stopped.map_err(|e| e.for_movie(movie_id));
        }

        info!("Movie {} is not downloading, nothing to stop", movie_id);
        Ok(())
    }

    /// Stop every active download
    ///
    /// Queued downloads are left alone.
    pub async fn stop_all_downloads(&self) {
        let movie_ids: Vec<i64> = self.active_jobs.read().await.keys().copied().collect();

        for movie_id in movie_ids {
            if let Err(e) = self.stop(movie_id, StopReason::User).await {
                warn!("Failed to stop download of movie {}: {}", movie_id, e);
            }
        }
    }

    /// Stop the promoter, fail queued downloads and stop active ones
    pub async fn shutdown(&self) {
        info!("Shutting down download manager");
        self.shutdown.cancel();

        for item in self.queue.drain().await {
            item.channels.fail(ReelError::Shutdown);
        }
        self.stop_all_downloads().await;
    }

    pub async fn active_count(&self) -> usize {
        self.active_jobs.read().await.len()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.len().await
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub async fn is_active(&self, movie_id: i64) -> bool {
        self.active_jobs.read().await.contains_key(&movie_id)
    }

    /// 1-based queue position, `None` when not queued
    ///
    /// Computed from the live queue, so it reflects every promotion and
    /// removal made before the call.
    pub async fn queue_position(&self, movie_id: i64) -> Option<usize> {
        self.queue.position(movie_id).await
    }

    pub async fn queued_downloads(&self) -> Vec<QueueEntry> {
        self.queue
            .entries(
                self.config.average_download_duration,
                self.config.max_concurrent_downloads,
            )
            .await
    }

    pub async fn active_downloads(&self) -> Vec<ActiveDownload> {
        let mut active: Vec<ActiveDownload> = self
            .active_jobs
            .read()
            .await
            .values()
            .map(|job| ActiveDownload {
                movie_id: job.movie_id,
                title: job.title.clone(),
                chat_id: job.chat_id,
                total_episodes: job.total_episodes,
                running_secs: job.started_at.elapsed().as_secs(),
            })
            .collect();
        active.sort_by_key(|download| download.movie_id);
        active
    }

    async fn notify(&self, event: QueueNotification) {
        if self.notifications_tx.send(event).await.is_err() {
            debug!("Notification receiver is gone, dropping event");
        }
    }
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_promoter(manager: Weak<DownloadManager>, shutdown: CancellationToken, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        while manager.promote_next().await {}
    }

    debug!("Queue promoter stopped");
}

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


//! Per-download monitor
//!
//! One monitor task runs per active job. It consumes the downloader's
//! streams in a single `select!` loop and ends in exactly one
//! `MonitorOutcome`:
//!
//! - episode completed: reset stagnation, persist, first-episode hooks
//! - progress: clamp, persist, forward, stagnation check; close = done
//! - result: authoritative terminal signal from the downloader
//! - heartbeat: debug log only
//! - cancellation: user stop, deletion or incompatibility rejection
//! - absolute timeout (disabled when zero)
//!
//! The completion path runs the conversion gate and only marks the movie
//! loaded once any pending conversion has finished. The job keeps its slot
//! until the monitor returns.

use crate::config::DownloadConfig;
use crate::conversion::{ConversionGate, GateOutcome};
use crate::download::progress::{clamp_progress, StagnationTracker};
use crate::download::{DownloadStreams, Downloader};
use crate::error::{ReelError, Result};
use crate::notify::{NotificationKind, QueueNotification};
use crate::storage::MovieStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::error::{RecvError, TryRecvError};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Who asked an active download to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    /// The movie is being deleted; no user-facing message
    Deletion,
}

/// Terminal state of a monitored download
#[derive(Debug)]
pub enum MonitorOutcome {
    /// Downloaded, converted if needed, marked loaded
    Completed,
    /// The downloader reported an error
    Failed(ReelError),
    /// No forward progress for longer than the stagnation limit
    Stagnated(Duration),
    /// Absolute download timeout expired
    TimedOut(Duration),
    Cancelled(StopReason),
    /// TV-compatibility policy rejected the content; the user was notified
    ///
    /// `early` is set when the first-episode probe rejected it mid-transfer.
    RejectedIncompatible { early: bool },
}

impl MonitorOutcome {
    /// Result delivered on the caller's result channel
    pub fn into_result(self, movie_id: i64) -> Result<()> {
        match self {
            MonitorOutcome::Completed | MonitorOutcome::RejectedIncompatible { .. } => Ok(()),
            MonitorOutcome::Failed(error) if error.movie_id().is_some() => Err(error),
            MonitorOutcome::Failed(error) => Err(error.for_movie(movie_id)),
            MonitorOutcome::Stagnated(stalled_for) => Err(ReelError::Stagnated {
                movie_id,
                stalled_for,
            }),
            MonitorOutcome::TimedOut(timeout) => {
                Err(ReelError::DownloadTimeout { movie_id, timeout })
            }
            MonitorOutcome::Cancelled(StopReason::User) => {
                Err(ReelError::StoppedByUser { movie_id })
            }
            MonitorOutcome::Cancelled(StopReason::Deletion) => {
                Err(ReelError::StoppedByDeletion { movie_id })
            }
        }
    }

    /// The monitor gave up while the transfer may still be running
    pub(crate) fn abandons_transfer(&self) -> bool {
        matches!(
            self,
            MonitorOutcome::Stagnated(_)
                | MonitorOutcome::TimedOut(_)
                | MonitorOutcome::RejectedIncompatible { early: true }
        )
    }
}

/// Cancellation handle and sticky stop flags shared by a job and its monitor
pub(crate) struct JobControl {
    pub cancel: CancellationToken,
    silent_stop: AtomicBool,
    rejected_incompatible: AtomicBool,
}

impl JobControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            silent_stop: AtomicBool::new(false),
            rejected_incompatible: AtomicBool::new(false),
        }
    }

    pub fn mark_silent(&self) {
        self.silent_stop.store(true, Ordering::SeqCst);
    }

    pub fn mark_rejected(&self) {
        self.rejected_incompatible.store(true, Ordering::SeqCst);
    }

    pub fn is_rejected(&self) -> bool {
        self.rejected_incompatible.load(Ordering::SeqCst)
    }

    pub fn stop_reason(&self) -> StopReason {
        if self.silent_stop.load(Ordering::SeqCst) {
            StopReason::Deletion
        } else {
            StopReason::User
        }
    }

    /// Error for a job stopped before its monitor ran
    pub fn stop_error(&self, movie_id: i64) -> ReelError {
        match self.stop_reason() {
            StopReason::User => ReelError::StoppedByUser { movie_id },
            StopReason::Deletion => ReelError::StoppedByDeletion { movie_id },
        }
    }
}

/// Bookkeeping for one active download
pub(crate) struct Job {
    pub movie_id: i64,
    pub downloader: Arc<dyn Downloader>,
    pub control: Arc<JobControl>,
    pub started_at: Instant,
    pub chat_id: i64,
    pub title: String,
    pub total_episodes: u32,
}

/// State machine driving one active download
pub(crate) struct Monitor {
    pub movie_id: i64,
    pub chat_id: i64,
    pub title: String,
    pub total_episodes: u32,
    pub downloader: Arc<dyn Downloader>,
    pub control: Arc<JobControl>,
    pub caller_progress: mpsc::UnboundedSender<f64>,
    pub store: Arc<dyn MovieStore>,
    pub gate: Arc<dyn ConversionGate>,
    pub notifications: mpsc::Sender<QueueNotification>,
    pub config: Arc<DownloadConfig>,
}

async fn next_episode(episodes: &mut Option<mpsc::Receiver<u32>>) -> Option<u32> {
    match episodes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl Monitor {
    pub(crate) async fn run(self, streams: DownloadStreams) -> MonitorOutcome {
        let DownloadStreams {
            mut progress,
            mut result,
            mut episodes,
        } = streams;

        let started = Instant::now();
        let every = self.config.progress_update_interval;
        let mut heartbeat = interval_at(started + every, every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let timeout = self.config.timeout();
        let expired = async move {
            match timeout {
                Some(timeout) => sleep_until(started + timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        let mut stagnation = StagnationTracker::default();
        let mut first_episode_seen = false;

        loop {
            tokio::select! {
                biased;

                _ = self.control.cancel.cancelled() => return self.stopped().await,

                _ = &mut expired => {
                    let timeout = timeout.unwrap_or_default();
                    warn!("Movie {} exceeded the download timeout of {:?}", self.movie_id, timeout);
                    return MonitorOutcome::TimedOut(timeout);
                }

                episode = next_episode(&mut episodes) => match episode {
                    Some(completed) => {
                        self.on_episode(completed, &mut stagnation, &mut first_episode_seen).await
                    }
                    None => episodes = None,
                },

                value = progress.recv() => match value {
                    Some(value) => {
                        if let Some(outcome) = self.on_progress(value, &mut stagnation).await {
                            return outcome;
                        }
                    }
                    None => return self.on_progress_closed(&mut result).await,
                },

                terminal = &mut result => return self.on_result(terminal).await,

                _ = heartbeat.tick() => debug!(
                    "Movie {} still downloading after {:?} (stalled: {})",
                    self.movie_id,
                    started.elapsed(),
                    stagnation.is_stalled()
                ),
            }
        }
    }

    async fn on_episode(
        &self,
        completed: u32,
        stagnation: &mut StagnationTracker,
        first_episode_seen: &mut bool,
    ) {
        stagnation.reset();
        debug!(
            "Movie {}: {} of {} episodes done",
            self.movie_id, completed, self.total_episodes
        );

        if let Err(e) = self.store.update_episodes_progress(self.movie_id, completed).await {
            warn!("Failed to save episode progress for movie {}: {}", self.movie_id, e);
        }

        if *first_episode_seen || self.total_episodes <= 1 {
            return;
        }
        *first_episode_seen = true;

        self.notify(NotificationKind::FirstEpisodeReady).await;
        if self.config.tv_compatibility.enabled {
            self.spawn_early_probe();
        }
    }

    /// Probe the first episode without blocking the loop
    ///
    /// An incompatible result under the reject policy flags the job and
    /// cancels it; the cancellation branch does the reporting.
    fn spawn_early_probe(&self) {
        let movie_id = self.movie_id;
        let gate = self.gate.clone();
        let control = self.control.clone();
        let reject = self.config.tv_compatibility.reject_incompatible;

        tokio::spawn(async move {
            match gate.probe_early(movie_id).await {
                Ok(true) if reject => {
                    info!("Movie {} is not TV compatible, rejecting download", movie_id);
                    control.mark_rejected();
                    control.cancel.cancel();
                }
                Ok(true) => debug!("Movie {} is not TV compatible", movie_id),
                Ok(false) => debug!("Movie {} passed the early TV probe", movie_id),
                Err(e) => warn!("Early TV probe failed for movie {}: {}", movie_id, e),
            }
        });
    }

    async fn on_progress(
        &self,
        reported: f64,
        stagnation: &mut StagnationTracker,
    ) -> Option<MonitorOutcome> {
        let value = clamp_progress(reported);

        if let Err(e) = self.store.update_downloaded_percentage(self.movie_id, value).await {
            warn!("Failed to save progress for movie {}: {}", self.movie_id, e);
        }
        let _ = self.caller_progress.send(value);

        let stalled_for = stagnation.observe(value, Instant::now())?;
        warn!(
            "Movie {} made no progress for {} minutes",
            self.movie_id,
            stalled_for.as_secs() / 60
        );
        Some(MonitorOutcome::Stagnated(stalled_for))
    }

    async fn on_progress_closed(
        &self,
        result: &mut oneshot::Receiver<Result<()>>,
    ) -> MonitorOutcome {
        match result.try_recv() {
            Ok(Ok(())) => self.complete().await,
            Ok(Err(error)) => self.on_downloader_error(error).await,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {
                if self.downloader.stopped_manually() {
                    self.stopped().await
                } else {
                    self.complete().await
                }
            }
        }
    }

    async fn on_result(
        &self,
        terminal: std::result::Result<Result<()>, RecvError>,
    ) -> MonitorOutcome {
        match terminal {
            Ok(Ok(())) => self.complete().await,
            Ok(Err(error)) => self.on_downloader_error(error).await,
            Err(_) if self.downloader.stopped_manually() => self.stopped().await,
            Err(_) => self.complete().await,
        }
    }

    async fn on_downloader_error(&self, error: ReelError) -> MonitorOutcome {
        match error {
            ReelError::StoppedManually => self.stopped().await,
            ReelError::StoppedByUser { .. } => MonitorOutcome::Cancelled(StopReason::User),
            ReelError::StoppedByDeletion { .. } => {
                MonitorOutcome::Cancelled(StopReason::Deletion)
            }
            error => {
                warn!("Download of movie {} failed: {}", self.movie_id, error);
                MonitorOutcome::Failed(error)
            }
        }
    }

    /// Decide how a stop is reported, from the sticky flags
    async fn stopped(&self) -> MonitorOutcome {
        if self.control.is_rejected() {
            self.notify(NotificationKind::VideoNotSupported).await;
            return MonitorOutcome::RejectedIncompatible { early: true };
        }

        let reason = self.control.stop_reason();
        info!("Download of movie {} stopped ({:?})", self.movie_id, reason);
        MonitorOutcome::Cancelled(reason)
    }

    async fn complete(&self) -> MonitorOutcome {
        let policy = &self.config.tv_compatibility;

        if policy.enabled {
            match self.gate.on_download_complete(self.movie_id).await {
                Ok(outcome) if outcome.incompatible && policy.reject_incompatible => {
                    info!("Movie {} is not TV compatible, not marking it loaded", self.movie_id);
                    self.control.mark_rejected();
                    self.notify(NotificationKind::VideoNotSupported).await;
                    return MonitorOutcome::RejectedIncompatible { early: false };
                }
                Ok(GateOutcome {
                    wait: Some(done), ..
                }) => {
                    info!("Movie {} downloaded, waiting for conversion", self.movie_id);
                    tokio::select! {
                        biased;
                        _ = self.control.cancel.cancelled() => return self.stopped().await,
                        _ = done => {}
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Conversion gate failed for movie {}: {}", self.movie_id, e),
            }
        }

        if let Err(e) = self.store.set_loaded(self.movie_id).await {
            warn!("Failed to mark movie {} as loaded: {}", self.movie_id, e);
        }
        info!("Movie {} downloaded", self.movie_id);
        MonitorOutcome::Completed
    }

    async fn notify(&self, kind: NotificationKind) {
        let event = QueueNotification::new(self.chat_id, self.movie_id, self.title.clone(), kind);
        if self.notifications.send(event).await.is_err() {
            debug!("Notification receiver is gone, dropping event for movie {}", self.movie_id);
        }
    }
}

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


//! FIFO of downloads waiting for a concurrency slot
//!
//! Positions are derived from the order of the deque, never stored. The
//! queue has its own lock, separate from the active-job map, and no job
//! start happens while it is held.
//!
//! Every queued item owns the caller-facing senders that `start_download`
//! already handed out. Promotion moves them into the monitor, so the caller's
//! channels never change identity.

use crate::download::progress::estimated_wait_text;
use crate::download::Downloader;
use crate::error::{ReelError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Caller side of a download: progress values and the terminal result
pub(crate) struct CallerChannels {
    pub progress: mpsc::UnboundedSender<f64>,
    pub result: oneshot::Sender<Result<()>>,
}

impl CallerChannels {
    /// Deliver a terminal error, closing both channels
    pub fn fail(self, error: ReelError) {
        let _ = self.result.send(Err(error));
    }
}

/// A download waiting for a free slot
pub(crate) struct QueuedDownload {
    pub movie_id: i64,
    pub downloader: Arc<dyn Downloader>,
    pub title: String,
    pub chat_id: i64,
    pub enqueued_at: Instant,
    pub channels: CallerChannels,

    /// Cancelled when the item leaves the queue, stops its watcher
    pub watch: CancellationToken,

    ticket: u64,
}

impl QueuedDownload {
    pub fn new(
        movie_id: i64,
        downloader: Arc<dyn Downloader>,
        title: String,
        chat_id: i64,
        channels: CallerChannels,
        watch: CancellationToken,
    ) -> Self {
        Self {
            movie_id,
            downloader,
            title,
            chat_id,
            enqueued_at: Instant::now(),
            channels,
            watch,
            ticket: 0,
        }
    }
}

/// Snapshot of one queued download for status displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub movie_id: i64,
    pub title: String,
    pub chat_id: i64,
    /// 1-based position
    pub position: usize,
    pub estimated_wait: String,
    pub waited_secs: u64,
}

/// Unbounded FIFO of queued downloads
#[derive(Default)]
pub(crate) struct DownloadQueue {
    items: Mutex<VecDeque<QueuedDownload>>,
    next_ticket: AtomicU64,
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item, returning its 1-based position and its ticket
    pub async fn push(&self, mut item: QueuedDownload) -> (usize, u64) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        item.ticket = ticket;

        let mut items = self.items.lock().await;
        items.push_back(item);
        (items.len(), ticket)
    }

    /// Take the head of the queue; its watcher is stopped
    pub async fn pop_front(&self) -> Option<QueuedDownload> {
        let item = self.items.lock().await.pop_front();
        if let Some(item) = &item {
            item.watch.cancel();
        }
        item
    }

    /// Remove a movie from the queue; its watcher is stopped
    pub async fn remove(&self, movie_id: i64) -> Option<QueuedDownload> {
        self.remove_where(|item| item.movie_id == movie_id).await
    }

    pub(crate) async fn remove_ticket(&self, ticket: u64) -> Option<QueuedDownload> {
        self.remove_where(|item| item.ticket == ticket).await
    }

    async fn remove_where<F>(&self, predicate: F) -> Option<QueuedDownload>
    where
        F: Fn(&QueuedDownload) -> bool,
    {
        let mut items = self.items.lock().await;
        let index = items.iter().position(|item| predicate(item))?;
        let item = items.remove(index)?;
        item.watch.cancel();
        Some(item)
    }

    /// Take every queued item, oldest first
    pub async fn drain(&self) -> Vec<QueuedDownload> {
        let drained: Vec<_> = self.items.lock().await.drain(..).collect();
        for item in &drained {
            item.watch.cancel();
        }
        drained
    }

    /// 1-based position of a movie
    pub async fn position(&self, movie_id: i64) -> Option<usize> {
        self.items
            .lock()
            .await
            .iter()
            .position(|item| item.movie_id == movie_id)
            .map(|index| index + 1)
    }

    async fn ticket_position(&self, ticket: u64) -> Option<usize> {
        self.items
            .lock()
            .await
            .iter()
            .position(|item| item.ticket == ticket)
            .map(|index| index + 1)
    }

    pub async fn contains(&self, movie_id: i64) -> bool {
        self.position(movie_id).await.is_some()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn entries(&self, average: Duration, max_concurrent: usize) -> Vec<QueueEntry> {
        let now = Instant::now();
        self.items
            .lock()
            .await
            .iter()
            .enumerate()
            .map(|(index, item)| QueueEntry {
                movie_id: item.movie_id,
                title: item.title.clone(),
                chat_id: item.chat_id,
                position: index + 1,
                estimated_wait: estimated_wait_text(index + 1, average, max_concurrent),
                waited_secs: now.saturating_duration_since(item.enqueued_at).as_secs(),
            })
            .collect()
    }
}

/// Watch one queued item until it leaves the queue
///
/// The `position_interval` tick only logs the current position and notices
/// when the item has left the queue. Presentation layers read live
/// positions through `DownloadManager::queue_position` and
/// `DownloadManager::queued_downloads`, which compute them on demand.
///
/// When `timeout` is set, the item is removed and its result channel
/// failed once the timeout elapses while it is still queued.
pub(crate) async fn watch_queued(
    queue: Arc<DownloadQueue>,
    movie_id: i64,
    ticket: u64,
    watch: CancellationToken,
    position_interval: Duration,
    timeout: Option<Duration>,
) {
    let mut position_tick = interval(position_interval);
    position_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let expired = async {
        match timeout {
            Some(timeout) => sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(expired);

    loop {
        tokio::select! {
            biased;

            _ = watch.cancelled() => return,

            _ = &mut expired => {
                let Some(timeout) = timeout else { return };
                if let Some(item) = queue.remove_ticket(ticket).await {
                    warn!("Movie {} timed out after {:?} in the download queue", movie_id, timeout);
                    item.channels.fail(ReelError::QueueTimeout { movie_id, timeout });
                }
                return;
            }

            _ = position_tick.tick() => match queue.ticket_position(ticket).await {
                Some(position) => debug!("Movie {} is at queue position {}", movie_id, position),
                None => return,
            },
        }
    }
}

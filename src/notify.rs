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


//! Lifecycle notifications for presentation layers
//!
//! The manager publishes `QueueNotification`s on one bounded channel
//! (capacity `NOTIFICATION_CAPACITY`). A slow consumer blocks producers,
//! including monitor tasks. `dispatch_notifications` is the usual consumer.
//!
//! Terminal results are not notifications: callers drain their
//! `DownloadHandle` and hand the result to a `CompletionNotifier`
//! (see `report_completion`).

use crate::download::DownloadHandle;
use crate::error::{ReelError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the shared notification channel
pub const NOTIFICATION_CAPACITY: usize = 100;

/// Event-specific part of a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    /// No free slot, the download waits in the queue
    Queued {
        position: usize,
        estimated_wait: String,
        max_concurrent: usize,
    },
    /// Promoted from the queue into an active slot
    Started,
    /// First episode of a series is on disk
    FirstEpisodeReady,
    /// Codecs cannot be played on the TV and the download was rejected
    VideoNotSupported,
}

/// One lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueNotification {
    pub chat_id: i64,
    pub movie_id: i64,
    pub title: String,
    #[serde(flatten)]
    pub kind: NotificationKind,
}

impl QueueNotification {
    pub fn new(chat_id: i64, movie_id: i64, title: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            chat_id,
            movie_id,
            title: title.into(),
            kind,
        }
    }
}

/// Receives queue and lifecycle events
#[async_trait]
pub trait QueueNotifier: Send + Sync {
    async fn on_queued(
        &self,
        chat_id: i64,
        movie_id: i64,
        title: &str,
        position: usize,
        estimated_wait: &str,
        max_concurrent: usize,
    );

    async fn on_started(&self, chat_id: i64, movie_id: i64, title: &str);

    async fn on_first_episode_ready(&self, chat_id: i64, movie_id: i64, title: &str);

    async fn on_video_not_supported(&self, chat_id: i64, movie_id: i64, title: &str);
}

/// Receives the terminal result of a download
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn on_completed(&self, chat_id: i64, movie_id: i64, title: &str);

    async fn on_stopped(&self, chat_id: i64, movie_id: i64, title: &str);

    async fn on_failed(&self, chat_id: i64, movie_id: i64, title: &str, error: &ReelError);
}

/// Queue notifier for resumed or background downloads
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopQueueNotifier;

#[async_trait]
impl QueueNotifier for NoopQueueNotifier {
    async fn on_queued(&self, _: i64, _: i64, _: &str, _: usize, _: &str, _: usize) {}

    async fn on_started(&self, _: i64, _: i64, _: &str) {}

    async fn on_first_episode_ready(&self, _: i64, _: i64, _: &str) {}

    async fn on_video_not_supported(&self, _: i64, _: i64, _: &str) {}
}

/// Completion notifier for resumed or background downloads
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCompletionNotifier;

#[async_trait]
impl CompletionNotifier for NoopCompletionNotifier {
    async fn on_completed(&self, _: i64, _: i64, _: &str) {}

    async fn on_stopped(&self, _: i64, _: i64, _: &str) {}

    async fn on_failed(&self, _: i64, _: i64, _: &str, _: &ReelError) {}
}

/// Drain the notification channel into a notifier until every sender is gone
pub async fn dispatch_notifications(
    mut notifications: mpsc::Receiver<QueueNotification>,
    notifier: Arc<dyn QueueNotifier>,
) {
    while let Some(event) = notifications.recv().await {
        let QueueNotification {
            chat_id,
            movie_id,
            title,
            kind,
        } = event;

        match kind {
            NotificationKind::Queued {
                position,
                estimated_wait,
                max_concurrent,
            } => {
                notifier
                    .on_queued(chat_id, movie_id, &title, position, &estimated_wait, max_concurrent)
                    .await
            }
            NotificationKind::Started => notifier.on_started(chat_id, movie_id, &title).await,
            NotificationKind::FirstEpisodeReady => {
                notifier.on_first_episode_ready(chat_id, movie_id, &title).await
            }
            NotificationKind::VideoNotSupported => {
                notifier.on_video_not_supported(chat_id, movie_id, &title).await
            }
        }
    }
    debug!("Notification channel closed");
}

/// Wait for a download to finish and report the result
///
/// Deletion-triggered stops are not reported. The terminal result is
/// returned unchanged.
pub async fn report_completion(
    handle: DownloadHandle,
    chat_id: i64,
    title: &str,
    notifier: &dyn CompletionNotifier,
) -> Result<()> {
    let movie_id = handle.movie_id;
    let result = handle.wait().await;

    match &result {
        Ok(()) => notifier.on_completed(chat_id, movie_id, title).await,
        Err(e) if e.is_silent() => {
            debug!("Movie {} was deleted while downloading, not reporting", movie_id)
        }
        Err(e) if e.is_stop() => notifier.on_stopped(chat_id, movie_id, title).await,
        Err(e) => notifier.on_failed(chat_id, movie_id, title, e).await,
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueueNotifier for Recorder {
        async fn on_queued(&self, _: i64, movie_id: i64, _: &str, position: usize, wait: &str, _: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("queued {} #{} {}", movie_id, position, wait));
        }

        async fn on_started(&self, _: i64, movie_id: i64, _: &str) {
            self.events.lock().unwrap().push(format!("started {}", movie_id));
        }

        async fn on_first_episode_ready(&self, _: i64, movie_id: i64, _: &str) {
            self.events.lock().unwrap().push(format!("episode {}", movie_id));
        }

        async fn on_video_not_supported(&self, _: i64, movie_id: i64, _: &str) {
            self.events.lock().unwrap().push(format!("unsupported {}", movie_id));
        }
    }

    #[test]
    fn test_notification_json_shape() {
        let event = QueueNotification::new(
            10,
            4,
            "Alien",
            NotificationKind::Queued {
                position: 2,
                estimated_wait: "~20 min".to_string(),
                max_concurrent: 3,
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "queued");
        assert_eq!(json["position"], 2);
        assert_eq!(json["movie_id"], 4);

        let back: QueueNotification = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn test_dispatch_in_order() {
        let (tx, rx) = mpsc::channel(NOTIFICATION_CAPACITY);
        let recorder = Arc::new(Recorder::default());

        tx.send(QueueNotification::new(
            1,
            7,
            "Heat",
            NotificationKind::Queued {
                position: 1,
                estimated_wait: "~30 min".to_string(),
                max_concurrent: 1,
            },
        ))
        .await
        .unwrap();
        tx.send(QueueNotification::new(1, 7, "Heat", NotificationKind::Started))
            .await
            .unwrap();
        tx.send(QueueNotification::new(1, 7, "Heat", NotificationKind::VideoNotSupported))
            .await
            .unwrap();
        drop(tx);

        dispatch_notifications(rx, recorder.clone()).await;

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["queued 7 #1 ~30 min", "started 7", "unsupported 7"]
        );
    }
}

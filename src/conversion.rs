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


//! TV-compatibility conversion gate
//!
//! After a download finishes the monitor asks the gate whether the movie can
//! be marked loaded right away, has to wait for a remux, or must be rejected.
//! The gate owns the remux; the manager only waits on the signal it returns
//! and keeps the concurrency slot until then.
//!
//! Codec probing and the remux itself are external (`MediaProbe`, `Remuxer`).

use crate::error::Result;
use crate::storage::{ConversionStatus, MovieStore, TvCompatibility};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Answer of the gate for a finished download
#[derive(Debug, Default)]
pub struct GateOutcome {
    /// Fires when a pending conversion finishes (successfully or not)
    pub wait: Option<oneshot::Receiver<()>>,

    /// Content cannot be played on the TV
    pub incompatible: bool,
}

impl GateOutcome {
    /// Nothing to wait for
    pub fn ready() -> Self {
        Self::default()
    }

    pub fn incompatible() -> Self {
        Self {
            wait: None,
            incompatible: true,
        }
    }

    pub fn must_wait(&self) -> bool {
        self.wait.is_some()
    }
}

/// Post-download stage the monitor gates on
#[async_trait]
pub trait ConversionGate: Send + Sync {
    /// Probe a partially downloaded series, returns `true` when incompatible
    async fn probe_early(&self, movie_id: i64) -> Result<bool>;

    /// Classify a finished download and start any conversion it needs
    async fn on_download_complete(&self, movie_id: i64) -> Result<GateOutcome>;
}

/// Gate that never converts and never rejects
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConversion;

#[async_trait]
impl ConversionGate for NoConversion {
    async fn probe_early(&self, _movie_id: i64) -> Result<bool> {
        Ok(false)
    }

    async fn on_download_complete(&self, _movie_id: i64) -> Result<GateOutcome> {
        Ok(GateOutcome::ready())
    }
}

/// Classifies a movie's codecs for old-TV playback (ffprobe wrapper)
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn classify(&self, movie_id: i64) -> Result<TvCompatibility>;
}

/// Re-muxes a movie into a TV-compatible container
#[async_trait]
pub trait Remuxer: Send + Sync {
    /// Run the remux, reporting percentages on `progress`
    async fn remux(&self, movie_id: i64, progress: mpsc::UnboundedSender<f64>) -> Result<()>;
}

/// Gate backed by a codec probe and a remuxer
pub struct TvConversionGate {
    store: Arc<dyn MovieStore>,
    probe: Arc<dyn MediaProbe>,
    remuxer: Arc<dyn Remuxer>,
}

impl TvConversionGate {
    pub fn new(
        store: Arc<dyn MovieStore>,
        probe: Arc<dyn MediaProbe>,
        remuxer: Arc<dyn Remuxer>,
    ) -> Self {
        Self {
            store,
            probe,
            remuxer,
        }
    }

    async fn classify(&self, movie_id: i64) -> Result<TvCompatibility> {
        let compatibility = self.probe.classify(movie_id).await?;
        if let Err(e) = self.store.update_tv_compatibility(movie_id, compatibility).await {
            warn!("Failed to record TV compatibility for movie {}: {}", movie_id, e);
        }
        Ok(compatibility)
    }

    fn spawn_remux(&self, movie_id: i64) -> oneshot::Receiver<()> {
        let (done_tx, done_rx) = oneshot::channel();
        let store = self.store.clone();
        let remuxer = self.remuxer.clone();

        tokio::spawn(async move {
            set_status(store.as_ref(), movie_id, ConversionStatus::Converting).await;

            let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
            let remux = remuxer.remux(movie_id, progress_tx);
            let track = async {
                while let Some(percentage) = progress_rx.recv().await {
                    if let Err(e) = store.update_conversion_percentage(movie_id, percentage).await {
                        warn!("Failed to update conversion progress for movie {}: {}", movie_id, e);
                    }
                }
            };
            let (result, ()) = tokio::join!(remux, track);

            match result {
                Ok(()) => {
                    info!("Conversion of movie {} finished", movie_id);
                    set_status(store.as_ref(), movie_id, ConversionStatus::Completed).await;
                }
                Err(e) => {
                    warn!("Conversion of movie {} failed: {}", movie_id, e);
                    set_status(store.as_ref(), movie_id, ConversionStatus::Failed).await;
                }
            }

            let _ = done_tx.send(());
        });

        done_rx
    }
}

async fn set_status(store: &dyn MovieStore, movie_id: i64, status: ConversionStatus) {
    if let Err(e) = store.update_conversion_status(movie_id, status).await {
        warn!("Failed to set conversion status of movie {} to {:?}: {}", movie_id, status, e);
    }
}

#[async_trait]
impl ConversionGate for TvConversionGate {
    async fn probe_early(&self, movie_id: i64) -> Result<bool> {
        Ok(self.classify(movie_id).await? == TvCompatibility::Incompatible)
    }

    async fn on_download_complete(&self, movie_id: i64) -> Result<GateOutcome> {
        match self.classify(movie_id).await? {
            TvCompatibility::Incompatible => Ok(GateOutcome::incompatible()),
            TvCompatibility::NeedsRemux => {
                set_status(self.store.as_ref(), movie_id, ConversionStatus::Pending).await;
                info!("Movie {} needs a remux for TV playback", movie_id);
                Ok(GateOutcome {
                    wait: Some(self.spawn_remux(movie_id)),
                    incompatible: false,
                })
            }
            TvCompatibility::Compatible | TvCompatibility::Unknown => Ok(GateOutcome::ready()),
        }
    }
}

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


//! Downloader capability consumed by the download manager
//!
//! One `Downloader` represents one acquisition (torrent, magnet or video URL).
//! The transfer itself is out of scope for this crate; implementations live
//! with the torrent client, the qBittorrent bridge and the yt-dlp wrapper.

use crate::error::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Files produced by a download
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadFiles {
    /// Files kept once the download finishes
    pub main: Vec<String>,

    /// Scratch files removed together with the movie
    pub temp: Vec<String>,
}

/// Streams returned by `Downloader::start_download`
///
/// - `progress` carries percentages (0.0 - 100.0); closing it ends the transfer
/// - `result` is the authoritative terminal signal; `Ok(())` or a dropped
///   sender both mean success
/// - `episodes` is only present for multi-file (series) downloads and
///   carries the number of completed episodes
pub struct DownloadStreams {
    pub progress: mpsc::Receiver<f64>,
    pub result: oneshot::Receiver<Result<()>>,
    pub episodes: Option<mpsc::Receiver<u32>>,
}

/// One in-flight acquisition
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Display title
    async fn title(&self) -> Result<String>;

    /// Main and temporary files of the download
    async fn files(&self) -> Result<DownloadFiles>;

    /// Total size in bytes
    async fn file_size(&self) -> Result<u64>;

    /// Declared episode count, 0 or 1 for a single file
    fn total_episodes(&self) -> u32;

    /// Start the transfer
    ///
    /// The token is cancelled when the manager gives up on the download.
    async fn start_download(&self, cancel: CancellationToken) -> Result<DownloadStreams>;

    /// Ask the transfer to stop
    ///
    /// Implementations report `ReelError::StoppedManually` on the result
    /// stream (or just close it) once stopped.
    async fn stop_download(&self) -> Result<()>;

    /// Whether the transfer ended because `stop_download` was called
    fn stopped_manually(&self) -> bool;
}

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


//! Download management
//!
//! - `downloader`: the capability each acquisition (torrent, magnet, video URL) implements
//! - `manager`: slot-bounded entry points (`start_download`, `stop_download`, ...)
//! - `queue`: FIFO of downloads waiting for a slot, and their watchers
//! - `monitor`: per-download state machine
//! - `progress`: clamping, stagnation detection, queue wait estimates

pub mod downloader;
pub mod manager;
pub mod monitor;
pub mod progress;
pub mod queue;

// Re-export commonly used types
pub use downloader::{DownloadFiles, DownloadStreams, Downloader};
pub use manager::{ActiveDownload, DownloadHandle, DownloadManager};
pub use monitor::{MonitorOutcome, StopReason};
pub use queue::QueueEntry;

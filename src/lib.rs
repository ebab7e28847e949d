//! ReelBot core
//!
//! Download orchestration for a self-hosted media-acquisition service:
//! slot-bounded concurrency, a FIFO queue with promotion, per-download
//! monitoring (stagnation, timeouts, cancellation) and an optional
//! TV-compatibility conversion gate.
//!
//! Chat and HTTP front ends, and the torrent/qBittorrent/yt-dlp downloaders,
//! plug in through `Downloader`, `QueueNotifier` and `CompletionNotifier`.

pub mod config;
pub mod conversion;
pub mod download;
pub mod error;
pub mod notify;
pub mod storage;

pub use config::{DownloadConfig, TvCompatibilityConfig};
pub use conversion::{ConversionGate, GateOutcome, MediaProbe, NoConversion, Remuxer, TvConversionGate};
pub use download::{
    ActiveDownload, DownloadFiles, DownloadHandle, DownloadManager, DownloadStreams, Downloader,
    MonitorOutcome, QueueEntry, StopReason,
};
pub use error::{ReelError, Result};
pub use notify::{
    dispatch_notifications, report_completion, CompletionNotifier, NoopCompletionNotifier,
    NoopQueueNotifier, NotificationKind, QueueNotification, QueueNotifier,
};
pub use storage::{Database, MemoryStore, Movie, MovieStore, NewMovie};

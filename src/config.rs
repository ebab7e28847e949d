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


//! Download configuration
//!
//! # Sources
//! - JSON file (`DownloadConfig::load`)
//! - `REELBOT_*` environment variables (`DownloadConfig::apply_env`)
//!
//! Durations are stored as integer milliseconds in JSON.

use crate::error::{ReelError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// TV-compatibility policy consumed by the conversion gate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TvCompatibilityConfig {
    /// Probe finished downloads and remux them for old-TV playback
    pub enabled: bool,

    /// Abort downloads whose codecs cannot be made TV-compatible
    pub reject_incompatible: bool,
}

/// Download configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Maximum concurrent downloads
    pub max_concurrent_downloads: usize,

    /// Absolute per-download timeout, zero disables it
    #[serde(with = "duration_ms")]
    pub download_timeout: Duration,

    /// Heartbeat cadence of the per-download monitor
    #[serde(with = "duration_ms")]
    pub progress_update_interval: Duration,

    /// How often the queue promoter looks for a free slot
    #[serde(with = "duration_ms")]
    pub queue_check_interval: Duration,

    /// How often a queued download recomputes its position
    #[serde(with = "duration_ms")]
    pub queue_position_interval: Duration,

    /// Typical duration of one download, used for queue wait estimates
    #[serde(with = "duration_ms")]
    pub average_download_duration: Duration,

    pub tv_compatibility: TvCompatibilityConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            download_timeout: Duration::ZERO,
            progress_update_interval: Duration::from_secs(30),
            queue_check_interval: Duration::from_secs(1),
            queue_position_interval: Duration::from_secs(10),
            average_download_duration: Duration::from_secs(30 * 60),
            tv_compatibility: TvCompatibilityConfig::default(),
        }
    }
}

impl DownloadConfig {
    /// Load configuration from a JSON file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ReelError::InvalidConfiguration(format!(
                "Failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: DownloadConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `REELBOT_*` environment variables on top of this config
    ///
    /// Recognized variables:
    /// - `REELBOT_MAX_CONCURRENT_DOWNLOADS`
    /// - `REELBOT_DOWNLOAD_TIMEOUT_SECS`
    /// - `REELBOT_PROGRESS_UPDATE_INTERVAL_SECS`
    /// - `REELBOT_TV_COMPATIBILITY` (`true`/`false`)
    /// - `REELBOT_REJECT_INCOMPATIBLE` (`true`/`false`)
    pub fn apply_env(mut self) -> Result<Self> {
        self.apply_vars(|key| std::env::var(key).ok())?;
        Ok(self)
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("REELBOT_MAX_CONCURRENT_DOWNLOADS") {
            self.max_concurrent_downloads = value.trim().parse()?;
        }
        if let Some(value) = lookup("REELBOT_DOWNLOAD_TIMEOUT_SECS") {
            self.download_timeout = Duration::from_secs(value.trim().parse()?);
        }
        if let Some(value) = lookup("REELBOT_PROGRESS_UPDATE_INTERVAL_SECS") {
            self.progress_update_interval = Duration::from_secs(value.trim().parse()?);
        }
        if let Some(value) = lookup("REELBOT_TV_COMPATIBILITY") {
            self.tv_compatibility.enabled = parse_flag("REELBOT_TV_COMPATIBILITY", &value)?;
        }
        if let Some(value) = lookup("REELBOT_REJECT_INCOMPATIBLE") {
            self.tv_compatibility.reject_incompatible =
                parse_flag("REELBOT_REJECT_INCOMPATIBLE", &value)?;
        }
        Ok(())
    }

    /// Check that the configuration can drive a download manager
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_downloads == 0 {
            return Err(ReelError::InvalidConfiguration(
                "max_concurrent_downloads must be greater than 0".to_string(),
            ));
        }
        if self.progress_update_interval.is_zero() {
            return Err(ReelError::InvalidConfiguration(
                "progress_update_interval must be greater than 0".to_string(),
            ));
        }
        if self.queue_check_interval.is_zero() || self.queue_position_interval.is_zero() {
            return Err(ReelError::InvalidConfiguration(
                "queue intervals must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute timeout, `None` when disabled
    pub fn timeout(&self) -> Option<Duration> {
        if self.download_timeout.is_zero() {
            None
        } else {
            Some(self.download_timeout)
        }
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ReelError::InvalidConfiguration(format!(
            "{} must be a boolean, got '{}'",
            name, other
        ))),
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

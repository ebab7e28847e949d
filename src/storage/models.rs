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


//! Database models for movie records
//!
//! Enums are persisted as integers (see `from_i32`), timestamps as RFC 3339 text.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// ENUMS
// ============================================================================

/// Result of probing a movie's codecs against old-TV playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum TvCompatibility {
    Unknown = 0,
    /// Plays as-is
    Compatible = 1,
    /// Plays after a remux into a supported container
    NeedsRemux = 2,
    /// Codecs cannot be played at all
    Incompatible = 3,
}

impl TvCompatibility {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => TvCompatibility::Compatible,
            2 => TvCompatibility::NeedsRemux,
            3 => TvCompatibility::Incompatible,
            _ => TvCompatibility::Unknown,
        }
    }
}

/// State of the TV-compatibility remux for a movie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ConversionStatus {
    None = 0,
    Pending = 1,
    Converting = 2,
    Completed = 3,
    Failed = 4,
}

impl ConversionStatus {
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => ConversionStatus::Pending,
            2 => ConversionStatus::Converting,
            3 => ConversionStatus::Completed,
            4 => ConversionStatus::Failed,
            _ => ConversionStatus::None,
        }
    }

    /// Check if the remux has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversionStatus::Completed | ConversionStatus::Failed)
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// A movie (or series) record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Movie {
    pub id: i64,
    pub name: String,
    pub file_size: i64,
    pub downloaded_percentage: f64,
    /// 0 or 1 means a single file
    pub total_episodes: i64,
    pub completed_episodes: i64,
    pub is_loaded: bool,
    pub tv_compatibility: i32,
    pub conversion_status: i32,
    pub conversion_percentage: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl Movie {
    pub fn tv_compatibility(&self) -> TvCompatibility {
        TvCompatibility::from_i32(self.tv_compatibility)
    }

    pub fn conversion_status(&self) -> ConversionStatus {
        ConversionStatus::from_i32(self.conversion_status)
    }

    /// Check if this record describes a multi-episode download
    pub fn is_series(&self) -> bool {
        self.total_episodes > 1
    }
}

/// A file belonging to a movie download
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MovieFile {
    pub id: i64,
    pub movie_id: i64,
    pub path: String,
    /// Temporary files are removed once the download is loaded
    pub is_temp: bool,
}

/// New movie for insertion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMovie {
    pub name: String,
    pub file_size: u64,
    pub total_episodes: u32,
    pub main_files: Vec<String>,
    pub temp_files: Vec<String>,
}

impl NewMovie {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_round_trip_through_i32() {
        for status in [
            ConversionStatus::None,
            ConversionStatus::Pending,
            ConversionStatus::Converting,
            ConversionStatus::Completed,
            ConversionStatus::Failed,
        ] {
            assert_eq!(ConversionStatus::from_i32(status as i32), status);
        }
        assert_eq!(TvCompatibility::from_i32(42), TvCompatibility::Unknown);
        assert!(ConversionStatus::Failed.is_terminal());
        assert!(!ConversionStatus::Converting.is_terminal());
    }
}

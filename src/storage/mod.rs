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


//! Database storage and models
//!
//! Movie records and progress counters live in SQLite, accessed with sqlx.
//! The download manager only sees the `MovieStore` trait, so an in-memory
//! store can stand in for tests and dry runs.
//!
//! # Database Schema
//! - Movies: one row per requested download (title, size, progress, flags)
//! - MovieFiles: main and temporary files of each download
//!
//! # Usage Example
//! ```no_run
//! use reelbot_core::storage::{Database, MovieStore, NewMovie};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new("./reelbot.db").await?;
//! let movie_id = db.create_movie(&NewMovie::new("Blade Runner")).await?;
//! db.update_downloaded_percentage(movie_id, 12.5).await?;
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod memory;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod store;

// Re-export commonly used types
pub use database::Database;
pub use memory::MemoryStore;
pub use models::{ConversionStatus, Movie, MovieFile, NewMovie, TvCompatibility};
pub use store::MovieStore;

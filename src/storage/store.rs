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


//! Persistence seam used by the download manager and the conversion gate

use crate::error::Result;
use crate::storage::database::Database;
use crate::storage::models::{ConversionStatus, Movie, NewMovie, TvCompatibility};
use crate::storage::queries;
use async_trait::async_trait;

/// Storage for movie records and progress counters
#[async_trait]
pub trait MovieStore: Send + Sync {
    /// Insert a new movie record, returning its id
    async fn create_movie(&self, movie: &NewMovie) -> Result<i64>;

    async fn get_movie(&self, movie_id: i64) -> Result<Option<Movie>>;

    async fn list_movies(&self) -> Result<Vec<Movie>>;

    async fn delete_movie(&self, movie_id: i64) -> Result<()>;

    async fn update_downloaded_percentage(&self, movie_id: i64, percentage: f64) -> Result<()>;

    async fn update_episodes_progress(&self, movie_id: i64, completed_episodes: u32) -> Result<()>;

    /// Mark the movie as downloaded and ready to watch
    async fn set_loaded(&self, movie_id: i64) -> Result<()>;

    async fn update_tv_compatibility(
        &self,
        movie_id: i64,
        compatibility: TvCompatibility,
    ) -> Result<()>;

    async fn update_conversion_status(&self, movie_id: i64, status: ConversionStatus) -> Result<()>;

    async fn update_conversion_percentage(&self, movie_id: i64, percentage: f64) -> Result<()>;
}

#[async_trait]
impl MovieStore for Database {
    async fn create_movie(&self, movie: &NewMovie) -> Result<i64> {
        queries::insert_movie(self.pool(), movie).await
    }

    async fn get_movie(&self, movie_id: i64) -> Result<Option<Movie>> {
        queries::find_movie_by_id(self.pool(), movie_id).await
    }

    async fn list_movies(&self) -> Result<Vec<Movie>> {
        queries::list_movies(self.pool()).await
    }

    async fn delete_movie(&self, movie_id: i64) -> Result<()> {
        queries::delete_movie(self.pool(), movie_id).await
    }

    async fn update_downloaded_percentage(&self, movie_id: i64, percentage: f64) -> Result<()> {
        queries::update_downloaded_percentage(self.pool(), movie_id, percentage).await
    }

    async fn update_episodes_progress(&self, movie_id: i64, completed_episodes: u32) -> Result<()> {
        queries::update_episodes_progress(self.pool(), movie_id, completed_episodes).await
    }

    async fn set_loaded(&self, movie_id: i64) -> Result<()> {
        queries::set_loaded(self.pool(), movie_id).await
    }

    async fn update_tv_compatibility(
        &self,
        movie_id: i64,
        compatibility: TvCompatibility,
    ) -> Result<()> {
        queries::update_tv_compatibility(self.pool(), movie_id, compatibility).await
    }

    async fn update_conversion_status(&self, movie_id: i64, status: ConversionStatus) -> Result<()> {
        queries::update_conversion_status(self.pool(), movie_id, status).await
    }

    async fn update_conversion_percentage(&self, movie_id: i64, percentage: f64) -> Result<()> {
        queries::update_conversion_percentage(self.pool(), movie_id, percentage).await
    }
}

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


//! In-process movie store
//!
//! Same contract as the SQLite store, without files. Used by tests and by
//! the CLI when no database path is given.

use crate::error::{ReelError, Result};
use crate::storage::models::{ConversionStatus, Movie, NewMovie, TvCompatibility};
use crate::storage::store::MovieStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: i64,
    movies: BTreeMap<i64, Movie>,
}

/// Movie store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<F>(&self, movie_id: i64, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Movie),
    {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReelError::internal("memory store lock poisoned"))?;
        let movie = inner
            .movies
            .get_mut(&movie_id)
            .ok_or_else(|| ReelError::not_found(format!("Movie {}", movie_id)))?;
        apply(movie);
        movie.updated_at = Utc::now().to_rfc3339();
        Ok(())
    }

    fn read<T, F>(&self, read: F) -> Result<T>
    where
        F: FnOnce(&MemoryInner) -> T,
    {
        let inner = self
            .inner
            .lock()
            .map_err(|_| ReelError::internal("memory store lock poisoned"))?;
        Ok(read(&inner))
    }
}

#[async_trait]
impl MovieStore for MemoryStore {
    async fn create_movie(&self, movie: &NewMovie) -> Result<i64> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReelError::internal("memory store lock poisoned"))?;
        inner.next_id += 1;
        let id = inner.next_id;
        let now = Utc::now().to_rfc3339();
        inner.movies.insert(
            id,
            Movie {
                id,
                name: movie.name.clone(),
                file_size: movie.file_size as i64,
                downloaded_percentage: 0.0,
                total_episodes: movie.total_episodes as i64,
                completed_episodes: 0,
                is_loaded: false,
                tv_compatibility: TvCompatibility::Unknown as i32,
                conversion_status: ConversionStatus::None as i32,
                conversion_percentage: 0.0,
                created_at: now.clone(),
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn get_movie(&self, movie_id: i64) -> Result<Option<Movie>> {
        self.read(|inner| inner.movies.get(&movie_id).cloned())
    }

    async fn list_movies(&self) -> Result<Vec<Movie>> {
        self.read(|inner| inner.movies.values().rev().cloned().collect())
    }

    async fn delete_movie(&self, movie_id: i64) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| ReelError::internal("memory store lock poisoned"))?;
        inner.movies.remove(&movie_id);
        Ok(())
    }

    async fn update_downloaded_percentage(&self, movie_id: i64, percentage: f64) -> Result<()> {
        self.update(movie_id, |m| m.downloaded_percentage = percentage)
    }

    async fn update_episodes_progress(&self, movie_id: i64, completed_episodes: u32) -> Result<()> {
        self.update(movie_id, |m| m.completed_episodes = completed_episodes as i64)
    }

    async fn set_loaded(&self, movie_id: i64) -> Result<()> {
        self.update(movie_id, |m| {
            m.is_loaded = true;
            m.downloaded_percentage = 100.0;
        })
    }

    async fn update_tv_compatibility(
        &self,
        movie_id: i64,
        compatibility: TvCompatibility,
    ) -> Result<()> {
        self.update(movie_id, |m| m.tv_compatibility = compatibility as i32)
    }

    async fn update_conversion_status(&self, movie_id: i64, status: ConversionStatus) -> Result<()> {
        self.update(movie_id, |m| m.conversion_status = status as i32)
    }

    async fn update_conversion_percentage(&self, movie_id: i64, percentage: f64) -> Result<()> {
        self.update(movie_id, |m| m.conversion_percentage = percentage)
    }
}

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


//! Database query functions
//!
//! Repository functions over the `Movies` and `MovieFiles` tables.
//! All functions take the pool explicitly so they can be composed in
//! transactions or called from `MovieStore` implementations.

use crate::error::Result;
use crate::storage::models::*;
use sqlx::SqlitePool;

// ============================================================================
// MOVIE QUERIES
// ============================================================================

/// Insert a new movie together with its file list
///
/// Returns the id of the inserted movie.
pub async fn insert_movie(pool: &SqlitePool, movie: &NewMovie) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO Movies (name, file_size, total_episodes)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(&movie.name)
    .bind(movie.file_size as i64)
    .bind(movie.total_episodes as i64)
    .execute(&mut *tx)
    .await?;

    let movie_id = result.last_insert_rowid();

    let files = movie
        .main_files
        .iter()
        .map(|path| (path, false))
        .chain(movie.temp_files.iter().map(|path| (path, true)));

    for (path, is_temp) in files {
        sqlx::query("INSERT INTO MovieFiles (movie_id, path, is_temp) VALUES (?, ?, ?)")
            .bind(movie_id)
            .bind(path)
            .bind(is_temp)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(movie_id)
}

/// Find movie by id
pub async fn find_movie_by_id(pool: &SqlitePool, movie_id: i64) -> Result<Option<Movie>> {
    let movie = sqlx::query_as::<_, Movie>("SELECT * FROM Movies WHERE id = ?")
        .bind(movie_id)
        .fetch_optional(pool)
        .await?;

    Ok(movie)
}

/// List all movies, newest first
pub async fn list_movies(pool: &SqlitePool) -> Result<Vec<Movie>> {
    let movies = sqlx::query_as::<_, Movie>("SELECT * FROM Movies ORDER BY id DESC")
        .fetch_all(pool)
        .await?;

    Ok(movies)
}

/// Delete a movie (and its files via CASCADE)
pub async fn delete_movie(pool: &SqlitePool, movie_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM Movies WHERE id = ?")
        .bind(movie_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Update download progress (0.0 - 100.0)
pub async fn update_downloaded_percentage(
    pool: &SqlitePool,
    movie_id: i64,
    percentage: f64,
) -> Result<()> {
    sqlx::query("UPDATE Movies SET downloaded_percentage = ? WHERE id = ?")
        .bind(percentage)
        .bind(movie_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Update the number of finished episodes of a series
pub async fn update_episodes_progress(
    pool: &SqlitePool,
    movie_id: i64,
    completed_episodes: u32,
) -> Result<()> {
    sqlx::query("UPDATE Movies SET completed_episodes = ? WHERE id = ?")
        .bind(completed_episodes as i64)
        .bind(movie_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Mark a movie as fully downloaded and ready to watch
pub async fn set_loaded(pool: &SqlitePool, movie_id: i64) -> Result<()> {
    sqlx::query("UPDATE Movies SET is_loaded = 1, downloaded_percentage = 100.0 WHERE id = ?")
        .bind(movie_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record the TV-compatibility classification
pub async fn update_tv_compatibility(
    pool: &SqlitePool,
    movie_id: i64,
    compatibility: TvCompatibility,
) -> Result<()> {
    sqlx::query("UPDATE Movies SET tv_compatibility = ? WHERE id = ?")
        .bind(compatibility as i32)
        .bind(movie_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Update remux status
pub async fn update_conversion_status(
    pool: &SqlitePool,
    movie_id: i64,
    status: ConversionStatus,
) -> Result<()> {
    sqlx::query("UPDATE Movies SET conversion_status = ? WHERE id = ?")
        .bind(status as i32)
        .bind(movie_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Update remux progress (0.0 - 100.0)
pub async fn update_conversion_percentage(
    pool: &SqlitePool,
    movie_id: i64,
    percentage: f64,
) -> Result<()> {
    sqlx::query("UPDATE Movies SET conversion_percentage = ? WHERE id = ?")
        .bind(percentage)
        .bind(movie_id)
        .execute(pool)
        .await?;

    Ok(())
}

// ============================================================================
// MOVIE FILE QUERIES
// ============================================================================

/// List files of a movie, main files first
pub async fn list_movie_files(pool: &SqlitePool, movie_id: i64) -> Result<Vec<MovieFile>> {
    let files = sqlx::query_as::<_, MovieFile>(
        "SELECT * FROM MovieFiles WHERE movie_id = ? ORDER BY is_temp, id",
    )
    .bind(movie_id)
    .fetch_all(pool)
    .await?;

    Ok(files)
}

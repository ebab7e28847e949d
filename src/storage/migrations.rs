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


//! Database migrations
//!
//! Migrations are runtime SQL tracked in the `_migrations` table, so no
//! build-time database connection is needed.

use crate::error::Result;
use sqlx::{Executor, SqlitePool};

/// Run all database migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Create migrations tracking table
    create_migrations_table(pool).await?;

    // Run all migrations in order
    run_migration(pool, 1, "initial_schema", create_initial_schema(pool)).await?;
    run_migration(pool, 2, "tv_conversion", add_tv_conversion_columns(pool)).await?;

    Ok(())
}

/// Create migrations tracking table
async fn create_migrations_table(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .await?;

    Ok(())
}

/// Run a single migration if it hasn't been applied yet
async fn run_migration(
    pool: &SqlitePool,
    id: i32,
    name: &str,
    migration_fn: impl std::future::Future<Output = Result<()>>,
) -> Result<()> {
    let applied: Option<i32> = sqlx::query_scalar("SELECT id FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    if applied.is_some() {
        return Ok(());
    }

    migration_fn.await?;

    sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

/// Movies and their files
async fn create_initial_schema(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
-- Movies table: one row per requested download (movie or whole series)
CREATE TABLE IF NOT EXISTS Movies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    file_size INTEGER NOT NULL DEFAULT 0,

    -- Progress
    downloaded_percentage REAL NOT NULL DEFAULT 0.0,
    total_episodes INTEGER NOT NULL DEFAULT 0,  -- 0 or 1 = single file
    completed_episodes INTEGER NOT NULL DEFAULT 0,
    is_loaded INTEGER NOT NULL DEFAULT 0,

    -- Timestamps
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- MovieFiles table: main (kept) and temp (removed after load) files
CREATE TABLE IF NOT EXISTS MovieFiles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    movie_id INTEGER NOT NULL,
    path TEXT NOT NULL,
    is_temp INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (movie_id) REFERENCES Movies(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_movie_files_movie ON MovieFiles(movie_id);
CREATE INDEX IF NOT EXISTS idx_movies_is_loaded ON Movies(is_loaded);

CREATE TRIGGER IF NOT EXISTS update_movies_timestamp
AFTER UPDATE ON Movies
FOR EACH ROW
WHEN NEW.updated_at = OLD.updated_at
BEGIN
    UPDATE Movies SET updated_at = CURRENT_TIMESTAMP WHERE id = NEW.id;
END;
        "#,
    )
    .await?;

    Ok(())
}

/// TV-compatibility classification and remux progress
async fn add_tv_conversion_columns(pool: &SqlitePool) -> Result<()> {
    pool.execute(
        r#"
-- TvCompatibility enum (Unknown=0, Compatible=1, NeedsRemux=2, Incompatible=3)
ALTER TABLE Movies ADD COLUMN tv_compatibility INTEGER NOT NULL DEFAULT 0;
-- ConversionStatus enum (None=0, Pending=1, Converting=2, Completed=3, Failed=4)
ALTER TABLE Movies ADD COLUMN conversion_status INTEGER NOT NULL DEFAULT 0;
ALTER TABLE Movies ADD COLUMN conversion_percentage REAL NOT NULL DEFAULT 0.0;
        "#,
    )
    .await?;

    Ok(())
}

use crate::error::AppError;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};

pub const DB_FILENAME_ENV: &str = "TICK_DB_FILENAME";
const DEFAULT_DB_FILENAME: &str = "tick_feed.db";
const DEFAULT_DATA_DIR: &str = "data";

fn resolve_db_filename() -> String {
    std::env::var(DB_FILENAME_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_DB_FILENAME.to_string())
}

/// An explicit path wins; otherwise the env filename inside `./data`.
pub fn resolve_db_path(explicit: Option<PathBuf>) -> Result<PathBuf, AppError> {
    let path = match explicit {
        Some(path) => path,
        None => {
            let mut base_dir = std::env::current_dir()?;
            base_dir.push(DEFAULT_DATA_DIR);
            base_dir.push(resolve_db_filename());
            base_dir
        }
    };

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(path)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn initialize_pool_from_path(path: &Path) -> Result<SqlitePool, AppError> {
    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePool::connect_with(connect_options).await?;
    run_migrations(&pool).await?;

    Ok(pool)
}

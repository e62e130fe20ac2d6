use crate::error::AppError;
use crate::market::calendar::TradingDayRecord;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use std::time::{SystemTime, UNIX_EPOCH};

fn now_unix_ms() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_millis().min(i64::MAX as u128) as i64,
        Err(_) => 0,
    }
}

fn bool_to_sqlite(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

fn map_trading_day_row(row: &sqlx::sqlite::SqliteRow) -> Result<TradingDayRecord, AppError> {
    let trade_date: String = row.try_get("trade_date")?;
    let is_trading_day: i64 = row.try_get("is_trading_day")?;

    let date = NaiveDate::parse_from_str(&trade_date, "%Y-%m-%d")?;

    Ok(TradingDayRecord {
        date,
        is_trading_day: is_trading_day != 0,
    })
}

pub async fn load_trading_year(
    pool: &SqlitePool,
    year: i32,
) -> Result<Vec<TradingDayRecord>, AppError> {
    let rows = sqlx::query(
        "SELECT trade_date, is_trading_day FROM trading_days WHERE year = ? ORDER BY trade_date ASC",
    )
    .bind(i64::from(year))
    .fetch_all(pool)
    .await?;

    rows.iter().map(map_trading_day_row).collect()
}

/// Replaces the stored copy of `year` with `records`.
pub async fn save_trading_year(
    pool: &SqlitePool,
    year: i32,
    records: &[TradingDayRecord],
) -> Result<(), AppError> {
    let updated_at_ms = now_unix_ms();
    let mut transaction = pool.begin().await?;

    sqlx::query("DELETE FROM trading_days WHERE year = ?")
        .bind(i64::from(year))
        .execute(&mut *transaction)
        .await?;

    for record in records {
        sqlx::query(
            "INSERT INTO trading_days (trade_date, year, is_trading_day, updated_at_ms) VALUES (?, ?, ?, ?) \
             ON CONFLICT(trade_date) DO UPDATE SET year=excluded.year, is_trading_day=excluded.is_trading_day, updated_at_ms=excluded.updated_at_ms",
        )
        .bind(record.date.format("%Y-%m-%d").to_string())
        .bind(i64::from(year))
        .bind(bool_to_sqlite(record.is_trading_day))
        .bind(updated_at_ms)
        .execute(&mut *transaction)
        .await?;
    }

    transaction.commit().await?;
    Ok(())
}

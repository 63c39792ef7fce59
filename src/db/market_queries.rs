use std::collections::HashSet;

use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, error};

use crate::db::{global_id_queries, BATCH_CHUNK_SIZE};
use crate::models::{owning_table, DailyBar, NewTicker, SmaPoint, Ticker};

const TICKER_COLUMNS: &str =
    "id, ticker, name, primary_exchange, market, ticker_type, currency, active, last_audit, created_at";

pub async fn find_ticker(pool: &PgPool, symbol: &str) -> Result<Option<Ticker>, sqlx::Error> {
    sqlx::query_as::<_, Ticker>(&format!("SELECT {} FROM core_ticker WHERE ticker = $1", TICKER_COLUMNS))
        .bind(symbol)
        .fetch_optional(pool)
        .await
}

pub async fn find_tickers_by_market(pool: &PgPool, market: &str) -> Result<Vec<Ticker>, sqlx::Error> {
    sqlx::query_as::<_, Ticker>(&format!(
        "SELECT {} FROM core_ticker WHERE market = $1 ORDER BY ticker",
        TICKER_COLUMNS
    ))
    .bind(market)
    .fetch_all(pool)
    .await
}

/// Each ticker gets its own global id, allocated on the same transaction.
pub async fn create_tickers(pool: &PgPool, tickers: &[NewTicker]) -> Result<u64, sqlx::Error> {
    if tickers.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut created = 0u64;

    for t in tickers {
        let gid = global_id_queries::allocate(&mut *tx, owning_table::TICKER, "Ticker").await?;
        let result = sqlx::query(
            r#"
            INSERT INTO core_ticker
                (id, ticker, name, primary_exchange, market, ticker_type, currency, active, last_audit, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            "#,
        )
        .bind(gid.id)
        .bind(&t.ticker)
        .bind(&t.name)
        .bind(&t.primary_exchange)
        .bind(&t.market)
        .bind(&t.ticker_type)
        .bind(&t.currency)
        .bind(t.active)
        .bind(t.audited_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Failed to insert ticker {}: {}", t.ticker, e);
            e
        })?;
        created += result.rows_affected();
    }

    tx.commit().await?;
    Ok(created)
}

pub async fn update_tickers(pool: &PgPool, tickers: &[Ticker]) -> Result<u64, sqlx::Error> {
    if tickers.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut updated = 0u64;

    for t in tickers {
        let result = sqlx::query(
            r#"
            UPDATE core_ticker
            SET name = $2,
                primary_exchange = $3,
                market = $4,
                ticker_type = $5,
                currency = $6,
                active = $7,
                last_audit = $8
            WHERE id = $1
            "#,
        )
        .bind(t.id)
        .bind(&t.name)
        .bind(&t.primary_exchange)
        .bind(&t.market)
        .bind(&t.ticker_type)
        .bind(&t.currency)
        .bind(t.active)
        .bind(t.last_audit)
        .execute(&mut *tx)
        .await?;
        updated += result.rows_affected();
    }

    tx.commit().await?;
    Ok(updated)
}

pub async fn daily_bar_dates(pool: &PgPool, ticker_id: i64) -> Result<HashSet<NaiveDate>, sqlx::Error> {
    let dates = sqlx::query_scalar::<_, NaiveDate>("SELECT date FROM ticker_daily_agg WHERE ticker_id = $1")
        .bind(ticker_id)
        .fetch_all(pool)
        .await?;
    Ok(dates.into_iter().collect())
}

/// Multi-row insert in chunks; rows already present for (ticker_id, date) are skipped.
pub async fn insert_daily_bars(pool: &PgPool, bars: &[DailyBar]) -> Result<u64, sqlx::Error> {
    let mut inserted = 0u64;

    for chunk in bars.chunks(BATCH_CHUNK_SIZE) {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO ticker_daily_agg (ticker_id, date, open, high, low, close, volume, timestamp) ",
        );
        query_builder.push_values(chunk, |mut b, bar| {
            b.push_bind(bar.ticker_id)
                .push_bind(bar.date)
                .push_bind(bar.open)
                .push_bind(bar.high)
                .push_bind(bar.low)
                .push_bind(bar.close)
                .push_bind(bar.volume)
                .push_bind(bar.timestamp);
        });
        query_builder.push(" ON CONFLICT (ticker_id, date) DO NOTHING");

        let result = query_builder.build().execute(pool).await?;
        inserted += result.rows_affected();
    }

    debug!("Inserted {} of {} daily aggregates", inserted, bars.len());
    Ok(inserted)
}

pub async fn find_sma(pool: &PgPool, ticker_id: i64) -> Result<Vec<SmaPoint>, sqlx::Error> {
    sqlx::query_as::<_, SmaPoint>(
        r#"
        SELECT ticker_id, value, series_type, timespan, window_size, date, timestamp
        FROM ticker_sma
        WHERE ticker_id = $1
        ORDER BY timestamp ASC
        "#,
    )
    .bind(ticker_id)
    .fetch_all(pool)
    .await
}

pub async fn insert_sma(pool: &PgPool, points: &[SmaPoint]) -> Result<u64, sqlx::Error> {
    let mut inserted = 0u64;

    for chunk in points.chunks(BATCH_CHUNK_SIZE) {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO ticker_sma (ticker_id, value, series_type, timespan, window_size, date, timestamp) ",
        );
        query_builder.push_values(chunk, |mut b, p| {
            b.push_bind(p.ticker_id)
                .push_bind(p.value)
                .push_bind(&p.series_type)
                .push_bind(&p.timespan)
                .push_bind(p.window_size)
                .push_bind(p.date)
                .push_bind(p.timestamp);
        });
        query_builder.push(" ON CONFLICT (ticker_id, timespan, window_size, series_type, timestamp) DO NOTHING");

        let result = query_builder.build().execute(pool).await?;
        inserted += result.rows_affected();
    }

    Ok(inserted)
}

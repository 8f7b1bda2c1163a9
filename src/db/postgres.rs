use super::{candle_table, FillRecord, SignalStore};
use crate::models::{
    Candle, CandleRecord, IndicatorRow, NewSignal, Position, Signal, SignalKind, TradeLog,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};

const SIGNAL_COLUMNS: &str =
    "id, ticker, signal_type, signal_date, is_active, parent_id, created_at";

/// Postgres-backed signal log, candle history and positions
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to Postgres and run migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(std::time::Duration::from_secs(10))
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
            .bind(table)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("present"))
    }

    /// Candle table name, or `None` when nothing was ever loaded for it
    async fn existing_table(&self, instrument: &str) -> Result<Option<String>> {
        let table = candle_table(instrument)?;
        if self.table_exists(&table).await? {
            Ok(Some(table))
        } else {
            Ok(None)
        }
    }

    #[cfg(test)]
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query(
            "TRUNCATE signal_executions, signals_sent, trade_logs, positions, signals_log RESTART IDENTITY CASCADE",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn to_decimal(value: f64) -> Result<Decimal> {
    Decimal::from_f64(value).ok_or_else(|| Error::Invalid(format!("{} is not representable", value)))
}

fn from_decimal(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn signal_from_row(row: &PgRow) -> Result<Signal> {
    let kind: String = row.get("signal_type");
    Ok(Signal {
        id: row.get("id"),
        instrument: row.get("ticker"),
        kind: kind.parse()?,
        date: row.get("signal_date"),
        is_active: row.get("is_active"),
        parent_id: row.get("parent_id"),
        created_at: row.get("created_at"),
    })
}

fn indicator_from_row(row: &PgRow) -> IndicatorRow {
    IndicatorRow {
        date: row.get("date"),
        open: row.get("open"),
        high: row.get("high"),
        low: row.get("low"),
        close: row.get("close"),
        volume: row.get("volume"),
        sma: row.get("sma"),
        upper_band: row.get("upper_band"),
        lower_band: row.get("lower_band"),
    }
}

fn position_from_row(row: &PgRow) -> Position {
    let average_price: Option<Decimal> = row.get("average_price");
    Position {
        instrument: row.get("ticker"),
        average_price: average_price.map(from_decimal),
        quantity: row.get("quantity"),
        in_market: row.get("in_market"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn trade_from_row(row: &PgRow) -> Result<TradeLog> {
    let kind: String = row.get("trade_type");
    let price: Decimal = row.get("price");
    let amount: Decimal = row.get("amount");
    let profit: Option<Decimal> = row.get("profit");
    let timestamp: DateTime<Utc> = row.get("timestamp");
    Ok(TradeLog {
        instrument: row.get("ticker"),
        kind: kind.parse()?,
        price: from_decimal(price),
        quantity: row.get("quantity"),
        amount: from_decimal(amount),
        profit: profit.map(from_decimal),
        timestamp,
    })
}

#[async_trait]
impl SignalStore for PostgresStore {
    async fn ensure_instrument(&self, instrument: &str) -> Result<()> {
        let table = candle_table(instrument)?;
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                date DATE PRIMARY KEY,
                open DOUBLE PRECISION NOT NULL,
                high DOUBLE PRECISION NOT NULL,
                low DOUBLE PRECISION NOT NULL,
                close DOUBLE PRECISION NOT NULL,
                volume BIGINT NOT NULL,
                sma DOUBLE PRECISION,
                std DOUBLE PRECISION,
                upper_band DOUBLE PRECISION,
                lower_band DOUBLE PRECISION
            )
            "#
        );
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn last_candle_date(&self, instrument: &str) -> Result<Option<NaiveDate>> {
        let Some(table) = self.existing_table(instrument).await? else {
            return Ok(None);
        };
        let row = sqlx::query(&format!("SELECT MAX(date) AS last FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("last"))
    }

    async fn closes_before(
        &self,
        instrument: &str,
        date: NaiveDate,
        limit: usize,
    ) -> Result<Vec<f64>> {
        let Some(table) = self.existing_table(instrument).await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(&format!(
            "SELECT close FROM {table} WHERE date < $1 ORDER BY date DESC LIMIT $2"
        ))
        .bind(date)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut closes: Vec<f64> = rows.iter().map(|r| r.get("close")).collect();
        closes.reverse();
        Ok(closes)
    }

    async fn insert_candles(&self, instrument: &str, records: &[CandleRecord]) -> Result<usize> {
        let table = candle_table(instrument)?;
        let sql = format!(
            r#"
            INSERT INTO {table} (date, open, high, low, close, volume, sma, std, upper_band, lower_band)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (date) DO NOTHING
            "#
        );

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for record in records {
            let Candle {
                date,
                open,
                high,
                low,
                close,
                volume,
                ..
            } = &record.candle;
            let bands = record.bands.as_ref();
            let result = sqlx::query(&sql)
                .bind(date)
                .bind(open)
                .bind(high)
                .bind(low)
                .bind(close)
                .bind(volume)
                .bind(bands.map(|b| b.sma))
                .bind(bands.map(|b| b.std))
                .bind(bands.map(|b| b.upper))
                .bind(bands.map(|b| b.lower))
                .execute(&mut *tx)
                .await?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await?;

        tracing::debug!("Stored {} new candles in {}", inserted, table);
        Ok(inserted)
    }

    async fn recent_rows(
        &self,
        instrument: &str,
        as_of: NaiveDate,
        limit: usize,
    ) -> Result<Vec<IndicatorRow>> {
        let Some(table) = self.existing_table(instrument).await? else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(&format!(
            r#"
            SELECT date, open, high, low, close, volume, sma, upper_band, lower_band
            FROM {table}
            WHERE date <= $1
              AND sma IS NOT NULL AND upper_band IS NOT NULL AND lower_band IS NOT NULL
            ORDER BY date DESC
            LIMIT $2
            "#
        ))
        .bind(as_of)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<IndicatorRow> = rows.iter().map(indicator_from_row).collect();
        out.reverse();
        Ok(out)
    }

    async fn row_on(&self, instrument: &str, date: NaiveDate) -> Result<Option<IndicatorRow>> {
        let Some(table) = self.existing_table(instrument).await? else {
            return Ok(None);
        };
        let row = sqlx::query(&format!(
            r#"
            SELECT date, open, high, low, close, volume, sma, upper_band, lower_band
            FROM {table}
            WHERE date = $1 AND sma IS NOT NULL AND upper_band IS NOT NULL AND lower_band IS NOT NULL
            "#
        ))
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(indicator_from_row))
    }

    async fn insert_signal(&self, signal: &NewSignal) -> Result<Option<Signal>> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO signals_log (ticker, signal_type, signal_date, parent_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING {SIGNAL_COLUMNS}
            "#
        ))
        .bind(&signal.instrument)
        .bind(signal.kind.as_str())
        .bind(signal.date)
        .bind(signal.parent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    async fn has_active_attention(&self, instrument: &str, date: NaiveDate) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM signals_log
                WHERE ticker = $1 AND signal_type = 'ATTENTION' AND signal_date = $2 AND is_active
            ) AS found
            "#,
        )
        .bind(instrument)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("found"))
    }

    async fn buy_for_parent(&self, parent_id: i64) -> Result<Option<Signal>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SIGNAL_COLUMNS} FROM signals_log
            WHERE signal_type = 'BUY' AND parent_id = $1
            ORDER BY id
            LIMIT 1
            "#
        ))
        .bind(parent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    async fn has_signal_on(
        &self,
        instrument: &str,
        kind: SignalKind,
        date: NaiveDate,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM signals_log
                WHERE ticker = $1 AND signal_type = $2 AND signal_date = $3
            ) AS found
            "#,
        )
        .bind(instrument)
        .bind(kind.as_str())
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("found"))
    }

    async fn active_attentions(&self) -> Result<Vec<Signal>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SIGNAL_COLUMNS} FROM signals_log
            WHERE signal_type = 'ATTENTION' AND is_active
            ORDER BY ticker, signal_date, id
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn latest_active(&self, instrument: &str, kind: SignalKind) -> Result<Option<Signal>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SIGNAL_COLUMNS} FROM signals_log
            WHERE ticker = $1 AND signal_type = $2 AND is_active
            ORDER BY signal_date DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(instrument)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(signal_from_row).transpose()
    }

    async fn deactivate_lineage(&self, instrument: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE signals_log SET is_active = FALSE
            WHERE ticker = $1 AND is_active
              AND signal_type IN ('ATTENTION', 'BUY', 'ACCUMULATE')
            "#,
        )
        .bind(instrument)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn pending_executions(&self, instrument: &str, since: NaiveDate) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.ticker, s.signal_type, s.signal_date, s.is_active, s.parent_id, s.created_at
            FROM signals_log s
            LEFT JOIN signal_executions e ON e.signal_id = s.id
            WHERE s.ticker = $1
              AND s.signal_date >= $2
              AND e.signal_id IS NULL
              AND ((s.signal_type IN ('BUY', 'ACCUMULATE') AND s.is_active) OR s.signal_type = 'SELL')
            ORDER BY s.id
            "#,
        )
        .bind(instrument)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn unsent_signals(&self) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.ticker, s.signal_type, s.signal_date, s.is_active, s.parent_id, s.created_at
            FROM signals_log s
            LEFT JOIN signals_sent m ON m.signal_id = s.id
            WHERE s.is_active AND m.signal_id IS NULL
            ORDER BY s.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn mark_sent(&self, signal_id: i64) -> Result<()> {
        sqlx::query("INSERT INTO signals_sent (signal_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(signal_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn position(&self, instrument: &str) -> Result<Option<Position>> {
        let row = sqlx::query(
            r#"
            SELECT ticker, average_price, quantity, in_market, created_at, updated_at
            FROM positions
            WHERE ticker = $1
            "#,
        )
        .bind(instrument)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(position_from_row))
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, average_price, quantity, in_market, created_at, updated_at
            FROM positions
            WHERE in_market
            ORDER BY ticker
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(position_from_row).collect())
    }

    async fn record_fill(&self, fill: &FillRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if let Some(signal_id) = fill.signal_id {
            sqlx::query("INSERT INTO signal_executions (signal_id) VALUES ($1)")
                .bind(signal_id)
                .execute(&mut *tx)
                .await?;
        }

        let position = &fill.position;
        let average_price = position.average_price.map(to_decimal).transpose()?;
        sqlx::query(
            r#"
            INSERT INTO positions (ticker, average_price, quantity, in_market, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ticker) DO UPDATE SET
                average_price = EXCLUDED.average_price,
                quantity = EXCLUDED.quantity,
                in_market = EXCLUDED.in_market,
                updated_at = NOW()
            "#,
        )
        .bind(&position.instrument)
        .bind(average_price)
        .bind(position.quantity)
        .bind(position.in_market)
        .bind(position.created_at)
        .execute(&mut *tx)
        .await?;

        let trade = &fill.trade;
        sqlx::query(
            r#"
            INSERT INTO trade_logs (ticker, trade_type, price, quantity, amount, profit, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&trade.instrument)
        .bind(trade.kind.as_str())
        .bind(to_decimal(trade.price)?)
        .bind(trade.quantity)
        .bind(to_decimal(trade.amount)?)
        .bind(trade.profit.map(to_decimal).transpose()?)
        .bind(trade.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            "Recorded {} fill for {} ({} @ {:.2})",
            trade.kind.as_str(),
            trade.instrument,
            trade.quantity,
            trade.price
        );
        Ok(())
    }

    async fn repair_positions(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET in_market = FALSE, quantity = 0, average_price = NULL, updated_at = NOW()
            WHERE (in_market AND quantity <= 0)
               OR (average_price IS NOT NULL AND quantity = 0)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn trade_history(&self, instrument: Option<&str>) -> Result<Vec<TradeLog>> {
        let rows = sqlx::query(
            r#"
            SELECT ticker, trade_type, price, quantity, amount, profit, timestamp
            FROM trade_logs
            WHERE ($1::TEXT IS NULL OR ticker = $1)
            ORDER BY timestamp, id
            "#,
        )
        .bind(instrument)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }
}

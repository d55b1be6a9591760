//! SQLite persistence for opportunities and round reports.
//!
//! Amounts are stored as decimal strings (they exceed SQLite's 64-bit
//! integers). The opportunity id is the primary key and rows are written
//! with `INSERT OR IGNORE`, so republishing is a no-op.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::{OpportunitySink, SinkError};
use crate::types::{Opportunity, RoundReport};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS opportunities (
        id            TEXT PRIMARY KEY,
        round_id      TEXT NOT NULL,
        pair          TEXT NOT NULL,
        buy_venue     TEXT NOT NULL,
        sell_venue    TEXT NOT NULL,
        trade_size    TEXT NOT NULL,
        target_amount TEXT NOT NULL,
        proceeds      TEXT NOT NULL,
        gross_profit  TEXT NOT NULL,
        gas_cost      TEXT NOT NULL,
        net_profit    TEXT NOT NULL,
        spread        TEXT NOT NULL,
        buy_price     TEXT NOT NULL,
        sell_price    TEXT NOT NULL,
        timestamp     TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rounds (
        round_id        TEXT PRIMARY KEY,
        round_number    INTEGER NOT NULL,
        started_at      TEXT NOT NULL,
        elapsed_ms      INTEGER NOT NULL,
        venues_total    INTEGER NOT NULL,
        venues_ok       INTEGER NOT NULL,
        opportunities   INTEGER NOT NULL,
        best_net_profit TEXT,
        status          TEXT NOT NULL,
        failures        TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_opportunities_round ON opportunities(round_id)",
];

pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    /// Connect (creating the database file if needed) and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, SinkError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every connection to `:memory:` is a separate database.
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!(url, "SQLite sink ready");
        Ok(Self { pool })
    }

    pub async fn opportunity_count(&self) -> Result<i64, SinkError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM opportunities")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    pub async fn round_count(&self) -> Result<i64, SinkError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM rounds")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    /// Net profit (raw quote units) recorded for `id`, if any.
    pub async fn net_profit_of(&self, id: &str) -> Result<Option<String>, SinkError> {
        let row = sqlx::query("SELECT net_profit FROM opportunities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("net_profit")).transpose()?)
    }
}

#[async_trait]
impl OpportunitySink for SqliteSink {
    async fn publish(&self, opp: &Opportunity) -> Result<(), SinkError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO opportunities
             (id, round_id, pair, buy_venue, sell_venue, trade_size, target_amount, proceeds,
              gross_profit, gas_cost, net_profit, spread, buy_price, sell_price, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&opp.id)
        .bind(opp.round_id.to_string())
        .bind(&opp.pair)
        .bind(&opp.buy_venue)
        .bind(&opp.sell_venue)
        .bind(opp.trade_size.to_string())
        .bind(opp.target_amount.to_string())
        .bind(opp.proceeds.to_string())
        .bind(opp.gross_profit.to_string())
        .bind(opp.gas_cost.to_string())
        .bind(opp.net_profit.to_string())
        .bind(opp.spread.to_string())
        .bind(opp.buy_price.to_string())
        .bind(opp.sell_price.to_string())
        .bind(opp.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(id = %opp.id, "Opportunity already stored");
        }
        Ok(())
    }

    async fn record_round(&self, report: &RoundReport) -> Result<(), SinkError> {
        let failures = serde_json::to_string(&report.failures)?;
        sqlx::query(
            "INSERT OR IGNORE INTO rounds
             (round_id, round_number, started_at, elapsed_ms, venues_total, venues_ok,
              opportunities, best_net_profit, status, failures)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(report.round_id.to_string())
        .bind(report.round_number as i64)
        .bind(report.started_at.to_rfc3339())
        .bind(report.elapsed_ms as i64)
        .bind(report.venues_total as i64)
        .bind(report.venues_ok as i64)
        .bind(report.opportunities as i64)
        .bind(report.best_net_profit.map(|p| p.to_string()))
        .bind(report.status.to_string())
        .bind(failures)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::sample_opportunity;
    use crate::types::{RoundStatus, VenueFailureEntry};
    use chrono::Utc;
    use uuid::Uuid;

    async fn memory_sink() -> SqliteSink {
        SqliteSink::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let sink = memory_sink().await;
        let opp = sample_opportunity(1);
        sink.publish(&opp).await.unwrap();
        sink.publish(&opp).await.unwrap();
        sink.publish(&sample_opportunity(2)).await.unwrap();

        assert_eq!(sink.opportunity_count().await.unwrap(), 2);
        assert_eq!(
            sink.net_profit_of(&opp.id).await.unwrap(),
            Some(opp.net_profit.to_string())
        );
        assert_eq!(sink.net_profit_of("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_round_reports_are_stored() {
        let sink = memory_sink().await;
        let report = RoundReport {
            round_number: 3,
            round_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_ms: 420,
            venues_total: 3,
            venues_ok: 0,
            failures: vec![VenueFailureEntry { venue: "a".into(), reason: "timed out".into() }],
            venue_prices: Vec::new(),
            pairs_skipped: 0,
            opportunities: 0,
            best_net_profit: None,
            status: RoundStatus::AllVenuesFailed,
        };
        sink.record_round(&report).await.unwrap();
        sink.record_round(&report).await.unwrap();
        assert_eq!(sink.round_count().await.unwrap(), 1);
    }
}

//! SQLite `ObservationStore` built on sqlx.
//!
//! Money is stored as TEXT to keep exact decimal values; timestamps are
//! RFC 3339 UTC strings with fixed precision so they sort lexically.
//! The partial unique index on `opportunities(listing_ref) WHERE is_active = 1`
//! makes the store itself refuse a second active opportunity per listing.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use super::ObservationStore;
use crate::types::{
    DetectionError, DetectionResult, ItemIdentity, ListingObservation, Opportunity, SaleObservation,
};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const LISTING_COLUMNS: &str =
    "external_id, title, name, language, grade, price, shipping_cost, url, is_active";

const OPPORTUNITY_COLUMNS: &str = "id, listing_ref, name, language, grade, listing_url, \
     listing_total_cost, floor_price, sample_size, discount_pct, gross_profit, \
     marketplace_fees, net_profit, margin_pct, is_active, alerted, created_at, updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and run pending
    /// migrations from `migrations/`.
    pub async fn connect(url: &str, max_connections: u32) -> DetectionResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let mut pool_options = SqlitePoolOptions::new().max_connections(max_connections);
        if url.contains(":memory:") {
            // Each connection owns its own in-memory database; never recycle it.
            pool_options = pool_options.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    /// Private in-memory database. Single connection so every query sees
    /// the same data.
    pub async fn in_memory() -> DetectionResult<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn migrate(&self) -> DetectionResult<()> {
        MIGRATOR.run(&self.pool).await?;
        debug!("Migrations applied");
        Ok(())
    }

    async fn opportunity_by_id(&self, id: i64) -> DetectionResult<Opportunity> {
        let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE id = ?");
        let row = sqlx::query(&sql).bind(id).fetch_one(&self.pool).await?;
        opportunity_from_row(&row)
    }
}

#[async_trait]
impl ObservationStore for SqliteStore {
    async fn fetch_active_listings(&self) -> DetectionResult<Vec<ListingObservation>> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE is_active = 1 ORDER BY id");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(listing_from_row).collect()
    }

    async fn list_listings(&self, active_only: bool, limit: usize) -> DetectionResult<Vec<ListingObservation>> {
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE is_active = 1 OR ?1 = 0 \
             ORDER BY external_id LIMIT ?2"
        );
        let rows = sqlx::query(&sql)
            .bind(active_only)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(listing_from_row).collect()
    }

    async fn find_listing(&self, external_id: &str) -> DetectionResult<Option<ListingObservation>> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE external_id = ?");
        let row = sqlx::query(&sql).bind(external_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(listing_from_row).transpose()
    }

    async fn recent_sales(&self, limit: usize) -> DetectionResult<Vec<SaleObservation>> {
        let rows = sqlx::query(
            "SELECT external_id, name, language, grade, price, sold_at FROM sales \
             ORDER BY sold_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sale_from_row).collect()
    }

    async fn fetch_sales(&self, identity: &ItemIdentity) -> DetectionResult<Vec<SaleObservation>> {
        let rows = sqlx::query(
            "SELECT external_id, name, language, grade, price, sold_at FROM sales \
             WHERE name = ?1 AND language = ?2 COLLATE NOCASE \
               AND (?3 IS NULL OR grade = ?3) \
             ORDER BY sold_at DESC",
        )
        .bind(&identity.name)
        .bind(&identity.language)
        .bind(identity.grade.as_deref())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(sale_from_row).collect()
    }

    async fn find_active_opportunity(&self, listing_ref: &str) -> DetectionResult<Option<Opportunity>> {
        let sql = format!(
            "SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE listing_ref = ? AND is_active = 1"
        );
        let row = sqlx::query(&sql).bind(listing_ref).fetch_optional(&self.pool).await?;
        row.as_ref().map(opportunity_from_row).transpose()
    }

    async fn upsert_opportunity(&self, opportunity: Opportunity) -> DetectionResult<Opportunity> {
        let result = match opportunity.id {
            None => {
                sqlx::query(
                    "INSERT INTO opportunities (listing_ref, name, language, grade, listing_url, \
                     listing_total_cost, floor_price, sample_size, discount_pct, gross_profit, \
                     marketplace_fees, net_profit, margin_pct, is_active, alerted, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&opportunity.listing_ref)
                .bind(&opportunity.identity.name)
                .bind(&opportunity.identity.language)
                .bind(opportunity.identity.grade.as_deref())
                .bind(opportunity.listing_url.as_deref())
                .bind(opportunity.listing_total_cost.to_string())
                .bind(opportunity.floor_price.to_string())
                .bind(opportunity.sample_size as i64)
                .bind(opportunity.discount_pct.to_string())
                .bind(opportunity.gross_profit.to_string())
                .bind(opportunity.marketplace_fees.to_string())
                .bind(opportunity.net_profit.to_string())
                .bind(opportunity.margin_pct.to_string())
                .bind(opportunity.is_active)
                .bind(opportunity.alerted)
                .bind(fmt_time(opportunity.created_at))
                .bind(fmt_time(opportunity.updated_at))
                .execute(&self.pool)
                .await
            }
            Some(id) => {
                sqlx::query(
                    "UPDATE opportunities SET listing_url = ?, listing_total_cost = ?, floor_price = ?, \
                     sample_size = ?, discount_pct = ?, gross_profit = ?, marketplace_fees = ?, \
                     net_profit = ?, margin_pct = ?, is_active = ?, alerted = ?, updated_at = ? \
                     WHERE id = ?",
                )
                .bind(opportunity.listing_url.as_deref())
                .bind(opportunity.listing_total_cost.to_string())
                .bind(opportunity.floor_price.to_string())
                .bind(opportunity.sample_size as i64)
                .bind(opportunity.discount_pct.to_string())
                .bind(opportunity.gross_profit.to_string())
                .bind(opportunity.marketplace_fees.to_string())
                .bind(opportunity.net_profit.to_string())
                .bind(opportunity.margin_pct.to_string())
                .bind(opportunity.is_active)
                .bind(opportunity.alerted)
                .bind(fmt_time(opportunity.updated_at))
                .bind(id)
                .execute(&self.pool)
                .await
            }
        };

        let done = match result {
            Ok(done) => done,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(DetectionError::DuplicateActiveOpportunity {
                    listing_ref: opportunity.listing_ref,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let id = opportunity.id.unwrap_or_else(|| done.last_insert_rowid());
        self.opportunity_by_id(id).await
    }

    async fn opportunities(&self, active_only: bool) -> DetectionResult<Vec<Opportunity>> {
        let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities WHERE is_active = 1 OR ?1 = 0");
        let rows = sqlx::query(&sql).bind(active_only).fetch_all(&self.pool).await?;
        let mut found = rows
            .iter()
            .map(opportunity_from_row)
            .collect::<DetectionResult<Vec<_>>>()?;
        // Margins are TEXT columns, so order numerically here.
        super::sort_by_margin(&mut found);
        Ok(found)
    }

    async fn retire_opportunity(&self, id: i64, at: DateTime<Utc>) -> DetectionResult<()> {
        sqlx::query("UPDATE opportunities SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(fmt_time(at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_alerted(&self, id: i64) -> DetectionResult<()> {
        sqlx::query("UPDATE opportunities SET alerted = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_sale(&self, sale: SaleObservation) -> DetectionResult<bool> {
        let done = sqlx::query(
            "INSERT OR IGNORE INTO sales (external_id, name, language, grade, price, sold_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&sale.external_id)
        .bind(&sale.name)
        .bind(&sale.language)
        .bind(sale.grade.as_deref())
        .bind(sale.price.to_string())
        .bind(fmt_time(sale.sold_at))
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn record_listing(&self, listing: ListingObservation) -> DetectionResult<()> {
        sqlx::query(
            "INSERT INTO listings (external_id, title, name, language, grade, price, shipping_cost, \
             url, is_active, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (external_id) DO UPDATE SET \
                price = excluded.price, \
                shipping_cost = excluded.shipping_cost, \
                is_active = excluded.is_active, \
                updated_at = excluded.updated_at",
        )
        .bind(&listing.external_id)
        .bind(&listing.title)
        .bind(&listing.name)
        .bind(&listing.language)
        .bind(listing.grade.as_deref())
        .bind(listing.price.to_string())
        .bind(listing.shipping_cost.to_string())
        .bind(listing.url.as_deref())
        .bind(listing.is_active)
        .bind(fmt_time(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn fmt_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decimal_col(row: &SqliteRow, col: &str) -> DetectionResult<Decimal> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str(&raw)
        .map_err(|e| DetectionError::StorageUnavailable(format!("corrupt decimal in {col}: {e}")))
}

fn time_col(row: &SqliteRow, col: &str) -> DetectionResult<DateTime<Utc>> {
    let raw: String = row.try_get(col)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DetectionError::StorageUnavailable(format!("corrupt timestamp in {col}: {e}")))
}

fn listing_from_row(row: &SqliteRow) -> DetectionResult<ListingObservation> {
    Ok(ListingObservation {
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        name: row.try_get("name")?,
        language: row.try_get("language")?,
        grade: row.try_get("grade")?,
        price: decimal_col(row, "price")?,
        shipping_cost: decimal_col(row, "shipping_cost")?,
        url: row.try_get("url")?,
        is_active: row.try_get("is_active")?,
    })
}

fn sale_from_row(row: &SqliteRow) -> DetectionResult<SaleObservation> {
    Ok(SaleObservation {
        external_id: row.try_get("external_id")?,
        name: row.try_get("name")?,
        language: row.try_get("language")?,
        grade: row.try_get("grade")?,
        price: decimal_col(row, "price")?,
        sold_at: time_col(row, "sold_at")?,
    })
}

fn opportunity_from_row(row: &SqliteRow) -> DetectionResult<Opportunity> {
    let sample_size: i64 = row.try_get("sample_size")?;
    Ok(Opportunity {
        id: Some(row.try_get("id")?),
        identity: ItemIdentity {
            name: row.try_get("name")?,
            language: row.try_get("language")?,
            grade: row.try_get("grade")?,
        },
        listing_ref: row.try_get("listing_ref")?,
        listing_url: row.try_get("listing_url")?,
        listing_total_cost: decimal_col(row, "listing_total_cost")?,
        floor_price: decimal_col(row, "floor_price")?,
        sample_size: sample_size.max(0) as usize,
        discount_pct: decimal_col(row, "discount_pct")?,
        gross_profit: decimal_col(row, "gross_profit")?,
        marketplace_fees: decimal_col(row, "marketplace_fees")?,
        net_profit: decimal_col(row, "net_profit")?,
        margin_pct: decimal_col(row, "margin_pct")?,
        is_active: row.try_get("is_active")?,
        alerted: row.try_get("alerted")?,
        created_at: time_col(row, "created_at")?,
        updated_at: time_col(row, "updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

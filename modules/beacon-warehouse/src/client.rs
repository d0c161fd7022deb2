//! Postgres access for the raw-capture warehouse.
//!
//! The warehouse owns everything downstream of the raw table (parsed rows,
//! dimension upserts, identity resolution); this client only bulk-inserts,
//! kicks the stored procedures, and answers the health probe's queries.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::warn;

use beacon_common::CaptureRecord;

use crate::error::WarehouseError;
use crate::Result;

#[derive(Clone)]
pub struct WarehouseClient {
    pool: PgPool,
}

/// One row of the `pipeline_health` warehouse view.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PipelineStage {
    pub stage: String,
    pub healthy: bool,
    pub detail: Option<String>,
}

/// Geolocation result written back to the `ip_geo` table by the IP-API
/// classifier so repeat visitors skip the paid lookup.
#[derive(Debug, Clone, Default)]
pub struct GeoUpdate {
    pub ip: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    pub asn: Option<String>,
    pub reverse: Option<String>,
    pub mobile: bool,
    pub proxy: bool,
    pub hosting: bool,
}

impl WarehouseClient {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Bulk-insert a batch into the nine-column raw table. Column vectors are
    /// bound directly off the record slice; ordinal order is fixed by the
    /// warehouse contract (company, pixel, ip, path, query, headers, ua,
    /// referer, received_at).
    pub async fn bulk_insert_raw(&self, records: &[CaptureRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let companies: Vec<&str> = records.iter().map(|r| r.company.as_str()).collect();
        let pixels: Vec<&str> = records.iter().map(|r| r.pixel.as_str()).collect();
        let ips: Vec<&str> = records.iter().map(|r| r.ip.as_str()).collect();
        let paths: Vec<&str> = records.iter().map(|r| r.path.as_str()).collect();
        let queries: Vec<&str> = records.iter().map(|r| r.query.as_str()).collect();
        let headers: Vec<&str> = records.iter().map(|r| r.headers.as_str()).collect();
        let uas: Vec<&str> = records.iter().map(|r| r.ua.as_str()).collect();
        let referers: Vec<&str> = records.iter().map(|r| r.referer.as_str()).collect();
        let received: Vec<DateTime<Utc>> = records.iter().map(|r| r.received_at).collect();

        let result = sqlx::query(
            r#"
            INSERT INTO raw_capture
                (company, pixel, ip, path, query, headers, ua, referer, received_at)
            SELECT * FROM UNNEST
                ($1::text[], $2::text[], $3::text[], $4::text[], $5::text[],
                 $6::text[], $7::text[], $8::text[], $9::timestamptz[])
            "#,
        )
        .bind(&companies)
        .bind(&pixels)
        .bind(&ips)
        .bind(&paths)
        .bind(&queries)
        .bind(&headers)
        .bind(&uas)
        .bind(&referers)
        .bind(&received)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Connectivity ping that doubles as the watermark read for the health
    /// probe and the ETL monitor.
    pub async fn ping_watermark(&self) -> Result<i64> {
        let watermark: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(watermark), 0) FROM etl_watermark")
                .fetch_one(&self.pool)
                .await?;
        Ok(watermark)
    }

    /// Invoke one of the warehouse's stored procedures. Names come from
    /// configuration; anything outside `[A-Za-z0-9_.]` is rejected rather
    /// than interpolated.
    pub async fn run_procedure(&self, name: &str) -> Result<()> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(WarehouseError::InvalidProcedure(name.to_string()));
        }
        sqlx::query(&format!("CALL {name}()")).execute(&self.pool).await?;
        Ok(())
    }

    /// IPs already geolocated, with their fetch time. Loaded once at startup
    /// by the IP-API classifier; entries older than its staleness window are
    /// looked up again.
    pub async fn known_geo_ips(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let rows: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT ip, fetched_at FROM ip_geo")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    /// Persist a geolocation result. Logs a warning on failure rather than
    /// propagating; a failed cache write must not fail the record.
    pub async fn upsert_geo(&self, geo: &GeoUpdate) {
        let result = sqlx::query(
            r#"
            INSERT INTO ip_geo
                (ip, country, country_code, region, city, zip, lat, lon,
                 timezone, isp, org, asn, reverse, mobile, proxy, hosting, fetched_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
            ON CONFLICT (ip) DO UPDATE SET
                country = EXCLUDED.country,
                country_code = EXCLUDED.country_code,
                region = EXCLUDED.region,
                city = EXCLUDED.city,
                zip = EXCLUDED.zip,
                lat = EXCLUDED.lat,
                lon = EXCLUDED.lon,
                timezone = EXCLUDED.timezone,
                isp = EXCLUDED.isp,
                org = EXCLUDED.org,
                asn = EXCLUDED.asn,
                reverse = EXCLUDED.reverse,
                mobile = EXCLUDED.mobile,
                proxy = EXCLUDED.proxy,
                hosting = EXCLUDED.hosting,
                fetched_at = NOW()
            "#,
        )
        .bind(&geo.ip)
        .bind(&geo.country)
        .bind(&geo.country_code)
        .bind(&geo.region)
        .bind(&geo.city)
        .bind(&geo.zip)
        .bind(geo.lat)
        .bind(geo.lon)
        .bind(&geo.timezone)
        .bind(&geo.isp)
        .bind(&geo.org)
        .bind(&geo.asn)
        .bind(&geo.reverse)
        .bind(geo.mobile)
        .bind(geo.proxy)
        .bind(geo.hosting)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(ip = %geo.ip, error = %e, "Failed to persist geo lookup");
        }
    }

    /// Most recent capture time in the raw table, for the data-flow probe.
    pub async fn newest_received_at(&self) -> Result<Option<DateTime<Utc>>> {
        let newest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(received_at) FROM raw_capture")
                .fetch_one(&self.pool)
                .await?;
        Ok(newest)
    }

    /// Read the predefined `pipeline_health` view. A missing view surfaces as
    /// an error the health probe reports as degraded; no data is at risk.
    pub async fn pipeline_health(&self) -> Result<Vec<PipelineStage>> {
        let rows = sqlx::query_as::<_, PipelineStage>(
            "SELECT stage, healthy, detail FROM pipeline_health",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

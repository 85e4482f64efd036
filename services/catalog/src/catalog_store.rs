use crate::config::DatabaseConfig;
use crate::data_division::DataDivision;
use crate::error::CatalogResult;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::QueryAs;
use sqlx::{FromRow, Postgres};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Flag value meaning "permitted" in the authorization tables
pub const ALLOWED_FLAG: &str = "0";

/// Code type of near-miss categories in the code master
const NEAR_MISS_CODE_TYPE: &str = "1";

/// Scenario as stored, joined with its section and location names
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScenarioRow {
    pub id: i64,
    pub uuid: String,
    pub section_id: String,
    pub section_name: String,
    pub location_name: String,
    /// Near-miss type codes, comma-joined
    pub nearmiss_type: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub scenario_create_time: DateTime<Utc>,
}

impl ScenarioRow {
    pub fn near_miss_types(&self) -> Vec<String> {
        split_near_miss_types(self.nearmiss_type.as_deref().unwrap_or_default())
    }
}

/// Per-user download permissions
#[derive(Debug, Clone, Default, FromRow)]
pub struct DownloadFlags {
    pub scenario_possibility_flag: String,
    pub ml_possibility_flag: String,
}

impl DownloadFlags {
    pub fn is_scenario_allowed(&self) -> bool {
        self.scenario_possibility_flag == ALLOWED_FLAG
    }

    pub fn is_ml_allowed(&self) -> bool {
        self.ml_possibility_flag == ALLOWED_FLAG
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct NearMissCode {
    pub code: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Section {
    pub section_id: String,
    pub section_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Location {
    pub location_id: String,
    pub location_name: String,
}

/// Append-only audit record of an issued download URL
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadHistoryEntry {
    pub uuid: String,
    pub user_id: String,
    pub division: DataDivision,
    pub recorded_at: DateTime<Utc>,
}

/// Search conditions shared by the page and count queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioFilter {
    /// Caller; results are limited to the caller's searchable sections
    pub user_id: String,
    /// Matches scenarios carrying any of these codes; empty matches all
    pub near_miss_types: Vec<String>,
    /// Day the scenario was created
    pub created_on: Option<NaiveDate>,
    pub section_id: Option<String>,
    pub location_id: Option<String>,
}

/// Relational catalog data
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Sections the user may search and view
    async fn authorized_sections(&self, user_id: &str) -> CatalogResult<Vec<String>>;

    async fn scenario_page(
        &self,
        filter: &ScenarioFilter,
        skip: i64,
        limit: i64,
    ) -> CatalogResult<Vec<ScenarioRow>>;

    async fn scenario_count(&self, filter: &ScenarioFilter) -> CatalogResult<i64>;

    async fn scenario_by_id(&self, uuid: &str) -> CatalogResult<Option<ScenarioRow>>;

    async fn download_flags(&self, user_id: &str) -> CatalogResult<Option<DownloadFlags>>;

    async fn append_download_history(&self, entry: &DownloadHistoryEntry) -> CatalogResult<()>;

    async fn near_miss_codes(&self) -> CatalogResult<Vec<NearMissCode>>;

    async fn sections_for_user(&self, user_id: &str) -> CatalogResult<Vec<Section>>;

    async fn locations_for_section(
        &self,
        section_id: &str,
        user_id: &str,
    ) -> CatalogResult<Vec<Location>>;

    /// Connectivity check for readiness probes
    async fn ping(&self) -> CatalogResult<()>;
}

/// Split a comma-joined code list. Empty input gives no codes and trailing
/// empty segments are dropped.
pub fn split_near_miss_types(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }

    let mut codes: Vec<String> = joined.split(',').map(String::from).collect();
    while codes.last().is_some_and(|c| c.is_empty()) {
        codes.pop();
    }
    codes
}

const SCENARIO_COLUMNS: &str = r#"
    SELECT s.id, s.uuid, s.section_id, sm.section_name, lm.location_name,
           s.nearmiss_type, s.latitude, s.longitude, s.scenario_create_time
    FROM scenario_info s
    JOIN section_master sm ON sm.section_id = s.section_id AND sm.delete_flag = '0'
    JOIN location_master lm ON lm.location_id = s.location_id AND lm.delete_flag = '0'
"#;

/// PostgreSQL-backed catalog store
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// WHERE clause for a filter. Placeholders are numbered from `$1` in the
/// order [`bind_filter`] binds them; returns the clause and the last number.
fn filter_clause(filter: &ScenarioFilter) -> (String, usize) {
    let mut sql = String::from(
        r#"
    WHERE s.delete_flag = '0'
      AND s.section_id IN (
          SELECT section_id FROM search_auth
          WHERE email_address = $1 AND delete_flag = '0'
      )"#,
    );
    let mut param_count = 1;

    if !filter.near_miss_types.is_empty() {
        param_count += 1;
        sql.push_str(&format!(
            " AND string_to_array(s.nearmiss_type, ',') && ${}::text[]",
            param_count
        ));
    }

    if filter.created_on.is_some() {
        param_count += 1;
        sql.push_str(&format!(
            " AND s.scenario_create_time::date = ${}",
            param_count
        ));
    }

    if filter.section_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND s.section_id = ${}", param_count));
    }

    if filter.location_id.is_some() {
        param_count += 1;
        sql.push_str(&format!(" AND s.location_id = ${}", param_count));
    }

    (sql, param_count)
}

fn bind_filter<'q, O>(
    mut query: QueryAs<'q, Postgres, O, PgArguments>,
    filter: &'q ScenarioFilter,
) -> QueryAs<'q, Postgres, O, PgArguments> {
    query = query.bind(&filter.user_id);

    if !filter.near_miss_types.is_empty() {
        query = query.bind(filter.near_miss_types.as_slice());
    }
    if let Some(created_on) = filter.created_on {
        query = query.bind(created_on);
    }
    if let Some(ref section_id) = filter.section_id {
        query = query.bind(section_id);
    }
    if let Some(ref location_id) = filter.location_id {
        query = query.bind(location_id);
    }

    query
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn authorized_sections(&self, user_id: &str) -> CatalogResult<Vec<String>> {
        let sections: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT section_id FROM search_auth
            WHERE email_address = $1 AND delete_flag = '0'
            ORDER BY section_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sections.into_iter().map(|(id,)| id).collect())
    }

    #[instrument(skip(self, filter), fields(user_id = %filter.user_id))]
    async fn scenario_page(
        &self,
        filter: &ScenarioFilter,
        skip: i64,
        limit: i64,
    ) -> CatalogResult<Vec<ScenarioRow>> {
        let (clause, param_count) = filter_clause(filter);
        let sql = format!(
            "{SCENARIO_COLUMNS}{clause} ORDER BY s.scenario_create_time DESC, s.id LIMIT ${} OFFSET ${}",
            param_count + 1,
            param_count + 2
        );

        let rows = bind_filter(sqlx::query_as::<_, ScenarioRow>(&sql), filter)
            .bind(limit)
            .bind(skip)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = rows.len(), skip, limit, "Fetched scenario page");
        Ok(rows)
    }

    #[instrument(skip(self, filter), fields(user_id = %filter.user_id))]
    async fn scenario_count(&self, filter: &ScenarioFilter) -> CatalogResult<i64> {
        let (clause, _) = filter_clause(filter);
        let sql = format!(
            r#"
            SELECT COUNT(*)
            FROM scenario_info s
            JOIN section_master sm ON sm.section_id = s.section_id AND sm.delete_flag = '0'
            JOIN location_master lm ON lm.location_id = s.location_id AND lm.delete_flag = '0'
            {clause}
            "#
        );

        let count: (i64,) = bind_filter(sqlx::query_as(&sql), filter)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn scenario_by_id(&self, uuid: &str) -> CatalogResult<Option<ScenarioRow>> {
        let sql = format!("{SCENARIO_COLUMNS} WHERE s.uuid = $1 AND s.delete_flag = '0'");

        let row = sqlx::query_as::<_, ScenarioRow>(&sql)
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn download_flags(&self, user_id: &str) -> CatalogResult<Option<DownloadFlags>> {
        let flags = sqlx::query_as::<_, DownloadFlags>(
            r#"
            SELECT scenario_possibility_flag, ml_possibility_flag
            FROM dl_auth
            WHERE email_address = $1 AND delete_flag = '0'
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(flags)
    }

    #[instrument(skip(self, entry), fields(uuid = %entry.uuid, division = %entry.division))]
    async fn append_download_history(&self, entry: &DownloadHistoryEntry) -> CatalogResult<()> {
        sqlx::query(
            r#"
            INSERT INTO dl_history (
                uuid, data_division, dl_date_time, email_address,
                delete_flag, create_time, update_time
            ) VALUES (
                $1, $2, $3, $4, '0', NOW(), NOW()
            )
            "#,
        )
        .bind(&entry.uuid)
        .bind(entry.division.code())
        .bind(entry.recorded_at)
        .bind(&entry.user_id)
        .execute(&self.pool)
        .await?;

        metrics::counter!("catalog.download_history.recorded").increment(1);
        Ok(())
    }

    async fn near_miss_codes(&self) -> CatalogResult<Vec<NearMissCode>> {
        let codes = sqlx::query_as::<_, NearMissCode>(
            r#"
            SELECT code, value FROM search_code_master
            WHERE code_type = $1 AND delete_flag = '0'
            "#,
        )
        .bind(NEAR_MISS_CODE_TYPE)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    async fn sections_for_user(&self, user_id: &str) -> CatalogResult<Vec<Section>> {
        let sections = sqlx::query_as::<_, Section>(
            r#"
            SELECT sm.section_id, sm.section_name
            FROM section_master sm
            JOIN search_auth sa ON sa.section_id = sm.section_id AND sa.delete_flag = '0'
            WHERE sa.email_address = $1 AND sm.delete_flag = '0'
            ORDER BY sm.section_id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sections)
    }

    async fn locations_for_section(
        &self,
        section_id: &str,
        user_id: &str,
    ) -> CatalogResult<Vec<Location>> {
        let locations = sqlx::query_as::<_, Location>(
            r#"
            SELECT lm.location_id, lm.location_name
            FROM location_master lm
            JOIN search_auth sa ON sa.section_id = lm.section_id AND sa.delete_flag = '0'
            WHERE lm.section_id = $1 AND sa.email_address = $2 AND lm.delete_flag = '0'
            ORDER BY lm.location_id
            "#,
        )
        .bind(section_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(locations)
    }

    async fn ping(&self) -> CatalogResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

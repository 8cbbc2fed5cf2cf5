//! PostgreSQL-backed pharmacy store.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::similarity::{MAX_FUZZY_CANDIDATES, SIMILARITY_THRESHOLD};
use super::{
    FuzzyMatch, Medication, MedicationOrder, MedicationQuery, PharmacyStore, Prescription,
    PrescriptionQuery, RefillRequest, StockLevel, StockQuery, Store, ToolUsage, UsageRecorder,
    User, UserQuery,
};
use crate::error::{DispensaryError, Result};

const MEDICATION_COLUMNS: &str = "med_id, brand_name, generic_name, active_ingredients, form, \
     strength, rx_required, standard_directions, warnings, contraindications";

const PRESCRIPTION_SELECT: &str = "SELECT p.prescription_id, p.user_id, p.med_id, m.brand_name, \
     m.generic_name, m.rx_required, p.directions, p.refills_remaining::BIGINT, p.expires_at \
     FROM prescriptions p JOIN medications m ON m.med_id = p.med_id";

type MedicationRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    bool,
    Option<String>,
    Option<String>,
    Option<String>,
);

type PrescriptionRow = (String, String, String, String, String, bool, String, i64, NaiveDate);

fn medication_from_row(row: MedicationRow) -> Medication {
    let (
        med_id,
        brand_name,
        generic_name,
        active_ingredients,
        form,
        strength,
        rx_required,
        standard_directions,
        warnings,
        contraindications,
    ) = row;
    Medication {
        med_id,
        brand_name,
        generic_name,
        active_ingredients,
        form,
        strength,
        rx_required,
        standard_directions,
        warnings,
        contraindications,
    }
}

fn prescription_from_row(row: PrescriptionRow) -> Prescription {
    let (
        prescription_id,
        user_id,
        med_id,
        brand_name,
        generic_name,
        rx_required,
        directions,
        refills_remaining,
        expires_at,
    ) = row;
    Prescription {
        prescription_id,
        user_id,
        med_id,
        brand_name,
        generic_name,
        rx_required,
        directions,
        refills_remaining,
        expires_at,
    }
}

fn like(term: &str) -> String {
    format!("%{}%", term.trim())
}

fn sql_err(e: sqlx::Error) -> DispensaryError {
    DispensaryError::Store(e.to_string())
}

/// Pharmacy store over a PostgreSQL pool.
///
/// Fuzzy lookup needs the `pg_trgm` extension; without it fuzzy search
/// returns no candidates.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(sql_err)?;
        Ok(Self::new(pool))
    }

    /// Create the tables if they do not exist (idempotent).
    pub async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            "CREATE EXTENSION IF NOT EXISTS pg_trgm",
            r#"CREATE TABLE IF NOT EXISTS medications (
                med_id              TEXT PRIMARY KEY,
                brand_name          TEXT NOT NULL,
                generic_name        TEXT NOT NULL,
                active_ingredients  TEXT NOT NULL DEFAULT '',
                form                TEXT NOT NULL,
                strength            TEXT NOT NULL,
                rx_required         BOOLEAN NOT NULL DEFAULT FALSE,
                standard_directions TEXT,
                warnings            TEXT,
                contraindications   TEXT
            )"#,
            r#"CREATE TABLE IF NOT EXISTS users (
                user_id            TEXT PRIMARY KEY,
                full_name          TEXT NOT NULL,
                phone              TEXT NOT NULL,
                email              TEXT NOT NULL,
                preferred_language TEXT NOT NULL DEFAULT 'en'
            )"#,
            r#"CREATE TABLE IF NOT EXISTS stores (
                store_id TEXT PRIMARY KEY,
                name     TEXT NOT NULL,
                city     TEXT NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS inventory (
                med_id       TEXT NOT NULL REFERENCES medications(med_id),
                store_id     TEXT NOT NULL,
                quantity     INTEGER NOT NULL,
                last_updated TEXT NOT NULL,
                PRIMARY KEY (med_id, store_id)
            )"#,
            r#"CREATE TABLE IF NOT EXISTS prescriptions (
                prescription_id   TEXT PRIMARY KEY,
                user_id           TEXT NOT NULL REFERENCES users(user_id),
                med_id            TEXT NOT NULL REFERENCES medications(med_id),
                directions        TEXT NOT NULL,
                refills_remaining INTEGER NOT NULL,
                expires_at        DATE NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS refill_requests (
                refill_request_id TEXT PRIMARY KEY,
                prescription_id   TEXT NOT NULL REFERENCES prescriptions(prescription_id),
                user_id           TEXT NOT NULL,
                status            TEXT NOT NULL,
                created_at        TIMESTAMPTZ NOT NULL
            )"#,
            r#"CREATE TABLE IF NOT EXISTS tool_stats (
                tool_name  TEXT PRIMARY KEY,
                call_count BIGINT NOT NULL DEFAULT 0
            )"#,
        ];
        for sql in statements {
            sqlx::query(sql).execute(&self.pool).await.map_err(sql_err)?;
        }
        Ok(())
    }
}

fn push_like(qb: &mut QueryBuilder<'_, Postgres>, column: &str, term: &str) {
    qb.push(" AND ").push(column).push(" ILIKE ").push_bind(like(term));
}

#[async_trait]
impl PharmacyStore for PostgresStore {
    async fn search_medications(&self, query: &MedicationQuery) -> Result<Vec<Medication>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {MEDICATION_COLUMNS} FROM medications WHERE TRUE"
        ));
        if let Some(text) = &query.text {
            let pattern = like(text);
            qb.push(" AND (brand_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR generic_name ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR active_ingredients ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(v) = &query.brand_name {
            push_like(&mut qb, "brand_name", v);
        }
        if let Some(v) = &query.generic_name {
            push_like(&mut qb, "generic_name", v);
        }
        if let Some(v) = &query.active_ingredient {
            push_like(&mut qb, "active_ingredients", v);
        }
        if let Some(v) = &query.form {
            push_like(&mut qb, "form", v);
        }
        if let Some(v) = &query.strength {
            push_like(&mut qb, "strength", v);
        }
        if let Some(rx) = query.rx_required {
            qb.push(" AND rx_required = ").push_bind(rx);
        }
        match (query.order, &query.text) {
            (MedicationOrder::Relevance, Some(text)) => {
                let pattern = like(text);
                qb.push(" ORDER BY CASE WHEN brand_name ILIKE ")
                    .push_bind(pattern.clone())
                    .push(" THEN 1 WHEN generic_name ILIKE ")
                    .push_bind(pattern)
                    .push(" THEN 2 ELSE 3 END, brand_name");
            }
            _ => {
                qb.push(" ORDER BY brand_name");
            }
        }
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        let rows: Vec<MedicationRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(rows.into_iter().map(medication_from_row).collect())
    }

    async fn fuzzy_medications(&self, name: &str) -> Result<Vec<FuzzyMatch>> {
        let sql = r#"
            SELECT med_id, brand_name, generic_name,
                   GREATEST(similarity(LOWER(brand_name), LOWER($1)),
                            similarity(LOWER(generic_name), LOWER($1)))::FLOAT8 AS score
            FROM medications
            WHERE similarity(LOWER(brand_name), LOWER($1)) > $2
               OR similarity(LOWER(generic_name), LOWER($1)) > $2
            ORDER BY score DESC
            LIMIT $3
        "#;
        let rows: std::result::Result<Vec<(String, String, String, f64)>, sqlx::Error> =
            sqlx::query_as(sql)
                .bind(name)
                .bind(SIMILARITY_THRESHOLD as f32)
                .bind(MAX_FUZZY_CANDIDATES as i64)
                .fetch_all(&self.pool)
                .await;
        match rows {
            Ok(rows) => Ok(rows
                .into_iter()
                .map(|(med_id, brand_name, generic_name, score)| FuzzyMatch {
                    med_id,
                    brand_name,
                    generic_name,
                    score,
                })
                .collect()),
            Err(e) => {
                tracing::warn!(name, error = %e, "fuzzy medication lookup failed");
                Ok(Vec::new())
            }
        }
    }

    async fn medication(&self, med_id: &str) -> Result<Option<Medication>> {
        let sql = format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE med_id = $1");
        let row: Option<MedicationRow> = sqlx::query_as(&sql)
            .bind(med_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(row.map(medication_from_row))
    }

    async fn search_users(&self, query: &UserQuery) -> Result<Vec<User>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT user_id, full_name, phone, email, preferred_language FROM users WHERE FALSE",
        );
        if let Some(id) = &query.user_id {
            qb.push(" OR user_id = ").push_bind(id.clone());
        }
        if let Some(name) = &query.name {
            qb.push(" OR full_name ILIKE ").push_bind(like(name));
        }
        if let Some(email) = &query.email {
            qb.push(" OR email ILIKE ").push_bind(like(email));
        }
        if let Some(phone) = &query.phone {
            qb.push(" OR phone ILIKE ").push_bind(like(phone));
        }
        qb.push(" ORDER BY full_name LIMIT 10");
        let rows: Vec<(String, String, String, String, String)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(rows
            .into_iter()
            .map(|(user_id, full_name, phone, email, preferred_language)| User {
                user_id,
                full_name,
                phone,
                email,
                preferred_language,
            })
            .collect())
    }

    async fn stock(&self, query: &StockQuery) -> Result<Vec<StockLevel>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT i.med_id, i.store_id, s.name, s.city, i.quantity::BIGINT, i.last_updated \
             FROM inventory i LEFT JOIN stores s ON s.store_id = i.store_id WHERE i.med_id = ",
        );
        qb.push_bind(query.med_id.clone());
        if let Some(ids) = &query.store_ids {
            qb.push(" AND i.store_id = ANY(").push_bind(ids.clone()).push(")");
        }
        if query.in_stock_only {
            qb.push(" AND i.quantity > 0");
        }
        qb.push(" ORDER BY s.city, s.name");
        let rows: Vec<(String, String, Option<String>, Option<String>, i64, String)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(rows
            .into_iter()
            .map(|(med_id, store_id, store_name, city, quantity, last_updated)| StockLevel {
                med_id,
                store_id,
                store_name,
                city,
                quantity,
                last_updated,
            })
            .collect())
    }

    async fn list_stores(&self, city: Option<&str>) -> Result<Vec<Store>> {
        let rows: Vec<(String, String, String)> = match city {
            Some(city) => {
                sqlx::query_as("SELECT store_id, name, city FROM stores WHERE city ILIKE $1 ORDER BY name")
                    .bind(like(city))
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                sqlx::query_as("SELECT store_id, name, city FROM stores ORDER BY city, name")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(sql_err)?;
        Ok(rows
            .into_iter()
            .map(|(store_id, name, city)| Store { store_id, name, city })
            .collect())
    }

    async fn prescriptions(&self, query: &PrescriptionQuery) -> Result<Vec<Prescription>> {
        let mut qb = QueryBuilder::<Postgres>::new(PRESCRIPTION_SELECT);
        qb.push(" WHERE TRUE");
        if let Some(user_id) = &query.user_id {
            qb.push(" AND p.user_id = ").push_bind(user_id.clone());
        }
        if let Some(med_id) = &query.med_id {
            qb.push(" AND p.med_id = ").push_bind(med_id.clone());
        }
        match query.expiry_horizon() {
            // Saturated dates can fall outside the range Postgres accepts.
            Some(horizon) if horizon < query.today => {
                qb.push(" AND FALSE");
            }
            Some(horizon) => {
                qb.push(" AND p.expires_at >= ")
                    .push_bind(query.today)
                    .push(" AND p.expires_at <= ")
                    .push_bind(horizon);
            }
            None => {}
        }
        match query.has_refills {
            Some(true) => {
                qb.push(" AND p.refills_remaining > 0");
            }
            Some(false) => {
                qb.push(" AND p.refills_remaining <= 0");
            }
            None => {}
        }
        qb.push(" ORDER BY p.expires_at, p.user_id");
        if let Some(limit) = query.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
        let rows: Vec<PrescriptionRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(rows.into_iter().map(prescription_from_row).collect())
    }

    async fn prescription(&self, prescription_id: &str) -> Result<Option<Prescription>> {
        let sql = format!("{PRESCRIPTION_SELECT} WHERE p.prescription_id = $1");
        let row: Option<PrescriptionRow> = sqlx::query_as(&sql)
            .bind(prescription_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(row.map(prescription_from_row))
    }

    async fn submit_refill(&self, request: &RefillRequest) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;
        let updated = sqlx::query(
            "UPDATE prescriptions SET refills_remaining = refills_remaining - 1 \
             WHERE prescription_id = $1 AND refills_remaining > 0",
        )
        .bind(&request.prescription_id)
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;
        if updated.rows_affected() != 1 {
            tx.rollback().await.map_err(sql_err)?;
            return Ok(false);
        }
        sqlx::query(
            "INSERT INTO refill_requests (refill_request_id, prescription_id, user_id, status, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&request.refill_request_id)
        .bind(&request.prescription_id)
        .bind(&request.user_id)
        .bind(&request.status)
        .bind(request.created_at)
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;
        tx.commit().await.map_err(sql_err)?;
        Ok(true)
    }
}

#[async_trait]
impl UsageRecorder for PostgresStore {
    fn record(&self, tool_name: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(tool = %tool_name, "no runtime available to record tool usage");
            return;
        };
        let pool = self.pool.clone();
        let tool_name = tool_name.to_string();
        runtime.spawn(async move {
            let result = sqlx::query(
                "INSERT INTO tool_stats (tool_name, call_count) VALUES ($1, 1) \
                 ON CONFLICT (tool_name) DO UPDATE SET call_count = tool_stats.call_count + 1",
            )
            .bind(&tool_name)
            .execute(&pool)
            .await;
            if let Err(e) = result {
                tracing::warn!(tool = %tool_name, error = %e, "failed to record tool usage");
            }
        });
    }

    async fn snapshot(&self) -> Result<Vec<ToolUsage>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT tool_name, call_count FROM tool_stats ORDER BY call_count DESC")
                .fetch_all(&self.pool)
                .await
                .map_err(sql_err)?;
        Ok(rows
            .into_iter()
            .map(|(tool_name, call_count)| ToolUsage {
                tool_name,
                call_count,
            })
            .collect())
    }
}

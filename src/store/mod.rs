//! Pharmacy data access.
//!
//! Tools never talk to a database directly. They go through [`PharmacyStore`],
//! which answers typed queries, and report usage through [`UsageRecorder`].
//! Two implementations ship with the crate: [`MemoryStore`], loaded from a
//! JSON seed file, and `PostgresStore` behind the `postgres` feature.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod similarity;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DispensaryConfig;
use crate::error::Result;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// A catalog medication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    pub med_id: String,
    pub brand_name: String,
    pub generic_name: String,
    /// Comma-separated, as stored in the catalog.
    pub active_ingredients: String,
    pub form: String,
    pub strength: String,
    pub rx_required: bool,
    #[serde(default)]
    pub standard_directions: Option<String>,
    #[serde(default)]
    pub warnings: Option<String>,
    #[serde(default)]
    pub contraindications: Option<String>,
}

impl Medication {
    /// `"Brand (Generic)"`, the display name used in tool payloads.
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.brand_name, self.generic_name)
    }
}

/// A medication found by trigram similarity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzyMatch {
    pub med_id: String,
    pub brand_name: String,
    pub generic_name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub full_name: String,
    pub phone: String,
    pub email: String,
    pub preferred_language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub store_id: String,
    pub name: String,
    pub city: String,
}

/// Inventory for one medication at one store, joined with store details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StockLevel {
    pub med_id: String,
    pub store_id: String,
    pub store_name: Option<String>,
    pub city: Option<String>,
    pub quantity: i64,
    pub last_updated: String,
}

impl StockLevel {
    pub fn status(&self) -> &'static str {
        if self.quantity > 0 {
            "in_stock"
        } else {
            "out_of_stock"
        }
    }
}

/// A prescription joined with its medication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prescription {
    pub prescription_id: String,
    pub user_id: String,
    pub med_id: String,
    pub brand_name: String,
    pub generic_name: String,
    pub rx_required: bool,
    pub directions: String,
    pub refills_remaining: i64,
    pub expires_at: NaiveDate,
}

impl Prescription {
    pub fn med_name(&self) -> String {
        format!("{} ({})", self.brand_name, self.generic_name)
    }

    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expires_at < today
    }

    /// `expired`, `no_refills` or `active`, checked in that order.
    pub fn status(&self, today: NaiveDate) -> &'static str {
        if self.is_expired(today) {
            "expired"
        } else if self.refills_remaining <= 0 {
            "no_refills"
        } else {
            "active"
        }
    }
}

/// A submitted refill, written together with the refill-count decrement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefillRequest {
    pub refill_request_id: String,
    pub prescription_id: String,
    pub user_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Result ordering for medication searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MedicationOrder {
    /// Alphabetical by brand name.
    #[default]
    Brand,
    /// Brand-name hits, then generic-name hits, then the rest; brand name within each.
    Relevance,
}

/// Medication filters. Every field is optional and given fields are ANDed.
///
/// `text` matches brand, generic or active ingredients; the named fields
/// match their own column. All text matching is a case-insensitive substring
/// test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MedicationQuery {
    pub text: Option<String>,
    pub brand_name: Option<String>,
    pub generic_name: Option<String>,
    pub active_ingredient: Option<String>,
    pub form: Option<String>,
    pub strength: Option<String>,
    pub rx_required: Option<bool>,
    pub order: MedicationOrder,
    pub limit: Option<usize>,
}

impl MedicationQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }
}

/// User selectors. Given fields are ORed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserQuery {
    /// Exact match.
    pub user_id: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl UserQuery {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.name.is_none() && self.email.is_none() && self.phone.is_none()
    }
}

/// Inventory lookup for one medication.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockQuery {
    pub med_id: String,
    /// Restrict to these stores; `None` means every store.
    pub store_ids: Option<Vec<String>>,
    pub in_stock_only: bool,
}

/// Prescription filters. Given fields are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub struct PrescriptionQuery {
    pub user_id: Option<String>,
    pub med_id: Option<String>,
    /// Not yet expired and expiring within this many days of `today`.
    pub expiring_within_days: Option<i64>,
    pub has_refills: Option<bool>,
    pub limit: Option<usize>,
    pub today: NaiveDate,
}

impl PrescriptionQuery {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            user_id: None,
            med_id: None,
            expiring_within_days: None,
            has_refills: None,
            limit: None,
            today,
        }
    }

    /// Last date inside the expiry window. Saturates at the calendar bounds
    /// when `expiring_within_days` runs past them.
    pub fn expiry_horizon(&self) -> Option<NaiveDate> {
        let days = self.expiring_within_days?;
        let horizon = TimeDelta::try_days(days).and_then(|d| self.today.checked_add_signed(d));
        Some(horizon.unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX }))
    }
}

/// Usage count for one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool_name: String,
    pub call_count: i64,
}

/// Read and write access to the pharmacy catalog.
///
/// "No results" is an empty `Vec` or `None`; `Err` means the store itself
/// failed.
#[async_trait]
pub trait PharmacyStore: Send + Sync {
    async fn search_medications(&self, query: &MedicationQuery) -> Result<Vec<Medication>>;

    /// Medications whose brand or generic name is trigram-similar to `name`,
    /// best first.
    async fn fuzzy_medications(&self, name: &str) -> Result<Vec<FuzzyMatch>>;

    async fn medication(&self, med_id: &str) -> Result<Option<Medication>>;

    /// At most ten users, ordered by full name.
    async fn search_users(&self, query: &UserQuery) -> Result<Vec<User>>;

    /// Stock rows ordered by city, then store name.
    async fn stock(&self, query: &StockQuery) -> Result<Vec<StockLevel>>;

    /// Stores, optionally filtered by a city substring.
    async fn list_stores(&self, city: Option<&str>) -> Result<Vec<Store>>;

    /// Prescriptions ordered by expiry date, then user.
    async fn prescriptions(&self, query: &PrescriptionQuery) -> Result<Vec<Prescription>>;

    async fn prescription(&self, prescription_id: &str) -> Result<Option<Prescription>>;

    /// Record `request` and decrement the prescription's refill count.
    ///
    /// The refill count is re-checked in the same critical section as the
    /// write. Returns `false`, recording nothing, when no refills remain.
    async fn submit_refill(&self, request: &RefillRequest) -> Result<bool>;
}

/// Best-effort per-tool call counter.
#[async_trait]
pub trait UsageRecorder: Send + Sync {
    /// Count one call. Never fails and never blocks the caller; failures are
    /// logged by the implementation.
    fn record(&self, tool_name: &str);

    /// Counts ordered by call count, highest first.
    async fn snapshot(&self) -> Result<Vec<ToolUsage>>;
}

/// The store a process serves from, with its usage counter.
#[derive(Clone)]
pub struct StoreHandles {
    pub store: Arc<dyn PharmacyStore>,
    pub usage: Arc<dyn UsageRecorder>,
}

/// Open the configured store: Postgres when `DATABASE_URL` is set (and the
/// `postgres` feature is enabled), otherwise the in-memory seed data.
pub async fn open(config: &DispensaryConfig) -> Result<StoreHandles> {
    #[cfg(feature = "postgres")]
    {
        if let Some(url) = config.database_url.as_deref() {
            let store = Arc::new(PostgresStore::connect(url).await?);
            store.ensure_schema().await?;
            info!("Using Postgres pharmacy store");
            return Ok(StoreHandles {
                store: store.clone(),
                usage: store,
            });
        }
    }
    #[cfg(not(feature = "postgres"))]
    {
        if config.database_url.is_some() {
            tracing::warn!("DATABASE_URL is set but the postgres feature is disabled; using in-memory store");
        }
    }

    let store = Arc::new(match config.seed_file.as_deref() {
        Some(path) => MemoryStore::from_file(path)?,
        None => MemoryStore::bundled()?,
    });
    info!(seed = ?config.seed_file, "Using in-memory pharmacy store");
    Ok(StoreHandles {
        store: store.clone(),
        usage: store,
    })
}

/// Case-insensitive substring test, the in-memory counterpart of `ILIKE '%q%'`.
pub(crate) fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(needle.trim().to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rx(refills: i64, expires: &str) -> Prescription {
        Prescription {
            prescription_id: "RX-1".into(),
            user_id: "1003".into(),
            med_id: "MED003".into(),
            brand_name: "Lipitor".into(),
            generic_name: "Atorvastatin".into(),
            rx_required: true,
            directions: "Once daily".into(),
            refills_remaining: refills,
            expires_at: expires.parse().unwrap(),
        }
    }

    #[test]
    fn prescription_status_prefers_expired() {
        let today: NaiveDate = "2026-01-01".parse().unwrap();
        assert_eq!(rx(0, "2020-01-01").status(today), "expired");
        assert_eq!(rx(0, "2099-01-01").status(today), "no_refills");
        assert_eq!(rx(2, "2099-01-01").status(today), "active");
        assert_eq!(rx(2, "2026-01-01").status(today), "active");
    }

    #[test]
    fn contains_ci_trims_and_ignores_case() {
        assert!(contains_ci("Nurofen", " nuro "));
        assert!(!contains_ci("Nurofen", "advil"));
    }
}

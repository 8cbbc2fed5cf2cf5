//! In-memory pharmacy store loaded from a JSON seed.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::similarity::{similarity, MAX_FUZZY_CANDIDATES, SIMILARITY_THRESHOLD};
use super::{
    contains_ci, FuzzyMatch, Medication, MedicationOrder, MedicationQuery, PharmacyStore,
    Prescription, PrescriptionQuery, RefillRequest, StockLevel, StockQuery, Store, ToolUsage,
    UsageRecorder, User, UserQuery,
};
use crate::error::{DispensaryError, Result};

const BUNDLED_SEED: &str = include_str!("../../data/pharmacy_seed.json");

const MAX_USERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub med_id: String,
    pub store_id: String,
    pub quantity: i64,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrescriptionRow {
    pub prescription_id: String,
    pub user_id: String,
    pub med_id: String,
    pub directions: String,
    pub refills_remaining: i64,
    pub expires_at: NaiveDate,
}

/// Seed file contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PharmacySeed {
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub stores: Vec<Store>,
    #[serde(default)]
    pub inventory: Vec<InventoryRow>,
    #[serde(default)]
    pub prescriptions: Vec<PrescriptionRow>,
}

impl PharmacySeed {
    /// The seed data shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Ok(serde_json::from_str(BUNDLED_SEED)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Default)]
struct Catalog {
    seed: PharmacySeed,
    refill_requests: Vec<RefillRequest>,
}

impl Catalog {
    fn join(&self, row: &PrescriptionRow) -> Option<Prescription> {
        let med = self.seed.medications.iter().find(|m| m.med_id == row.med_id)?;
        Some(Prescription {
            prescription_id: row.prescription_id.clone(),
            user_id: row.user_id.clone(),
            med_id: row.med_id.clone(),
            brand_name: med.brand_name.clone(),
            generic_name: med.generic_name.clone(),
            rx_required: med.rx_required,
            directions: row.directions.clone(),
            refills_remaining: row.refills_remaining,
            expires_at: row.expires_at,
        })
    }
}

/// Store backed by process memory.
///
/// Writes live for the lifetime of the process only. A refill re-checks the
/// remaining count and applies the decrement under one write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    catalog: RwLock<Catalog>,
    usage: Mutex<HashMap<String, i64>>,
}

impl MemoryStore {
    pub fn new(seed: PharmacySeed) -> Self {
        Self {
            catalog: RwLock::new(Catalog {
                seed,
                refill_requests: Vec::new(),
            }),
            usage: Mutex::new(HashMap::new()),
        }
    }

    /// Load the bundled seed data.
    pub fn bundled() -> Result<Self> {
        Ok(Self::new(PharmacySeed::bundled()?))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(PharmacySeed::from_file(path)?))
    }

    /// Refill requests submitted since the store was created.
    pub async fn refill_requests(&self) -> Vec<RefillRequest> {
        self.catalog.read().await.refill_requests.clone()
    }
}

fn matches_query(med: &Medication, query: &MedicationQuery) -> bool {
    let field = |value: &str, filter: &Option<String>| {
        filter.as_deref().map_or(true, |f| contains_ci(value, f))
    };
    let text_ok = query.text.as_deref().map_or(true, |t| {
        contains_ci(&med.brand_name, t)
            || contains_ci(&med.generic_name, t)
            || contains_ci(&med.active_ingredients, t)
    });
    text_ok
        && field(&med.brand_name, &query.brand_name)
        && field(&med.generic_name, &query.generic_name)
        && field(&med.active_ingredients, &query.active_ingredient)
        && field(&med.form, &query.form)
        && field(&med.strength, &query.strength)
        && query.rx_required.map_or(true, |rx| med.rx_required == rx)
}

fn relevance_rank(med: &Medication, text: Option<&str>) -> u8 {
    match text {
        Some(t) if contains_ci(&med.brand_name, t) => 1,
        Some(t) if contains_ci(&med.generic_name, t) => 2,
        _ => 3,
    }
}

#[async_trait]
impl PharmacyStore for MemoryStore {
    async fn search_medications(&self, query: &MedicationQuery) -> Result<Vec<Medication>> {
        let catalog = self.catalog.read().await;
        let mut meds: Vec<Medication> = catalog
            .seed
            .medications
            .iter()
            .filter(|m| matches_query(m, query))
            .cloned()
            .collect();
        match query.order {
            MedicationOrder::Brand => meds.sort_by(|a, b| a.brand_name.cmp(&b.brand_name)),
            MedicationOrder::Relevance => {
                let text = query.text.as_deref();
                meds.sort_by(|a, b| {
                    relevance_rank(a, text)
                        .cmp(&relevance_rank(b, text))
                        .then_with(|| a.brand_name.cmp(&b.brand_name))
                });
            }
        }
        if let Some(limit) = query.limit {
            meds.truncate(limit);
        }
        Ok(meds)
    }

    async fn fuzzy_medications(&self, name: &str) -> Result<Vec<FuzzyMatch>> {
        let catalog = self.catalog.read().await;
        let needle = name.to_lowercase();
        let mut hits: Vec<FuzzyMatch> = catalog
            .seed
            .medications
            .iter()
            .filter_map(|m| {
                let score = similarity(&m.brand_name, &needle).max(similarity(&m.generic_name, &needle));
                (score > SIMILARITY_THRESHOLD).then(|| FuzzyMatch {
                    med_id: m.med_id.clone(),
                    brand_name: m.brand_name.clone(),
                    generic_name: m.generic_name.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(MAX_FUZZY_CANDIDATES);
        Ok(hits)
    }

    async fn medication(&self, med_id: &str) -> Result<Option<Medication>> {
        let catalog = self.catalog.read().await;
        Ok(catalog.seed.medications.iter().find(|m| m.med_id == med_id).cloned())
    }

    async fn search_users(&self, query: &UserQuery) -> Result<Vec<User>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let catalog = self.catalog.read().await;
        let mut users: Vec<User> = catalog
            .seed
            .users
            .iter()
            .filter(|u| {
                query.user_id.as_deref() == Some(u.user_id.as_str())
                    || query.name.as_deref().is_some_and(|n| contains_ci(&u.full_name, n))
                    || query.email.as_deref().is_some_and(|e| contains_ci(&u.email, e))
                    || query.phone.as_deref().is_some_and(|p| contains_ci(&u.phone, p))
            })
            .cloned()
            .collect();
        users.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        users.truncate(MAX_USERS);
        Ok(users)
    }

    async fn stock(&self, query: &StockQuery) -> Result<Vec<StockLevel>> {
        let catalog = self.catalog.read().await;
        let mut rows: Vec<StockLevel> = catalog
            .seed
            .inventory
            .iter()
            .filter(|row| row.med_id == query.med_id)
            .filter(|row| {
                query
                    .store_ids
                    .as_ref()
                    .map_or(true, |ids| ids.iter().any(|id| id == &row.store_id))
            })
            .filter(|row| !query.in_stock_only || row.quantity > 0)
            .map(|row| {
                let store = catalog.seed.stores.iter().find(|s| s.store_id == row.store_id);
                StockLevel {
                    med_id: row.med_id.clone(),
                    store_id: row.store_id.clone(),
                    store_name: store.map(|s| s.name.clone()),
                    city: store.map(|s| s.city.clone()),
                    quantity: row.quantity,
                    last_updated: row.last_updated.clone(),
                }
            })
            .collect();
        // Unknown stores sort last, as NULLs do in SQL.
        rows.sort_by(|a, b| {
            (a.city.is_none(), &a.city, a.store_name.is_none(), &a.store_name).cmp(&(
                b.city.is_none(),
                &b.city,
                b.store_name.is_none(),
                &b.store_name,
            ))
        });
        Ok(rows)
    }

    async fn list_stores(&self, city: Option<&str>) -> Result<Vec<Store>> {
        let catalog = self.catalog.read().await;
        let mut stores: Vec<Store> = catalog
            .seed
            .stores
            .iter()
            .filter(|s| city.map_or(true, |c| contains_ci(&s.city, c)))
            .cloned()
            .collect();
        if city.is_some() {
            stores.sort_by(|a, b| a.name.cmp(&b.name));
        } else {
            stores.sort_by(|a, b| (&a.city, &a.name).cmp(&(&b.city, &b.name)));
        }
        Ok(stores)
    }

    async fn prescriptions(&self, query: &PrescriptionQuery) -> Result<Vec<Prescription>> {
        let catalog = self.catalog.read().await;
        let horizon = query.expiry_horizon();
        let mut rows: Vec<Prescription> = catalog
            .seed
            .prescriptions
            .iter()
            .filter(|p| query.user_id.as_ref().map_or(true, |u| &p.user_id == u))
            .filter(|p| query.med_id.as_ref().map_or(true, |m| &p.med_id == m))
            .filter(|p| {
                horizon.map_or(true, |h| p.expires_at >= query.today && p.expires_at <= h)
            })
            .filter(|p| {
                query
                    .has_refills
                    .map_or(true, |wanted| (p.refills_remaining > 0) == wanted)
            })
            .filter_map(|p| catalog.join(p))
            .collect();
        rows.sort_by(|a, b| (a.expires_at, &a.user_id).cmp(&(b.expires_at, &b.user_id)));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn prescription(&self, prescription_id: &str) -> Result<Option<Prescription>> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .seed
            .prescriptions
            .iter()
            .find(|p| p.prescription_id == prescription_id)
            .and_then(|p| catalog.join(p)))
    }

    async fn submit_refill(&self, request: &RefillRequest) -> Result<bool> {
        let mut catalog = self.catalog.write().await;
        let row = catalog
            .seed
            .prescriptions
            .iter_mut()
            .find(|p| p.prescription_id == request.prescription_id)
            .ok_or_else(|| {
                DispensaryError::Store(format!(
                    "prescription {} disappeared during refill",
                    request.prescription_id
                ))
            })?;
        if row.refills_remaining <= 0 {
            return Ok(false);
        }
        row.refills_remaining -= 1;
        catalog.refill_requests.push(request.clone());
        Ok(true)
    }
}

#[async_trait]
impl UsageRecorder for MemoryStore {
    fn record(&self, tool_name: &str) {
        let mut usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *usage.entry(tool_name.to_string()).or_insert(0) += 1;
    }

    async fn snapshot(&self) -> Result<Vec<ToolUsage>> {
        let usage = self.usage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut counts: Vec<ToolUsage> = usage
            .iter()
            .map(|(name, count)| ToolUsage {
                tool_name: name.clone(),
                call_count: *count,
            })
            .collect();
        counts.sort_by(|a, b| b.call_count.cmp(&a.call_count).then_with(|| a.tool_name.cmp(&b.tool_name)));
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::bundled().unwrap()
    }

    #[test]
    fn bundled_seed_parses() {
        let seed = PharmacySeed::bundled().unwrap();
        assert!(seed.medications.iter().any(|m| m.med_id == "MED001"));
        assert!(seed.stores.iter().any(|s| s.store_id == "STORE_JLM_01"));
    }

    #[tokio::test]
    async fn seed_file_replaces_bundled_data() {
        let seed = PharmacySeed {
            stores: vec![Store {
                store_id: "STORE_EIL_01".into(),
                name: "Red Sea Pharmacy".into(),
                city: "Eilat".into(),
            }],
            ..PharmacySeed::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, serde_json::to_string(&seed).unwrap()).unwrap();

        let store = MemoryStore::from_file(&path).unwrap();

        let stores = store.list_stores(None).await.unwrap();
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].city, "Eilat");
        assert!(store.medication("MED001").await.unwrap().is_none());
    }

    #[test]
    fn unreadable_seed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            MemoryStore::from_file(&path),
            Err(DispensaryError::Serialization(_))
        ));
        assert!(matches!(
            MemoryStore::from_file(&dir.path().join("missing.json")),
            Err(DispensaryError::Io(_))
        ));
    }

    #[tokio::test]
    async fn relevance_order_puts_brand_hits_first() {
        let query = MedicationQuery {
            text: Some("lo".into()),
            order: MedicationOrder::Relevance,
            ..MedicationQuery::default()
        };
        let meds = store().search_medications(&query).await.unwrap();
        let brands: Vec<&str> = meds.iter().map(|m| m.brand_name.as_str()).collect();
        // Losec matches on brand; the chlorides only via active ingredients.
        assert_eq!(brands, vec!["Losec", "Glucophage", "Zyrtec"]);
    }

    #[tokio::test]
    async fn fuzzy_lookup_recovers_from_typo() {
        let hits = store().fuzzy_medications("iburprofen").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].med_id, "MED001");
    }

    #[tokio::test]
    async fn stock_rows_follow_city_order() {
        let rows = store()
            .stock(&StockQuery {
                med_id: "MED001".into(),
                ..StockQuery::default()
            })
            .await
            .unwrap();
        let cities: Vec<_> = rows.iter().filter_map(|r| r.city.as_deref()).collect();
        assert_eq!(cities, vec!["Haifa", "Jerusalem", "Tel Aviv"]);
    }

    #[tokio::test]
    async fn refill_decrements_and_records_request() {
        let store = store();
        let request = RefillRequest {
            refill_request_id: "RR-1-RX-1001".into(),
            prescription_id: "RX-1001".into(),
            user_id: "1003".into(),
            status: "submitted".into(),
            created_at: chrono::Utc::now(),
        };
        assert!(store.submit_refill(&request).await.unwrap());

        let rx = store.prescription("RX-1001").await.unwrap().unwrap();
        assert_eq!(rx.refills_remaining, 1);
        assert_eq!(store.refill_requests().await, vec![request]);
    }

    #[tokio::test]
    async fn refill_without_remaining_count_is_refused() {
        let store = store();
        let request = RefillRequest {
            refill_request_id: "RR-1-RX-1002".into(),
            prescription_id: "RX-1002".into(),
            user_id: "1003".into(),
            status: "submitted".into(),
            created_at: chrono::Utc::now(),
        };
        assert!(!store.submit_refill(&request).await.unwrap());

        let rx = store.prescription("RX-1002").await.unwrap().unwrap();
        assert_eq!(rx.refills_remaining, 0);
        assert!(store.refill_requests().await.is_empty());
    }

    #[tokio::test]
    async fn expiry_window_saturates_on_huge_day_counts() {
        let store = store();
        let today = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut query = PrescriptionQuery::new(today);

        query.expiring_within_days = Some(i64::MAX);
        let ids: Vec<String> = store
            .prescriptions(&query)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.prescription_id)
            .collect();
        assert_eq!(ids.len(), 4);
        assert!(!ids.contains(&"RX-1003".to_string()));

        query.expiring_within_days = Some(i64::MIN);
        assert!(store.prescriptions(&query).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn usage_snapshot_sorts_by_count() {
        let store = store();
        store.record("list_stores");
        store.record("check_stock_availability");
        store.record("check_stock_availability");

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(snapshot[0].tool_name, "check_stock_availability");
        assert_eq!(snapshot[0].call_count, 2);
        assert_eq!(snapshot[1].call_count, 1);
    }
}

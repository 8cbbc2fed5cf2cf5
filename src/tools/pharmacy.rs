//! The pharmacy tool set exposed to the model.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::registry::ToolRegistry;
use super::tool::{FunctionTool, Tool};
use super::types::ToolParameters;
use super::ToolArguments;
use crate::error::Result;
use crate::store::{
    FuzzyMatch, Medication, MedicationOrder, MedicationQuery, PharmacyStore, PrescriptionQuery,
    RefillRequest, StockQuery, UsageRecorder, UserQuery,
};

type SharedStore = Arc<dyn PharmacyStore>;

const DEFAULT_MEDICATION_LIMIT: i64 = 20;
const DEFAULT_PRESCRIPTION_LIMIT: i64 = 50;
const MAX_AMBIGUOUS_CANDIDATES: usize = 5;
const REFILL_ETA_HOURS: u32 = 4;
const CATALOG_SOURCE: &str = "Synthetic internal pharmacy catalog";

/// Build a registry holding every pharmacy tool, in declaration order.
pub fn pharmacy_registry(store: SharedStore, usage: Arc<dyn UsageRecorder>) -> ToolRegistry {
    pharmacy_tools(&store)
        .into_iter()
        .fold(ToolRegistry::new(usage), ToolRegistry::with_tool)
}

/// Every pharmacy tool bound to `store`.
pub fn pharmacy_tools(store: &SharedStore) -> Vec<Arc<dyn Tool>> {
    vec![
        store_tool(
            store,
            "get_medication_by_name",
            "Fetch detailed medication information from the pharmacy catalog by brand/generic name or active ingredient. This tool automatically performs fuzzy matching to handle typos and misspellings (e.g., 'iburprofen' will find 'ibuprofen'). If no exact match is found, it will suggest similar medications. Use this when you need full details about a specific medication. Returns data in English. CRITICAL: Only medications in the database will be returned. If 'found': false is returned, the medication does not exist in the catalog and you must NOT provide information about it from general knowledge. Instead, use list_medications to find alternatives.",
            ToolParameters::object()
                .string(
                    "name",
                    "Medication name (brand, generic, or active ingredient) - can be in any language. The tool handles typos automatically, so you can use this even if the spelling might be slightly off.",
                    true,
                )
                .build(),
            get_medication_by_name,
        ),
        store_tool(
            store,
            "list_medications",
            "List or search medications from the catalog. Use this to browse available medications or find medications when you're unsure of the exact name, or when a requested medication is not found and you need to suggest alternatives. More efficient than calling get_medication_by_name multiple times. Returns a list of medications with basic info (med_id, brand_name, generic_name, form, strength, rx_required). Use get_medication_by_name if you need full details about a specific medication. CRITICAL: Only medications in the database will be returned. Always use this tool when a medication is not found to search for alternatives.",
            ToolParameters::object()
                .string(
                    "search_term",
                    "Optional search term to filter medications by brand name, generic name, or active ingredients. If not provided, returns all medications up to the limit.",
                    false,
                )
                .integer(
                    "limit",
                    "Maximum number of medications to return (default: 20, max recommended: 50)",
                    false,
                )
                .build(),
            list_medications,
        ),
        store_tool(
            store,
            "search_users",
            "Search for users by name, email, phone, or user_id. Use this to find a user when you need their user_id for prescription operations (like listing prescriptions or requesting refills). At least one search parameter must be provided.",
            ToolParameters::object()
                .string("name", "Search by user's full name (partial match supported)", false)
                .string("email", "Search by user's email address (partial match supported)", false)
                .string("phone", "Search by user's phone number (partial match supported)", false)
                .string("user_id", "Search by exact user_id", false)
                .build(),
            search_users,
        ),
        store_tool(
            store,
            "check_stock_availability",
            "Check inventory quantity for a medication in a specific store.",
            ToolParameters::object()
                .bare_string("med_id", true)
                .bare_string("store_id", true)
                .build(),
            check_stock_availability,
        ),
        store_tool(
            store,
            "list_user_prescriptions",
            "List prescriptions for a user (for refill workflows). Returns data in English.",
            ToolParameters::object().bare_string("user_id", true).build(),
            list_user_prescriptions,
        ),
        store_tool(
            store,
            "request_prescription_refill",
            "Submit a refill request for a user's prescription.",
            ToolParameters::object()
                .bare_string("user_id", true)
                .bare_string("prescription_id", true)
                .build(),
            request_prescription_refill,
        ),
        store_tool(
            store,
            "query_medications_flexible",
            "Flexible medication query with multiple optional filters. All parameters are optional - combine as needed. Use this for complex searches like 'find all tablets with paracetamol that don't require prescription'. More powerful than list_medications when you need to filter by multiple criteria. Returns medications matching ALL specified criteria.",
            ToolParameters::object()
                .string("brand_name", "Filter by brand name (partial match)", false)
                .string("generic_name", "Filter by generic name (partial match)", false)
                .string("active_ingredient", "Filter by active ingredient (partial match)", false)
                .string("form", "Filter by form (e.g., 'tablet', 'liquid', 'capsule')", false)
                .string("strength", "Filter by strength (e.g., '200 mg', '500 mg')", false)
                .boolean(
                    "rx_required",
                    "Filter by prescription requirement (true = requires prescription, false = over-the-counter)",
                    false,
                )
                .integer("limit", "Maximum number of results (default: 20, max recommended: 50)", false)
                .build(),
            query_medications_flexible,
        ),
        store_tool(
            store,
            "query_medications_with_stock",
            "Query medications with optional stock filtering across one or more stores. Combines medication search with inventory checks in a single efficient query. Use this when you need to find medications AND check their availability. Much more efficient than calling get_medication_by_name and check_stock_availability separately.",
            ToolParameters::object()
                .string("search_term", "Search term for brand name, generic name, or active ingredients", false)
                .string("active_ingredient", "Filter by active ingredient", false)
                .string("form", "Filter by form (e.g., 'tablet')", false)
                .boolean("rx_required", "Filter by prescription requirement", false)
                .string_array(
                    "store_ids",
                    "List of store IDs to check (e.g., ['STORE_TLV_01', 'STORE_JLM_01']). If not provided, checks all stores.",
                    false,
                )
                .boolean(
                    "in_stock_only",
                    "If true, only return medications that are in stock at the specified stores",
                    false,
                )
                .integer("limit", "Maximum number of medications to return (default: 20)", false)
                .build(),
            query_medications_with_stock,
        ),
        store_tool(
            store,
            "query_stock_multiple_stores",
            "Check stock availability for a medication across multiple stores in a single query. Use this instead of calling check_stock_availability multiple times. Can search by med_id or medication name.",
            ToolParameters::object()
                .string("med_id", "Medication ID (use this if you know it)", false)
                .string(
                    "med_name",
                    "Medication name (brand or generic) - will look up med_id automatically",
                    false,
                )
                .string_array(
                    "store_ids",
                    "List of store IDs to check. If not provided, checks all stores.",
                    false,
                )
                .boolean("in_stock_only", "If true, only return stores where medication is in stock", false)
                .build(),
            query_stock_multiple_stores,
        ),
        store_tool(
            store,
            "list_stores",
            "List available pharmacy store locations. Use this to find store_ids when customers ask about specific cities or locations. Returns store_id, name, and city for each store.",
            ToolParameters::object()
                .string(
                    "city",
                    "Optional: Filter stores by city name (e.g., 'Tel Aviv', 'Jerusalem')",
                    false,
                )
                .build(),
            list_stores,
        ),
        store_tool(
            store,
            "query_prescriptions_flexible",
            "Flexible prescription query with multiple optional filters. Can search by user, medication, expiration status, and refill availability. Use this for complex queries like 'find all prescriptions expiring in the next 7 days' or 'find prescriptions for a specific medication across all users'.",
            ToolParameters::object()
                .string("user_id", "Filter by user ID", false)
                .string("med_id", "Filter by medication ID", false)
                .string("med_name", "Filter by medication name (will look up med_id)", false)
                .integer(
                    "expiring_soon_days",
                    "Find prescriptions expiring within this many days (e.g., 7 for next week)",
                    false,
                )
                .boolean(
                    "has_refills",
                    "Filter by refill availability (true = has refills remaining, false = no refills)",
                    false,
                )
                .integer("limit", "Maximum number of results (default: 50)", false)
                .build(),
            query_prescriptions_flexible,
        ),
    ]
}

/// Wrap a store operation taking typed parameters as a [`Tool`].
fn store_tool<P, F, Fut>(
    store: &SharedStore,
    name: &str,
    description: &str,
    parameters: ToolParameters,
    op: F,
) -> Arc<dyn Tool>
where
    P: DeserializeOwned + Send + 'static,
    F: Fn(SharedStore, P) -> Fut + Copy + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let store = Arc::clone(store);
    Arc::new(FunctionTool::new(name, description, parameters, move |args: ToolArguments| {
        let store = Arc::clone(&store);
        async move { op(store, args.deserialize::<P>()?).await }
    }))
}

/// Drop blank strings so they behave like an omitted filter.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn present_ids(ids: Option<Vec<String>>) -> Option<Vec<String>> {
    ids.filter(|ids| !ids.is_empty())
}

fn limit(value: i64) -> Option<usize> {
    Some(value.max(0) as usize)
}

/// Outcome of resolving a free-text medication name.
enum Lookup {
    Found(Medication),
    Ambiguous(Vec<Medication>),
    Fuzzy(Vec<FuzzyMatch>),
    Missing,
}

async fn lookup_medication(store: &dyn PharmacyStore, name: &str) -> Result<Lookup> {
    let mut hits = store.search_medications(&MedicationQuery::text(name)).await?;
    match hits.len() {
        0 => {
            let fuzzy = store.fuzzy_medications(name).await?;
            Ok(if fuzzy.is_empty() {
                Lookup::Missing
            } else {
                Lookup::Fuzzy(fuzzy)
            })
        }
        1 => Ok(Lookup::Found(hits.remove(0))),
        _ => Ok(Lookup::Ambiguous(hits)),
    }
}

/// The single catalog entry `name` resolves to, if unambiguous.
async fn resolve_med_id(store: &dyn PharmacyStore, name: &str) -> Result<Option<String>> {
    Ok(match lookup_medication(store, name).await? {
        Lookup::Found(med) => Some(med.med_id),
        _ => None,
    })
}

fn medication_not_found(med_name: &str) -> Value {
    json!({
        "error": "MEDICATION_NOT_FOUND",
        "med_name": med_name,
        "message": "Medication not found in catalog",
    })
}

fn medication_summary(med: &Medication) -> Value {
    json!({
        "med_id": med.med_id,
        "brand_name": med.brand_name,
        "generic_name": med.generic_name,
        "active_ingredients": med.active_ingredients,
        "form": med.form,
        "strength": med.strength,
        "rx_required": med.rx_required,
    })
}

fn medication_list(meds: &[Medication]) -> Value {
    json!({
        "count": meds.len(),
        "medications": meds.iter().map(medication_summary).collect::<Vec<_>>(),
    })
}

fn optional_list(text: &Option<String>) -> Vec<String> {
    text.iter().filter(|t| !t.is_empty()).cloned().collect()
}

#[derive(Debug, Deserialize)]
struct NameParams {
    name: String,
}

async fn get_medication_by_name(store: SharedStore, params: NameParams) -> Result<Value> {
    let name = params.name;
    Ok(match lookup_medication(store.as_ref(), &name).await? {
        Lookup::Found(med) => {
            let active_ingredients: Vec<&str> = if med.active_ingredients.is_empty() {
                Vec::new()
            } else {
                med.active_ingredients.split(", ").collect()
            };
            json!({
                "found": true,
                "med": {
                    "med_id": med.med_id,
                    "brand_name": med.brand_name,
                    "generic_name": med.generic_name,
                    "active_ingredients": active_ingredients,
                    "form": med.form,
                    "strength": med.strength,
                    "rx_required": med.rx_required,
                    "standard_directions": med.standard_directions.clone().unwrap_or_default(),
                    "warnings": optional_list(&med.warnings),
                    "contraindications": optional_list(&med.contraindications),
                    "source": CATALOG_SOURCE,
                }
            })
        }
        Lookup::Ambiguous(meds) => json!({
            "found": false,
            "ambiguous": true,
            "candidates": meds
                .iter()
                .take(MAX_AMBIGUOUS_CANDIDATES)
                .map(|m| json!({ "med_id": m.med_id, "brand": m.brand_name, "generic": m.generic_name }))
                .collect::<Vec<_>>(),
        }),
        Lookup::Fuzzy(hits) => json!({
            "found": false,
            "ambiguous": true,
            "fuzzy": true,
            "input_name": name,
            "candidates": hits
                .iter()
                .map(|h| json!({
                    "med_id": h.med_id,
                    "brand": h.brand_name,
                    "generic": h.generic_name,
                    "score": h.score,
                }))
                .collect::<Vec<_>>(),
        }),
        Lookup::Missing => json!({
            "found": false,
            "candidates": [],
            "input_name": name,
        }),
    })
}

#[derive(Debug, Deserialize)]
struct ListMedicationsParams {
    search_term: Option<String>,
    #[serde(default = "default_medication_limit")]
    limit: i64,
}

fn default_medication_limit() -> i64 {
    DEFAULT_MEDICATION_LIMIT
}

fn default_prescription_limit() -> i64 {
    DEFAULT_PRESCRIPTION_LIMIT
}

async fn list_medications(store: SharedStore, params: ListMedicationsParams) -> Result<Value> {
    let text = present(params.search_term);
    let order = if text.is_some() {
        MedicationOrder::Relevance
    } else {
        MedicationOrder::Brand
    };
    let meds = store
        .search_medications(&MedicationQuery {
            text,
            order,
            limit: limit(params.limit),
            ..MedicationQuery::default()
        })
        .await?;
    Ok(medication_list(&meds))
}

#[derive(Debug, Deserialize)]
struct SearchUsersParams {
    name: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    user_id: Option<String>,
}

async fn search_users(store: SharedStore, params: SearchUsersParams) -> Result<Value> {
    let query = UserQuery {
        user_id: present(params.user_id),
        name: present(params.name),
        email: present(params.email),
        phone: present(params.phone),
    };
    if query.is_empty() {
        return Ok(json!({
            "error": "At least one search parameter (name, email, phone, or user_id) must be provided"
        }));
    }
    let users = store.search_users(&query).await?;
    Ok(json!({ "count": users.len(), "users": users }))
}

#[derive(Debug, Deserialize)]
struct StockParams {
    med_id: String,
    store_id: String,
}

async fn check_stock_availability(store: SharedStore, params: StockParams) -> Result<Value> {
    let rows = store
        .stock(&StockQuery {
            med_id: params.med_id.clone(),
            store_ids: Some(vec![params.store_id.clone()]),
            in_stock_only: false,
        })
        .await?;
    Ok(match rows.first() {
        Some(row) => json!({
            "med_id": params.med_id,
            "store_id": params.store_id,
            "quantity": row.quantity,
            "status": row.status(),
            "last_updated": row.last_updated,
        }),
        None => json!({
            "error": "NOT_FOUND",
            "med_id": params.med_id,
            "store_id": params.store_id,
        }),
    })
}

#[derive(Debug, Deserialize)]
struct UserParams {
    user_id: String,
}

async fn list_user_prescriptions(store: SharedStore, params: UserParams) -> Result<Value> {
    let mut query = PrescriptionQuery::new(Utc::now().date_naive());
    query.user_id = Some(params.user_id.clone());
    let rows = store.prescriptions(&query).await?;
    Ok(json!({
        "user_id": params.user_id,
        "prescriptions": rows
            .iter()
            .map(|rx| json!({
                "prescription_id": rx.prescription_id,
                "med_id": rx.med_id,
                "med_name": rx.med_name(),
                "directions": rx.directions,
                "refills_remaining": rx.refills_remaining,
                "expires_at": rx.expires_at,
                "rx_required": rx.rx_required,
            }))
            .collect::<Vec<_>>(),
    }))
}

#[derive(Debug, Deserialize)]
struct RefillParams {
    user_id: String,
    prescription_id: String,
}

fn refill_rejected(code: &str) -> Value {
    json!({ "accepted": false, "error": code })
}

async fn request_prescription_refill(store: SharedStore, params: RefillParams) -> Result<Value> {
    let Some(rx) = store.prescription(&params.prescription_id).await? else {
        return Ok(refill_rejected("NOT_FOUND"));
    };
    if rx.user_id != params.user_id {
        return Ok(refill_rejected("UNAUTHORIZED"));
    }
    if rx.refills_remaining <= 0 {
        return Ok(refill_rejected("NO_REFILLS"));
    }
    let now = Utc::now();
    if rx.is_expired(now.date_naive()) {
        return Ok(refill_rejected("EXPIRED"));
    }

    let request = RefillRequest {
        refill_request_id: format!("RR-{}-{}", now.format("%Y%m%d%H%M%S%3f"), rx.prescription_id),
        prescription_id: rx.prescription_id,
        user_id: params.user_id,
        status: "submitted".to_string(),
        created_at: now,
    };
    if !store.submit_refill(&request).await? {
        // Another request took the last refill after the read above.
        return Ok(refill_rejected("NO_REFILLS"));
    }
    tracing::info!(
        refill_request_id = %request.refill_request_id,
        prescription_id = %request.prescription_id,
        "refill request submitted"
    );
    Ok(json!({
        "accepted": true,
        "refill_request_id": request.refill_request_id,
        "status": request.status,
        "eta_hours": REFILL_ETA_HOURS,
    }))
}

#[derive(Debug, Deserialize)]
struct FlexibleMedicationParams {
    brand_name: Option<String>,
    generic_name: Option<String>,
    active_ingredient: Option<String>,
    form: Option<String>,
    strength: Option<String>,
    rx_required: Option<bool>,
    #[serde(default = "default_medication_limit")]
    limit: i64,
}

async fn query_medications_flexible(
    store: SharedStore,
    params: FlexibleMedicationParams,
) -> Result<Value> {
    let meds = store
        .search_medications(&MedicationQuery {
            text: None,
            brand_name: present(params.brand_name),
            generic_name: present(params.generic_name),
            active_ingredient: present(params.active_ingredient),
            form: present(params.form),
            strength: present(params.strength),
            rx_required: params.rx_required,
            order: MedicationOrder::Brand,
            limit: limit(params.limit),
        })
        .await?;
    Ok(medication_list(&meds))
}

#[derive(Debug, Deserialize)]
struct MedicationsWithStockParams {
    search_term: Option<String>,
    active_ingredient: Option<String>,
    form: Option<String>,
    rx_required: Option<bool>,
    store_ids: Option<Vec<String>>,
    #[serde(default)]
    in_stock_only: bool,
    #[serde(default = "default_medication_limit")]
    limit: i64,
}

async fn query_medications_with_stock(
    store: SharedStore,
    params: MedicationsWithStockParams,
) -> Result<Value> {
    let store_ids = present_ids(params.store_ids);
    // Stock filtering only narrows results when stores were named.
    let in_stock_only = params.in_stock_only && store_ids.is_some();
    let meds = store
        .search_medications(&MedicationQuery {
            text: present(params.search_term),
            active_ingredient: present(params.active_ingredient),
            form: present(params.form),
            rx_required: params.rx_required,
            ..MedicationQuery::default()
        })
        .await?;

    let max = limit(params.limit).unwrap_or_default();
    let mut medications = Vec::new();
    for med in meds {
        if medications.len() >= max {
            break;
        }
        let mut stock = store
            .stock(&StockQuery {
                med_id: med.med_id.clone(),
                store_ids: store_ids.clone(),
                in_stock_only,
            })
            .await?;
        if in_stock_only && stock.is_empty() {
            continue;
        }
        stock.sort_by(|a, b| a.store_id.cmp(&b.store_id));
        let mut entry = medication_summary(&med);
        entry["stock"] = stock
            .iter()
            .map(|s| json!({ "store_id": s.store_id, "quantity": s.quantity, "status": s.status() }))
            .collect();
        medications.push(entry);
    }
    Ok(json!({ "count": medications.len(), "medications": medications }))
}

#[derive(Debug, Deserialize)]
struct MultiStoreParams {
    med_id: Option<String>,
    med_name: Option<String>,
    store_ids: Option<Vec<String>>,
    #[serde(default)]
    in_stock_only: bool,
}

async fn query_stock_multiple_stores(store: SharedStore, params: MultiStoreParams) -> Result<Value> {
    let mut med_id = present(params.med_id);
    if med_id.is_none() {
        if let Some(name) = present(params.med_name) {
            match resolve_med_id(store.as_ref(), &name).await? {
                Some(id) => med_id = Some(id),
                None => return Ok(medication_not_found(&name)),
            }
        }
    }
    let Some(med_id) = med_id else {
        return Ok(json!({
            "error": "MISSING_PARAMETER",
            "message": "Either med_id or med_name must be provided",
        }));
    };

    let rows = store
        .stock(&StockQuery {
            med_id: med_id.clone(),
            store_ids: present_ids(params.store_ids),
            in_stock_only: params.in_stock_only,
        })
        .await?;
    let med_name = store.medication(&med_id).await?.map(|m| m.display_name());
    Ok(json!({
        "med_id": med_id,
        "med_name": med_name,
        "count": rows.len(),
        "stock": rows
            .iter()
            .map(|r| json!({
                "store_id": r.store_id,
                "store_name": r.store_name,
                "city": r.city,
                "quantity": r.quantity,
                "status": r.status(),
                "last_updated": r.last_updated,
            }))
            .collect::<Vec<_>>(),
    }))
}

#[derive(Debug, Deserialize)]
struct ListStoresParams {
    city: Option<String>,
}

async fn list_stores(store: SharedStore, params: ListStoresParams) -> Result<Value> {
    let stores = store.list_stores(present(params.city).as_deref()).await?;
    Ok(json!({ "count": stores.len(), "stores": stores }))
}

#[derive(Debug, Deserialize)]
struct FlexiblePrescriptionParams {
    user_id: Option<String>,
    med_id: Option<String>,
    med_name: Option<String>,
    expiring_soon_days: Option<i64>,
    has_refills: Option<bool>,
    #[serde(default = "default_prescription_limit")]
    limit: i64,
}

async fn query_prescriptions_flexible(
    store: SharedStore,
    params: FlexiblePrescriptionParams,
) -> Result<Value> {
    let today = Utc::now().date_naive();
    let mut query = PrescriptionQuery::new(today);
    query.user_id = present(params.user_id);
    query.med_id = present(params.med_id);
    if query.med_id.is_none() {
        if let Some(name) = present(params.med_name) {
            match resolve_med_id(store.as_ref(), &name).await? {
                Some(id) => query.med_id = Some(id),
                None => return Ok(medication_not_found(&name)),
            }
        }
    }
    query.expiring_within_days = params.expiring_soon_days;
    query.has_refills = params.has_refills;
    query.limit = limit(params.limit);

    let rows = store.prescriptions(&query).await?;
    Ok(json!({
        "count": rows.len(),
        "prescriptions": rows
            .iter()
            .map(|rx| json!({
                "prescription_id": rx.prescription_id,
                "user_id": rx.user_id,
                "med_id": rx.med_id,
                "med_name": rx.med_name(),
                "directions": rx.directions,
                "refills_remaining": rx.refills_remaining,
                "expires_at": rx.expires_at,
                "status": rx.status(today),
                "rx_required": rx.rx_required,
            }))
            .collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn tool_set_is_complete_and_ordered() {
        let store: SharedStore = Arc::new(MemoryStore::default());
        let names: Vec<String> = pharmacy_tools(&store).iter().map(|t| t.name().to_string()).collect();
        assert_eq!(
            names,
            vec![
                "get_medication_by_name",
                "list_medications",
                "search_users",
                "check_stock_availability",
                "list_user_prescriptions",
                "request_prescription_refill",
                "query_medications_flexible",
                "query_medications_with_stock",
                "query_stock_multiple_stores",
                "list_stores",
                "query_prescriptions_flexible",
            ]
        );
    }

    #[test]
    fn blank_filters_are_ignored() {
        assert_eq!(present(Some("  ".into())), None);
        assert_eq!(present_ids(Some(Vec::new())), None);
        assert_eq!(limit(-3), Some(0));
    }
}

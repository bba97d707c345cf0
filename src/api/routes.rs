//! API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`; the
//! detector inside it is the same one the scan loop drives, so an API
//! triggered cycle queues behind a scheduled one instead of racing it.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::backtest::{BacktestReport, FloorBacktester};
use crate::engine::{CycleReport, Detector};
use crate::ingest::{ingest_batch, IngestReport, RawObservation};
use crate::notify::{AlertDispatcher, DispatchReport};
use crate::storage::newest_sales;
use crate::strategy::{SaleFilter, SaleStatistics};
use crate::types::{
    DetectionError, FloorPrice, ItemIdentity, ListingObservation, Opportunity, SaleObservation,
};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ApiState {
    pub detector: Arc<Detector>,
    pub dispatcher: AlertDispatcher,
    pub last_report: RwLock<Option<CycleReport>>,
}

impl ApiState {
    pub fn new(detector: Arc<Detector>, dispatcher: AlertDispatcher) -> Self {
        Self {
            detector,
            dispatcher,
            last_report: RwLock::new(None),
        }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// `DetectionError` rendered as a JSON error body with a matching status.
#[derive(Debug)]
pub struct ApiError(pub DetectionError);

impl From<DetectionError> for ApiError {
    fn from(err: DetectionError) -> Self {
        Self(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    available: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<usize>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, available, required) = match &self.0 {
            DetectionError::InsufficientData { available, required } => {
                (StatusCode::NOT_FOUND, Some(*available), Some(*required))
            }
            DetectionError::InvalidConfiguration(_)
            | DetectionError::InvalidObservation(_)
            | DetectionError::ArithmeticOverflow { .. } => {
                (StatusCode::BAD_REQUEST, None, None)
            }
            DetectionError::DuplicateActiveOpportunity { .. } => (StatusCode::CONFLICT, None, None),
            DetectionError::StorageUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None, None),
        };
        if status.is_server_error() {
            warn!(error = %self.0, "API request failed");
        }

        let body = ErrorBody {
            error: self.0.to_string(),
            available,
            required,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// ---------------------------------------------------------------------------
// Query and response types
// ---------------------------------------------------------------------------

/// Row cap for the listing and sale reads.
const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

fn default_true() -> bool {
    true
}

fn row_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct OpportunitiesQuery {
    pub min_margin: Option<f64>,
    #[serde(default = "default_true")]
    pub active_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListingsQuery {
    #[serde(default = "default_true")]
    pub active_only: bool,
    pub limit: Option<usize>,
}

/// Without `name`, the most recent sales across every cohort.
#[derive(Debug, Deserialize)]
pub struct SalesQuery {
    pub name: Option<String>,
    pub language: Option<String>,
    pub grade: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CohortQuery {
    pub name: String,
    pub language: Option<String>,
    pub grade: Option<String>,
}

fn cohort(name: &str, language: Option<&str>, grade: Option<&String>) -> ItemIdentity {
    ItemIdentity::new(
        name.trim(),
        language.unwrap_or("EN"),
        grade.filter(|g| !g.trim().is_empty()).cloned(),
    )
}

impl CohortQuery {
    fn identity(&self) -> ItemIdentity {
        cohort(&self.name, self.language.as_deref(), self.grade.as_ref())
    }
}

#[derive(Debug, Deserialize)]
pub struct DetectQuery {
    #[serde(default)]
    pub send_alerts: bool,
}

#[derive(Debug, Serialize)]
pub struct FloorResponse {
    pub identity: ItemIdentity,
    pub floor: FloorPrice,
    pub statistics: Option<SaleStatistics>,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub report: CycleReport,
    pub created: Vec<Opportunity>,
    pub alerts: Option<DispatchReport>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

/// GET /api/status: the most recent cycle report, if any.
pub async fn get_status(State(state): State<AppState>) -> Json<Option<CycleReport>> {
    Json(state.last_report.read().await.clone())
}

/// GET /api/opportunities?min_margin=&active_only=
pub async fn get_opportunities(
    State(state): State<AppState>,
    Query(query): Query<OpportunitiesQuery>,
) -> ApiResult<Vec<Opportunity>> {
    let min_margin = query
        .min_margin
        .map(|m| {
            Decimal::try_from(m).map_err(|_| {
                DetectionError::InvalidObservation(format!("min_margin is not a number: {m}"))
            })
        })
        .transpose()?;

    let mut opportunities = state.detector.store().opportunities(query.active_only).await?;
    if let Some(min) = min_margin {
        opportunities.retain(|o| o.margin_pct >= min);
    }
    Ok(Json(opportunities))
}

/// GET /api/listings?active_only=&limit=
pub async fn get_listings(
    State(state): State<AppState>,
    Query(query): Query<ListingsQuery>,
) -> ApiResult<Vec<ListingObservation>> {
    let listings = state
        .detector
        .store()
        .list_listings(query.active_only, row_limit(query.limit))
        .await?;
    Ok(Json(listings))
}

/// GET /api/sales?name=&language=&grade=&limit=
pub async fn get_sales(
    State(state): State<AppState>,
    Query(query): Query<SalesQuery>,
) -> ApiResult<Vec<SaleObservation>> {
    let limit = row_limit(query.limit);
    let store = state.detector.store();
    let sales = match query.name.as_deref().filter(|n| !n.trim().is_empty()) {
        Some(name) => {
            let identity = cohort(name, query.language.as_deref(), query.grade.as_ref());
            newest_sales(store.fetch_sales(&identity).await?, limit)
        }
        None => store.recent_sales(limit).await?,
    };
    Ok(Json(sales))
}

/// POST /api/observations: a JSON array of raw sale and listing records.
pub async fn post_observations(
    State(state): State<AppState>,
    Json(records): Json<Vec<RawObservation>>,
) -> ApiResult<IngestReport> {
    let report = ingest_batch(state.detector.store().as_ref(), records).await?;
    Ok(Json(report))
}

/// GET /api/floor?name=&language=&grade=
pub async fn get_floor(
    State(state): State<AppState>,
    Query(query): Query<CohortQuery>,
) -> ApiResult<FloorResponse> {
    let identity = query.identity();
    let sales = state.detector.store().fetch_sales(&identity).await?;
    let filter = SaleFilter::for_identity(&identity);

    let floor = state.detector.estimator().estimate_at(&sales, &filter, Utc::now())?;
    let cohort: Vec<_> = sales.into_iter().filter(|s| filter.matches(s)).collect();

    Ok(Json(FloorResponse {
        statistics: SaleStatistics::from_sales(&cohort),
        identity,
        floor,
    }))
}

/// POST /api/detect?send_alerts=
pub async fn post_detect(
    State(state): State<AppState>,
    Query(query): Query<DetectQuery>,
) -> ApiResult<DetectResponse> {
    let outcome = state.detector.run_cycle().await?;
    *state.last_report.write().await = Some(outcome.report.clone());

    let alerts = if query.send_alerts {
        let store = state.detector.store().as_ref();
        Some(state.dispatcher.dispatch(store, &outcome.created).await?)
    } else {
        None
    };

    Ok(Json(DetectResponse {
        report: outcome.report,
        created: outcome.created,
        alerts,
    }))
}

/// GET /api/backtest?name=&language=&grade=
pub async fn get_backtest(
    State(state): State<AppState>,
    Query(query): Query<CohortQuery>,
) -> ApiResult<BacktestReport> {
    let identity = query.identity();
    let sales = state.detector.store().fetch_sales(&identity).await?;

    let backtester = FloorBacktester::new(state.detector.config().estimator.clone())?;
    let report = backtester.run(&sales, &SaleFilter::for_identity(&identity))?;
    Ok(Json(report))
}

//! HTTP surface for the stock movement feed and movement submission.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::ServiceError,
    handlers::common::PaginationMeta,
    services::movements::{
        MovementDirection, MovementFilters, MovementReceipt, MovementType, MovementView,
        NewMovement,
    },
    tenant::TenantContext,
    AppState,
};

const DEFAULT_PAGE_SIZE: u64 = 50;
const MAX_PAGE_SIZE: u64 = 100;

/// Query parameters accepted by the movement feed.
#[derive(Debug, Clone, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListMovementsQuery {
    /// Movement type filter: IN, OUT or ADJUSTMENT.
    #[serde(rename = "type")]
    pub movement_type: Option<String>,
    pub product_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    /// RFC 3339 timestamp or a plain date (inclusive lower bound).
    pub start_date: Option<String>,
    /// RFC 3339 timestamp or a plain date; a plain date covers the whole day.
    pub end_date: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

/// Body accepted by movement submission.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateMovementRequest {
    pub product_id: Uuid,
    pub location_id: Uuid,
    /// IN, OUT or ADJUSTMENT.
    #[serde(rename = "type")]
    pub movement_type: String,
    #[validate(range(min = 1, message = "quantity must be a positive integer"))]
    pub quantity: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    #[validate(length(max = 100))]
    pub reference_number: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MovementItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    #[serde(rename = "type")]
    pub movement_type: MovementDirection,
    pub quantity: i32,
    pub warehouse_name: Option<String>,
    pub from_location_id: Option<Uuid>,
    pub from_location_name: Option<String>,
    pub to_location_id: Option<Uuid>,
    pub to_location_name: Option<String>,
    pub reason: Option<String>,
    pub reference_number: Option<String>,
    pub created_by: Option<Uuid>,
    pub date: DateTime<Utc>,
    pub status: String,
}

impl From<MovementView> for MovementItem {
    fn from(view: MovementView) -> Self {
        Self {
            id: view.id,
            product_id: view.product_id,
            product_name: view.product_name,
            movement_type: view.direction,
            quantity: view.quantity,
            warehouse_name: view.warehouse_name,
            from_location_id: view.from_location_id,
            from_location_name: view.from_location_name,
            to_location_id: view.to_location_id,
            to_location_name: view.to_location_name,
            reason: view.reason,
            reference_number: view.reference_number,
            created_by: view.created_by,
            date: view.date,
            status: view.status,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListMovementsResponse {
    pub movements: Vec<MovementItem>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatedMovement {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    #[serde(rename = "type")]
    pub movement_type: MovementType,
    pub quantity: i32,
    pub warehouse_name: String,
    pub date: DateTime<Utc>,
}

impl From<MovementReceipt> for CreatedMovement {
    fn from(receipt: MovementReceipt) -> Self {
        Self {
            id: receipt.id,
            product_id: receipt.product_id,
            product_name: receipt.product_name,
            movement_type: receipt.movement_type,
            quantity: receipt.quantity,
            warehouse_name: receipt.warehouse_name,
            date: receipt.date,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateMovementResponse {
    pub movement: CreatedMovement,
}

/// Routes for the movement feed and movement submission.
pub fn movements_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(list_movements).post(create_movement))
}

/// List stock movements
#[utoipa::path(
    get,
    path = "/movements",
    params(ListMovementsQuery),
    responses(
        (status = 200, description = "Movement feed page", body = ListMovementsResponse),
        (status = 400, description = "Invalid filter parameters"),
        (status = 401, description = "Missing or invalid tenant header")
    ),
    tag = "movements"
)]
#[instrument(skip(state))]
pub async fn list_movements(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Query(query): Query<ListMovementsQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let filters = parse_filters(&query)?;
    let page = filters.page;
    let limit = filters.limit;

    let (movements, total) = state
        .movement_service
        .list_movements(tenant.tenant_id, filters)
        .await?;

    Ok(Json(ListMovementsResponse {
        movements: movements.into_iter().map(MovementItem::from).collect(),
        pagination: PaginationMeta::new(page, limit, total),
    }))
}

/// Record a stock movement
#[utoipa::path(
    post,
    path = "/movements",
    request_body = CreateMovementRequest,
    responses(
        (status = 201, description = "Movement applied", body = CreateMovementResponse),
        (status = 400, description = "Invalid request or insufficient stock"),
        (status = 401, description = "Missing or invalid tenant header"),
        (status = 404, description = "Product or location not found")
    ),
    tag = "movements"
)]
#[instrument(skip(state, payload))]
pub async fn create_movement(
    State(state): State<Arc<AppState>>,
    tenant: TenantContext,
    Json(payload): Json<CreateMovementRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    payload.validate()?;
    let movement_type = parse_movement_type(&payload.movement_type)?;

    let receipt = state
        .movement_service
        .record_movement(
            tenant.tenant_id,
            tenant.user_id,
            NewMovement {
                product_id: payload.product_id,
                location_id: payload.location_id,
                movement_type,
                quantity: payload.quantity,
                reason: payload.reason,
                notes: payload.notes,
                reference_number: payload.reference_number,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateMovementResponse {
            movement: receipt.into(),
        }),
    ))
}

fn parse_movement_type(raw: &str) -> Result<MovementType, ServiceError> {
    raw.parse::<MovementType>().map_err(|_| {
        ServiceError::ValidationError("type must be one of IN, OUT, ADJUSTMENT".to_string())
    })
}

fn parse_filters(query: &ListMovementsQuery) -> Result<MovementFilters, ServiceError> {
    let movement_type = query
        .movement_type
        .as_deref()
        .map(parse_movement_type)
        .transpose()?;

    let start_date = query
        .start_date
        .as_deref()
        .map(|raw| parse_bound(raw, DayBound::Start))
        .transpose()?;
    let end_date = query
        .end_date
        .as_deref()
        .map(|raw| parse_bound(raw, DayBound::End))
        .transpose()?;

    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(ServiceError::ValidationError(
            "page must be at least 1".to_string(),
        ));
    }
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if limit == 0 {
        return Err(ServiceError::ValidationError(
            "limit must be greater than zero".to_string(),
        ));
    }

    Ok(MovementFilters {
        movement_type,
        product_id: query.product_id,
        location_id: query.location_id,
        start_date,
        end_date,
        page,
        limit: limit.min(MAX_PAGE_SIZE),
    })
}

#[derive(Clone, Copy)]
enum DayBound {
    Start,
    End,
}

/// Parses a date filter. Full timestamps pass through; a bare date expands
/// to the start or the end of that day so `endDate=2026-01-31` keeps the
/// 31st inside the range.
fn parse_bound(raw: &str, bound: DayBound) -> Result<DateTime<Utc>, ServiceError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        ServiceError::ValidationError(format!(
            "invalid date '{}': expected RFC 3339 or YYYY-MM-DD",
            raw
        ))
    })?;

    let start_of_day = date.and_time(NaiveTime::MIN);
    let naive = match bound {
        DayBound::Start => start_of_day,
        DayBound::End => start_of_day + Duration::days(1) - Duration::milliseconds(1),
    };
    Ok(Utc.from_utc_datetime(&naive))
}

//! Movement processing and the movement query facade.
//!
//! Every movement is applied inside one database transaction: the balance
//! mutation, the append to the movement log, and the product-total recompute
//! commit together or not at all. Balance mutations are conditional atomic
//! updates, so two writers racing on the same (tenant, product, location)
//! key cannot drive a balance negative.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionError, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::{timestamp::context::ContextV7, Timestamp, Uuid};

use crate::{
    db::DbPool,
    entities::{inventory_location, location, product, stock_transfer},
    errors::ServiceError,
    events::{Event, EventSender},
};

/// Reorder level applied when a balance row is created for a product that
/// has no reorder level of its own.
const DEFAULT_REORDER_LEVEL: i32 = 10;

/// Status stamped on movement-log rows written by this service.
const MOVEMENT_STATUS_COMPLETED: &str = "COMPLETED";

/// Time-ordered (v7) id for movement-log rows. The feed orders by
/// `created_at DESC, id DESC`; a monotonic id keeps the tiebreak equal to
/// insertion order when timestamps collide.
pub fn next_movement_id() -> Uuid {
    static CONTEXT: OnceLock<Mutex<ContextV7>> = OnceLock::new();
    let context = CONTEXT.get_or_init(|| Mutex::new(ContextV7::new()));
    let context = context.lock().expect("movement id context poisoned");
    Uuid::new_v7(Timestamp::now(&*context))
}

/// Movement operation requested by a caller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
}

/// Direction of a logged movement, derived from which location fields are
/// populated. Not stored; computed at the read boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementDirection {
    In,
    Out,
    Transfer,
}

impl MovementDirection {
    pub fn from_endpoints(from: Option<Uuid>, to: Option<Uuid>) -> Self {
        match (from, to) {
            (Some(_), None) => MovementDirection::Out,
            (None, Some(_)) => MovementDirection::In,
            // Both set is a transfer; neither set never happens for rows
            // written here but is reported as a transfer, matching the feed.
            _ => MovementDirection::Transfer,
        }
    }
}

/// A validated movement request.
#[derive(Debug, Clone)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub reference_number: Option<String>,
}

/// Descriptor returned after a movement commits; complete enough that the
/// caller can render it without a follow-up read.
#[derive(Debug, Clone)]
pub struct MovementReceipt {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub movement_type: MovementType,
    pub quantity: i32,
    pub warehouse_name: String,
    pub date: DateTime<Utc>,
}

/// Filters accepted by the movement feed.
#[derive(Debug, Clone, Default)]
pub struct MovementFilters {
    pub movement_type: Option<MovementType>,
    pub product_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: u64,
    pub limit: u64,
}

/// One row of the human-facing movement feed.
#[derive(Debug, Clone)]
pub struct MovementView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub direction: MovementDirection,
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

/// Service owning the stock ledger: applies movements and serves the feed.
#[derive(Clone)]
pub struct MovementService {
    db: Arc<DbPool>,
    event_sender: EventSender,
}

impl MovementService {
    /// Creates a new movement service instance
    pub fn new(db: Arc<DbPool>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Applies one movement atomically and resynchronizes the product total.
    ///
    /// Validation (positive quantity, product and location ownership) runs
    /// before any write, so a rejected request leaves the ledger untouched.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, location_id = %request.location_id))]
    pub async fn record_movement(
        &self,
        tenant_id: Uuid,
        actor_id: Option<Uuid>,
        request: NewMovement,
    ) -> Result<MovementReceipt, ServiceError> {
        if request.quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "quantity must be a positive integer".to_string(),
            ));
        }

        let db = self.db.as_ref();

        let product = product::Entity::find()
            .filter(product::Column::Id.eq(request.product_id))
            .filter(product::Column::TenantId.eq(tenant_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Product".to_string()))?;

        let stock_location = location::Entity::find()
            .filter(location::Column::Id.eq(request.location_id))
            .filter(location::Column::TenantId.eq(tenant_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound("Location".to_string()))?;

        let default_reorder_level = product.reorder_level.unwrap_or(DEFAULT_REORDER_LEVEL);
        let movement = request.clone();
        let (transfer, product_total) = db
            .transaction::<_, (stock_transfer::Model, i32), ServiceError>(move |txn| {
                Box::pin(async move {
                    match movement.movement_type {
                        MovementType::In => {
                            increment_balance(
                                txn,
                                tenant_id,
                                movement.product_id,
                                movement.location_id,
                                movement.quantity,
                                default_reorder_level,
                            )
                            .await?
                        }
                        MovementType::Out => {
                            decrement_balance(
                                txn,
                                tenant_id,
                                movement.product_id,
                                movement.location_id,
                                movement.quantity,
                            )
                            .await?
                        }
                        MovementType::Adjustment => {
                            set_balance(
                                txn,
                                tenant_id,
                                movement.product_id,
                                movement.location_id,
                                movement.quantity,
                                default_reorder_level,
                            )
                            .await?
                        }
                    }

                    let (from_location_id, to_location_id) = match movement.movement_type {
                        MovementType::In | MovementType::Adjustment => {
                            (None, Some(movement.location_id))
                        }
                        MovementType::Out => (Some(movement.location_id), None),
                    };

                    let transfer = stock_transfer::ActiveModel {
                        id: Set(next_movement_id()),
                        tenant_id: Set(tenant_id),
                        product_id: Set(movement.product_id),
                        quantity: Set(movement.quantity),
                        from_location_id: Set(from_location_id),
                        to_location_id: Set(to_location_id),
                        transfer_number: Set(movement.reference_number.clone()),
                        notes: Set(movement.reason.clone().or(movement.notes.clone())),
                        status: Set(MOVEMENT_STATUS_COMPLETED.to_string()),
                        created_by: Set(actor_id),
                        created_at: Set(Utc::now()),
                    }
                    .insert(txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                    let product_total =
                        sync_product_total(txn, tenant_id, movement.product_id).await?;

                    Ok((transfer, product_total))
                })
            })
            .await
            .map_err(|e| match e {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            })?;

        info!(
            tenant_id = %tenant_id,
            transfer_id = %transfer.id,
            movement_type = %request.movement_type,
            quantity = %request.quantity,
            product_total = %product_total,
            "Applied stock movement"
        );

        // The ledger write has committed; a dead event channel must not turn
        // a successful movement into a client-visible failure.
        if let Err(err) = self
            .event_sender
            .send(Event::StockMovementRecorded {
                tenant_id,
                transfer_id: transfer.id,
                product_id: request.product_id,
                location_id: request.location_id,
                movement_type: request.movement_type.to_string(),
                quantity: request.quantity,
                product_total,
            })
            .await
        {
            warn!("Failed to publish stock movement event: {}", err);
        }

        Ok(MovementReceipt {
            id: transfer.id,
            product_id: product.id,
            product_name: product.name,
            movement_type: request.movement_type,
            quantity: request.quantity,
            warehouse_name: stock_location.name,
            date: transfer.created_at,
        })
    }

    /// Serves the movement feed: filterable, paginated, newest first.
    #[instrument(skip(self, filters))]
    pub async fn list_movements(
        &self,
        tenant_id: Uuid,
        filters: MovementFilters,
    ) -> Result<(Vec<MovementView>, u64), ServiceError> {
        if filters.page == 0 {
            return Err(ServiceError::ValidationError(
                "page must be at least 1".to_string(),
            ));
        }
        if filters.limit == 0 {
            return Err(ServiceError::ValidationError(
                "limit must be greater than zero".to_string(),
            ));
        }

        let db = self.db.as_ref();

        let mut query = stock_transfer::Entity::find()
            .filter(stock_transfer::Column::TenantId.eq(tenant_id));

        // Direction filters translate onto the nullable location pair. With
        // no direction given, a location matches as either endpoint; a naive
        // single-field filter would drop half the relevant history.
        match (filters.movement_type, filters.location_id) {
            (Some(MovementType::In), Some(loc)) => {
                query = query.filter(stock_transfer::Column::ToLocationId.eq(loc));
            }
            (Some(MovementType::In), None) => {
                query = query.filter(stock_transfer::Column::ToLocationId.is_not_null());
            }
            (Some(MovementType::Out), Some(loc)) => {
                query = query.filter(stock_transfer::Column::FromLocationId.eq(loc));
            }
            (Some(MovementType::Out), None) => {
                query = query.filter(stock_transfer::Column::FromLocationId.is_not_null());
            }
            (Some(MovementType::Adjustment), Some(loc)) | (None, Some(loc)) => {
                query = query.filter(
                    Condition::any()
                        .add(stock_transfer::Column::FromLocationId.eq(loc))
                        .add(stock_transfer::Column::ToLocationId.eq(loc)),
                );
            }
            (Some(MovementType::Adjustment), None) | (None, None) => {}
        }

        if let Some(product_id) = filters.product_id {
            query = query.filter(stock_transfer::Column::ProductId.eq(product_id));
        }
        if let Some(start) = filters.start_date {
            query = query.filter(stock_transfer::Column::CreatedAt.gte(start));
        }
        if let Some(end) = filters.end_date {
            query = query.filter(stock_transfer::Column::CreatedAt.lte(end));
        }

        let paginator = query
            .order_by_desc(stock_transfer::Column::CreatedAt)
            .order_by_desc(stock_transfer::Column::Id)
            .paginate(db, filters.limit);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let transfers = paginator
            .fetch_page(filters.page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        let product_names = self
            .load_product_names(tenant_id, &transfers)
            .await?;
        let location_names = self
            .load_location_names(tenant_id, &transfers)
            .await?;

        let movements = transfers
            .into_iter()
            .map(|t| {
                let direction =
                    MovementDirection::from_endpoints(t.from_location_id, t.to_location_id);
                let from_location_name = t
                    .from_location_id
                    .and_then(|id| location_names.get(&id).cloned());
                let to_location_name = t
                    .to_location_id
                    .and_then(|id| location_names.get(&id).cloned());
                let warehouse_name = compose_warehouse_name(
                    direction,
                    from_location_name.as_deref(),
                    to_location_name.as_deref(),
                );

                MovementView {
                    id: t.id,
                    product_id: t.product_id,
                    product_name: product_names.get(&t.product_id).cloned(),
                    direction,
                    quantity: t.quantity,
                    warehouse_name,
                    from_location_id: t.from_location_id,
                    from_location_name,
                    to_location_id: t.to_location_id,
                    to_location_name,
                    reason: t.notes,
                    reference_number: t.transfer_number,
                    created_by: t.created_by,
                    date: t.created_at,
                    status: t.status,
                }
            })
            .collect();

        Ok((movements, total))
    }

    async fn load_product_names(
        &self,
        tenant_id: Uuid,
        transfers: &[stock_transfer::Model],
    ) -> Result<HashMap<Uuid, String>, ServiceError> {
        let ids: Vec<Uuid> = transfers
            .iter()
            .map(|t| t.product_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let products = product::Entity::find()
            .filter(product::Column::TenantId.eq(tenant_id))
            .filter(product::Column::Id.is_in(ids))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(products.into_iter().map(|p| (p.id, p.name)).collect())
    }

    async fn load_location_names(
        &self,
        tenant_id: Uuid,
        transfers: &[stock_transfer::Model],
    ) -> Result<HashMap<Uuid, String>, ServiceError> {
        let ids: Vec<Uuid> = transfers
            .iter()
            .flat_map(|t| [t.from_location_id, t.to_location_id])
            .flatten()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let locations = location::Entity::find()
            .filter(location::Column::TenantId.eq(tenant_id))
            .filter(location::Column::Id.is_in(ids))
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)?;

        Ok(locations.into_iter().map(|l| (l.id, l.name)).collect())
    }
}

/// Human-facing description of where a movement happened: the single
/// endpoint for inbound/outbound, or the "A → B" path for transfers.
pub fn compose_warehouse_name(
    direction: MovementDirection,
    from_name: Option<&str>,
    to_name: Option<&str>,
) -> Option<String> {
    match direction {
        MovementDirection::In => to_name.map(str::to_string),
        MovementDirection::Out => from_name.map(str::to_string),
        MovementDirection::Transfer => match (from_name, to_name) {
            (Some(from), Some(to)) => Some(format!("{} → {}", from, to)),
            _ => None,
        },
    }
}

fn balance_key_filter(
    tenant_id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
) -> Condition {
    Condition::all()
        .add(inventory_location::Column::TenantId.eq(tenant_id))
        .add(inventory_location::Column::ProductId.eq(product_id))
        .add(inventory_location::Column::LocationId.eq(location_id))
}

/// Adds `quantity` to the balance, creating the row on first receipt. Two
/// writers can race to create the same row; the loser of the unique-index
/// conflict retries the increment against the winner's row.
async fn increment_balance<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
    quantity: i32,
    reorder_level: i32,
) -> Result<(), ServiceError> {
    let updated = inventory_location::Entity::update_many()
        .col_expr(
            inventory_location::Column::Quantity,
            Expr::col(inventory_location::Column::Quantity).add(quantity),
        )
        .col_expr(
            inventory_location::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(balance_key_filter(tenant_id, product_id, location_id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if updated.rows_affected > 0 {
        return Ok(());
    }

    match insert_balance_row(conn, tenant_id, product_id, location_id, quantity, reorder_level)
        .await
    {
        Ok(()) => Ok(()),
        Err(err) if is_unique_violation(&err) => {
            let retried = inventory_location::Entity::update_many()
                .col_expr(
                    inventory_location::Column::Quantity,
                    Expr::col(inventory_location::Column::Quantity).add(quantity),
                )
                .col_expr(
                    inventory_location::Column::UpdatedAt,
                    Expr::value(Utc::now()),
                )
                .filter(balance_key_filter(tenant_id, product_id, location_id))
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?;
            if retried.rows_affected == 0 {
                return Err(ServiceError::InternalError(
                    "balance upsert failed after conflict retry".to_string(),
                ));
            }
            Ok(())
        }
        Err(err) => Err(ServiceError::db_error(err)),
    }
}

/// Removes `quantity` from the balance. The precondition check and the
/// decrement are one conditional statement, so the balance can never be
/// driven below zero by concurrent writers. A missing row or a short balance
/// both surface as insufficient stock.
async fn decrement_balance<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let updated = inventory_location::Entity::update_many()
        .col_expr(
            inventory_location::Column::Quantity,
            Expr::col(inventory_location::Column::Quantity).sub(quantity),
        )
        .col_expr(
            inventory_location::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(balance_key_filter(tenant_id, product_id, location_id))
        .filter(inventory_location::Column::Quantity.gte(quantity))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if updated.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock);
    }
    Ok(())
}

/// Sets the balance to an absolute value, ignoring the prior quantity. This
/// is the correction mechanism; it upserts like an increment.
async fn set_balance<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
    quantity: i32,
    reorder_level: i32,
) -> Result<(), ServiceError> {
    let updated = inventory_location::Entity::update_many()
        .col_expr(inventory_location::Column::Quantity, Expr::value(quantity))
        .col_expr(
            inventory_location::Column::UpdatedAt,
            Expr::value(Utc::now()),
        )
        .filter(balance_key_filter(tenant_id, product_id, location_id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if updated.rows_affected > 0 {
        return Ok(());
    }

    match insert_balance_row(conn, tenant_id, product_id, location_id, quantity, reorder_level)
        .await
    {
        Ok(()) => Ok(()),
        Err(err) if is_unique_violation(&err) => {
            let retried = inventory_location::Entity::update_many()
                .col_expr(inventory_location::Column::Quantity, Expr::value(quantity))
                .col_expr(
                    inventory_location::Column::UpdatedAt,
                    Expr::value(Utc::now()),
                )
                .filter(balance_key_filter(tenant_id, product_id, location_id))
                .exec(conn)
                .await
                .map_err(ServiceError::db_error)?;
            if retried.rows_affected == 0 {
                return Err(ServiceError::InternalError(
                    "balance upsert failed after conflict retry".to_string(),
                ));
            }
            Ok(())
        }
        Err(err) => Err(ServiceError::db_error(err)),
    }
}

async fn insert_balance_row<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
    quantity: i32,
    reorder_level: i32,
) -> Result<(), DbErr> {
    let now = Utc::now();
    inventory_location::ActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        product_id: Set(product_id),
        location_id: Set(location_id),
        quantity: Set(quantity),
        reorder_level: Set(reorder_level),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;
    Ok(())
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

/// Sums the per-location balances for a product. This is the ground truth
/// the denormalized `products.quantity` must always equal.
pub async fn recompute_product_total<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
) -> Result<i32, ServiceError> {
    let total: Option<Option<i64>> = inventory_location::Entity::find()
        .select_only()
        .column_as(inventory_location::Column::Quantity.sum(), "total")
        .filter(inventory_location::Column::TenantId.eq(tenant_id))
        .filter(inventory_location::Column::ProductId.eq(product_id))
        .into_tuple()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let total = total.flatten().unwrap_or(0);
    i32::try_from(total)
        .map_err(|_| ServiceError::InternalError("product total overflows i32".to_string()))
}

/// Recomputes the product total from the per-location rows and writes it
/// back. A full recompute on every write costs one aggregate query but rules
/// out drift between the two representations.
async fn sync_product_total<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    product_id: Uuid,
) -> Result<i32, ServiceError> {
    // Take the product row lock before summing. Without it, two movements at
    // different locations of the same product can each sum a snapshot that
    // misses the other's uncommitted delta and the later commit writes back
    // a stale total. Renders as FOR UPDATE on Postgres; SQLite serializes
    // writers at the database level and ignores the clause.
    product::Entity::find()
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::TenantId.eq(tenant_id))
        .lock_exclusive()
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?;

    let total = recompute_product_total(conn, tenant_id, product_id).await?;

    product::Entity::update_many()
        .col_expr(product::Column::Quantity, Expr::value(total))
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::TenantId.eq(tenant_id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(total)
}

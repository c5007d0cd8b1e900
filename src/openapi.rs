//! OpenAPI document and the Swagger UI mount.

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::{common, health, movements};
use crate::services::movements::{MovementDirection, MovementType};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Stock Ledger API",
        description = "Multi-tenant stock movement ledger: per-location balances, \
                       an append-only movement log, and a filterable movement feed."
    ),
    paths(
        movements::list_movements,
        movements::create_movement,
        health::health,
    ),
    components(schemas(
        movements::CreateMovementRequest,
        movements::CreateMovementResponse,
        movements::CreatedMovement,
        movements::ListMovementsResponse,
        movements::MovementItem,
        common::PaginationMeta,
        health::HealthStatus,
        MovementType,
        MovementDirection,
    )),
    tags(
        (name = "movements", description = "Stock movement ledger"),
        (name = "health", description = "Service probes")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, TimeZone, Utc};
use common::TestApp;
use rstest::rstest;
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use uuid::Uuid;

use stockledger_api::entities::{inventory_location, product, stock_transfer};

async fn product_total(app: &TestApp, product_id: Uuid) -> i32 {
    product::Entity::find_by_id(product_id)
        .one(app.db.as_ref())
        .await
        .expect("query product")
        .expect("product exists")
        .quantity
}

#[tokio::test]
async fn inbound_movement_creates_balance_and_receipt() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main Warehouse").await;

    let (status, body) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "IN",
                "quantity": 25,
                "reason": "Initial receipt"
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    let movement = &body["movement"];
    assert_eq!(movement["productId"], json!(product.id));
    assert_eq!(movement["productName"], json!("Widget"));
    assert_eq!(movement["type"], json!("IN"));
    assert_eq!(movement["quantity"], json!(25));
    assert_eq!(movement["warehouseName"], json!("Main Warehouse"));
    assert!(movement["id"].is_string());
    assert!(movement["date"].is_string());

    assert_eq!(product_total(&app, product.id).await, 25);
}

#[tokio::test]
async fn repeated_inbound_accumulates_and_outbound_subtracts() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main").await;

    for qty in [10, 15] {
        let (status, _) = app
            .post(
                tenant,
                "/movements",
                json!({
                    "productId": product.id,
                    "locationId": location.id,
                    "type": "IN",
                    "quantity": qty
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "OUT",
                "quantity": 8
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    assert_eq!(product_total(&app, product.id).await, 17);
}

#[tokio::test]
async fn adjustment_sets_absolute_quantity() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main").await;

    let (status, _) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "IN",
                "quantity": 100
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Absolute set, not a delta.
    let (status, _) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "ADJUSTMENT",
                "quantity": 42,
                "reason": "Cycle count"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    assert_eq!(product_total(&app, product.id).await, 42);
}

#[tokio::test]
async fn adjustment_creates_balance_when_none_exists() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", Some(5)).await;
    let location = app.seed_location(tenant, "Main").await;

    let (status, _) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "ADJUSTMENT",
                "quantity": 7
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(product_total(&app, product.id).await, 7);

    // The new balance row inherits the product's reorder level.
    let balances = inventory_location::Entity::find()
        .all(app.db.as_ref())
        .await
        .expect("query balances");
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].reorder_level, 5);
}

#[tokio::test]
async fn outbound_exceeding_balance_is_rejected_without_side_effects() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main").await;

    let (status, _) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "IN",
                "quantity": 5
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "OUT",
                "quantity": 6
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Insufficient stock"));

    // Balance untouched, no log row appended for the failed attempt.
    assert_eq!(product_total(&app, product.id).await, 5);
    let transfers = stock_transfer::Entity::find()
        .all(app.db.as_ref())
        .await
        .expect("query transfers");
    assert_eq!(transfers.len(), 1);
}

#[tokio::test]
async fn outbound_from_location_with_no_balance_is_insufficient() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Empty Shelf").await;

    let (status, body) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "OUT",
                "quantity": 1
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Insufficient stock"));
}

#[tokio::test]
async fn unknown_product_and_location_are_not_found() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main").await;

    let (status, body) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": Uuid::new_v4(),
                "locationId": location.id,
                "type": "IN",
                "quantity": 1
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("Product not found"));

    let (status, body) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": Uuid::new_v4(),
                "type": "IN",
                "quantity": 1
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("Location not found"));
}

#[rstest]
#[case(json!({"type": "IN", "quantity": 0}))]
#[case(json!({"type": "IN", "quantity": -3}))]
#[case(json!({"type": "TRANSFER_OUT", "quantity": 5}))]
#[tokio::test]
async fn invalid_submissions_are_rejected(#[case] overrides: Value) {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main").await;

    let mut body = json!({
        "productId": product.id,
        "locationId": location.id
    });
    for (key, value) in overrides.as_object().expect("case is an object") {
        body[key] = value.clone();
    }

    let (status, response) = app.post(tenant, "/movements", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["error"], json!("Invalid input"));
    assert!(response["details"].is_string());
}

#[tokio::test]
async fn requests_without_tenant_header_are_unauthorized() {
    let app = TestApp::spawn().await;

    let request = Request::builder()
        .uri("/movements")
        .body(Body::empty())
        .expect("build request");
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn tenants_cannot_see_or_move_each_others_stock() {
    let app = TestApp::spawn().await;
    let tenant_a = Uuid::new_v4();
    let tenant_b = Uuid::new_v4();
    let product = app.seed_product(tenant_a, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant_a, "Main").await;

    let (status, _) = app
        .post(
            tenant_a,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "IN",
                "quantity": 10
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // The other tenant sees an empty feed.
    let (status, body) = app.get(tenant_b, "/movements").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], json!(0));

    // And cannot reference the first tenant's product at all.
    let (status, _) = app
        .post(
            tenant_b,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": location.id,
                "type": "OUT",
                "quantity": 1
            }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn feed_reports_directions_and_names() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let main = app.seed_location(tenant, "Main").await;
    let backroom = app.seed_location(tenant, "Backroom").await;

    let (status, _) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": main.id,
                "type": "IN",
                "quantity": 30,
                "referenceNumber": "PO-77"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = app
        .post(
            tenant,
            "/movements",
            json!({
                "productId": product.id,
                "locationId": main.id,
                "type": "OUT",
                "quantity": 4
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // A transfer-shaped row with both endpoints set.
    app.seed_transfer(
        tenant,
        product.id,
        9,
        Some(main.id),
        Some(backroom.id),
        Utc::now() + Duration::seconds(5),
    )
    .await;

    let (status, body) = app.get(tenant, "/movements").await;
    assert_eq!(status, StatusCode::OK);
    let movements = body["movements"].as_array().expect("movements array");
    assert_eq!(movements.len(), 3);

    // Newest first: the seeded transfer leads.
    assert_eq!(movements[0]["type"], json!("TRANSFER"));
    assert_eq!(movements[0]["warehouseName"], json!("Main → Backroom"));
    assert_eq!(movements[1]["type"], json!("OUT"));
    assert_eq!(movements[1]["warehouseName"], json!("Main"));
    assert_eq!(movements[2]["type"], json!("IN"));
    assert_eq!(movements[2]["productName"], json!("Widget"));
    assert_eq!(movements[2]["referenceNumber"], json!("PO-77"));
}

#[tokio::test]
async fn feed_filters_by_type_product_and_location() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let widget = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let gadget = app.seed_product(tenant, "Gadget", "GAD-1", None).await;
    let main = app.seed_location(tenant, "Main").await;
    let backroom = app.seed_location(tenant, "Backroom").await;

    for (product_id, location_id, movement_type, qty) in [
        (widget.id, main.id, "IN", 20),
        (widget.id, main.id, "OUT", 5),
        (gadget.id, backroom.id, "IN", 7),
    ] {
        let (status, _) = app
            .post(
                tenant,
                "/movements",
                json!({
                    "productId": product_id,
                    "locationId": location_id,
                    "type": movement_type,
                    "quantity": qty
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = app.get(tenant, "/movements?type=IN").await;
    assert_eq!(body["pagination"]["total"], json!(2));

    let (_, body) = app.get(tenant, "/movements?type=OUT").await;
    assert_eq!(body["pagination"]["total"], json!(1));
    assert_eq!(body["movements"][0]["quantity"], json!(5));

    let (_, body) = app
        .get(tenant, &format!("/movements?productId={}", gadget.id))
        .await;
    assert_eq!(body["pagination"]["total"], json!(1));
    assert_eq!(body["movements"][0]["productName"], json!("Gadget"));

    // A bare location filter matches the location as either endpoint.
    let (_, body) = app
        .get(tenant, &format!("/movements?locationId={}", main.id))
        .await;
    assert_eq!(body["pagination"]["total"], json!(2));

    let (_, body) = app
        .get(
            tenant,
            &format!("/movements?type=IN&locationId={}", backroom.id),
        )
        .await;
    assert_eq!(body["pagination"]["total"], json!(1));
    assert_eq!(body["movements"][0]["productName"], json!("Gadget"));
}

#[tokio::test]
async fn feed_filters_by_date_range() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main").await;

    let jan_10 = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).single().unwrap();
    let jan_20 = Utc.with_ymd_and_hms(2026, 1, 20, 12, 0, 0).single().unwrap();
    let feb_01 = Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).single().unwrap();
    for date in [jan_10, jan_20, feb_01] {
        app.seed_transfer(tenant, product.id, 1, None, Some(location.id), date)
            .await;
    }

    let (_, body) = app
        .get(tenant, "/movements?startDate=2026-01-15&endDate=2026-01-31")
        .await;
    assert_eq!(body["pagination"]["total"], json!(1));

    // A bare endDate keeps that whole day in range.
    let (_, body) = app.get(tenant, "/movements?endDate=2026-01-20").await;
    assert_eq!(body["pagination"]["total"], json!(2));

    let (status, body) = app.get(tenant, "/movements?startDate=not-a-date").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Invalid input"));
}

#[tokio::test]
async fn equal_timestamps_fall_back_to_insertion_order() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main").await;

    // Identical created_at on every row; ordering must fall back to the
    // time-ordered ids, newest insertion first.
    let moment = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).single().unwrap();
    for qty in [1, 2, 3] {
        app.seed_transfer(tenant, product.id, qty, None, Some(location.id), moment)
            .await;
    }

    let (status, body) = app.get(tenant, "/movements").await;
    assert_eq!(status, StatusCode::OK);
    let quantities: Vec<i64> = body["movements"]
        .as_array()
        .expect("movements array")
        .iter()
        .map(|m| m["quantity"].as_i64().expect("quantity"))
        .collect();
    assert_eq!(quantities, vec![3, 2, 1]);
}

#[tokio::test]
async fn feed_paginates_with_independent_total() {
    let app = TestApp::spawn().await;
    let tenant = Uuid::new_v4();
    let product = app.seed_product(tenant, "Widget", "WID-1", None).await;
    let location = app.seed_location(tenant, "Main").await;

    let base = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
    for i in 0..5 {
        app.seed_transfer(
            tenant,
            product.id,
            i + 1,
            None,
            Some(location.id),
            base + Duration::minutes(i as i64),
        )
        .await;
    }

    let (status, body) = app.get(tenant, "/movements?page=1&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["movements"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["pagination"]["page"], json!(1));
    assert_eq!(body["pagination"]["limit"], json!(2));
    assert_eq!(body["pagination"]["total"], json!(5));
    assert_eq!(body["pagination"]["totalPages"], json!(3));
    // Newest first.
    assert_eq!(body["movements"][0]["quantity"], json!(5));

    let (_, body) = app.get(tenant, "/movements?page=3&limit=2").await;
    assert_eq!(body["movements"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["movements"][0]["quantity"], json!(1));

    let (_, body) = app.get(tenant, "/movements?page=4&limit=2").await;
    assert_eq!(body["movements"].as_array().map(Vec::len), Some(0));
    assert_eq!(body["pagination"]["total"], json!(5));

    let (status, _) = app.get(tenant, "/movements?page=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = TestApp::spawn().await;

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("build request");
    let (status, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["database"], json!("up"));

    let request = Request::builder()
        .uri("/health/live")
        .body(Body::empty())
        .expect("build request");
    let (status, _) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
}
